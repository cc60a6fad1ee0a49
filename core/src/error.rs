use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetaudioError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("discovery error: {0}")]
    Discovery(String),
}

pub type Result<T> = std::result::Result<T, NetaudioError>;
