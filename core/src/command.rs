use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::timeout;
use tracing::{trace, warn};

use crate::consts::MAX_DATAGRAM_SIZE;
use crate::error::Result;
use crate::sockets::PoolSocket;

/// Sends built frames and collects single-datagram replies.
///
/// The executor never retries and never blocks past the socket's
/// configured timeout; an elapsed timeout is `Ok(None)` and the caller
/// decides whether that is an error.
#[derive(Debug, Default, Clone)]
pub struct CommandExecutor {
    dump_dir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append every raw frame to `dump_dir`, for protocol debugging.
    pub fn with_dump_dir(dump_dir: PathBuf) -> Self {
        Self {
            dump_dir: Some(dump_dir),
        }
    }

    /// Request/response round trip on a connected socket.
    pub async fn round_trip(&self, sock: &PoolSocket, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        self.dump("request", frame);
        sock.socket.send(frame).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        match timeout(sock.timeout, sock.socket.recv(&mut buf)).await {
            Err(_) => {
                trace!("no response within {:?}", sock.timeout);
                Ok(None)
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(len)) => {
                buf.truncate(len);
                self.dump("response", &buf);
                Ok(Some(buf))
            }
        }
    }

    /// Fire-and-forget send; any reply arrives on a multicast join socket.
    pub async fn send_only(&self, sock: &PoolSocket, frame: &[u8]) -> Result<()> {
        self.dump("request", frame);
        sock.socket.send(frame).await?;
        Ok(())
    }

    /// One datagram from a bound (unconnected) socket, with its source.
    pub async fn recv_from(
        &self,
        sock: &PoolSocket,
    ) -> Result<Option<(Vec<u8>, std::net::SocketAddr)>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        match timeout(sock.timeout, sock.socket.recv_from(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok((len, addr))) => {
                buf.truncate(len);
                self.dump("response", &buf);
                Ok(Some((buf, addr)))
            }
        }
    }

    fn dump(&self, direction: &str, frame: &[u8]) {
        let Some(dir) = &self.dump_dir else {
            return;
        };

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = dir.join(format!("{nanos}_{direction}.bin"));

        if let Err(e) = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, frame)) {
            warn!("failed to dump payload to {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sockets::SocketPool;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    async fn echo_peer() -> (UdpSocket, u16) {
        let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = peer.local_addr().unwrap().port();
        (peer, port)
    }

    #[tokio::test]
    async fn round_trip_returns_the_reply() {
        let (peer, port) = echo_peer().await;
        let mut pool = SocketPool::new();
        pool.open_service_socket(Ipv4Addr::LOCALHOST, port).await.unwrap();

        let executor = CommandExecutor::new();
        let sock = pool.get(port).unwrap().clone();

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, addr) = peer.recv_from(&mut buf).await.unwrap();
            peer.send_to(&buf[..len], addr).await.unwrap();
        });

        let reply = executor
            .round_trip(&sock, &[0x27, 0xff, 0x00, 0x0a, 0x00, 0x01, 0x10, 0x02, 0x00, 0x00])
            .await
            .unwrap();

        assert_eq!(
            reply.as_deref(),
            Some(&[0x27u8, 0xff, 0x00, 0x0a, 0x00, 0x01, 0x10, 0x02, 0x00, 0x00][..])
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silence_is_a_timeout_not_an_error() {
        let (_peer, port) = echo_peer().await;
        let mut pool = SocketPool::new();
        pool.open_service_socket(Ipv4Addr::LOCALHOST, port).await.unwrap();

        let executor = CommandExecutor::new();
        let mut sock = pool.get(port).unwrap().clone();
        sock.timeout = Duration::from_millis(20);

        let reply = executor.round_trip(&sock, &[0x27, 0x00]).await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn dumps_request_payloads_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let (_peer, port) = echo_peer().await;
        let mut pool = SocketPool::new();
        pool.open_service_socket(Ipv4Addr::LOCALHOST, port).await.unwrap();

        let executor = CommandExecutor::with_dump_dir(dir.path().to_path_buf());
        let mut sock = pool.get(port).unwrap().clone();
        sock.timeout = Duration::from_millis(5);
        let _ = executor.round_trip(&sock, &[0x27, 0xaa]).await.unwrap();

        let dumped: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(dumped.len(), 1);
    }
}
