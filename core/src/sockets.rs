use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::consts::{
    METERING_SOCKET_TIMEOUT, PORT_SOCKET_TIMEOUT, SERVICE_SOCKET_TIMEOUT, WELL_KNOWN_PORTS,
};
use crate::error::Result;

/// A pool socket plus the read timeout the executor applies to it.
#[derive(Debug, Clone)]
pub struct PoolSocket {
    pub socket: Arc<UdpSocket>,
    pub timeout: Duration,
}

/// Per-device UDP endpoints, keyed by remote port.
///
/// Service-port sockets carry the request/response traffic and get the
/// 1-second timeout. Well-known-port sockets are fire-and-forget writes
/// into the multicast infrastructure. The metering socket is bound, not
/// connected: replies come from the device's data plane.
///
/// Sockets open lazily and close when the pool is dropped, which also
/// cancels any in-flight reads.
#[derive(Debug, Default, Clone)]
pub struct SocketPool {
    sockets: HashMap<u16, PoolSocket>,
    metering: Option<PoolSocket>,
}

impl SocketPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.sockets.contains_key(&port)
    }

    pub fn get(&self, port: u16) -> Option<&PoolSocket> {
        self.sockets.get(&port)
    }

    /// Opens the connected request/response socket for one discovered
    /// service port.
    pub async fn open_service_socket(&mut self, ipv4: Ipv4Addr, port: u16) -> Result<()> {
        self.open(ipv4, port, SERVICE_SOCKET_TIMEOUT).await
    }

    /// Opens the fire-and-forget sockets for the well-known control,
    /// settings and info ports.
    pub async fn open_port_sockets(&mut self, ipv4: Ipv4Addr) -> Result<()> {
        for port in WELL_KNOWN_PORTS {
            self.open(ipv4, port, PORT_SOCKET_TIMEOUT).await?;
        }
        Ok(())
    }

    async fn open(&mut self, ipv4: Ipv4Addr, port: u16, timeout: Duration) -> Result<()> {
        if self.contains(port) {
            return Ok(());
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect((ipv4, port)).await?;
        debug!("opened control socket {} -> {}:{}", socket.local_addr()?, ipv4, port);

        self.sockets.insert(
            port,
            PoolSocket {
                socket: Arc::new(socket),
                timeout,
            },
        );
        Ok(())
    }

    /// The metering receive socket, bound to the local address the device
    /// was told to stream levels to.
    pub async fn metering_socket(&mut self, local_ip: Ipv4Addr, port: u16) -> Result<&PoolSocket> {
        if self.metering.is_none() {
            let socket = UdpSocket::bind((local_ip, port)).await?;
            debug!("opened metering socket on {}:{}", local_ip, port);
            self.metering = Some(PoolSocket {
                socket: Arc::new(socket),
                timeout: METERING_SOCKET_TIMEOUT,
            });
        }

        Ok(self.metering.as_ref().unwrap())
    }

    /// Drops every socket; pending reads resolve as cancelled.
    pub fn close(&mut self) {
        self.sockets.clear();
        self.metering = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::DEVICE_SETTINGS_PORT;

    #[tokio::test]
    async fn service_socket_opens_once() {
        let mut pool = SocketPool::new();
        let ip = Ipv4Addr::LOCALHOST;

        pool.open_service_socket(ip, 14_336).await.unwrap();
        let first = pool.get(14_336).unwrap().socket.local_addr().unwrap();

        pool.open_service_socket(ip, 14_336).await.unwrap();
        let second = pool.get(14_336).unwrap().socket.local_addr().unwrap();

        assert_eq!(first, second);
        assert_eq!(pool.get(14_336).unwrap().timeout, SERVICE_SOCKET_TIMEOUT);
    }

    #[tokio::test]
    async fn port_sockets_cover_the_well_known_set() {
        let mut pool = SocketPool::new();
        pool.open_port_sockets(Ipv4Addr::LOCALHOST).await.unwrap();

        for port in WELL_KNOWN_PORTS {
            let sock = pool.get(port).expect("socket for well-known port");
            assert_eq!(sock.timeout, PORT_SOCKET_TIMEOUT);
        }
        assert_eq!(
            pool.get(DEVICE_SETTINGS_PORT).unwrap().timeout,
            PORT_SOCKET_TIMEOUT
        );
    }

    #[tokio::test]
    async fn close_empties_the_pool() {
        let mut pool = SocketPool::new();
        pool.open_service_socket(Ipv4Addr::LOCALHOST, 14_337).await.unwrap();
        pool.close();
        assert!(pool.get(14_337).is_none());
    }
}
