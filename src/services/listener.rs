use crate::errors::TunnelError;
use crate::services::logger::Logger;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpStream;

/// TCP listener pinned to 127.0.0.1 on an OS-assigned port.
///
/// The address is not configurable. `accept_one` consumes the listener, so once a
/// connection has been taken the socket is closed and later connects are refused.
#[derive(Debug)]
pub struct LoopbackListener {
    inner: std::net::TcpListener,
    addr: SocketAddr,
}

impl LoopbackListener {
    pub fn bind() -> Result<Self, TunnelError> {
        let inner = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(|err| {
            TunnelError::setup(format!("failed to bind loopback listener: {}", err))
        })?;
        let addr = inner
            .local_addr()
            .map_err(|err| TunnelError::setup(format!("failed to read bound address: {}", err)))?;
        if !addr.ip().is_loopback() {
            return Err(TunnelError::setup(format!(
                "listener bound to non-loopback address {}",
                addr
            )));
        }
        inner
            .set_nonblocking(true)
            .map_err(|err| TunnelError::setup(format!("failed to configure listener: {}", err)))?;
        Ok(Self { inner, addr })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn accept_one(self, logger: &Logger) -> Result<(TcpStream, SocketAddr), TunnelError> {
        let listener = tokio::net::TcpListener::from_std(self.inner)
            .map_err(|err| TunnelError::internal(format!("failed to register listener: {}", err)))?;
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|err| TunnelError::handshake(format!("failed to accept connection: {}", err)))?;
        if let Err(err) = stream.set_nodelay(true) {
            logger.debug(
                "failed to disable nagle on tunnel connection",
                Some(&serde_json::json!({ "error": err.to_string() })),
            );
        }
        Ok((stream, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_loopback_on_ephemeral_port() {
        let listener = LoopbackListener::bind().unwrap();
        let addr = listener.local_addr();
        assert!(addr.ip().is_loopback());
        assert_ne!(listener.port(), 0);

        let client = TcpStream::connect(("127.0.0.1", listener.port())).await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn second_connection_is_refused_after_accept() {
        let listener = LoopbackListener::bind().unwrap();
        let port = listener.port();

        let client = tokio::spawn(async move { TcpStream::connect(("127.0.0.1", port)).await });
        let (_stream, peer) = listener.accept_one(&Logger::new("test")).await.unwrap();
        assert!(peer.ip().is_loopback());
        assert!(client.await.unwrap().is_ok());

        let again = TcpStream::connect(("127.0.0.1", port)).await;
        assert!(again.is_err(), "listener should be closed after one accept");
    }

    #[test]
    fn two_listeners_get_distinct_ports() {
        let first = LoopbackListener::bind().unwrap();
        let second = LoopbackListener::bind().unwrap();
        assert_ne!(first.port(), second.port());
    }
}
