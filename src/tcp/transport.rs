use crate::{NetError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::debug;

/// Byte stream a connection runs over: plain TCP or TLS on top of TCP
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Resolve `host:port` and connect to the first address that accepts,
/// optionally from a fixed local endpoint.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    local_addr: Option<SocketAddr>,
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let addrs = lookup_host((host, port))
        .await
        .map_err(|e| NetError::HandshakeFailed(format!("failed to resolve {host}:{port}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        debug!(%addr, "Connecting");
        match timeout(connect_timeout, connect_addr(addr, local_addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => last_error = Some(e.to_string()),
            Err(_) => last_error = Some(format!("connection to {addr} timed out")),
        }
    }

    Err(NetError::HandshakeFailed(format!(
        "failed to connect to {host}:{port}: {}",
        last_error.unwrap_or_else(|| "no addresses resolved".to_string())
    )))
}

async fn connect_addr(addr: SocketAddr, local_addr: Option<SocketAddr>) -> std::io::Result<TcpStream> {
    let Some(local) = local_addr else {
        return TcpStream::connect(addr).await;
    };
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(local)?;
    socket.connect(addr).await
}
