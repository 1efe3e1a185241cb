//! TCP transport.

use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};

use crate::error::{Error, Result};

/// Connect to `host:port`, trying every resolved address in order.
///
/// Name resolution and every connect attempt share `deadline`.
pub async fn connect(host: &str, port: u16, deadline: Instant) -> Result<TcpStream> {
    let addrs: Vec<_> = timeout_at(deadline, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| Error::ConnectionTimeout)??
        .collect();
    tracing::debug!(host, port, addresses = addrs.len(), "resolved server address");

    let mut last_error = None;
    for addr in addrs {
        match timeout_at(deadline, TcpStream::connect(addr)).await {
            Err(_) => return Err(Error::ConnectionTimeout),
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                tracing::debug!(%addr, "TCP connection established");
                return Ok(stream);
            }
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "TCP connect failed, trying next address");
                last_error = Some(e);
            }
        }
    }

    Err(Error::Io(last_error.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{host} resolved to no addresses"),
        )
    })))
}
