//! Shared memory transport.
//!
//! Shared memory is a Windows-only local IPC mechanism backed by the
//! native client library. It is recognized so that `lpc:` data sources
//! fail with a clear message instead of falling through to TCP.

use crate::error::Result;
use crate::transport::BoxedTransport;

/// Open a shared memory connection to the local server.
pub async fn connect(server: &str) -> Result<BoxedTransport> {
    let reason = if cfg!(windows) {
        "shared memory requires the native SQL Server client; use tcp: or np: instead"
    } else {
        "shared memory is only available on Windows"
    };
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot connect to {server} over shared memory: {reason}"),
    )
    .into())
}
