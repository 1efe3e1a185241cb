//! Named pipe transport. Only available on Windows.

use tokio::time::Instant;

use crate::error::Result;
use crate::transport::BoxedTransport;

/// Open the pipe at `path` (`\\host\pipe\name`).
///
/// A busy pipe is retried until `deadline`.
#[cfg(windows)]
pub async fn connect(path: &str, deadline: Instant) -> Result<BoxedTransport> {
    use std::time::Duration;

    use tokio::net::windows::named_pipe::ClientOptions;

    use crate::error::Error;

    const ERROR_PIPE_BUSY: i32 = 231;

    loop {
        match ClientOptions::new().open(path) {
            Ok(client) => {
                tracing::debug!(path, "named pipe opened");
                return Ok(Box::new(client));
            }
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            return Err(Error::ConnectionTimeout);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Named pipes are not available on this platform.
#[cfg(not(windows))]
pub async fn connect(path: &str, _deadline: Instant) -> Result<BoxedTransport> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("named pipe {path} cannot be opened: named pipes require Windows"),
    )
    .into())
}

#[cfg(all(test, not(windows)))]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_unsupported_off_windows() {
        match connect(r"\\.\pipe\sql\query", Instant::now()).await {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::Unsupported),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("named pipe opened off Windows"),
        }
    }
}
