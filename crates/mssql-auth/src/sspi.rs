//! SSPI provider seam and the buffer pool used to carry SSPI blobs.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use zeroize::Zeroize;

use crate::error::AuthError;

/// Produces the first SSPI (Negotiate/Kerberos) blob for LOGIN7.
///
/// Platform security packages live outside this crate; the connection
/// pipeline only needs the initial token.
pub trait SspiProvider: Send + Sync {
    /// Largest blob this provider can produce.
    fn max_blob_len(&self) -> usize;

    /// Write the initial blob for `server_spn` into `out` and return its
    /// length.
    fn initial_blob(&self, server_spn: &str, out: &mut [u8]) -> Result<usize, AuthError>;
}

/// Pool of SSPI buffers. Buffers are zeroed before they go back.
#[derive(Debug, Clone, Default)]
pub struct SspiBufferPool {
    free: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SspiBufferPool {
    /// An empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rent a zero-filled buffer of exactly `len` bytes.
    #[must_use]
    pub fn rent(&self, len: usize) -> SspiBuffer {
        let mut buf = self.free.lock().pop().unwrap_or_default();
        buf.resize(len, 0);
        SspiBuffer {
            buf,
            pool: Arc::clone(&self.free),
        }
    }

    /// Buffers waiting to be reused.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Rent a buffer sized for `provider` and fill it with the initial blob.
    pub fn initial_blob(
        &self,
        provider: &dyn SspiProvider,
        server_spn: &str,
    ) -> Result<SspiBuffer, AuthError> {
        let max = provider.max_blob_len();
        let mut buffer = self.rent(max);
        let len = provider.initial_blob(server_spn, &mut buffer)?;
        if len > max {
            return Err(AuthError::SspiBlobTooLarge { len, max });
        }
        buffer.truncate(len);
        Ok(buffer)
    }
}

/// A rented buffer, zeroed and returned to its pool on drop.
pub struct SspiBuffer {
    buf: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SspiBuffer {
    /// Shorten to the produced length, wiping the tail.
    pub fn truncate(&mut self, len: usize) {
        if len < self.buf.len() {
            self.buf[len..].zeroize();
            self.buf.truncate(len);
        }
    }
}

impl Deref for SspiBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for SspiBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for SspiBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        // zeroize clears the length too; wipe the full capacity.
        buf.zeroize();
        self.pool.lock().push(buf);
    }
}

impl fmt::Debug for SspiBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SspiBuffer")
            .field("len", &self.buf.len())
            .finish_non_exhaustive()
    }
}

/// Service principal name for a SQL Server endpoint.
#[must_use]
pub fn server_spn(host: &str, port: Option<u16>, instance: Option<&str>) -> String {
    match (port, instance) {
        (Some(port), _) => format!("MSSQLSvc/{host}:{port}"),
        (None, Some(instance)) => format!("MSSQLSvc/{host}:{instance}"),
        (None, None) => format!("MSSQLSvc/{host}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FixedProvider(Vec<u8>, usize);

    impl SspiProvider for FixedProvider {
        fn max_blob_len(&self) -> usize {
            self.1
        }

        fn initial_blob(&self, _server_spn: &str, out: &mut [u8]) -> Result<usize, AuthError> {
            let n = self.0.len().min(out.len());
            out[..n].copy_from_slice(&self.0[..n]);
            Ok(self.0.len())
        }
    }

    #[test]
    fn test_rent_and_return() {
        let pool = SspiBufferPool::new();
        {
            let mut buf = pool.rent(16);
            buf[0] = 0xAA;
            assert_eq!(buf.len(), 16);
        }
        assert_eq!(pool.available(), 1);

        let reused = pool.rent(8);
        assert!(reused.iter().all(|b| *b == 0));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_returned_buffer_is_wiped() {
        let pool = SspiBufferPool::new();
        {
            let mut buf = pool.rent(4);
            buf.fill(0x5A);
        }
        let raw = pool.free.lock().pop().unwrap();
        assert!(raw.is_empty());
        assert!(raw.capacity() >= 4);
    }

    #[test]
    fn test_initial_blob() {
        let pool = SspiBufferPool::new();
        let provider = FixedProvider(vec![0x60, 0x82, 0x01], 64);
        let blob = pool.initial_blob(&provider, "MSSQLSvc/db:1433").unwrap();
        assert_eq!(&blob[..], &[0x60, 0x82, 0x01]);
    }

    #[test]
    fn test_blob_larger_than_declared() {
        let pool = SspiBufferPool::new();
        let provider = FixedProvider(vec![1; 10], 4);
        let err = pool.initial_blob(&provider, "spn").unwrap_err();
        assert!(matches!(err, AuthError::SspiBlobTooLarge { len: 10, max: 4 }));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_server_spn() {
        assert_eq!(server_spn("db.corp", Some(1433), None), "MSSQLSvc/db.corp:1433");
        assert_eq!(server_spn("db.corp", None, Some("sales")), "MSSQLSvc/db.corp:sales");
        assert_eq!(server_spn("db.corp", None, None), "MSSQLSvc/db.corp");
    }
}
