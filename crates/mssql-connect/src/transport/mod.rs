//! Byte transports to the server.
//!
//! Strategies are tried in a fixed priority order (shared memory, TCP,
//! named pipe) through a [`ReturningChain`]. The first strategy that
//! accepts the data source and connects wins; if every accepting strategy
//! fails, the last failure is reported.

pub mod named_pipe;
pub mod shared_memory;
pub mod ssrp;
pub mod tcp;

use std::ops::ControlFlow;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::chain::{ChainBehavior, Outcome, ReturningChain};
use crate::datasource::{DataSource, Protocol};
use crate::error::Result;

/// A connected byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Transport with its concrete type erased.
pub type BoxedTransport = Box<dyn Transport>;

/// A way of reaching the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Local shared memory.
    SharedMemory,
    /// TCP socket.
    Tcp,
    /// Named pipe.
    NamedPipe,
}

impl Strategy {
    /// Order in which strategies are offered a data source.
    pub const PRIORITY: [Strategy; 3] = [Self::SharedMemory, Self::Tcp, Self::NamedPipe];

    /// Whether this strategy handles `data_source`.
    ///
    /// On Windows shared memory is also offered a local data source that
    /// names no protocol; TCP is tried next if it fails.
    #[must_use]
    pub fn accepts(self, data_source: &DataSource) -> bool {
        match self {
            Self::SharedMemory => {
                data_source.protocol == Protocol::SharedMemory
                    || (cfg!(windows)
                        && data_source.protocol == Protocol::Unspecified
                        && data_source.is_local())
            }
            Self::Tcp => matches!(
                data_source.protocol,
                Protocol::Unspecified | Protocol::Tcp | Protocol::Admin
            ),
            Self::NamedPipe => data_source.protocol == Protocol::NamedPipe,
        }
    }

    async fn open(self, data_source: &DataSource, deadline: Instant) -> Outcome<BoxedTransport> {
        if !self.accepts(data_source) {
            return Outcome::Pass;
        }
        tracing::debug!(strategy = ?self, server = %data_source.server_name, "opening transport");
        let result = match self {
            Self::SharedMemory => shared_memory::connect(&data_source.server_name).await,
            Self::Tcp => tcp::connect(&data_source.server_name, data_source.tcp_port(), deadline)
                .await
                .map(|stream| Box::new(stream) as BoxedTransport),
            Self::NamedPipe => match data_source.pipe_path() {
                Some(path) => named_pipe::connect(&path, deadline).await,
                None => return Outcome::Pass,
            },
        };
        match result {
            Ok(transport) => Outcome::Return(transport),
            Err(error) => Outcome::Reject(error),
        }
    }
}

/// Open a transport for `data_source`.
///
/// SSRP lookups must already have filled in the port.
pub async fn open(data_source: &DataSource, deadline: Instant) -> Result<BoxedTransport> {
    let mut chain = ReturningChain::new("transport", ChainBehavior::ThrowLast);
    for strategy in Strategy::PRIORITY {
        if let ControlFlow::Break(result) = chain.offer(strategy.open(data_source, deadline).await) {
            return result;
        }
    }
    chain.finish()
}
