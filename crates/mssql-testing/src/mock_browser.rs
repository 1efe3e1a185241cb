//! SQL Server Browser stand-in answering SSRP unicast requests.
//!
//! Instance lookups (`CLNT_UCAST_INST`) get an `SVR_RESP` listing the
//! instance's TCP port; DAC lookups (`CLNT_UCAST_DAC`) get the 6-byte DAC
//! answer. Unknown instances are ignored, as the real browser does.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::mock_server::Result;

const CLNT_UCAST_INST: u8 = 0x04;
const CLNT_UCAST_DAC: u8 = 0x0F;
const SVR_RESP: u8 = 0x05;
const DAC_PROTOCOL_VERSION: u8 = 0x01;

/// Builder for [`MockBrowser`].
#[derive(Debug, Default)]
pub struct MockBrowserBuilder {
    instances: HashMap<String, u16>,
    dac: HashMap<String, u16>,
}

impl MockBrowserBuilder {
    /// Publish `instance` on TCP `port`.
    #[must_use]
    pub fn with_instance(mut self, instance: &str, port: u16) -> Self {
        self.instances.insert(instance.to_ascii_uppercase(), port);
        self
    }

    /// Publish the admin connection of `instance` on `port`.
    #[must_use]
    pub fn with_dac(mut self, instance: &str, port: u16) -> Self {
        self.dac.insert(instance.to_ascii_uppercase(), port);
        self
    }

    /// Bind a UDP socket and start answering.
    pub async fn build(self) -> Result<MockBrowser> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let queries = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let counter = Arc::clone(&queries);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        let (len, peer) = match result {
                            Ok(received) => received,
                            Err(e) => {
                                tracing::debug!(error = %e, "browser receive failed");
                                continue;
                            }
                        };
                        counter.fetch_add(1, Ordering::SeqCst);
                        if let Some(reply) = self.answer(&buf[..len]) {
                            if let Err(e) = socket.send_to(&reply, peer).await {
                                tracing::debug!(%peer, error = %e, "browser reply failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(MockBrowser {
            addr,
            queries,
            shutdown_tx,
        })
    }

    fn answer(&self, request: &[u8]) -> Option<Vec<u8>> {
        match request {
            [CLNT_UCAST_INST, name @ ..] => {
                let instance = instance_name(name)?;
                let port = self.instances.get(&instance)?;
                let body = format!(
                    "ServerName;MOCK;InstanceName;{instance};IsClustered;No;\
                     Version;16.0.1000.6;tcp;{port};;"
                );
                let mut reply = BytesMut::with_capacity(body.len() + 3);
                reply.put_u8(SVR_RESP);
                reply.put_u16_le(body.len() as u16);
                reply.put_slice(body.as_bytes());
                Some(reply.to_vec())
            }
            [CLNT_UCAST_DAC, DAC_PROTOCOL_VERSION, name @ ..] => {
                let port = self.dac.get(&instance_name(name)?)?;
                let mut reply = BytesMut::with_capacity(6);
                reply.put_u8(SVR_RESP);
                reply.put_u16_le(6);
                reply.put_u8(DAC_PROTOCOL_VERSION);
                reply.put_u16_le(*port);
                Some(reply.to_vec())
            }
            _ => None,
        }
    }
}

fn instance_name(raw: &[u8]) -> Option<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .ok()
        .map(str::to_ascii_uppercase)
}

/// A browser listening on a local UDP port.
#[derive(Debug)]
pub struct MockBrowser {
    addr: SocketAddr,
    queries: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MockBrowser {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> MockBrowserBuilder {
        MockBrowserBuilder::default()
    }

    /// UDP port to configure as the client's browser port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Requests received, answered or not.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Stop answering.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockBrowser {
    fn drop(&mut self) {
        self.stop();
    }
}
