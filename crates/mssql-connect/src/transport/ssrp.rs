//! SQL Server Resolution Protocol: asking the SQL Server Browser on UDP
//! 1434 for the TCP port of a named instance.

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use crate::error::{Error, Result};

/// UDP port of the SQL Server Browser.
pub const SSRP_PORT: u16 = 1434;

const CLNT_UCAST_INST: u8 = 0x04;
const CLNT_UCAST_DAC: u8 = 0x0F;
const SVR_RESP: u8 = 0x05;
const DAC_PROTOCOL_VERSION: u8 = 0x01;
const DAC_RESPONSE_LEN: usize = 6;
const MAX_RESPONSE_LEN: usize = 4096;

/// Instance used for DAC lookups when none is named.
pub const DEFAULT_DAC_INSTANCE: &str = "mssqlserver";

/// Build a `CLNT_UCAST_INST` request for `instance`.
pub fn instance_request(instance: &str) -> Result<Bytes> {
    let name = ascii_instance(instance)?;
    let mut buf = BytesMut::with_capacity(name.len() + 2);
    buf.put_u8(CLNT_UCAST_INST);
    buf.put_slice(name);
    buf.put_u8(0);
    Ok(buf.freeze())
}

/// Build a `CLNT_UCAST_DAC` request for `instance`.
pub fn dac_request(instance: &str) -> Result<Bytes> {
    let name = ascii_instance(instance)?;
    let mut buf = BytesMut::with_capacity(name.len() + 3);
    buf.put_u8(CLNT_UCAST_DAC);
    buf.put_u8(DAC_PROTOCOL_VERSION);
    buf.put_slice(name);
    buf.put_u8(0);
    Ok(buf.freeze())
}

/// Extract the TCP port from an `SVR_RESP` answer.
///
/// The body is `;`-separated `key;value` pairs; the value following the
/// `tcp` key is the port.
pub fn parse_instance_response(response: &[u8]) -> std::result::Result<u16, String> {
    let [SVR_RESP, lo, hi, body @ ..] = response else {
        return Err("response is not an SVR_RESP message".into());
    };
    if usize::from(u16::from_le_bytes([*lo, *hi])) != body.len() {
        return Err("response length does not match its header".into());
    }
    let text = std::str::from_utf8(body).map_err(|_| "response is not ASCII".to_string())?;
    let elements: Vec<&str> = text.split(';').collect();
    let port = elements
        .iter()
        .position(|element| element.eq_ignore_ascii_case("tcp"))
        .and_then(|index| elements.get(index + 1))
        .ok_or_else(|| "instance has no TCP endpoint".to_string())?;
    port.parse()
        .map_err(|_| format!("invalid TCP port '{port}' in response"))
}

/// Extract the DAC port from a 6-byte DAC answer.
pub fn parse_dac_response(response: &[u8]) -> std::result::Result<u16, String> {
    match response {
        [SVR_RESP, size_lo, size_hi, DAC_PROTOCOL_VERSION, port_lo, port_hi]
            if usize::from(u16::from_le_bytes([*size_lo, *size_hi])) == DAC_RESPONSE_LEN =>
        {
            Ok(u16::from_le_bytes([*port_lo, *port_hi]))
        }
        _ => Err("malformed DAC response".into()),
    }
}

/// Ask the browser on `server` for the TCP port of `instance`.
pub async fn resolve_instance_port(
    server: &str,
    instance: &str,
    browser_port: u16,
    deadline: Instant,
) -> Result<u16> {
    let request = instance_request(instance)?;
    let response = exchange(server, browser_port, &request, deadline).await;
    let port = response
        .and_then(|bytes| parse_instance_response(&bytes).map_err(|r| ssrp_error(server, instance, r)))
        .map_err(|e| as_ssrp_error(e, server, instance))?;
    tracing::debug!(server, instance, port, "SSRP resolved instance port");
    Ok(port)
}

/// Ask the browser on `server` for the dedicated admin connection port.
pub async fn resolve_dac_port(
    server: &str,
    instance: &str,
    browser_port: u16,
    deadline: Instant,
) -> Result<u16> {
    let request = dac_request(instance)?;
    let response = exchange(server, browser_port, &request, deadline).await;
    let port = response
        .and_then(|bytes| parse_dac_response(&bytes).map_err(|r| ssrp_error(server, instance, r)))
        .map_err(|e| as_ssrp_error(e, server, instance))?;
    tracing::debug!(server, instance, port, "SSRP resolved DAC port");
    Ok(port)
}

async fn exchange(server: &str, port: u16, request: &[u8], deadline: Instant) -> Result<Vec<u8>> {
    let addrs: Vec<_> = timeout_at(deadline, tokio::net::lookup_host((server, port)))
        .await
        .map_err(|_| Error::ConnectionTimeout)??
        .collect();
    exchange_addrs(&addrs, request, deadline).await
}

/// Send `request` to each address in turn until one answers.
///
/// Every address gets an equal share of the time left, so a silent first
/// address cannot starve the others.
async fn exchange_addrs(addrs: &[SocketAddr], request: &[u8], deadline: Instant) -> Result<Vec<u8>> {
    let mut last_error = None;
    for (index, addr) in addrs.iter().enumerate() {
        let left = (addrs.len() - index) as u32;
        let share = deadline.saturating_duration_since(Instant::now()) / left;
        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let attempt = async {
            let socket = UdpSocket::bind(bind).await?;
            socket.send_to(request, addr).await?;
            let mut buf = vec![0u8; MAX_RESPONSE_LEN];
            let (len, _) = socket.recv_from(&mut buf).await?;
            buf.truncate(len);
            Ok::<_, std::io::Error>(buf)
        };
        let error = match timeout_at(Instant::now() + share, attempt).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(e)) => Error::Io(e),
            Err(_) => Error::ConnectionTimeout,
        };
        tracing::debug!(%addr, error = %error, "SSRP request failed");
        last_error = Some(error);
    }
    Err(last_error.unwrap_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "host resolved to no addresses",
        ))
    }))
}

fn ascii_instance(instance: &str) -> Result<&[u8]> {
    if instance.is_empty() || !instance.is_ascii() {
        return Err(Error::InvalidArgument(format!(
            "instance name '{instance}' must be non-empty ASCII"
        )));
    }
    Ok(instance.as_bytes())
}

fn ssrp_error(server: &str, instance: &str, reason: String) -> Error {
    Error::Ssrp {
        server: server.to_string(),
        instance: instance.to_string(),
        reason,
    }
}

fn as_ssrp_error(error: Error, server: &str, instance: &str) -> Error {
    match error {
        Error::Io(e) => ssrp_error(server, instance, e.to_string()),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn svr_resp(body: &str) -> Vec<u8> {
        let mut out = vec![SVR_RESP];
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(body.as_bytes());
        out
    }

    #[test]
    fn test_instance_request_layout() {
        assert_eq!(&instance_request("sqlexpress").unwrap()[..], b"\x04sqlexpress\x00");
        assert!(instance_request("").is_err());
        assert!(instance_request("inst\u{e9}").is_err());
    }

    #[test]
    fn test_dac_request_layout() {
        assert_eq!(&dac_request("mssqlserver").unwrap()[..], b"\x0f\x01mssqlserver\x00");
    }

    #[test]
    fn test_parse_instance_response() {
        let body = "ServerName;DB1;InstanceName;SQLEXPRESS;IsClustered;No;Version;16.0.1000.6;tcp;49723;np;\\\\DB1\\pipe\\MSSQL$SQLEXPRESS\\sql\\query;;";
        assert_eq!(parse_instance_response(&svr_resp(body)).unwrap(), 49723);
    }

    #[test]
    fn test_parse_instance_response_errors() {
        assert!(parse_instance_response(&[]).is_err());
        assert!(parse_instance_response(&svr_resp("InstanceName;X;np;pipe;;")).is_err());
        assert!(parse_instance_response(&svr_resp("tcp")).is_err());
        assert!(parse_instance_response(&svr_resp("tcp;notaport;;")).is_err());

        let mut wrong_len = svr_resp("tcp;1433;;");
        wrong_len[1] = 0xFF;
        assert!(parse_instance_response(&wrong_len).is_err());
    }

    #[test]
    fn test_parse_dac_response() {
        assert_eq!(parse_dac_response(&[0x05, 0x06, 0x00, 0x01, 0x3C, 0x04]).unwrap(), 1084);
        assert!(parse_dac_response(&[0x05, 0x06, 0x00, 0x02, 0x3C, 0x04]).is_err());
        assert!(parse_dac_response(&[0x05, 0x06, 0x00, 0x01]).is_err());
    }

    #[tokio::test]
    async fn test_resolve_against_local_browser() {
        let browser = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let browser_port = browser.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, peer) = browser.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"\x04inst\x00");
            browser
                .send_to(&svr_resp("InstanceName;INST;tcp;14330;;"), peer)
                .await
                .unwrap();
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        let port = resolve_instance_port("127.0.0.1", "inst", browser_port, deadline)
            .await
            .unwrap();
        assert_eq!(port, 14330);
    }

    #[tokio::test]
    async fn test_silent_address_leaves_time_for_the_next() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let browser = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addrs = [silent.local_addr().unwrap(), browser.local_addr().unwrap()];
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, peer) = browser.recv_from(&mut buf).await.unwrap();
            browser.send_to(&svr_resp("tcp;14330;;"), peer).await.unwrap();
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        let response = exchange_addrs(&addrs, b"\x04inst\x00", deadline)
            .await
            .unwrap();
        assert!(Instant::now() < deadline);
        assert_eq!(parse_instance_response(&response).unwrap(), 14330);
        drop(silent);
    }

    #[tokio::test]
    async fn test_resolve_times_out_without_browser() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let deadline = Instant::now() + Duration::from_millis(100);
        let err = resolve_instance_port("127.0.0.1", "inst", port, deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionTimeout));
    }
}
