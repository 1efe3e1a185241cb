//! Data source parsing.
//!
//! A data source names the server and how to reach it:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `host`, `host,1433` | TCP, default or explicit port |
//! | `host\instance` | TCP, port resolved over SSRP |
//! | `tcp:host,port` | explicit TCP |
//! | `admin:host` | dedicated admin connection |
//! | `np:host`, `np:host\instance` | named pipe with the default pipe path |
//! | `\\host\pipe\sql\query` | fully qualified named pipe |
//! | `lpc:host` | shared memory |
//! | `(localdb)\instance` | LocalDB, over its named pipe |
//!
//! Parsing is pure; nothing here touches the network.

use std::fmt;

use crate::error::{Error, Result};

/// Port used when a TCP data source names neither a port nor an instance.
pub const DEFAULT_PORT: u16 = 1433;

/// Pipe path of a default instance.
pub const DEFAULT_PIPE_NAME: &str = r"sql\query";

const DEFAULT_HOSTNAME: &str = "localhost";
const DEFAULT_INSTANCE_NAME: &str = "mssqlserver";
const DEFAULT_LOCALDB_INSTANCE: &str = "mssqllocaldb";
const INSTANCE_PIPE_PREFIX: &str = "MSSQL$";
const LOCALDB_HOST: &str = "(localdb)";
const LOCALDB_PIPE_PREFIX: &str = "LOCALDB#";
const LOCALDB_PIPE_SUFFIX: &str = r"tsql\query";
const PIPE_ROOT: &str = r"\\";
const PIPE_TOKEN: &str = "pipe";

/// Transport protocol selected by the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// No prefix; inferred from the rest of the string.
    Unspecified,
    /// TCP.
    Tcp,
    /// Named pipe.
    NamedPipe,
    /// Shared memory (local only).
    SharedMemory,
    /// Dedicated admin connection over TCP.
    Admin,
}

impl Protocol {
    fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "tcp" => Self::Tcp,
            "np" => Self::NamedPipe,
            "lpc" => Self::SharedMemory,
            "admin" => Self::Admin,
            // Not a protocol prefix; may be an IPv6 address.
            _ => Self::Unspecified,
        }
    }

    fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Unspecified => None,
            Self::Tcp => Some("tcp"),
            Self::NamedPipe => Some("np"),
            Self::SharedMemory => Some("lpc"),
            Self::Admin => Some("admin"),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().unwrap_or("unspecified"))
    }
}

/// A parsed data source.
///
/// Per protocol at most one of port, SSRP instance, or pipe path drives the
/// connection; named-pipe descriptors never carry a TCP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    /// Input as given.
    pub raw: String,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Server host name, lowercased.
    pub server_name: String,
    /// Explicit TCP port.
    pub port: Option<u16>,
    /// Instance name, used for SSRP or derived from a pipe path.
    pub instance_name: Option<String>,
    /// Host part of a named-pipe path, as written.
    pub pipe_host: Option<String>,
    /// Pipe path below `\\host\pipe\`.
    pub pipe_name: Option<String>,
    /// The TCP port must be resolved over SSRP first.
    pub ssrp_required: bool,
    /// The data source named a LocalDB instance.
    pub is_local_db: bool,
}

impl DataSource {
    /// Parse a data source string.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if let Some(local_db) = parse_local_db(raw, trimmed)? {
            return Ok(local_db);
        }

        let working = trimmed.to_lowercase();
        let protocol = match working.split_once(':') {
            Some((prefix, _)) => Protocol::from_prefix(prefix.trim()),
            None => Protocol::Unspecified,
        };
        let rest = match (protocol, working.split_once(':')) {
            (Protocol::Unspecified, _) | (_, None) => working.as_str(),
            (_, Some((_, rest))) => rest.trim(),
        };

        // Pipe paths only allow backslashes.
        if rest.contains('/') {
            return Err(Error::data_source(raw, "forward slashes are not allowed"));
        }

        let mut source = Self {
            raw: raw.to_string(),
            protocol,
            server_name: String::new(),
            port: None,
            instance_name: None,
            pipe_host: None,
            pipe_name: None,
            ssrp_required: false,
            is_local_db: false,
        };

        if rest.starts_with(PIPE_ROOT) || protocol == Protocol::NamedPipe {
            source.infer_named_pipe(raw, rest)?;
        } else {
            source.infer_connection_details(raw, rest)?;
        }
        Ok(source)
    }

    /// Port to dial, once any SSRP lookup has run.
    #[must_use]
    pub fn tcp_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Full pipe path, `\\host\pipe\name`.
    #[must_use]
    pub fn pipe_path(&self) -> Option<String> {
        let host = self.pipe_host.as_deref()?;
        let name = self.pipe_name.as_deref()?;
        Some(format!(r"\\{host}\{PIPE_TOKEN}\{name}"))
    }

    /// Whether the descriptor points at this machine.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.server_name == DEFAULT_HOSTNAME || self.server_name == machine_name()
    }

    /// A data source string that parses back to an equivalent descriptor.
    #[must_use]
    pub fn canonical(&self) -> String {
        if let Some(path) = self.pipe_path() {
            return format!("np:{path}");
        }
        let mut out = String::new();
        if let Some(prefix) = self.protocol.prefix() {
            out.push_str(prefix);
            out.push(':');
        }
        out.push_str(&self.server_name);
        match (&self.instance_name, self.port) {
            (Some(instance), _) if self.ssrp_required => {
                out.push('\\');
                out.push_str(instance);
            }
            (_, Some(port)) => {
                out.push(',');
                out.push_str(&port.to_string());
            }
            _ => {}
        }
        out
    }

    /// Same server, different TCP endpoint. Used for routing.
    #[must_use]
    pub fn rerouted(&self, host: &str, port: u16) -> Self {
        Self {
            raw: format!("tcp:{host},{port}"),
            protocol: Protocol::Tcp,
            server_name: host.to_lowercase(),
            port: Some(port),
            instance_name: None,
            pipe_host: None,
            pipe_name: None,
            ssrp_required: false,
            is_local_db: false,
        }
    }

    fn infer_named_pipe(&mut self, raw: &str, rest: &str) -> Result<()> {
        if !rest.contains(PIPE_ROOT) {
            // `np:server` or `np:server\instance` with the default pipe path.
            if rest.contains('\\') {
                let tokens: Vec<&str> = rest.split('\\').collect();
                let [server, instance] = tokens.as_slice() else {
                    return Err(Error::data_source(raw, "expected np:server\\instance"));
                };
                self.server_name = (*server).to_string();
                self.pipe_host = Some((*server).to_string());
                self.pipe_name = Some(format!(
                    "{INSTANCE_PIPE_PREFIX}{instance}\\{DEFAULT_PIPE_NAME}"
                ));
            } else {
                self.server_name = rest.to_string();
                self.pipe_host = Some(rest.to_string());
                self.pipe_name = Some(DEFAULT_PIPE_NAME.to_string());
            }
            self.infer_local_server_name();
            return Ok(());
        }

        // \\host\pipe\sql\query splits into at least six parts.
        let tokens: Vec<&str> = rest.split('\\').collect();
        if tokens.len() < 6 {
            return Err(Error::data_source(
                raw,
                "a named pipe path needs the form \\\\host\\pipe\\name",
            ));
        }
        let host = tokens[2];
        if host.is_empty() {
            return Err(Error::data_source(raw, "named pipe path has no host"));
        }
        if tokens[3] != PIPE_TOKEN {
            return Err(Error::data_source(raw, "named pipe path must contain \\pipe\\"));
        }

        let pipe_name = tokens[4..].join("\\");
        let instance = tokens[4]
            .strip_prefix(&INSTANCE_PIPE_PREFIX.to_lowercase())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        self.instance_name = match instance {
            Some(instance) => Some(instance),
            None if pipe_name != DEFAULT_PIPE_NAME => Some(format!("{PIPE_TOKEN}{pipe_name}")),
            None => None,
        };
        self.pipe_name = Some(pipe_name);
        self.server_name = if is_local_host(host) {
            machine_name()
        } else {
            host.to_string()
        };
        self.pipe_host = Some(host.to_string());

        match self.protocol {
            Protocol::Unspecified => self.protocol = Protocol::NamedPipe,
            Protocol::NamedPipe => {}
            other => {
                return Err(Error::data_source(
                    raw,
                    format!("a named pipe path cannot be used with the {other} prefix"),
                ));
            }
        }
        Ok(())
    }

    fn infer_connection_details(&mut self, raw: &str, rest: &str) -> Result<()> {
        let tokens: Vec<&str> = rest.split(['\\', ',']).collect();
        self.server_name = tokens[0].trim().to_string();

        let comma = rest.find(',');
        let backslash = rest.find('\\');

        if let Some(comma) = comma {
            let parameter = match backslash {
                Some(backslash) if comma > backslash => tokens.get(2),
                _ => tokens.get(1),
            }
            .map(|p| p.trim())
            .unwrap_or_default();

            if parameter.is_empty() {
                return Err(Error::data_source(raw, "empty parameter after ','"));
            }
            match self.protocol {
                Protocol::Unspecified => self.protocol = Protocol::Tcp,
                Protocol::Tcp => {}
                other => {
                    return Err(Error::data_source(
                        raw,
                        format!("a port cannot be used with the {other} prefix"),
                    ));
                }
            }
            let port: i64 = parameter
                .parse()
                .map_err(|_| Error::data_source(raw, format!("invalid port '{parameter}'")))?;
            if port < 1 {
                return Err(Error::data_source(raw, format!("invalid port {port}")));
            }
            let port = u16::try_from(port)
                .map_err(|_| Error::data_source(raw, format!("port {port} out of range")))?;
            self.port = Some(port);
        } else if backslash.is_some() {
            let instance = tokens.get(1).map(|i| i.trim()).unwrap_or_default();
            if instance.is_empty() {
                return Err(Error::data_source(raw, "empty instance name"));
            }
            if instance == DEFAULT_INSTANCE_NAME {
                return Err(Error::data_source(
                    raw,
                    "omit the instance name to connect to the default instance",
                ));
            }
            self.instance_name = Some(instance.to_string());
            self.ssrp_required = true;
        }

        if self.protocol == Protocol::Admin {
            // DAC listens on its own port, advertised over SSRP.
            self.ssrp_required = true;
        }

        self.infer_local_server_name();
        Ok(())
    }

    fn infer_local_server_name(&mut self) {
        let is_machine =
            self.protocol == Protocol::Admin && self.server_name.eq_ignore_ascii_case(&machine_name());
        if self.server_name.is_empty() || is_local_host(&self.server_name) || is_machine {
            self.server_name = DEFAULT_HOSTNAME.to_string();
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for DataSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_local_db(raw: &str, trimmed: &str) -> Result<Option<DataSource>> {
    let lower = trimmed.to_lowercase();
    let Some(index) = lower.find(LOCALDB_HOST) else {
        return Ok(None);
    };
    if index > 0 {
        return Err(Error::data_source(
            raw,
            "a protocol prefix cannot be combined with (localdb)",
        ));
    }

    let rest = &lower[LOCALDB_HOST.len()..];
    let rest = rest.strip_prefix('\\').unwrap_or(rest).trim();
    if rest.is_empty() {
        return Err(Error::data_source(raw, "no LocalDB instance name"));
    }
    // `(localdb)\.` is the default instance, `(localdb)\.\name` a shared one.
    let instance = match rest {
        "." => DEFAULT_LOCALDB_INSTANCE,
        shared => shared.strip_prefix(r".\").unwrap_or(shared),
    };
    if instance.is_empty() || instance.contains('\\') {
        return Err(Error::data_source(raw, "invalid LocalDB instance name"));
    }

    tracing::debug!(instance, "resolved LocalDB data source to named pipe");
    Ok(Some(DataSource {
        raw: raw.to_string(),
        protocol: Protocol::NamedPipe,
        server_name: machine_name(),
        port: None,
        instance_name: Some(instance.to_string()),
        pipe_host: Some(".".to_string()),
        pipe_name: Some(format!(
            "{LOCALDB_PIPE_PREFIX}{}\\{LOCALDB_PIPE_SUFFIX}",
            instance.to_uppercase()
        )),
        ssrp_required: false,
        is_local_db: true,
    }))
}

fn is_local_host(server_name: &str) -> bool {
    matches!(server_name, "." | "(local)" | DEFAULT_HOSTNAME)
}

/// Lowercased host name of this machine.
pub(crate) fn machine_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .map(|name| name.to_lowercase())
        .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_host_and_port() {
        let ds = DataSource::parse("myserver,1444").unwrap();
        assert_eq!(ds.protocol, Protocol::Tcp);
        assert_eq!(ds.server_name, "myserver");
        assert_eq!(ds.port, Some(1444));
        assert!(!ds.ssrp_required);
    }

    #[test]
    fn test_plain_host_defaults() {
        let ds = DataSource::parse("  MyServer ").unwrap();
        assert_eq!(ds.protocol, Protocol::Unspecified);
        assert_eq!(ds.server_name, "myserver");
        assert_eq!(ds.tcp_port(), DEFAULT_PORT);
    }

    #[test]
    fn test_explicit_tcp_prefix() {
        let ds = DataSource::parse(" tcp : server , 1433 ").unwrap();
        assert_eq!(ds.protocol, Protocol::Tcp);
        assert_eq!(ds.server_name, "server");
        assert_eq!(ds.port, Some(1433));
    }

    #[test]
    fn test_empty_parameter_rejected() {
        assert!(DataSource::parse("server,").is_err());
        assert!(DataSource::parse("server, ").is_err());
    }

    #[test]
    fn test_bad_ports_rejected() {
        assert!(DataSource::parse("server,abc").is_err());
        assert!(DataSource::parse("server,0").is_err());
        assert!(DataSource::parse("server,-5").is_err());
        assert!(DataSource::parse("server,70000").is_err());
    }

    #[test]
    fn test_port_not_allowed_for_pipes() {
        assert!(DataSource::parse("admin:server,1433").is_err());
    }

    #[test]
    fn test_instance_requires_ssrp() {
        let ds = DataSource::parse(r"server\sqlexpress").unwrap();
        assert_eq!(ds.instance_name.as_deref(), Some("sqlexpress"));
        assert!(ds.ssrp_required);
        assert_eq!(ds.port, None);
    }

    #[test]
    fn test_default_instance_name_rejected() {
        assert!(DataSource::parse(r"server\MSSQLSERVER").is_err());
        assert!(DataSource::parse(r"server\").is_err());
    }

    #[test]
    fn test_instance_and_port_uses_port() {
        let ds = DataSource::parse(r"server\inst,1500").unwrap();
        assert_eq!(ds.port, Some(1500));
        assert!(!ds.ssrp_required);
    }

    #[test]
    fn test_local_names() {
        for raw in ["", ".", "(local)", "localhost", "tcp:.,1433"] {
            let ds = DataSource::parse(raw).unwrap();
            assert_eq!(ds.server_name, "localhost", "{raw:?}");
        }
    }

    #[test]
    fn test_admin_machine_name_is_local() {
        let name = machine_name();
        let ds = DataSource::parse(&format!("admin:{name}")).unwrap();
        assert_eq!(ds.protocol, Protocol::Admin);
        assert_eq!(ds.server_name, "localhost");
        assert!(ds.ssrp_required);
    }

    #[test]
    fn test_forward_slash_rejected() {
        assert!(DataSource::parse("np:server/pipe").is_err());
        assert!(DataSource::parse("tcp:server/x").is_err());
    }

    #[test]
    fn test_unknown_prefix_is_unspecified() {
        let ds = DataSource::parse("fe80::1").unwrap();
        assert_eq!(ds.protocol, Protocol::Unspecified);
        assert_eq!(ds.server_name, "fe80::1");
    }

    #[test]
    fn test_full_pipe_path() {
        let ds = DataSource::parse(r"\\dbhost\pipe\sql\query").unwrap();
        assert_eq!(ds.protocol, Protocol::NamedPipe);
        assert_eq!(ds.pipe_host.as_deref(), Some("dbhost"));
        assert_eq!(ds.pipe_name.as_deref(), Some(DEFAULT_PIPE_NAME));
        assert_eq!(ds.instance_name, None);
        assert_eq!(ds.port, None);
        assert_eq!(ds.pipe_path().unwrap(), r"\\dbhost\pipe\sql\query");
    }

    #[test]
    fn test_named_instance_pipe_path() {
        let ds = DataSource::parse(r"np:\\.\pipe\MSSQL$INST\sql\query").unwrap();
        assert_eq!(ds.instance_name.as_deref(), Some("inst"));
        assert_eq!(ds.pipe_host.as_deref(), Some("."));
        assert_eq!(ds.server_name, machine_name());
    }

    #[test]
    fn test_short_pipe_path_rejected() {
        assert!(DataSource::parse(r"\\host\pipe\query").is_err());
        assert!(DataSource::parse(r"\\host\pipe").is_err());
        assert!(DataSource::parse(r"\\\pipe\sql\query").is_err());
        assert!(DataSource::parse(r"\\host\nopipe\sql\query").is_err());
    }

    #[test]
    fn test_pipe_path_with_tcp_prefix_rejected() {
        assert!(DataSource::parse(r"tcp:\\host\pipe\sql\query").is_err());
    }

    #[test]
    fn test_np_shorthand() {
        let ds = DataSource::parse("np:dbhost").unwrap();
        assert_eq!(ds.pipe_name.as_deref(), Some(DEFAULT_PIPE_NAME));

        let ds = DataSource::parse(r"np:dbhost\inst").unwrap();
        assert_eq!(ds.server_name, "dbhost");
        assert_eq!(ds.pipe_name.as_deref(), Some(r"MSSQL$inst\sql\query"));
        assert_eq!(ds.pipe_path().unwrap(), r"\\dbhost\pipe\MSSQL$inst\sql\query");

        assert!(DataSource::parse(r"np:a\b\c").is_err());
    }

    #[test]
    fn test_local_db() {
        let ds = DataSource::parse(r"(localdb)\MSSQLLocalDB").unwrap();
        assert_eq!(ds.protocol, Protocol::NamedPipe);
        assert!(ds.is_local_db);
        assert_eq!(ds.instance_name.as_deref(), Some("mssqllocaldb"));
        assert_eq!(
            ds.pipe_path().unwrap(),
            r"\\.\pipe\LOCALDB#MSSQLLOCALDB\tsql\query"
        );
        assert_eq!(ds.port, None);
    }

    #[test]
    fn test_local_db_variants() {
        let ds = DataSource::parse(r"(localdb)\.").unwrap();
        assert_eq!(ds.instance_name.as_deref(), Some("mssqllocaldb"));
        let ds = DataSource::parse(r"(LocalDB)\.\shared").unwrap();
        assert_eq!(ds.instance_name.as_deref(), Some("shared"));
        assert!(DataSource::parse("(localdb)").is_err());
        assert!(DataSource::parse(r"(localdb)\").is_err());
        assert!(DataSource::parse(r"np:(localdb)\inst").is_err());
    }

    #[test]
    fn test_shared_memory_prefix() {
        let ds = DataSource::parse("lpc:(local)").unwrap();
        assert_eq!(ds.protocol, Protocol::SharedMemory);
        assert_eq!(ds.server_name, "localhost");
    }

    #[test]
    fn test_rerouted() {
        let ds = DataSource::parse(r"gateway\inst").unwrap();
        let routed = ds.rerouted("Node1.example.com", 11000);
        assert_eq!(routed.protocol, Protocol::Tcp);
        assert_eq!(routed.server_name, "node1.example.com");
        assert_eq!(routed.port, Some(11000));
        assert!(!routed.ssrp_required);
    }

    fn host() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,20}(\\.[a-z][a-z0-9]{0,8}){0,2}"
            .prop_filter("local aliases resolve to localhost", |h| h != "localhost")
    }

    proptest! {
        #[test]
        fn prop_host_port_roundtrip(host in host(), port in 1u16..=u16::MAX) {
            let ds = DataSource::parse(&format!("{host},{port}")).unwrap();
            prop_assert_eq!(ds.protocol, Protocol::Tcp);
            prop_assert_eq!(&ds.server_name, &host);
            prop_assert_eq!(ds.port, Some(port));
        }

        #[test]
        fn prop_empty_parameter_fails(host in host(), spaces in " {0,3}") {
            let input = format!("{host},{spaces}");
            prop_assert!(DataSource::parse(&input).is_err());
        }

        #[test]
        fn prop_short_pipe_paths_fail(parts in proptest::collection::vec("[a-z]{1,6}", 0..3)) {
            let raw = format!(r"\\{}", parts.join("\\"));
            prop_assert!(DataSource::parse(&raw).is_err());
        }

        #[test]
        fn prop_canonical_reparse(host in host(), port in 1u16..=u16::MAX, instance in "[a-z]{1,8}") {
            prop_assume!(instance != "mssqlserver");
            for raw in [
                format!("{host},{port}"),
                format!(r"{host}\{instance}"),
                format!(r"np:{host}\{instance}"),
                format!(r"\\{host}\pipe\sql\query"),
            ] {
                let first = DataSource::parse(&raw).unwrap();
                let again = DataSource::parse(&first.canonical()).unwrap();
                prop_assert_eq!(first.protocol, again.protocol);
                prop_assert_eq!(&first.server_name, &again.server_name);
                prop_assert_eq!(first.port, again.port);
                // Pipe names are case-insensitive.
                prop_assert_eq!(
                    first.pipe_path().map(|p| p.to_lowercase()),
                    again.pipe_path().map(|p| p.to_lowercase())
                );
                prop_assert_eq!(first.ssrp_required, again.ssrp_required);
            }
        }
    }
}
