//! Which protocols this terminal can carry.
//!
//! Some protocols are proxied natively, others shell out to a local client
//! binary that has to be installed next to the gateway.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of a capability check. Matched exhaustively by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolSupport {
    Supported,
    /// The protocol is known but its client binary is not installed.
    ClientMissing { client: String },
    /// The terminal cannot carry this protocol at all.
    Unsupported,
}

/// Answers whether a protocol can be served from this terminal.
pub trait CapabilityChecker: Send + Sync {
    fn check_supported(&self, protocol: &str) -> ProtocolSupport;
}

/// Extra capability settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Additional or overriding protocol to client binary entries. An empty
    /// client name marks a natively proxied protocol.
    #[serde(default)]
    pub clients: HashMap<String, String>,
    /// Directories searched for client binaries. Empty means `PATH`.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

/// Protocol table checked against the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalCapabilityChecker {
    /// Protocol name to required client; `None` is handled in-process.
    table: HashMap<String, Option<String>>,
    search_paths: Option<Vec<PathBuf>>,
}

impl LocalCapabilityChecker {
    pub fn new() -> Self {
        let table = [
            ("ssh", None),
            ("sftp", None),
            ("telnet", None),
            ("k8s", Some("kubectl")),
            ("mysql", Some("mysql")),
            ("mariadb", Some("mysql")),
            ("postgresql", Some("psql")),
            ("redis", Some("redis-cli")),
            ("mongodb", Some("mongosh")),
            ("sqlserver", Some("tsql")),
            ("clickhouse", Some("clickhouse-client")),
        ]
        .into_iter()
        .map(|(protocol, client)| (protocol.to_string(), client.map(str::to_string)))
        .collect();

        Self {
            table,
            search_paths: None,
        }
    }

    pub fn from_config(config: &CapabilityConfig) -> Self {
        let mut checker = Self::new();
        for (protocol, client) in &config.clients {
            let client = (!client.is_empty()).then(|| client.clone());
            checker.table.insert(protocol.clone(), client);
        }
        if !config.search_paths.is_empty() {
            checker.search_paths = Some(config.search_paths.clone());
        }
        checker
    }

    /// Searches only `paths` instead of `PATH`.
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = Some(paths);
        self
    }

    /// Adds or replaces a protocol entry.
    pub fn with_client(mut self, protocol: impl Into<String>, client: Option<&str>) -> Self {
        self.table
            .insert(protocol.into(), client.map(str::to_string));
        self
    }

    fn search_paths(&self) -> Vec<PathBuf> {
        match &self.search_paths {
            Some(paths) => paths.clone(),
            None => env::var_os("PATH")
                .map(|p| env::split_paths(&p).collect())
                .unwrap_or_default(),
        }
    }

    fn client_installed(&self, client: &str) -> bool {
        self.search_paths()
            .iter()
            .any(|dir| is_executable(&dir.join(client)))
    }
}

impl Default for LocalCapabilityChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityChecker for LocalCapabilityChecker {
    fn check_supported(&self, protocol: &str) -> ProtocolSupport {
        match self.table.get(protocol) {
            None => ProtocolSupport::Unsupported,
            Some(None) => ProtocolSupport::Supported,
            Some(Some(client)) if self.client_installed(client) => ProtocolSupport::Supported,
            Some(Some(client)) => {
                debug!(protocol = %protocol, client = %client, "Protocol client not found");
                ProtocolSupport::ClientMissing {
                    client: client.clone(),
                }
            }
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn install(dir: &TempDir, name: &str) {
        let path = dir.path().join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    #[test]
    fn test_native_protocols_need_no_client() {
        let checker = LocalCapabilityChecker::new().with_search_paths(vec![]);
        assert_eq!(checker.check_supported("ssh"), ProtocolSupport::Supported);
        assert_eq!(checker.check_supported("telnet"), ProtocolSupport::Supported);
    }

    #[test]
    fn test_unknown_protocol_is_unsupported() {
        let checker = LocalCapabilityChecker::new();
        assert_eq!(checker.check_supported("rdp"), ProtocolSupport::Unsupported);
        assert_eq!(checker.check_supported("vnc"), ProtocolSupport::Unsupported);
    }

    #[test]
    fn test_missing_client() {
        let dir = TempDir::new().unwrap();
        let checker =
            LocalCapabilityChecker::new().with_search_paths(vec![dir.path().to_path_buf()]);
        assert_eq!(
            checker.check_supported("mysql"),
            ProtocolSupport::ClientMissing {
                client: "mysql".to_string()
            }
        );
    }

    #[test]
    fn test_installed_client() {
        let dir = TempDir::new().unwrap();
        install(&dir, "psql");
        let checker =
            LocalCapabilityChecker::new().with_search_paths(vec![dir.path().to_path_buf()]);
        assert_eq!(
            checker.check_supported("postgresql"),
            ProtocolSupport::Supported
        );
    }

    #[test]
    fn test_config_overrides_table() {
        let dir = TempDir::new().unwrap();
        install(&dir, "my-rdp");
        let config = CapabilityConfig {
            clients: HashMap::from([
                ("rdp".to_string(), "my-rdp".to_string()),
                ("mysql".to_string(), String::new()),
            ]),
            search_paths: vec![dir.path().to_path_buf()],
        };
        let checker = LocalCapabilityChecker::from_config(&config);
        assert_eq!(checker.check_supported("rdp"), ProtocolSupport::Supported);
        assert_eq!(checker.check_supported("mysql"), ProtocolSupport::Supported);
    }
}
