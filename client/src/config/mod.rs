//! Configuration management

use crate::fesl::Credentials;
use crate::options::ClientOptions;
use anyhow::{Context, Result};
use protocol::{Namespace, Platform, StatsCatalog, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub account: Option<AccountConfig>,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub platform: Platform,
    /// Replaces the platform's FESL host, e.g. for a local test peer
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    /// Lookup namespace; the platform's own namespace when unset
    #[serde(default)]
    pub namespace: Option<Namespace>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            host: None,
            port: None,
            timeout_ms: default_timeout_ms(),
            use_tls: true,
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatsConfig {
    /// Keys requested by default; the built-in general keys when empty
    #[serde(default)]
    pub keys: Vec<String>,
    /// Declared kinds of individual keys
    #[serde(default)]
    pub kinds: BTreeMap<String, ValueKind>,
    #[serde(default = "default_kind")]
    pub default_kind: ValueKind,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            kinds: BTreeMap::new(),
            default_kind: default_kind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_kind() -> ValueKind {
    ValueKind::Float
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&contents).with_context(|| "Failed to parse config file")?;

        if config.backend.timeout_ms == 0 {
            anyhow::bail!("backend.timeout_ms must be greater than zero");
        }

        Ok(config)
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let account = self
            .account
            .as_ref()
            .context("the [account] section is required for FESL commands")?;
        Ok(Credentials::new(&account.username, &account.password))
    }

    /// Stats catalog declared in `[stats]`, or the built-in one
    pub fn catalog(&self) -> StatsCatalog {
        let stats = &self.stats;
        if stats.keys.is_empty() && stats.kinds.is_empty() {
            return StatsCatalog::default();
        }
        let mut catalog = StatsCatalog::new(stats.default_kind);
        for key in &stats.keys {
            let kind = stats.kinds.get(key).copied().unwrap_or(stats.default_kind);
            catalog.insert(key, kind);
        }
        for (key, kind) in &stats.kinds {
            catalog.insert(key, *kind);
        }
        catalog
    }

    pub fn options(&self) -> ClientOptions {
        let backend = &self.backend;
        let mut options = ClientOptions::new(backend.platform)
            .with_timeout(Duration::from_millis(backend.timeout_ms));
        options.host = backend.host.clone();
        options.port = backend.port;
        options.use_tls = backend.use_tls;
        if let Some(namespace) = backend.namespace {
            options.namespace = namespace;
        }
        options.catalog = Arc::new(self.catalog());
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
[account]
username = "alice"
password = "secret"

[backend]
platform = "ps3"
host = "127.0.0.1"
port = 4000
timeout_ms = 500
use_tls = false
namespace = "ps3_sub"

[stats]
keys = ["kills", "c_first"]
kinds = { c_first = "timestamp" }

[logging]
level = "debug"
"#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.credentials().unwrap().username, "alice");
        assert_eq!(config.logging.level, "debug");

        let options = config.options();
        assert_eq!(options.platform, Platform::Ps3);
        assert_eq!(options.endpoint(), ("127.0.0.1".to_string(), 4000));
        assert_eq!(options.timeout, Duration::from_millis(500));
        assert!(!options.use_tls);
        assert_eq!(options.namespace, Namespace::Ps3Sub);
        assert_eq!(options.catalog.keys(), vec!["kills", "c_first"]);
        assert_eq!(options.catalog.kind_of("c_first"), ValueKind::Timestamp);
        assert_eq!(options.catalog.kind_of("kills"), ValueKind::Float);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = write_config("");
        let config = Config::load(file.path()).unwrap();
        assert!(config.account.is_none());
        assert!(config.credentials().is_err());
        assert_eq!(config.logging.level, "info");

        let options = config.options();
        assert_eq!(options.platform, Platform::Pc);
        assert!(options.use_tls);
        assert_eq!(options.timeout, Duration::from_secs(2));
        assert_eq!(options.namespace, Namespace::Battlefield);
        assert_eq!(*options.catalog, StatsCatalog::default());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let file = write_config("[backend]\ntimeout_ms = 0\n");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_account_debug_hides_password() {
        let account = AccountConfig {
            username: "alice".into(),
            password: "secret".into(),
        };
        assert!(!format!("{account:?}").contains("secret"));
    }
}
