//! Connection options shared by both façades

use protocol::{Namespace, Platform, StatsCatalog};
use std::sync::Arc;
use std::time::Duration;

/// Per-operation socket timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub platform: Platform,
    /// Overrides the platform's FESL host
    pub host: Option<String>,
    /// Overrides the platform's FESL port
    pub port: Option<u16>,
    pub timeout: Duration,
    /// Wrap FESL in TLS; only plain test peers turn this off
    pub use_tls: bool,
    /// Namespace for lookups and searches
    pub namespace: Namespace,
    pub catalog: Arc<StatsCatalog>,
}

impl ClientOptions {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            host: None,
            port: None,
            timeout: DEFAULT_TIMEOUT,
            use_tls: true,
            namespace: platform.default_namespace(),
            catalog: Arc::new(StatsCatalog::default()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    pub fn with_catalog(mut self, catalog: StatsCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// FESL host and port after overrides
    pub fn endpoint(&self) -> (String, u16) {
        let backend = self.platform.backend();
        (
            self.host.clone().unwrap_or_else(|| backend.host.to_string()),
            self.port.unwrap_or(backend.port),
        )
    }

    pub fn client_string(&self) -> &'static str {
        self.platform.backend().client_string
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new(Platform::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_defaults() {
        let options = ClientOptions::new(Platform::Ps3);
        assert_eq!(
            options.endpoint(),
            ("bfbc2-ps3-server.fesl.ea.com".to_string(), 18331)
        );
        assert_eq!(options.namespace, Namespace::Ps3);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_endpoint_override() {
        let options = ClientOptions::default().with_endpoint("127.0.0.1", 4000);
        assert_eq!(options.endpoint(), ("127.0.0.1".to_string(), 4000));
        assert_eq!(options.client_string(), "bfbc2-pc");
    }
}
