// ── Runtime portal configuration ──
//
// Describes how to reach the portal backend and how hard to try. The CLI
// builds a `PortalConfig` from its profile and hands it in; core never
// reads config files.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use hotspot_api::{CircuitConfig, RetryPolicy, TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

use crate::collector::CollectorConfig;
use crate::detection::DetectionConfig;

#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Portal backend base URL (e.g. `https://portal.example.net/api/`).
    pub backend_url: Url,
    /// Realtime server; defaults to the backend URL.
    pub realtime_url: Option<Url>,
    /// Push-fallback server; defaults to the realtime URL.
    pub push_url: Option<Url>,
    /// Bearer token for an already logged-in session.
    pub token: Option<SecretString>,
    pub tls: TlsMode,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Proxy/gateway addresses never reported as the client.
    pub denylist: Vec<Ipv4Addr>,
    /// Public-IP providers. `None` uses the built-in list; an empty list
    /// disables external lookup.
    pub ip_providers: Option<Vec<Url>>,
    /// Probe local interfaces for a private address.
    pub local_discovery: bool,
    pub collector: CollectorConfig,
    pub detection: DetectionConfig,
    pub retry: RetryPolicy,
    pub circuit: CircuitConfig,
    /// Where identity and metrics documents live. `None` disables
    /// persistence.
    pub data_dir: Option<PathBuf>,
}

impl PortalConfig {
    pub fn new(backend_url: Url) -> Self {
        Self {
            backend_url,
            realtime_url: None,
            push_url: None,
            token: None,
            tls: TlsMode::System,
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            denylist: Vec::new(),
            ip_providers: None,
            local_discovery: true,
            collector: CollectorConfig::default(),
            detection: DetectionConfig::default(),
            retry: RetryPolicy::default(),
            circuit: CircuitConfig::default(),
            data_dir: None,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls.clone(),
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}
