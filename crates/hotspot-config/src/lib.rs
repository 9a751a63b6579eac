//! Shared configuration for hotspot tools.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `hotspot_core::PortalConfig`.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use hotspot_api::{CircuitConfig, RetryPolicy, TlsMode};
use hotspot_core::PortalConfig;

const KEYRING_SERVICE: &str = "hotspot";
const TOKEN_ENV: &str = "HOTSPOT_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named portal profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles.get(name).ok_or_else(|| ConfigError::UnknownProfile {
            name: name.into(),
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    15
}

/// A named portal profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Portal backend base URL (e.g., "https://portal.example.net/api/").
    pub backend: String,

    /// Realtime server, when it differs from the backend.
    pub realtime_url: Option<String>,

    /// Push-fallback server, when it differs from the realtime server.
    pub push_url: Option<String>,

    /// Landing URL the gateway redirected to, carrying identity params.
    pub portal_url: Option<String>,

    /// Bearer token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the bearer token.
    pub token_env: Option<String>,

    /// Gateway/proxy addresses never reported as the client.
    #[serde(default)]
    pub denylist: Vec<String>,

    /// Public-IP providers; empty disables the external lookup.
    pub ip_providers: Option<Vec<String>>,

    /// Probe local interfaces (default true).
    pub local_discovery: Option<bool>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    #[serde(default)]
    pub retry: RetryTuning,

    #[serde(default)]
    pub circuit: CircuitTuning,

    #[serde(default)]
    pub detection: DetectionTuning,

    /// Override the data directory.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryTuning {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CircuitTuning {
    pub failure_threshold: Option<u32>,
    pub cool_down_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DetectionTuning {
    pub ttl_secs: Option<u64>,
    pub ceiling_without_mac: Option<usize>,
    pub ceiling_with_mac: Option<usize>,
    pub rate_limit_cap_secs: Option<u64>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "hotspot", "hotspot")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where identity and metrics documents are stored by default.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("data"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hotspot");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `HOTSPOT_` variables
/// (`HOTSPOT_DEFAULTS__TIMEOUT=30`).
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HOTSPOT_").ignore(&["TOKEN"]).split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(figment(path).extract()?)
}

/// Load config, returning a default if the file is missing or invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Token resolution ────────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// Resolve the bearer token: profile's `token_env`, then `HOTSPOT_TOKEN`,
/// then the system keyring, then plaintext. A portal can be used without
/// a session, so no token is not an error.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. Global env var
    if let Ok(val) = std::env::var(TOKEN_ENV) {
        return Some(SecretString::from(val));
    }

    // 3. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 4. Plaintext in config
    profile.token.clone().map(SecretString::from)
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?
        .set_password(token)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

// ── Profile → PortalConfig ──────────────────────────────────────────

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

fn parse_optional_url(field: &str, raw: Option<&str>) -> Result<Option<Url>, ConfigError> {
    raw.map(|r| parse_url(field, r)).transpose()
}

/// Build a `PortalConfig` from a profile, without CLI flag overrides.
pub fn profile_to_portal_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<PortalConfig, ConfigError> {
    let mut config = PortalConfig::new(parse_url("backend", &profile.backend)?);

    config.realtime_url = parse_optional_url("realtime_url", profile.realtime_url.as_deref())?;
    config.push_url = parse_optional_url("push_url", profile.push_url.as_deref())?;
    config.collector.portal_url = parse_optional_url("portal_url", profile.portal_url.as_deref())?;
    config.token = resolve_token(profile, profile_name);

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    config.denylist = profile
        .denylist
        .iter()
        .map(|raw| {
            raw.trim().parse::<Ipv4Addr>().map_err(|_| ConfigError::Validation {
                field: "denylist".into(),
                reason: format!("not an IPv4 address: {raw}"),
            })
        })
        .collect::<Result<_, _>>()?;

    config.ip_providers = profile
        .ip_providers
        .as_ref()
        .map(|providers| {
            providers
                .iter()
                .map(|p| parse_url("ip_providers", p))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;
    config.local_discovery = profile.local_discovery.unwrap_or(true);

    let retry = RetryPolicy::default();
    config.retry = RetryPolicy {
        max_attempts: profile.retry.max_attempts.unwrap_or(retry.max_attempts).max(1),
        base_delay: profile
            .retry
            .base_delay_ms
            .map_or(retry.base_delay, Duration::from_millis),
        max_delay: profile
            .retry
            .max_delay_ms
            .map_or(retry.max_delay, Duration::from_millis),
    };

    let circuit = CircuitConfig::default();
    config.circuit = CircuitConfig {
        failure_threshold: profile
            .circuit
            .failure_threshold
            .unwrap_or(circuit.failure_threshold)
            .max(1),
        cool_down: profile
            .circuit
            .cool_down_secs
            .map_or(circuit.cool_down, Duration::from_secs),
    };

    let detection = &mut config.detection;
    if let Some(ttl) = profile.detection.ttl_secs {
        detection.ttl = Duration::from_secs(ttl);
    }
    if let Some(n) = profile.detection.ceiling_without_mac {
        detection.ceiling_without_mac = n;
    }
    if let Some(n) = profile.detection.ceiling_with_mac {
        detection.ceiling_with_mac = n;
    }
    if let Some(cap) = profile.detection.rate_limit_cap_secs {
        detection.rate_limit_cap = Duration::from_secs(cap);
    }

    config.data_dir = Some(
        profile
            .data_dir
            .clone()
            .unwrap_or_else(|| data_dir().join(profile_name)),
    );

    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(toml: &str) -> Config {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap()
    }

    const SAMPLE: &str = r#"
default_profile = "lobby"

[defaults]
timeout = 20

[profiles.lobby]
backend = "https://portal.example.net/api/"
portal_url = "https://portal.example.net/login?mac=AA-BB-CC-DD-EE-01"
denylist = ["10.5.50.1", "10.5.50.2"]
ip_providers = []
local_discovery = false
token = "plain-token"

[profiles.lobby.retry]
max_attempts = 5
base_delay_ms = 250

[profiles.lobby.circuit]
failure_threshold = 3

[profiles.lobby.detection]
ttl_secs = 120
"#;

    #[test]
    fn parses_profiles_and_defaults() {
        let config = parse(SAMPLE);
        assert_eq!(config.default_profile.as_deref(), Some("lobby"));
        assert_eq!(config.defaults.timeout, 20);
        assert_eq!(config.defaults.output, "table");

        let lobby = config.profile("lobby").unwrap();
        assert_eq!(lobby.denylist.len(), 2);
        assert_eq!(lobby.retry.max_attempts, Some(5));
        assert!(matches!(
            config.profile("missing"),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn profile_translates_to_portal_config() {
        let config = parse(SAMPLE);
        let lobby = config.profile("lobby").unwrap();
        let portal = profile_to_portal_config(lobby, "lobby", &config.defaults).unwrap();

        assert_eq!(portal.backend_url.as_str(), "https://portal.example.net/api/");
        assert!(portal.collector.portal_url.is_some());
        assert_eq!(
            portal.denylist,
            vec![Ipv4Addr::new(10, 5, 50, 1), Ipv4Addr::new(10, 5, 50, 2)]
        );
        assert_eq!(portal.ip_providers, Some(Vec::new()));
        assert!(!portal.local_discovery);
        assert_eq!(portal.timeout, Duration::from_secs(20));
        assert_eq!(portal.retry.max_attempts, 5);
        assert_eq!(portal.retry.base_delay, Duration::from_millis(250));
        assert_eq!(portal.retry.max_delay, Duration::from_secs(30));
        assert_eq!(portal.circuit.failure_threshold, 3);
        assert_eq!(portal.circuit.cool_down, Duration::from_secs(30));
        assert_eq!(portal.detection.ttl, Duration::from_secs(120));
        assert_eq!(portal.detection.ceiling_with_mac, 6);
        assert!(portal.token.is_some());
    }

    #[test]
    fn rejects_bad_values() {
        let bad_url = Profile {
            backend: "not a url".into(),
            ..Profile::default()
        };
        assert!(matches!(
            profile_to_portal_config(&bad_url, "x", &Defaults::default()),
            Err(ConfigError::Validation { ref field, .. }) if field == "backend"
        ));

        let bad_deny = Profile {
            backend: "https://portal.example.net".into(),
            denylist: vec!["10.0.0.300".into()],
            ..Profile::default()
        };
        assert!(matches!(
            profile_to_portal_config(&bad_deny, "x", &Defaults::default()),
            Err(ConfigError::Validation { ref field, .. }) if field == "denylist"
        ));
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.profiles.insert(
            "home".into(),
            Profile {
                backend: "https://portal.example.net".into(),
                denylist: vec!["192.168.1.1".into()],
                ..Profile::default()
            },
        );
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profiles["home"].backend, "https://portal.example.net");
        assert_eq!(loaded.profiles["home"].denylist, vec!["192.168.1.1".to_string()]);
    }
}
