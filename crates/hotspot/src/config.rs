//! Bridges hotspot-config profiles and CLI flags into a `PortalConfig`.
//!
//! Flag precedence: CLI flag > env var > profile > defaults.

use std::time::Duration;

use secrecy::SecretString;

use hotspot_config::{Config, Profile};
use hotspot_core::{PortalConfig, TlsMode};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use hotspot_config::{config_path, load_config_or_default};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the portal configuration for a command run.
///
/// An explicitly requested profile must exist. Without any profile,
/// `--backend` alone is enough.
pub fn build_portal_config(global: &GlobalOpts) -> Result<PortalConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let fallback;
    let profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile,
        None if global.profile.is_some() => {
            let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
            available.sort();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        None => {
            let backend = global.backend.clone().ok_or_else(|| CliError::NoConfig {
                path: config_path().display().to_string(),
            })?;
            fallback = Profile {
                backend,
                ..Profile::default()
            };
            &fallback
        }
    };

    let mut portal = hotspot_config::profile_to_portal_config(profile, &profile_name, &cfg.defaults)?;
    apply_overrides(&mut portal, global)?;
    Ok(portal)
}

/// Layer global flags over a profile-derived configuration.
fn apply_overrides(portal: &mut PortalConfig, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(ref backend) = global.backend {
        portal.backend_url = parse_url("backend", backend)?;
    }
    if let Some(ref landing) = global.portal_url {
        portal.collector.portal_url = Some(parse_url("portal_url", landing)?);
    }
    if let Some(ref token) = global.token {
        portal.token = Some(SecretString::from(token.clone()));
    }
    if let Some(ref dir) = global.data_dir {
        portal.data_dir = Some(dir.clone());
    }
    if global.no_local {
        portal.local_discovery = false;
    }
    if global.insecure {
        portal.tls = TlsMode::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        portal.timeout = Duration::from_secs(secs);
    }
    Ok(())
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}
