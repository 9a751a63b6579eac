//! Config subcommand handlers.

use std::net::Ipv4Addr;

use hotspot_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "<redacted>";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let mut cfg = config::load_config_or_default();
            redact(&mut cfg);
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| serde_yaml::to_string(c).unwrap_or_default(),
                |_| config::config_path().display().to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let active = config::active_profile_name(global, &cfg);
            let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
            names.sort();
            let lines: Vec<String> = names
                .into_iter()
                .map(|name| {
                    if name == active {
                        format!("* {name}")
                    } else {
                        format!("  {name}")
                    }
                })
                .collect();
            output::print_output(&lines.join("\n"), global.quiet);
            Ok(())
        }

        // ── Add ─────────────────────────────────────────────────────
        ConfigCommand::Add {
            name,
            backend,
            portal_url,
            denylist,
            default,
        } => {
            validate_url("backend", &backend)?;
            if let Some(ref landing) = portal_url {
                validate_url("portal_url", landing)?;
            }
            for raw in &denylist {
                raw.trim().parse::<Ipv4Addr>().map_err(|_| CliError::Validation {
                    field: "deny".into(),
                    reason: format!("not an IPv4 address: {raw}"),
                })?;
            }

            let mut cfg = config::load_config_or_default();
            cfg.profiles.insert(
                name.clone(),
                Profile {
                    backend,
                    portal_url,
                    denylist,
                    ..Profile::default()
                },
            );
            if default || cfg.profiles.len() == 1 {
                cfg.default_profile = Some(name.clone());
            }
            hotspot_config::save_config(&cfg)?;

            if !global.quiet {
                eprintln!("Profile '{name}' saved to {}", config::config_path().display());
            }
            Ok(())
        }

        // ── Use ─────────────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
                available.sort();
                return Err(CliError::ProfileNotFound {
                    name,
                    available: available.join(", "),
                });
            }
            cfg.default_profile = Some(name.clone());
            hotspot_config::save_config(&cfg)?;

            if !global.quiet {
                eprintln!("Default profile set to '{name}'");
            }
            Ok(())
        }

        // ── SetToken ────────────────────────────────────────────────
        ConfigCommand::SetToken { token } => {
            let cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            hotspot_config::store_token(&profile_name, &token)?;

            if !global.quiet {
                eprintln!("Token stored in system keyring for profile '{profile_name}'");
            }
            Ok(())
        }
    }
}

fn redact(cfg: &mut Config) {
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some(REDACTED.into());
        }
    }
}

fn validate_url(field: &str, raw: &str) -> Result<(), CliError> {
    raw.parse::<url::Url>()
        .map(|_| ())
        .map_err(|_| CliError::Validation {
            field: field.into(),
            reason: format!("invalid URL: {raw}"),
        })
}
