//! Device sync handlers: `sync`, `authorize`, `clear-cache`.

use serde::Serialize;

use hotspot_core::{BestEffort, Portal, SyncReport};

use crate::cli::{ClearCacheArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub async fn sync(portal: &Portal, allow_authorization: bool, global: &GlobalOpts) -> Result<(), CliError> {
    let report = portal.sync(allow_authorization).await?;
    print_report(&report, global)?;
    if report.authorization_required && !global.quiet {
        eprintln!("Complete the portal sign-in, then run: hotspot authorize");
    }
    Ok(())
}

/// Mark the authorization flow complete and re-check with the backend.
pub async fn authorize(portal: &Portal, global: &GlobalOpts) -> Result<(), CliError> {
    portal.confirm_authorization();
    let report = portal.sync(true).await?;
    print_report(&report, global)
}

#[derive(Debug, Serialize)]
struct ClearResult {
    delivered: bool,
    reason: Option<String>,
}

pub async fn clear_cache(portal: &Portal, args: &ClearCacheArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let result = match portal.clear_cache(args.force_refresh).await {
        BestEffort::Delivered => ClearResult {
            delivered: true,
            reason: None,
        },
        BestEffort::Dropped { kind, reason } => {
            tracing::debug!(?kind, "cache clear not delivered");
            ClearResult {
                delivered: false,
                reason: Some(reason),
            }
        }
    };

    let out = output::render_single(
        &global.output,
        &result,
        |r| match r.reason {
            None => "Backend cache cleared".into(),
            Some(ref reason) => format!("Local state reset; backend not reached ({reason})"),
        },
        |r| r.delivered.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn print_report(report: &SyncReport, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        report,
        |r| {
            output::detail_lines(&[
                ("State", output::paint_state(r.state, color)),
                ("Authorization", if r.authorization_required { "required" } else { "-" }.into()),
            ])
        },
        |r| r.state.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
