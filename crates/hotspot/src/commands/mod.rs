//! Command dispatch: bridges CLI args to the portal and output formatting.

pub mod config_cmd;
pub mod device;
pub mod identity;
pub mod metrics;
pub mod watch;

use hotspot_core::Portal;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a portal-bound command to its handler.
pub async fn dispatch(cmd: Command, portal: &Portal, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Detect(args) => identity::handle(portal, &args, global).await,
        Command::Sync(args) => device::sync(portal, !args.no_authorization, global).await,
        Command::Authorize => device::authorize(portal, global).await,
        Command::ClearCache(args) => device::clear_cache(portal, &args, global).await,
        Command::Watch(args) => watch::handle(portal, &args, global).await,
        Command::Metrics => metrics::handle(portal, global),
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
