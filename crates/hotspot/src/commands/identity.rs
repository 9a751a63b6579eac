//! `hotspot detect`

use hotspot_core::{Portal, ResolvedIdentity};

use crate::cli::{DetectArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub async fn handle(portal: &Portal, args: &DetectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let identity = portal.identify(args.force).await?;
    let out = output::render_single(&global.output, &identity, detail, |id| {
        id.ip.map_or_else(|| "-".into(), |ip| ip.to_string())
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub(crate) fn detail(id: &ResolvedIdentity) -> String {
    output::detail_lines(&[
        ("IP", id.ip.map_or_else(|| "-".into(), |ip| ip.to_string())),
        ("MAC", id.mac.map_or_else(|| "-".into(), |mac| mac.to_string())),
        ("Method", id.method.to_string()),
        ("Confidence", format!("{:.2}", id.confidence)),
        ("Observed", id.observed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ("Source", id.source.clone()),
    ])
}
