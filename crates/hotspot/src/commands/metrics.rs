//! `hotspot metrics`

use serde::Serialize;
use tabled::Tabled;

use hotspot_core::{CircuitPhase, EndpointMetrics, Portal};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct EndpointEntry {
    endpoint: String,
    #[serde(flatten)]
    metrics: EndpointMetrics,
}

#[derive(Tabled)]
struct MetricsRow {
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Requests")]
    requests: u64,
    #[tabled(rename = "Failures")]
    failures: u64,
    #[tabled(rename = "Retries")]
    retries: u64,
    #[tabled(rename = "Last Status")]
    last_status: String,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

impl From<&EndpointEntry> for MetricsRow {
    fn from(e: &EndpointEntry) -> Self {
        Self {
            endpoint: e.endpoint.clone(),
            requests: e.metrics.request_count,
            failures: e.metrics.failure_count,
            retries: e.metrics.retry_count,
            last_status: e
                .metrics
                .last_status
                .map_or_else(|| "-".into(), |s| s.to_string()),
            last_error: e.metrics.last_error.clone().unwrap_or_else(|| "-".into()),
        }
    }
}

pub fn handle(portal: &Portal, global: &GlobalOpts) -> Result<(), CliError> {
    let entries: Vec<EndpointEntry> = portal
        .api()
        .metrics_snapshot()
        .into_iter()
        .map(|(endpoint, metrics)| EndpointEntry { endpoint, metrics })
        .collect();

    let out = output::render_list(&global.output, &entries, |e| MetricsRow::from(e), |e| {
        format!("{}\t{}", e.endpoint, e.metrics.request_count)
    })?;
    output::print_output(&out, global.quiet);

    if matches!(global.output, OutputFormat::Table) && !global.quiet {
        let phase = match portal.api().circuit().phase() {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half-open",
        };
        eprintln!("Circuit: {phase}");
    }
    Ok(())
}
