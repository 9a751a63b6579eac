//! `hotspot watch`: follow the realtime channel until Ctrl-C.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use hotspot_core::{ChannelState, Portal, PushMessage, ResolvedIdentity};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WatchEvent<'a> {
    Channel { state: ChannelState },
    Message { message: &'a PushMessage },
    Identity { identity: Option<&'a ResolvedIdentity> },
}

pub async fn handle(portal: &Portal, args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.identify {
        // Without an identity the channel still opens; it just cannot
        // register the device yet.
        if let Err(e) = portal.identify(false).await {
            tracing::warn!(error = %e, "identity unavailable, watching anyway");
        }
    }

    let mut state_rx = portal.start_realtime()?;
    let mut messages = portal.realtime_messages().ok_or_else(|| CliError::Realtime {
        reason: "channel did not start".into(),
    })?;
    let mut identity_rx = portal.watch_identity();

    let initial = *state_rx.borrow_and_update();
    emit(&WatchEvent::Channel { state: initial }, global)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                emit(&WatchEvent::Channel { state }, global)?;
            }

            msg = messages.recv() => match msg {
                Ok(message) => emit_message(&message, global)?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "watch output fell behind");
                }
                Err(RecvError::Closed) => break,
            },

            changed = identity_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let identity = identity_rx.borrow_and_update().clone();
                emit(&WatchEvent::Identity { identity: identity.as_ref() }, global)?;
            }
        }
    }
    Ok(())
}

fn emit_message(message: &Arc<PushMessage>, global: &GlobalOpts) -> Result<(), CliError> {
    // Keepalives are noise in the human-readable stream.
    if matches!(**message, PushMessage::Ping { .. })
        && matches!(global.output, OutputFormat::Table | OutputFormat::Plain)
    {
        return Ok(());
    }
    emit(&WatchEvent::Message { message: message.as_ref() }, global)
}

/// One event per line: compact JSON for structured formats, a short
/// summary otherwise.
fn emit(event: &WatchEvent<'_>, global: &GlobalOpts) -> Result<(), CliError> {
    let line = match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact => structured(&OutputFormat::JsonCompact, event)?,
        OutputFormat::Yaml => format!("---\n{}", structured(&OutputFormat::Yaml, event)?),
        OutputFormat::Table | OutputFormat::Plain => summarize(event),
    };
    output::print_output(&line, global.quiet);
    Ok(())
}

fn structured(format: &OutputFormat, event: &WatchEvent<'_>) -> Result<String, CliError> {
    output::render_single(format, event, |_| String::new(), |_| String::new())
}

fn summarize(event: &WatchEvent<'_>) -> String {
    match event {
        WatchEvent::Channel { state } => format!("channel  {}", channel_label(*state)),
        WatchEvent::Message { message } => match message {
            PushMessage::MacDetected { ip, mac } => format!(
                "pushed   mac_detected ip={} mac={}",
                ip.as_deref().unwrap_or("-"),
                mac.as_deref().unwrap_or("-")
            ),
            PushMessage::CacheCleared { ip } => {
                format!("pushed   cache_cleared ip={}", ip.as_deref().unwrap_or("-"))
            }
            PushMessage::Ping { .. } => "pushed   ping".into(),
            PushMessage::Welcome { message } => {
                format!("pushed   welcome {}", message.as_deref().unwrap_or(""))
            }
        },
        WatchEvent::Identity { identity: None } => "identity cleared".into(),
        WatchEvent::Identity {
            identity: Some(id),
        } => format!(
            "identity ip={} mac={} via {}",
            id.ip.map_or_else(|| "-".into(), |ip| ip.to_string()),
            id.mac.map_or_else(|| "-".into(), |mac| mac.to_string()),
            id.method
        ),
    }
}

fn channel_label(state: ChannelState) -> &'static str {
    match state {
        ChannelState::Connecting => "connecting",
        ChannelState::Open => "open",
        ChannelState::Degraded => "degraded (push fallback)",
        ChannelState::Closed => "closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries_are_single_line() {
        let pushed = PushMessage::MacDetected {
            ip: Some("10.5.50.23".into()),
            mac: Some("aa:bb:cc:dd:ee:01".into()),
        };
        let line = summarize(&WatchEvent::Message { message: &pushed });
        assert_eq!(line, "pushed   mac_detected ip=10.5.50.23 mac=aa:bb:cc:dd:ee:01");

        let state = summarize(&WatchEvent::Channel {
            state: ChannelState::Degraded,
        });
        assert_eq!(state, "channel  degraded (push fallback)");
        assert_eq!(summarize(&WatchEvent::Identity { identity: None }), "identity cleared");
    }
}
