// ── Device sync state ──

use hotspot_api::SyncOutcome;
use serde::Serialize;
use strum::Display;

/// Authorization status of this device, one per session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncState {
    #[default]
    Unknown,
    Valid,
    Unregistered,
    Throttled,
    RateLimited,
    Error,
}

/// Result of one sync call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub state: SyncState,
    /// The device must complete the authorization flow.
    pub authorization_required: bool,
}

/// Next state for a backend answer.
///
/// `DEVICE_UNREGISTERED` only moves the state when the caller allows the
/// authorization flow. `ERROR` is recorded only while nothing is known yet;
/// an established state is left alone. Leaving `Unregistered` for `Valid`
/// requires a confirmed authorization.
pub fn transition(
    current: SyncState,
    outcome: &SyncOutcome,
    allow_authorization_flow: bool,
    authorization_confirmed: bool,
) -> SyncReport {
    let unchanged = SyncReport {
        state: current,
        authorization_required: current == SyncState::Unregistered,
    };

    match outcome {
        SyncOutcome::Valid if current == SyncState::Unregistered && !authorization_confirmed => {
            unchanged
        }
        SyncOutcome::Valid => SyncReport {
            state: SyncState::Valid,
            authorization_required: false,
        },
        SyncOutcome::Unregistered if allow_authorization_flow => SyncReport {
            state: SyncState::Unregistered,
            authorization_required: true,
        },
        // Throttling never lets a device slip out of the authorization flow.
        SyncOutcome::Throttled { .. } | SyncOutcome::RateLimited { .. }
            if current == SyncState::Unregistered =>
        {
            unchanged
        }
        SyncOutcome::Throttled { .. } => SyncReport {
            state: SyncState::Throttled,
            authorization_required: false,
        },
        SyncOutcome::RateLimited { .. } => SyncReport {
            state: SyncState::RateLimited,
            authorization_required: false,
        },
        SyncOutcome::Error(_) if current == SyncState::Unknown => SyncReport {
            state: SyncState::Error,
            authorization_required: false,
        },
        SyncOutcome::Unregistered | SyncOutcome::Error(_) => unchanged,
    }
}
