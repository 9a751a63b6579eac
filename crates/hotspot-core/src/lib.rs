// hotspot-core: client identity resolution, detection throttling and
// device sync on top of hotspot-api.

pub mod collector;
pub mod config;
pub mod detection;
pub mod error;
pub mod model;
pub mod portal;
pub mod resolver;
pub mod storage;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use collector::{Collector, CollectorConfig, IdentityCollector, LocalProbe, StaticProbe, UdpRouteProbe};
pub use config::PortalConfig;
pub use detection::{DetectionConfig, DetectionService};
pub use error::CoreError;
pub use portal::Portal;
pub use resolver::Resolver;
pub use storage::{FileStorage, MemoryStorage, PersistedIdentity, Storage};
pub use sync::DeviceSync;

pub use model::{
    Candidate, CandidateSet, DetectionMethod, MacAddress, RateLimitHint, ResolvedIdentity,
    SyncReport, SyncState,
};

// Transport types consumers commonly need alongside the portal.
pub use hotspot_api::{
    BestEffort, ChannelState, CircuitPhase, EndpointMetrics, ErrorKind, MetricsSnapshot, PushMessage,
    SessionEvent, TlsMode,
};
