// hotspot-api: Resilient async transport for a hotspot portal backend

pub mod auth;
pub mod circuit;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod lookup;
pub mod metrics;
pub mod models;
pub mod realtime;
pub mod transport;

pub use auth::{Session, SessionEvent};
pub use circuit::{CircuitBreaker, CircuitConfig, CircuitPermit, CircuitPhase, CircuitState};
pub use client::{ApiClient, BestEffort, ClientConfig, RequestOptions, RetryPolicy};
pub use error::{Error, ErrorKind};
pub use lookup::PublicIpLookup;
pub use metrics::{EndpointMetrics, MetricsRegistry, MetricsSnapshot};
pub use models::{AddressHint, DetectSummary, SyncOutcome};
pub use realtime::{ChannelState, PushMessage, RealtimeConfig, RealtimeHandle};
pub use transport::{TlsMode, TransportConfig};
