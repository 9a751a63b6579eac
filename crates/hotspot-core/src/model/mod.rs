pub mod identity;
pub mod mac;
pub mod sync;

pub use identity::{Candidate, CandidateSet, DetectionMethod, RateLimitHint, ResolvedIdentity};
pub use mac::MacAddress;
pub use sync::{SyncReport, SyncState};
