// ── Identity model ──
//
// Raw observations (`Candidate`) come from the collector as untrusted
// strings. The resolver validates and merges them into a single
// `ResolvedIdentity` with typed addresses.

use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hotspot_api::AddressHint;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::mac::MacAddress;

/// Where an observation came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DetectionMethod {
    /// Identity fields injected by the gateway into the landing URL.
    UrlParam,
    /// Local interface addresses discovered by a connection probe.
    LocalDiscovery,
    /// The backend's view of the calling client.
    BackendApi,
    /// Third-party public-IP lookup.
    ExternalApi,
    /// Restored from persistent storage.
    Cache,
}

/// One untrusted observation. Never mutated once collected.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub ip: Option<String>,
    pub mac: Option<String>,
    /// 0.0 ..= 1.0; a failed source reports 0.
    pub confidence: f64,
    pub method: DetectionMethod,
    pub observed_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(method: DetectionMethod, confidence: f64) -> Self {
        Self {
            ip: None,
            mac: None,
            confidence: confidence.clamp(0.0, 1.0),
            method,
            observed_at: Utc::now(),
        }
    }

    /// A zero-confidence marker for a source that produced nothing.
    pub fn failed(method: DetectionMethod) -> Self {
        Self::new(method, 0.0)
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// The backend asked us to slow down while collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHint {
    pub retry_after: Option<Duration>,
}

/// Everything one collection cycle produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSet {
    pub candidates: Vec<Candidate>,
    pub rate_limit: Option<RateLimitHint>,
}

impl CandidateSet {
    pub fn push(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    /// Whether any source produced something usable.
    pub fn has_signal(&self) -> bool {
        self.candidates.iter().any(|c| c.confidence > 0.0)
    }
}

/// The single identity chosen for this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub ip: Option<Ipv4Addr>,
    pub mac: Option<MacAddress>,
    pub confidence: f64,
    pub method: DetectionMethod,
    pub observed_at: DateTime<Utc>,
    /// Human-readable trace of how the identity was assembled.
    pub source: String,
}

impl ResolvedIdentity {
    pub fn has_mac(&self) -> bool {
        self.mac.is_some()
    }

    pub fn has_ip(&self) -> bool {
        self.ip.is_some()
    }

    /// This identity as a candidate for the next resolution.
    pub fn to_candidate(&self) -> Candidate {
        let mut c = Candidate::new(self.method, self.confidence).observed_at(self.observed_at);
        c.ip = self.ip.map(|ip| ip.to_string());
        c.mac = self.mac.map(|mac| mac.to_string());
        c
    }

    /// The form published to the transport layer.
    pub fn to_hint(&self) -> AddressHint {
        AddressHint {
            ip: self.ip.map(|ip| ip.to_string()),
            mac: self.mac.map(|mac| mac.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_through_text() {
        assert_eq!(DetectionMethod::LocalDiscovery.to_string(), "local_discovery");
        assert_eq!(
            "backend_api".parse::<DetectionMethod>().unwrap(),
            DetectionMethod::BackendApi
        );
    }

    #[test]
    fn confidence_is_clamped() {
        assert!((Candidate::new(DetectionMethod::UrlParam, 1.7).confidence - 1.0).abs() < f64::EPSILON);
        assert!(Candidate::failed(DetectionMethod::ExternalApi).confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn hint_renders_canonical_forms() {
        let id = ResolvedIdentity {
            ip: Some(Ipv4Addr::new(10, 5, 50, 23)),
            mac: MacAddress::parse("AA-BB-CC-DD-EE-01"),
            confidence: 1.0,
            method: DetectionMethod::UrlParam,
            observed_at: Utc::now(),
            source: "url_param".into(),
        };
        let hint = id.to_hint();
        assert_eq!(hint.ip.as_deref(), Some("10.5.50.23"));
        assert_eq!(hint.mac.as_deref(), Some("aa:bb:cc:dd:ee:01"));
    }
}
