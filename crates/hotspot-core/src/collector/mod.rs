//! Identity candidate collection.
//!
//! Four independent sources race concurrently; each is bounded and each
//! failure turns into a zero-confidence candidate instead of an error.

pub mod gateway;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use hotspot_api::{ApiClient, Error as ApiError, PublicIpLookup};
use tokio::time::timeout;
use url::Url;

use crate::model::{Candidate, CandidateSet, DetectionMethod, RateLimitHint};
pub use local::{LocalProbe, StaticProbe, UdpRouteProbe};

pub const LOCAL_CONFIDENCE: f64 = 0.95;
pub const BACKEND_CONFIDENCE: f64 = 0.8;
pub const EXTERNAL_CONFIDENCE: f64 = 0.6;

/// Anything that can produce a candidate set.
pub trait IdentityCollector: Send + Sync {
    fn collect(&self, force_refresh: bool) -> BoxFuture<'_, CandidateSet>;
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Landing URL carrying gateway-injected identity fields.
    pub portal_url: Option<Url>,
    /// Bound for local discovery. Default: 3s.
    pub local_timeout: Duration,
    /// Bound for the backend and external lookups. Default: 10s.
    pub remote_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            portal_url: None,
            local_timeout: Duration::from_secs(3),
            remote_timeout: Duration::from_secs(10),
        }
    }
}

/// The production collector.
pub struct Collector {
    config: CollectorConfig,
    api: Arc<ApiClient>,
    probe: Option<Arc<dyn LocalProbe>>,
    lookup: Option<PublicIpLookup>,
}

impl Collector {
    pub fn new(
        config: CollectorConfig,
        api: Arc<ApiClient>,
        probe: Option<Arc<dyn LocalProbe>>,
        lookup: Option<PublicIpLookup>,
    ) -> Self {
        Self {
            config,
            api,
            probe,
            lookup,
        }
    }

    fn from_gateway(&self) -> Candidate {
        self.config
            .portal_url
            .as_ref()
            .map_or_else(|| Candidate::failed(DetectionMethod::UrlParam), gateway::from_landing_url)
    }

    async fn from_local(&self) -> Vec<Candidate> {
        let Some(ref probe) = self.probe else {
            return vec![Candidate::failed(DetectionMethod::LocalDiscovery)];
        };

        let Ok(lines) = timeout(self.config.local_timeout, probe.candidates()).await else {
            tracing::debug!("local discovery timed out");
            return vec![Candidate::failed(DetectionMethod::LocalDiscovery)];
        };

        let found: Vec<Candidate> = local::private_addresses(&lines)
            .into_iter()
            .map(|ip| Candidate::new(DetectionMethod::LocalDiscovery, LOCAL_CONFIDENCE).with_ip(ip.to_string()))
            .collect();
        if found.is_empty() {
            vec![Candidate::failed(DetectionMethod::LocalDiscovery)]
        } else {
            found
        }
    }

    async fn from_backend(&self, force_refresh: bool) -> (Candidate, Option<RateLimitHint>) {
        let failed = Candidate::failed(DetectionMethod::BackendApi);
        let result = timeout(self.config.remote_timeout, self.api.detect_client_info(force_refresh)).await;

        match result {
            Ok(Ok(summary)) => {
                let mut c = Candidate::new(DetectionMethod::BackendApi, BACKEND_CONFIDENCE);
                c.ip = summary.detected_ip.filter(|s| !s.trim().is_empty());
                c.mac = summary.detected_mac.filter(|s| !s.trim().is_empty());
                if c.ip.is_none() && c.mac.is_none() {
                    return (failed, None);
                }
                (c, None)
            }
            Ok(Err(ApiError::RateLimited { retry_after_secs })) => {
                tracing::info!(?retry_after_secs, "backend detection rate limited");
                let hint = RateLimitHint {
                    retry_after: retry_after_secs.map(Duration::from_secs),
                };
                (failed, Some(hint))
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "backend detection failed");
                (failed, None)
            }
            Err(_) => {
                tracing::debug!("backend detection timed out");
                (failed, None)
            }
        }
    }

    async fn from_external(&self) -> Candidate {
        let Some(ref lookup) = self.lookup else {
            return Candidate::failed(DetectionMethod::ExternalApi);
        };
        match timeout(self.config.remote_timeout, lookup.lookup()).await {
            Ok(Some(ip)) => {
                Candidate::new(DetectionMethod::ExternalApi, EXTERNAL_CONFIDENCE).with_ip(ip.to_string())
            }
            Ok(None) | Err(_) => Candidate::failed(DetectionMethod::ExternalApi),
        }
    }
}

impl IdentityCollector for Collector {
    fn collect(&self, force_refresh: bool) -> BoxFuture<'_, CandidateSet> {
        async move {
            let url_param = self.from_gateway();
            let (local, (backend, rate_limit), external) = tokio::join!(
                self.from_local(),
                self.from_backend(force_refresh),
                self.from_external(),
            );

            let mut set = CandidateSet {
                candidates: Vec::with_capacity(local.len() + 3),
                rate_limit,
            };
            set.push(url_param);
            set.candidates.extend(local);
            set.push(backend);
            set.push(external);

            tracing::debug!(
                candidates = set.candidates.len(),
                usable = set.candidates.iter().filter(|c| c.confidence > 0.0).count(),
                rate_limited = set.rate_limit.is_some(),
                "collection finished"
            );
            set
        }
        .boxed()
    }
}
