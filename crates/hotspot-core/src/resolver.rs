// ── Candidate resolver ──
//
// Validates raw candidates and merges them into one identity. IP and MAC
// are chosen independently: a gateway parameter may carry only the MAC
// while local discovery supplies the IP.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};

use crate::model::{Candidate, CandidateSet, DetectionMethod, MacAddress, ResolvedIdentity};

/// A candidate that survived validation.
#[derive(Debug, Clone)]
struct Valid {
    ip: Option<Ipv4Addr>,
    mac: Option<MacAddress>,
    confidence: f64,
    method: DetectionMethod,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    denylist: HashSet<Ipv4Addr>,
}

impl Resolver {
    /// `denylist` holds known proxy/gateway addresses that must never be
    /// reported as the client.
    pub fn new(denylist: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        Self {
            denylist: denylist.into_iter().collect(),
        }
    }

    pub fn is_denied(&self, ip: Ipv4Addr) -> bool {
        self.denylist.contains(&ip)
    }

    pub fn resolve(&self, set: &CandidateSet) -> Option<ResolvedIdentity> {
        let valid: Vec<Valid> = set
            .candidates
            .iter()
            .filter_map(|c| self.validate(c))
            .collect();

        let ip_pick = pick_ip(&valid);
        let mac_pick = pick_mac(&valid);

        let primary = ip_pick.or(mac_pick)?;
        let mac = mac_pick.and_then(|c| c.mac);

        let mut source = match ip_pick {
            Some(c) => format!("ip={}({:.2})", c.method, c.confidence),
            None => "ip=none".to_owned(),
        };
        match mac_pick {
            Some(c) => source.push_str(&format!(" mac={}", c.method)),
            None => source.push_str(" mac=none"),
        }

        Some(ResolvedIdentity {
            ip: ip_pick.and_then(|c| c.ip),
            mac,
            confidence: primary.confidence,
            method: primary.method,
            observed_at: primary.observed_at,
            source,
        })
    }

    fn validate(&self, c: &Candidate) -> Option<Valid> {
        if c.confidence <= 0.0 {
            return None;
        }

        let ip = c
            .ip
            .as_deref()
            .and_then(|raw| raw.trim().parse::<Ipv4Addr>().ok())
            .filter(|ip| usable_ip(*ip))
            .filter(|ip| {
                let denied = self.is_denied(*ip);
                if denied {
                    tracing::debug!(%ip, method = %c.method, "dropping denylisted address");
                }
                !denied
            });
        let mac = c.mac.as_deref().and_then(MacAddress::parse);

        if ip.is_none() && mac.is_none() {
            return None;
        }
        Some(Valid {
            ip,
            mac,
            confidence: c.confidence,
            method: c.method,
            observed_at: c.observed_at,
        })
    }
}

fn usable_ip(ip: Ipv4Addr) -> bool {
    !(ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_loopback()
        || ip.is_multicast()
        || ip.is_link_local())
}

/// Local discovery of a private address wins outright; otherwise the
/// highest confidence, then the most recent observation.
fn pick_ip(valid: &[Valid]) -> Option<&Valid> {
    let with_ip = || valid.iter().filter(|c| c.ip.is_some());

    let local = with_ip()
        .filter(|c| {
            c.method == DetectionMethod::LocalDiscovery && c.ip.is_some_and(|ip| ip.is_private())
        })
        .max_by(|a, b| rank(a, b));
    local.or_else(|| with_ip().max_by(|a, b| rank(a, b)))
}

fn rank(a: &Valid, b: &Valid) -> std::cmp::Ordering {
    a.confidence
        .total_cmp(&b.confidence)
        .then(a.observed_at.cmp(&b.observed_at))
}

fn mac_priority(method: DetectionMethod) -> u8 {
    match method {
        DetectionMethod::UrlParam => 2,
        DetectionMethod::BackendApi => 1,
        _ => 0,
    }
}

/// Highest-priority source; among equals, the most recent non-null MAC.
fn pick_mac(valid: &[Valid]) -> Option<&Valid> {
    valid
        .iter()
        .filter(|c| c.mac.is_some())
        .max_by(|a, b| {
            mac_priority(a.method)
                .cmp(&mac_priority(b.method))
                .then(a.observed_at.cmp(&b.observed_at))
        })
}
