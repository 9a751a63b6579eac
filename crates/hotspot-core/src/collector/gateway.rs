// Identity fields a captive-portal gateway injects into the landing URL.

use std::net::Ipv4Addr;

use url::Url;

use crate::model::{Candidate, DetectionMethod, MacAddress};

pub const IP_KEYS: &[&str] = &["ip", "client_ip", "clientip", "uip", "ip_address"];
pub const MAC_KEYS: &[&str] = &["mac", "client_mac", "clientmac", "mac_address", "id"];

/// Read the landing URL's query string. A value counts only if it parses.
pub fn from_landing_url(url: &Url) -> Candidate {
    let mut ip = None;
    let mut mac = None;

    for (key, value) in url.query_pairs() {
        let key = key.to_ascii_lowercase();
        if ip.is_none() && IP_KEYS.contains(&key.as_str()) {
            ip = value.trim().parse::<Ipv4Addr>().ok();
        } else if mac.is_none() && MAC_KEYS.contains(&key.as_str()) {
            mac = MacAddress::parse(&value);
        }
    }

    if ip.is_none() && mac.is_none() {
        return Candidate::failed(DetectionMethod::UrlParam);
    }

    let mut candidate = Candidate::new(DetectionMethod::UrlParam, 1.0);
    if let Some(ip) = ip {
        candidate = candidate.with_ip(ip.to_string());
    }
    if let Some(mac) = mac {
        candidate = candidate.with_mac(mac.to_string());
    }
    candidate
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reads_mikrotik_style_params() {
        let url = Url::parse(
            "https://portal.example.net/login?client_ip=10.5.50.23&clientmac=AA-BB-CC-DD-EE-01&dst=http%3A%2F%2Fneverssl.com",
        )
        .unwrap();
        let c = from_landing_url(&url);
        assert_eq!(c.method, DetectionMethod::UrlParam);
        assert_eq!(c.ip.as_deref(), Some("10.5.50.23"));
        assert_eq!(c.mac.as_deref(), Some("aa:bb:cc:dd:ee:01"));
        assert!((c.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_values_do_not_count() {
        let url = Url::parse("https://portal.example.net/?ip=$(ip)&mac=$(mac)").unwrap();
        let c = from_landing_url(&url);
        assert!(c.confidence.abs() < f64::EPSILON);
        assert!(c.ip.is_none() && c.mac.is_none());
    }

    #[test]
    fn mac_only_is_still_useful() {
        let url = Url::parse("https://portal.example.net/?id=aabb.ccdd.ee01").unwrap();
        let c = from_landing_url(&url);
        assert!(c.ip.is_none());
        assert_eq!(c.mac.as_deref(), Some("aa:bb:cc:dd:ee:01"));
    }
}
