// Local-network address discovery.
//
// A probe emits candidate strings (ICE-style `candidate:` lines or bare
// addresses). Only private-range IPv4 addresses embedded in them count.

use std::net::{IpAddr, Ipv4Addr};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::net::UdpSocket;

/// Source of local candidate strings.
pub trait LocalProbe: Send + Sync {
    fn candidates(&self) -> BoxFuture<'_, Vec<String>>;
}

/// Learns the local interface address by "connecting" unbound UDP
/// sockets to routing targets. Connecting a UDP socket sends nothing;
/// the kernel only picks a route and a source address.
#[derive(Debug, Clone)]
pub struct UdpRouteProbe {
    targets: Vec<String>,
}

impl Default for UdpRouteProbe {
    fn default() -> Self {
        Self {
            targets: vec![
                "10.255.255.255:9".into(),
                "172.31.255.255:9".into(),
                "192.168.255.255:9".into(),
                "8.8.8.8:53".into(),
            ],
        }
    }
}

impl UdpRouteProbe {
    pub fn new(targets: Vec<String>) -> Self {
        Self { targets }
    }

    async fn probe(target: &str) -> Option<String> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
        socket.connect(target).await.ok()?;
        let local = socket.local_addr().ok()?;
        match local.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(format!(
                "candidate:1 1 udp 2122260223 {ip} {} typ host",
                local.port()
            )),
            _ => None,
        }
    }
}

impl LocalProbe for UdpRouteProbe {
    fn candidates(&self) -> BoxFuture<'_, Vec<String>> {
        async move {
            let mut out = Vec::new();
            for target in &self.targets {
                if let Some(line) = Self::probe(target).await {
                    tracing::trace!(%target, %line, "route probe");
                    out.push(line);
                }
            }
            out
        }
        .boxed()
    }
}

/// A probe that returns fixed strings.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe(pub Vec<String>);

impl LocalProbe for StaticProbe {
    fn candidates(&self) -> BoxFuture<'_, Vec<String>> {
        let lines = self.0.clone();
        async move { lines }.boxed()
    }
}

/// Every IPv4 address embedded in `line`.
pub fn extract_ipv4(line: &str) -> Vec<Ipv4Addr> {
    line.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| token.len() >= 7)
        .filter_map(|token| token.trim_matches('.').parse().ok())
        .collect()
}

/// Distinct private-range addresses across all lines, in first-seen order.
pub fn private_addresses(lines: &[String]) -> Vec<Ipv4Addr> {
    let mut seen = Vec::new();
    for ip in lines.iter().flat_map(|l| extract_ipv4(l)) {
        if ip.is_private() && !seen.contains(&ip) {
            seen.push(ip);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_ice_candidates() {
        let line = "candidate:842163049 1 udp 1677729535 192.168.88.23 61883 typ srflx raddr 0.0.0.0 rport 0";
        assert_eq!(
            extract_ipv4(line),
            vec![Ipv4Addr::new(192, 168, 88, 23), Ipv4Addr::UNSPECIFIED]
        );
    }

    #[test]
    fn keeps_only_private_addresses() {
        let lines = vec![
            "candidate:1 1 udp 2122260223 10.0.0.5 5000 typ host".to_string(),
            "candidate:2 1 udp 1686052607 203.0.113.9 5001 typ srflx".to_string(),
            "10.0.0.5".to_string(),
            "abcd.local".to_string(),
        ];
        assert_eq!(private_addresses(&lines), vec![Ipv4Addr::new(10, 0, 0, 5)]);
    }

    #[test]
    fn ignores_version_like_tokens() {
        assert!(extract_ipv4("firmware 1.2.3 build 4").is_empty());
    }

    #[tokio::test]
    async fn static_probe_returns_lines() {
        let probe = StaticProbe(vec!["172.16.4.2".into()]);
        assert_eq!(probe.candidates().await, vec!["172.16.4.2".to_string()]);
    }
}
