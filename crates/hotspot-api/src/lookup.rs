// External public-IP lookup: several independent providers are queried
// concurrently and the first valid IPv4 answer wins. An answer that is
// not an IPv4 address counts as that provider failing.

use std::net::Ipv4Addr;

use futures_util::future::{BoxFuture, FutureExt, select_ok};
use tracing::debug;
use url::Url;

use crate::error::Error;

/// Providers used when none are configured.
pub const DEFAULT_PROVIDERS: &[&str] = &[
    "https://api.ipify.org?format=json",
    "https://ipinfo.io/json",
    "https://ifconfig.co/json",
];

#[derive(Debug, Clone)]
pub struct PublicIpLookup {
    http: reqwest::Client,
    providers: Vec<Url>,
}

impl PublicIpLookup {
    pub fn new(http: reqwest::Client, providers: Vec<Url>) -> Self {
        Self { http, providers }
    }

    /// Lookup against [`DEFAULT_PROVIDERS`].
    pub fn with_defaults(http: reqwest::Client) -> Self {
        let providers = DEFAULT_PROVIDERS
            .iter()
            .filter_map(|p| Url::parse(p).ok())
            .collect();
        Self::new(http, providers)
    }

    pub fn providers(&self) -> &[Url] {
        &self.providers
    }

    /// First IPv4 answer, or `None` if every provider failed.
    pub async fn lookup(&self) -> Option<Ipv4Addr> {
        if self.providers.is_empty() {
            return None;
        }

        let queries: Vec<BoxFuture<'_, Result<Ipv4Addr, Error>>> = self
            .providers
            .iter()
            .map(|url| self.query(url).boxed())
            .collect();

        match select_ok(queries).await {
            Ok((ip, _pending)) => Some(ip),
            Err(e) => {
                debug!(error = %e, "all public-IP providers failed");
                None
            }
        }
    }

    async fn query(&self, url: &Url) -> Result<Ipv4Addr, Error> {
        let resp = self.http.get(url.clone()).send().await?.error_for_status()?;
        let body = resp.text().await?;
        let ip = parse_answer(&body).ok_or_else(|| Error::Deserialization {
            message: format!("no IPv4 address in answer from {url}"),
            body: body.clone(),
        })?;
        debug!(provider = %url, %ip, "public-IP provider answered");
        Ok(ip)
    }
}

/// Accepts `{"ip": "..."}` JSON or a bare address in plain text.
fn parse_answer(body: &str) -> Option<Ipv4Addr> {
    let raw = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value.get("ip")?.as_str()?.trim().to_owned(),
        Err(_) => body.trim().to_owned(),
    };
    raw.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn parses_json_and_text_answers() {
        assert_eq!(parse_answer(r#"{"ip":"203.0.113.7"}"#), Some(Ipv4Addr::new(203, 0, 113, 7)));
        assert_eq!(parse_answer("198.51.100.2\n"), Some(Ipv4Addr::new(198, 51, 100, 2)));
        assert_eq!(parse_answer("<html>blocked</html>"), None);
        assert_eq!(parse_answer(r#"{"country":"NL"}"#), None);
    }

    #[test]
    fn rejects_answers_that_are_not_ipv4() {
        assert_eq!(parse_answer("2001:db8::1"), None);
        assert_eq!(parse_answer(r#"{"ip":"2001:db8::1"}"#), None);
        assert_eq!(parse_answer("cafe"), None);
    }

    #[tokio::test]
    async fn ipv6_answer_does_not_end_the_race() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v6"))
            .respond_with(ResponseTemplate::new(200).set_body_string("2001:db8::1"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"ip":"203.0.113.7"}"#)
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let lookup = PublicIpLookup::new(
            reqwest::Client::new(),
            vec![base.join("/v6").unwrap(), base.join("/v4").unwrap()],
        );
        assert_eq!(lookup.lookup().await, Some(Ipv4Addr::new(203, 0, 113, 7)));
    }

    #[tokio::test]
    async fn no_providers_yields_none() {
        let lookup = PublicIpLookup::new(reqwest::Client::new(), Vec::new());
        assert_eq!(lookup.lookup().await, None);
    }
}
