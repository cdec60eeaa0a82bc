//! Echo endpoint: the single probe target used for liveness and anonymity
//!
//! The endpoint reflects the caller's apparent IP and request headers. Which
//! headers show up depends on the service, so the marker set is configurable.

use crate::error::PipelineError;
use crate::proxy::models::AnonymityLevel;
use crate::Result;
use regex::Regex;
use reqwest::Client;
use std::net::IpAddr;
use std::time::Duration;

/// Default echo service. Must not carry `show_env`, which makes httpbin reflect
/// its own load balancer's forwarding headers.
pub const DEFAULT_ECHO_URL: &str = "http://httpbin.org/get";

/// Header names that reveal a proxy in the path
pub const DEFAULT_PROXY_MARKERS: &[&str] = &[
    "via",
    "forwarded",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-real-ip",
    "x-proxy-id",
    "proxy-connection",
    "client-ip",
    "forwarded-for",
    "x-bluecoat-via",
];

/// [`DEFAULT_PROXY_MARKERS`] as owned strings, for configs
pub fn default_proxy_markers() -> Vec<String> {
    DEFAULT_PROXY_MARKERS.iter().map(|m| m.to_string()).collect()
}

/// What came back from the echo endpoint through a proxy
#[derive(Debug, Clone, Default)]
pub struct EchoResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl EchoResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn text(&self) -> String {
        let mut text = String::with_capacity(self.body.len() + 64 * self.headers.len());
        for (name, value) in &self.headers {
            text.push_str(name);
            text.push_str(": ");
            text.push_str(value);
            text.push('\n');
        }
        text.push_str(&self.body);
        text
    }
}

#[derive(Debug, Clone)]
pub struct EchoEndpoint {
    url: String,
    real_ip: Option<IpAddr>,
    marker_re: Regex,
}

impl EchoEndpoint {
    pub fn new(url: &str, real_ip: Option<IpAddr>) -> Result<Self> {
        Self::with_markers(url, real_ip, &default_proxy_markers())
    }

    pub fn with_markers(url: &str, real_ip: Option<IpAddr>, markers: &[String]) -> Result<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(PipelineError::Config(format!(
                "echo endpoint must be an http(s) URL: {}",
                url
            )));
        }
        let markers: Vec<String> = markers
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(regex::escape)
            .collect();
        if markers.is_empty() {
            return Err(PipelineError::Config("no proxy markers configured".to_string()));
        }

        let alternation = markers.join("|");
        let pattern = format!(r"(?i)(?:^|[^a-z0-9-])(?:{})(?:[^a-z0-9-]|$)", alternation);
        let marker_re = Regex::new(&pattern).map_err(|e| PipelineError::Config(e.to_string()))?;

        Ok(Self {
            url: url.to_string(),
            real_ip,
            marker_re,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The same endpoint requested through a CONNECT tunnel
    pub fn tls_url(&self) -> String {
        match self.url.strip_prefix("http://") {
            Some(rest) => format!("https://{}", rest),
            None => self.url.clone(),
        }
    }

    pub fn real_ip(&self) -> Option<IpAddr> {
        self.real_ip
    }

    /// Classify a successful echo response.
    ///
    /// The real IP anywhere in the reflected request means `Transparent`; a
    /// proxy marker without it means `Anonymous`; neither means `Elite`.
    pub fn anonymity(&self, response: &EchoResponse) -> AnonymityLevel {
        let text = response.text();

        if let Some(real_ip) = self.real_ip {
            let real_ip = real_ip.to_canonical();
            if extract_ips(&text).any(|ip| ip.to_canonical() == real_ip) {
                return AnonymityLevel::Transparent;
            }
        }

        if self.marker_re.is_match(&text) {
            AnonymityLevel::Anonymous
        } else {
            AnonymityLevel::Elite
        }
    }
}

/// Every IP literal found in free text
fn extract_ips(text: &str) -> impl Iterator<Item = IpAddr> + '_ {
    text.split(|c: char| !(c.is_ascii_hexdigit() || c == '.' || c == ':'))
        .filter(|token| token.len() >= 2)
        .filter_map(parse_ip_token)
}

fn parse_ip_token(token: &str) -> Option<IpAddr> {
    // `::ffff:a.b.c.d` starts with a colon, so try the raw token first
    if let Ok(ip) = token.parse() {
        return Some(ip);
    }
    let token = token.trim_matches(|c| c == ':' || c == '.');
    if let Ok(ip) = token.parse() {
        return Some(ip);
    }
    // `a.b.c.d:port`
    let (host, port) = token.rsplit_once(':')?;
    if host.contains('.') && port.parse::<u16>().is_ok() {
        host.parse().ok()
    } else {
        None
    }
}

/// Ask the echo endpoint, without any proxy, which IP we appear as
pub async fn discover_real_ip(url: &str, timeout: Duration) -> Result<IpAddr> {
    let client = Client::builder().no_proxy().timeout(timeout).build()?;
    let body = client.get(url).send().await?.error_for_status()?.text().await?;

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(origin) = value.get("origin").and_then(|o| o.as_str()) {
            if let Some(ip) = extract_ips(origin).next() {
                return Ok(ip);
            }
        }
    }

    let found = extract_ips(&body).next();
    found.ok_or_else(|| {
        PipelineError::ProbeConnectionFailed(format!("no IP address in response from {}", url))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REAL_IP: &str = "203.0.113.7";

    fn endpoint() -> EchoEndpoint {
        EchoEndpoint::new(DEFAULT_ECHO_URL, Some(REAL_IP.parse().unwrap())).unwrap()
    }

    fn response(body: &str) -> EchoResponse {
        EchoResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    #[test]
    fn test_transparent_when_real_ip_forwarded() {
        let body = r#"{"headers": {"Host": "httpbin.org", "X-Forwarded-For": "203.0.113.7"}, "origin": "203.0.113.7, 198.51.100.2"}"#;
        assert_eq!(endpoint().anonymity(&response(body)), AnonymityLevel::Transparent);
    }

    #[test]
    fn test_anonymous_when_marker_without_ip() {
        let body = r#"{"headers": {"Host": "httpbin.org", "Via": "1.1 squid"}, "origin": "198.51.100.2"}"#;
        assert_eq!(endpoint().anonymity(&response(body)), AnonymityLevel::Anonymous);
    }

    #[test]
    fn test_marker_in_response_headers() {
        let mut resp = response(r#"{"origin": "198.51.100.2"}"#);
        resp.headers.push(("Via".to_string(), "1.1 proxy".to_string()));
        assert_eq!(endpoint().anonymity(&resp), AnonymityLevel::Anonymous);
    }

    #[test]
    fn test_elite_when_nothing_leaks() {
        let body = r#"{"headers": {"Host": "httpbin.org", "User-Agent": "curl"}, "origin": "198.51.100.2", "url": "http://httpbin.org/get"}"#;
        assert_eq!(endpoint().anonymity(&response(body)), AnonymityLevel::Elite);
    }

    #[test]
    fn test_ip_match_is_exact() {
        let body = r#"{"origin": "203.0.113.70"}"#;
        assert_eq!(endpoint().anonymity(&response(body)), AnonymityLevel::Elite);
    }

    #[test]
    fn test_ipv4_mapped_real_ip_is_transparent() {
        let body = r#"{"headers": {"Host": "httpbin.org"}, "origin": "::ffff:203.0.113.7"}"#;
        assert_eq!(endpoint().anonymity(&response(body)), AnonymityLevel::Transparent);
    }

    #[test]
    fn test_unknown_real_ip_skips_transparent_rule() {
        let endpoint = EchoEndpoint::new(DEFAULT_ECHO_URL, None).unwrap();
        let body = r#"{"headers": {"X-Forwarded-For": "203.0.113.7"}}"#;
        assert_eq!(endpoint.anonymity(&response(body)), AnonymityLevel::Anonymous);
    }

    #[test]
    fn test_custom_markers() {
        let endpoint = EchoEndpoint::with_markers(
            DEFAULT_ECHO_URL,
            None,
            &["x-proxy-hop".to_string()],
        )
        .unwrap();
        assert_eq!(
            endpoint.anonymity(&response("X-Proxy-Hop: 1")),
            AnonymityLevel::Anonymous
        );
        assert_eq!(endpoint.anonymity(&response("Via: 1.1")), AnonymityLevel::Elite);
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(EchoEndpoint::new("ftp://example.com", None).is_err());
    }

    #[test]
    fn test_tls_url() {
        assert_eq!(endpoint().tls_url(), "https://httpbin.org/get");
    }

    #[test]
    fn test_extract_ips() {
        let ips: Vec<IpAddr> =
            extract_ips("origin: 1.2.3.4, [2001:db8::1] and 300.1.1.1 via 5.6.7.8:3128.").collect();
        assert_eq!(ips.len(), 3);
        assert_eq!(ips[2], "5.6.7.8".parse::<IpAddr>().unwrap());
        assert_eq!(ips[0], "1.2.3.4".parse::<IpAddr>().unwrap());
    }
}
