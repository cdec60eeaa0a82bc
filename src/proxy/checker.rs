//! Proxy checker: verifies one candidate against the echo endpoint

use crate::error::PipelineError;
use crate::proxy::echo::{default_proxy_markers, EchoEndpoint, DEFAULT_ECHO_URL};
use crate::proxy::geo::GeoLocator;
use crate::proxy::models::{Candidate, FailureReason, VerificationResult};
use crate::proxy::probe::{NetworkProbe, Probe};
use crate::Result;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default wall-clock budget per candidate in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 6;

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Budget for all attempts on one candidate
    pub timeout: Duration,
    /// Echo endpoint requested through each candidate
    pub echo_url: String,
    /// Our own outbound IP, used to spot transparent proxies
    pub real_ip: Option<IpAddr>,
    /// Path to MMDB file for geolocation (optional)
    pub mmdb_path: Option<PathBuf>,
    /// Header names whose presence in the echo marks a proxy as anonymous
    pub proxy_markers: Vec<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            echo_url: DEFAULT_ECHO_URL.to_string(),
            real_ip: None,
            mmdb_path: None,
            proxy_markers: default_proxy_markers(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_echo_url(mut self, url: String) -> Self {
        self.echo_url = url;
        self
    }

    pub fn with_real_ip(mut self, ip: IpAddr) -> Self {
        self.real_ip = Some(ip);
        self
    }

    pub fn with_mmdb_path(mut self, path: PathBuf) -> Self {
        self.mmdb_path = Some(path);
        self
    }

    pub fn with_proxy_markers(mut self, markers: Vec<String>) -> Self {
        self.proxy_markers = markers;
        self
    }
}

/// Proxy checker for validating proxies
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    echo: Arc<EchoEndpoint>,
    probe: Arc<dyn Probe>,
    geo_locator: Option<GeoLocator>,
}

impl ProxyChecker {
    /// Create a checker that probes over the network
    pub fn with_config(config: CheckerConfig) -> Result<Self> {
        Self::with_probe(config, Arc::new(NetworkProbe::new()))
    }

    /// Create a checker around any probe implementation
    pub fn with_probe(config: CheckerConfig, probe: Arc<dyn Probe>) -> Result<Self> {
        if config.timeout.is_zero() {
            return Err(PipelineError::Config(
                "per-candidate timeout must be positive".to_string(),
            ));
        }

        let echo =
            EchoEndpoint::with_markers(&config.echo_url, config.real_ip, &config.proxy_markers)?;
        if echo.real_ip().is_none() {
            tracing::warn!("Real outbound IP unknown, transparent proxies cannot be detected");
        }

        let geo_locator = config.mmdb_path.as_ref().and_then(|path| {
            GeoLocator::from_path(path)
                .map_err(|e| tracing::warn!(error = %e, "Geolocation disabled"))
                .ok()
        });

        Ok(Self {
            config,
            echo: Arc::new(echo),
            probe,
            geo_locator,
        })
    }

    /// Verify a single candidate.
    ///
    /// The hint protocol is tried first, then at most one fallback, all within
    /// one `timeout` budget. Any network failure marks the candidate dead.
    pub async fn verify(&self, candidate: Candidate) -> VerificationResult {
        let deadline = Instant::now() + self.config.timeout;
        let (country, city) = self.locate(&candidate);
        let mut failure = FailureReason::Timeout;

        for protocol in candidate.protocol_hint.attempt_order() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                failure = FailureReason::Timeout;
                break;
            }

            let start = Instant::now();
            let outcome = tokio::time::timeout(
                remaining,
                self.probe.probe(&candidate, protocol, &self.echo, remaining),
            )
            .await;

            match outcome {
                Ok(Ok(response)) if response.is_success() => {
                    let latency = start.elapsed().as_millis() as u64;
                    let anonymity = self.echo.anonymity(&response);
                    tracing::debug!(
                        proxy = %candidate,
                        %protocol,
                        %anonymity,
                        latency_ms = latency,
                        "Proxy alive"
                    );
                    return VerificationResult::alive(candidate, protocol, anonymity, latency)
                        .with_location(country, city);
                }
                Ok(Ok(response)) => failure = FailureReason::BadStatus(response.status),
                Ok(Err(PipelineError::ProbeTimeout)) | Err(_) => failure = FailureReason::Timeout,
                Ok(Err(e)) => failure = FailureReason::ConnectionFailed(e.to_string()),
            }

            tracing::debug!(proxy = %candidate, %protocol, reason = %failure, "Probe failed");
        }

        VerificationResult::dead(candidate, failure).with_location(country, city)
    }

    /// Best-effort location of the candidate host
    fn locate(&self, candidate: &Candidate) -> (Option<String>, Option<String>) {
        let Some(geo) = &self.geo_locator else {
            return (None, None);
        };
        match geo.lookup(&candidate.host) {
            Ok(location) => (location.country(), location.city_name),
            Err(e) => {
                tracing::debug!(host = %candidate.host, error = %e, "Geolocation skipped");
                (None, None)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::proxy::echo::EchoResponse;
    use crate::proxy::models::{AnonymityLevel, Protocol, ProtocolHint};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted probe: per-protocol outcome, optional delay
    #[derive(Default)]
    pub(crate) struct ScriptedProbe {
        pub outcomes: HashMap<Protocol, std::result::Result<EchoResponse, String>>,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl ScriptedProbe {
        pub fn ok(protocol: Protocol, body: &str) -> Self {
            let mut probe = Self::default();
            probe.outcomes.insert(
                protocol,
                Ok(EchoResponse {
                    status: 200,
                    headers: Vec::new(),
                    body: body.to_string(),
                }),
            );
            probe
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(
            &self,
            _candidate: &Candidate,
            protocol: Protocol,
            _echo: &EchoEndpoint,
            _timeout: Duration,
        ) -> Result<EchoResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.outcomes.get(&protocol) {
                Some(Ok(response)) => Ok(response.clone()),
                Some(Err(msg)) => Err(PipelineError::ProbeConnectionFailed(msg.clone())),
                None => Err(PipelineError::ProbeConnectionFailed("connection refused".to_string())),
            }
        }
    }

    pub(crate) fn config() -> CheckerConfig {
        CheckerConfig::new()
            .with_echo_url("http://echo.test/get".to_string())
            .with_real_ip("203.0.113.7".parse().unwrap())
            .with_timeout(Duration::from_secs(2))
    }

    fn checker(probe: Arc<ScriptedProbe>) -> ProxyChecker {
        ProxyChecker::with_probe(config(), probe).unwrap()
    }

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.echo_url, DEFAULT_ECHO_URL);
        assert!(config.real_ip.is_none());
    }

    #[test]
    fn test_checker_rejects_zero_timeout() {
        let config = config().with_timeout(Duration::ZERO);
        assert!(ProxyChecker::with_config(config).is_err());
    }

    #[tokio::test]
    async fn test_connection_failure_is_dead_without_attributes() {
        let probe = Arc::new(ScriptedProbe::default());
        let candidate = Candidate::new("10.0.0.1", 8080, ProtocolHint::Http);
        let result = checker(probe.clone()).verify(candidate).await;

        assert!(!result.is_alive());
        assert!(result.latency_millis().is_none());
        assert!(result.confirmed_protocol().is_none());
        assert!(matches!(
            result.failure(),
            Some(FailureReason::ConnectionFailed(_))
        ));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_https_hint_falls_back_to_http() {
        let probe = Arc::new(ScriptedProbe::ok(Protocol::Http, r#"{"origin": "198.51.100.2"}"#));
        let candidate = Candidate::new("10.0.0.1", 8080, ProtocolHint::Https);
        let result = checker(probe.clone()).verify(candidate).await;

        assert!(result.is_alive());
        assert_eq!(result.confirmed_protocol(), Some(Protocol::Http));
        assert_eq!(result.anonymity_level(), Some(AnonymityLevel::Elite));
        assert!(result.latency_millis().is_some());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_at_most_two_attempts() {
        let probe = Arc::new(ScriptedProbe::default());
        let candidate = Candidate::new("10.0.0.1", 1080, ProtocolHint::Unknown);
        let result = checker(probe.clone()).verify(candidate).await;

        assert!(!result.is_alive());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_status_is_dead() {
        let mut probe = ScriptedProbe::default();
        probe.outcomes.insert(
            Protocol::Http,
            Ok(EchoResponse {
                status: 403,
                headers: Vec::new(),
                body: "Forbidden".to_string(),
            }),
        );
        let candidate = Candidate::new("10.0.0.1", 8080, ProtocolHint::Http);
        let result = checker(Arc::new(probe)).verify(candidate).await;

        assert!(!result.is_alive());
        assert_eq!(result.failure(), Some(&FailureReason::BadStatus(403)));
    }

    #[tokio::test]
    async fn test_timeout_is_dead() {
        let mut probe = ScriptedProbe::ok(Protocol::Http, "{}");
        probe.delay = Duration::from_secs(5);
        let checker = ProxyChecker::with_probe(
            config().with_timeout(Duration::from_millis(50)),
            Arc::new(probe),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let result = checker
            .verify(Candidate::new("10.0.0.1", 8080, ProtocolHint::Https))
            .await;

        assert!(!result.is_alive());
        assert_eq!(result.failure(), Some(&FailureReason::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_anonymity_levels() {
        let cases = [
            (
                r#"{"headers": {"X-Forwarded-For": "203.0.113.7"}, "origin": "203.0.113.7"}"#,
                AnonymityLevel::Transparent,
            ),
            (
                r#"{"headers": {"Via": "1.1 squid"}, "origin": "198.51.100.2"}"#,
                AnonymityLevel::Anonymous,
            ),
            (r#"{"headers": {}, "origin": "198.51.100.2"}"#, AnonymityLevel::Elite),
        ];

        for (body, expected) in cases {
            let probe = Arc::new(ScriptedProbe::ok(Protocol::Socks5, body));
            let candidate = Candidate::new("10.0.0.1", 1080, ProtocolHint::Socks5);
            let result = checker(probe).verify(candidate).await;
            assert_eq!(result.anonymity_level(), Some(expected), "{}", body);
            assert_eq!(result.confirmed_protocol(), Some(Protocol::Socks5));
        }
    }

    #[tokio::test]
    async fn test_configured_markers_replace_defaults() {
        let body = r#"{"headers": {"X-Cache-Via": "edge-7"}, "origin": "198.51.100.2"}"#;
        let candidate = Candidate::new("10.0.0.1", 8080, ProtocolHint::Http);

        let plain = checker(Arc::new(ScriptedProbe::ok(Protocol::Http, body)));
        let result = plain.verify(candidate.clone()).await;
        assert_eq!(result.anonymity_level(), Some(AnonymityLevel::Elite));

        let config = config().with_proxy_markers(vec!["x-cache-via".to_string()]);
        let probe = Arc::new(ScriptedProbe::ok(Protocol::Http, body));
        let custom = ProxyChecker::with_probe(config, probe).unwrap();
        let result = custom.verify(candidate).await;
        assert_eq!(result.anonymity_level(), Some(AnonymityLevel::Anonymous));
    }

    #[test]
    fn test_empty_marker_list_is_rejected() {
        let config = config().with_proxy_markers(Vec::new());
        let probe = Arc::new(ScriptedProbe::default());
        assert!(matches!(
            ProxyChecker::with_probe(config, probe),
            Err(PipelineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_geo_database_does_not_affect_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let config = config().with_mmdb_path(dir.path().join("missing.mmdb"));
        let probe = Arc::new(ScriptedProbe::ok(Protocol::Http, "{}"));
        let checker = ProxyChecker::with_probe(config, probe).unwrap();

        let result = checker
            .verify(Candidate::new("10.0.0.1", 8080, ProtocolHint::Http))
            .await;
        assert!(result.is_alive());
        assert!(result.country().is_none());
        assert!(result.city().is_none());
    }
}
