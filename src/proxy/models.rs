//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Protocol a proxy was confirmed to speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl Protocol {
    /// URL scheme used when writing `protocol://host:port`
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// Protocol asserted by a source, not yet verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProtocolHint {
    Http,
    Https,
    Socks4,
    Socks5,
    #[default]
    Unknown,
}

impl ProtocolHint {
    /// Parse a URL scheme into a hint. Returns `None` for unrecognised schemes.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(ProtocolHint::Http),
            "https" => Some(ProtocolHint::Https),
            "socks4" | "socks4a" => Some(ProtocolHint::Socks4),
            "socks5" | "socks5h" => Some(ProtocolHint::Socks5),
            _ => None,
        }
    }

    /// Protocols to probe, in order: the hint itself, then one fallback.
    ///
    /// Never more than two entries.
    pub fn attempt_order(&self) -> Vec<Protocol> {
        match self {
            ProtocolHint::Http => vec![Protocol::Http],
            ProtocolHint::Https => vec![Protocol::Https, Protocol::Http],
            ProtocolHint::Socks4 => vec![Protocol::Socks4, Protocol::Socks5],
            ProtocolHint::Socks5 => vec![Protocol::Socks5, Protocol::Socks4],
            ProtocolHint::Unknown => vec![Protocol::Http, Protocol::Socks5],
        }
    }

    pub fn as_protocol(&self) -> Option<Protocol> {
        match self {
            ProtocolHint::Http => Some(Protocol::Http),
            ProtocolHint::Https => Some(Protocol::Https),
            ProtocolHint::Socks4 => Some(Protocol::Socks4),
            ProtocolHint::Socks5 => Some(Protocol::Socks5),
            ProtocolHint::Unknown => None,
        }
    }
}

impl From<Protocol> for ProtocolHint {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Http => ProtocolHint::Http,
            Protocol::Https => ProtocolHint::Https,
            Protocol::Socks4 => ProtocolHint::Socks4,
            Protocol::Socks5 => ProtocolHint::Socks5,
        }
    }
}

impl fmt::Display for ProtocolHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_protocol() {
            Some(protocol) => write!(f, "{}", protocol),
            None => write!(f, "unknown"),
        }
    }
}

/// Identity of an endpoint: `(host, port)`
pub type CandidateKey = (String, u16);

/// An unverified proxy endpoint scraped from a source.
///
/// Equality and hashing only consider `(host, port)`: the same endpoint may be
/// listed under several protocol hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
    pub protocol_hint: ProtocolHint,
}

impl Candidate {
    pub fn new(host: impl Into<String>, port: u16, protocol_hint: ProtocolHint) -> Self {
        Self {
            host: host.into(),
            port,
            protocol_hint,
        }
    }

    pub fn key(&self) -> CandidateKey {
        (self.host.clone(), self.port)
    }

    /// `host:port`, with IPv6 literals bracketed
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Proxy URL for a given protocol
    pub fn url(&self, protocol: Protocol) -> String {
        format!("{}://{}", protocol, self.authority())
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Candidate {}

impl Hash for Candidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority())
    }
}

/// How much of the client identity a proxy leaks.
///
/// Ordered from least to most private, so `Elite` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnonymityLevel {
    /// Real client IP is forwarded to the destination
    Transparent,
    /// IP hidden, but proxy use is announced
    Anonymous,
    /// Neither IP nor proxy use is visible
    Elite,
}

impl fmt::Display for AnonymityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnonymityLevel::Transparent => write!(f, "transparent"),
            AnonymityLevel::Anonymous => write!(f, "anonymous"),
            AnonymityLevel::Elite => write!(f, "elite"),
        }
    }
}

/// Why a candidate was recorded as dead
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    Timeout,
    ConnectionFailed(String),
    BadStatus(u16),
    /// The verifier task itself failed (panic or cancellation)
    Aborted(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            FailureReason::BadStatus(status) => write!(f, "HTTP status: {}", status),
            FailureReason::Aborted(msg) => write!(f, "aborted: {}", msg),
        }
    }
}

/// Outcome of verifying one candidate.
///
/// Built only through [`VerificationResult::alive`] and
/// [`VerificationResult::dead`]; a dead result never carries a protocol,
/// anonymity level or latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    candidate: Candidate,
    alive: bool,
    confirmed_protocol: Option<Protocol>,
    anonymity_level: Option<AnonymityLevel>,
    latency_millis: Option<u64>,
    country: Option<String>,
    city: Option<String>,
    failure: Option<FailureReason>,
}

impl VerificationResult {
    pub fn alive(
        candidate: Candidate,
        protocol: Protocol,
        anonymity_level: AnonymityLevel,
        latency_millis: u64,
    ) -> Self {
        Self {
            candidate,
            alive: true,
            confirmed_protocol: Some(protocol),
            anonymity_level: Some(anonymity_level),
            latency_millis: Some(latency_millis),
            country: None,
            city: None,
            failure: None,
        }
    }

    pub fn dead(candidate: Candidate, failure: FailureReason) -> Self {
        Self {
            candidate,
            alive: false,
            confirmed_protocol: None,
            anonymity_level: None,
            latency_millis: None,
            country: None,
            city: None,
            failure: Some(failure),
        }
    }

    /// Attach best-effort geolocation. Does not affect liveness.
    pub fn with_location(mut self, country: Option<String>, city: Option<String>) -> Self {
        self.country = country;
        self.city = city;
        self
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn key(&self) -> CandidateKey {
        self.candidate.key()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn confirmed_protocol(&self) -> Option<Protocol> {
        self.confirmed_protocol
    }

    pub fn anonymity_level(&self) -> Option<AnonymityLevel> {
        self.anonymity_level
    }

    pub fn latency_millis(&self) -> Option<u64> {
        self.latency_millis
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }
}
