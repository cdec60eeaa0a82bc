//! Proxy module for aggregating and verifying proxies
//!
//! This module provides functionality for:
//! - Fetching raw proxy lists from independent sources
//! - Parsing and deduplicating candidates
//! - Verifying candidates through the echo endpoint with bounded concurrency
//! - Classifying and writing the working set

pub mod aggregator;
pub mod checker;
pub mod classifier;
pub mod crawler;
pub mod echo;
pub mod geo;
pub mod models;
pub mod parser;
pub mod probe;
pub mod scheduler;
pub mod verified;
pub mod writer;

pub use aggregator::{merge, Aggregate, AggregateStats};
pub use checker::{CheckerConfig, ProxyChecker};
pub use classifier::{classify, ClassCounts, ClassifiedProxy, LatencyBucket};
pub use crawler::{
    builtin_sources, fetch_all, CrawlerConfig, FetchReport, FileSource, SourceAdapter,
    SourceFormat, SourceOutput, StaticSource, UrlSource,
};
pub use echo::{discover_real_ip, EchoEndpoint, EchoResponse};
pub use geo::{GeoLocation, GeoLocator};
pub use models::{
    AnonymityLevel, Candidate, CandidateKey, FailureReason, Protocol, ProtocolHint,
    VerificationResult,
};
pub use parser::{ParsedLine, ProxyParser};
pub use probe::{NetworkProbe, Probe};
pub use scheduler::{ScheduleReport, Scheduler, SchedulerConfig};
pub use verified::VerifiedSet;
pub use writer::{OutputFormat, ProxyWriter, WriteSummary};
