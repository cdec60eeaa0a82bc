//! Proxy Sieve - public proxy list aggregator and verifier
//!
//! Pulls candidate endpoints from many untrusted lists, removes duplicates,
//! verifies each one through a live probe and writes the working set.

pub mod error;
pub mod pipeline;
pub mod proxy;

pub use error::PipelineError;
pub use pipeline::{JsonFileReporter, LogReporter, Pipeline, RunSummary, SummaryReporter};
pub use proxy::*;

use proxy::echo::{default_proxy_markers, DEFAULT_ECHO_URL};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Library result type
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 64;

/// Default per-candidate budget in milliseconds
const DEFAULT_TIMEOUT_MS: u64 = 6_000;

/// Default deadline for the whole run in milliseconds
const DEFAULT_RUN_DEADLINE_MS: u64 = 15 * 60 * 1_000;

/// Default timeout for source downloads in seconds
const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 30;

/// Default output location
const DEFAULT_OUTPUT_PATH: &str = "output/active_proxies.txt";

/// Run configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Checks in flight at any instant
    pub concurrency_limit: usize,
    /// Wall-clock budget for one candidate
    pub per_candidate_timeout: Duration,
    /// Deadline after which unstarted candidates are abandoned
    pub global_run_deadline: Duration,
    /// Echo endpoint requested through every candidate
    pub echo_url: String,
    /// Our outbound IP; discovered through the echo endpoint when unset
    pub real_ip: Option<IpAddr>,
    /// Path to MMDB file for geolocation (optional)
    pub mmdb_path: Option<PathBuf>,
    /// Header names that mark a proxy as anonymous
    pub proxy_markers: Vec<String>,
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
    /// Timeout for fetching one source
    pub source_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY,
            per_candidate_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            global_run_deadline: Duration::from_millis(DEFAULT_RUN_DEADLINE_MS),
            echo_url: DEFAULT_ECHO_URL.to_string(),
            real_ip: None,
            mmdb_path: None,
            proxy_markers: default_proxy_markers(),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            output_format: OutputFormat::Plain,
            source_timeout: Duration::from_secs(DEFAULT_SOURCE_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency_limit = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_candidate_timeout = timeout;
        self
    }

    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.global_run_deadline = deadline;
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

    pub fn with_output(mut self, path: PathBuf, format: OutputFormat) -> Self {
        self.output_path = path;
        self.output_format = format;
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(PipelineError::Config(
                "concurrency limit must be positive".to_string(),
            ));
        }
        if self.per_candidate_timeout.is_zero() {
            return Err(PipelineError::Config(
                "per-candidate timeout must be positive".to_string(),
            ));
        }
        if self.global_run_deadline.is_zero() {
            return Err(PipelineError::Config(
                "global run deadline must be positive".to_string(),
            ));
        }
        if !(self.echo_url.starts_with("http://") || self.echo_url.starts_with("https://")) {
            return Err(PipelineError::Config(format!(
                "echo URL must be http(s): {}",
                self.echo_url
            )));
        }
        if self.proxy_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(PipelineError::Config(
                "at least one proxy marker is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig {
            timeout: self.per_candidate_timeout,
            echo_url: self.echo_url.clone(),
            real_ip: self.real_ip,
            mmdb_path: self.mmdb_path.clone(),
            proxy_markers: self.proxy_markers.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new()
            .with_concurrency(self.concurrency_limit)
            .with_run_deadline(self.global_run_deadline)
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig::new().with_timeout(self.source_timeout)
    }
}
