//! End-to-end run: sources, aggregation, verification, output

use crate::proxy::aggregator::{self, AggregateStats};
use crate::proxy::checker::ProxyChecker;
use crate::proxy::classifier::{classify, ClassCounts};
use crate::proxy::crawler::{self, SourceAdapter};
use crate::proxy::echo::discover_real_ip;
use crate::proxy::scheduler::Scheduler;
use crate::proxy::verified::VerifiedSet;
use crate::proxy::writer::{write_atomic, ProxyWriter};
use crate::{PipelineConfig, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// Outcome of one run, reported after the output file is written
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique candidates after deduplication
    pub candidates_seen: usize,
    pub alive_count: usize,
    pub dead_count: usize,
    pub not_attempted_count: usize,
    pub duplicates: usize,
    pub parse_skips: usize,
    pub failed_sources: Vec<String>,
    pub classes: ClassCounts,
    pub elapsed_millis: u64,
    pub deadline_exceeded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_path: PathBuf,
}

impl RunSummary {
    /// Output is usable but built from less than the full input
    pub fn is_degraded(&self) -> bool {
        self.deadline_exceeded || !self.failed_sources.is_empty()
    }
}

/// Receives the summary of every successful run
#[async_trait]
pub trait SummaryReporter: Send + Sync {
    async fn report(&self, summary: &RunSummary) -> Result<()>;
}

/// Logs the summary
#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl SummaryReporter for LogReporter {
    async fn report(&self, summary: &RunSummary) -> Result<()> {
        tracing::info!(
            candidates = summary.candidates_seen,
            alive = summary.alive_count,
            dead = summary.dead_count,
            not_attempted = summary.not_attempted_count,
            parse_skips = summary.parse_skips,
            failed_sources = summary.failed_sources.len(),
            fast = summary.classes.fast,
            medium = summary.classes.medium,
            slow = summary.classes.slow,
            elite = summary.classes.elite,
            anonymous = summary.classes.anonymous,
            transparent = summary.classes.transparent,
            elapsed_ms = summary.elapsed_millis,
            degraded = summary.is_degraded(),
            "Run complete"
        );
        Ok(())
    }
}

/// Writes the summary as pretty JSON
#[derive(Debug)]
pub struct JsonFileReporter {
    path: PathBuf,
}

impl JsonFileReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SummaryReporter for JsonFileReporter {
    async fn report(&self, summary: &RunSummary) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(summary)?;
        json.push(b'\n');
        write_atomic(&self.path, &json)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    checker: ProxyChecker,
    scheduler: Scheduler,
    writer: ProxyWriter,
    reporters: Vec<Box<dyn SummaryReporter>>,
}

impl Pipeline {
    /// Build a pipeline that probes over the network.
    ///
    /// When no real IP is configured it is discovered through the echo
    /// endpoint; failure only disables transparent-proxy detection.
    pub async fn new(mut config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        if config.real_ip.is_none() {
            match discover_real_ip(&config.echo_url, config.per_candidate_timeout).await {
                Ok(ip) => {
                    tracing::info!(%ip, "Discovered real outbound IP");
                    config.real_ip = Some(ip);
                }
                Err(e) => tracing::warn!(error = %e, "Could not discover real outbound IP"),
            }
        }

        let checker = ProxyChecker::with_config(config.checker_config())?;
        Self::with_checker(config, checker)
    }

    /// Build a pipeline around an existing checker
    pub fn with_checker(config: PipelineConfig, checker: ProxyChecker) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scheduler: Scheduler::new(config.scheduler_config()),
            writer: ProxyWriter::new(&config.output_path, config.output_format),
            checker,
            config,
            reporters: Vec::new(),
        })
    }

    pub fn with_reporter(mut self, reporter: impl SummaryReporter + 'static) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    /// Run every stage once.
    ///
    /// The run deadline starts before sources are fetched. Only a failed
    /// write is an error; source, probe and geo failures degrade the result
    /// instead.
    pub async fn run(&self, sources: &[Box<dyn SourceAdapter>]) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.global_run_deadline;

        let fetched = crawler::fetch_all(sources).await;
        let aggregate = aggregator::merge(fetched.outputs);
        let AggregateStats {
            duplicates,
            parse_skips,
            ..
        } = aggregate.stats;
        let candidates_seen = aggregate.candidates.len();

        let report = self
            .scheduler
            .run_until(aggregate.candidates, &self.checker, deadline)
            .await;
        let deadline_exceeded = report.deadline_exceeded();
        let not_attempted_count = report.not_attempted.len();

        let mut classes = ClassCounts::default();
        let mut verified = VerifiedSet::new();
        for result in report.results {
            let classified = classify(result);
            classes.record(&classified);
            verified.insert(classified.result);
        }

        let written = self.writer.write(&verified)?;

        let alive_count = verified.alive_count();
        let summary = RunSummary {
            candidates_seen,
            alive_count,
            dead_count: verified.len() - alive_count,
            not_attempted_count,
            duplicates,
            parse_skips,
            failed_sources: fetched.failed_sources,
            classes,
            elapsed_millis: clock.elapsed().as_millis() as u64,
            deadline_exceeded,
            started_at,
            finished_at: Utc::now(),
            output_path: written.path,
        };

        for reporter in &self.reporters {
            if let Err(e) = reporter.report(&summary).await {
                tracing::warn!(error = %e, "Summary reporter failed");
            }
        }

        Ok(summary)
    }
}
