//! Bounded-concurrency fan-out of the checker over all candidates

use crate::proxy::checker::ProxyChecker;
use crate::proxy::models::{Candidate, FailureReason, VerificationResult};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::Instant;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 64;

/// Default deadline for a whole run in seconds
const DEFAULT_RUN_DEADLINE_SECS: u64 = 15 * 60;

/// Progress is logged every this many finished candidates
const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Checks in flight at any instant
    pub concurrency: usize,
    /// After this, candidates not yet started are abandoned
    pub run_deadline: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            run_deadline: Duration::from_secs(DEFAULT_RUN_DEADLINE_SECS),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = deadline;
        self
    }
}

#[derive(Debug, Default)]
pub struct ScheduleReport {
    /// Exactly one result per attempted candidate, in completion order
    pub results: Vec<VerificationResult>,
    /// Candidates abandoned because the run deadline passed first
    pub not_attempted: Vec<Candidate>,
}

impl ScheduleReport {
    pub fn deadline_exceeded(&self) -> bool {
        !self.not_attempted.is_empty()
    }
}

enum Outcome {
    Verified(VerificationResult),
    NotAttempted(Candidate),
}

pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Run the checker over every candidate, with the run deadline starting now
    pub async fn run_all(
        &self,
        candidates: Vec<Candidate>,
        checker: &ProxyChecker,
    ) -> ScheduleReport {
        let deadline = Instant::now() + self.config.run_deadline;
        self.run_until(candidates, checker, deadline).await
    }

    /// Run the checker over every candidate until `deadline`.
    ///
    /// At most `concurrency` checks run at once, each on its own task. Every
    /// candidate is either attempted exactly once or reported as not
    /// attempted; in-flight checks are never cut short by the deadline.
    pub async fn run_until(
        &self,
        candidates: Vec<Candidate>,
        checker: &ProxyChecker,
        deadline: Instant,
    ) -> ScheduleReport {
        let total = candidates.len();
        let limit = self.config.concurrency.max(1);

        tracing::info!(total, concurrency = limit, "Starting proxy checks");

        let mut outcomes = stream::iter(candidates)
            .map(|candidate| {
                let checker = checker.clone();
                async move {
                    if Instant::now() >= deadline {
                        return Outcome::NotAttempted(candidate);
                    }
                    let fallback = candidate.clone();
                    match tokio::spawn(async move { checker.verify(candidate).await }).await {
                        Ok(result) => Outcome::Verified(result),
                        Err(e) => Outcome::Verified(VerificationResult::dead(
                            fallback,
                            FailureReason::Aborted(e.to_string()),
                        )),
                    }
                }
            })
            .buffer_unordered(limit);

        let mut report = ScheduleReport::default();
        let mut alive = 0usize;
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Outcome::Verified(result) => {
                    if result.is_alive() {
                        alive += 1;
                    }
                    report.results.push(result);
                    let checked = report.results.len();
                    if checked % PROGRESS_EVERY == 0 || checked == total {
                        tracing::info!(checked, total, alive, "Progress");
                    }
                }
                Outcome::NotAttempted(candidate) => report.not_attempted.push(candidate),
            }
        }

        if report.deadline_exceeded() {
            tracing::warn!(
                not_attempted = report.not_attempted.len(),
                "Run deadline exceeded, remaining candidates abandoned"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::checker::tests::{config, ScriptedProbe};
    use crate::proxy::echo::{EchoEndpoint, EchoResponse};
    use crate::proxy::models::{Protocol, ProtocolHint};
    use crate::proxy::probe::Probe;
    use crate::Result;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn candidates(n: u16) -> Vec<Candidate> {
        (0..n)
            .map(|i| {
                let host = format!("10.0.{}.{}", i / 250, i % 250 + 1);
                Candidate::new(host, 8080, ProtocolHint::Http)
            })
            .collect()
    }

    /// Tracks how many probes overlap and which endpoints were probed
    #[derive(Default)]
    struct GaugeProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Probe for GaugeProbe {
        async fn probe(
            &self,
            candidate: &Candidate,
            _protocol: Protocol,
            _echo: &EchoEndpoint,
            _timeout: Duration,
        ) -> Result<EchoResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(candidate.authority());
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(EchoResponse {
                status: 200,
                headers: Vec::new(),
                body: "{}".to_string(),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded_and_each_candidate_runs_once() {
        let probe = Arc::new(GaugeProbe::default());
        let checker = ProxyChecker::with_probe(config(), probe.clone()).unwrap();
        let scheduler = Scheduler::new(SchedulerConfig::new().with_concurrency(4));

        let report = scheduler.run_all(candidates(40), &checker).await;

        assert_eq!(report.results.len(), 40);
        assert!(report.not_attempted.is_empty());
        assert!(probe.peak.load(Ordering::SeqCst) <= 4);

        let seen = probe.seen.lock().unwrap();
        assert_eq!(seen.len(), 40);
        let unique: HashSet<&String> = seen.iter().collect();
        assert_eq!(unique.len(), 40);
    }

    #[tokio::test]
    async fn test_deadline_abandons_unstarted_candidates() {
        let mut probe = ScriptedProbe::ok(Protocol::Http, "{}");
        probe.delay = Duration::from_millis(200);
        let checker = ProxyChecker::with_probe(config(), Arc::new(probe)).unwrap();
        let scheduler = Scheduler::new(
            SchedulerConfig::new()
                .with_concurrency(2)
                .with_run_deadline(Duration::from_millis(100)),
        );

        let report = scheduler.run_all(candidates(10), &checker).await;

        // the first two start immediately and are allowed to finish
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| r.is_alive()));
        assert_eq!(report.not_attempted.len(), 8);
        assert!(report.deadline_exceeded());
    }

    #[tokio::test]
    async fn test_elapsed_deadline_attempts_nothing() {
        let probe = Arc::new(GaugeProbe::default());
        let checker = ProxyChecker::with_probe(config(), probe.clone()).unwrap();
        let scheduler = Scheduler::new(SchedulerConfig::default());

        let report = scheduler
            .run_until(candidates(5), &checker, Instant::now())
            .await;

        assert!(report.results.is_empty());
        assert_eq!(report.not_attempted.len(), 5);
        assert!(probe.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let checker =
            ProxyChecker::with_probe(config(), Arc::new(ScriptedProbe::default())).unwrap();
        let report = Scheduler::new(SchedulerConfig::default())
            .run_all(Vec::new(), &checker)
            .await;
        assert!(report.results.is_empty());
        assert!(!report.deadline_exceeded());
    }
}
