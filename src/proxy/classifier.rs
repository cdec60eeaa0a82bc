//! Reporting labels layered onto verification results

use crate::proxy::models::{AnonymityLevel, VerificationResult};
use serde::Serialize;
use std::fmt;

const FAST_BELOW_MS: u64 = 500;
const MEDIUM_BELOW_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LatencyBucket {
    Fast,
    Medium,
    Slow,
}

impl LatencyBucket {
    pub fn from_millis(latency_millis: u64) -> Self {
        if latency_millis < FAST_BELOW_MS {
            LatencyBucket::Fast
        } else if latency_millis < MEDIUM_BELOW_MS {
            LatencyBucket::Medium
        } else {
            LatencyBucket::Slow
        }
    }
}

impl fmt::Display for LatencyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyBucket::Fast => write!(f, "fast"),
            LatencyBucket::Medium => write!(f, "medium"),
            LatencyBucket::Slow => write!(f, "slow"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedProxy {
    pub result: VerificationResult,
    /// Absent for dead proxies
    pub latency_bucket: Option<LatencyBucket>,
}

pub fn classify(result: VerificationResult) -> ClassifiedProxy {
    let latency_bucket = result.latency_millis().map(LatencyBucket::from_millis);
    ClassifiedProxy {
        result,
        latency_bucket,
    }
}

/// Per-label counts over the alive results of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassCounts {
    pub fast: usize,
    pub medium: usize,
    pub slow: usize,
    pub transparent: usize,
    pub anonymous: usize,
    pub elite: usize,
}

impl ClassCounts {
    pub fn record(&mut self, classified: &ClassifiedProxy) {
        match classified.latency_bucket {
            Some(LatencyBucket::Fast) => self.fast += 1,
            Some(LatencyBucket::Medium) => self.medium += 1,
            Some(LatencyBucket::Slow) => self.slow += 1,
            None => {}
        }
        match classified.result.anonymity_level() {
            Some(AnonymityLevel::Transparent) => self.transparent += 1,
            Some(AnonymityLevel::Anonymous) => self.anonymous += 1,
            Some(AnonymityLevel::Elite) => self.elite += 1,
            None => {}
        }
    }
}
