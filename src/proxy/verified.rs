//! Best result per endpoint for one run

use crate::proxy::models::{AnonymityLevel, CandidateKey, VerificationResult};
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;

/// `(host, port)` to the single best result observed.
///
/// Merging is order-independent: whichever order results arrive in, the
/// surviving entry is the same.
#[derive(Debug, Clone, Default)]
pub struct VerifiedSet {
    entries: HashMap<CandidateKey, VerificationResult>,
}

impl VerifiedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result, replacing the current entry only if the new one ranks
    /// higher. Returns whether the set changed.
    pub fn insert(&mut self, result: VerificationResult) -> bool {
        let key = result.key();
        match self.entries.get(&key) {
            Some(current) if compare(&result, current) != Ordering::Greater => false,
            _ => {
                self.entries.insert(key, result);
                true
            }
        }
    }

    pub fn get(&self, key: &CandidateKey) -> Option<&VerificationResult> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VerificationResult> {
        self.entries.values()
    }

    pub fn alive(&self) -> impl Iterator<Item = &VerificationResult> {
        self.entries.values().filter(|r| r.is_alive())
    }

    pub fn alive_count(&self) -> usize {
        self.alive().count()
    }
}

impl Extend<VerificationResult> for VerifiedSet {
    fn extend<T: IntoIterator<Item = VerificationResult>>(&mut self, iter: T) {
        for result in iter {
            self.insert(result);
        }
    }
}

impl FromIterator<VerificationResult> for VerifiedSet {
    fn from_iter<T: IntoIterator<Item = VerificationResult>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// Rank two results for the same endpoint.
///
/// Alive beats dead; then lower latency; then the more private anonymity
/// level; then the protocol scheme, so that full ties still resolve the same
/// way regardless of arrival order.
fn compare(a: &VerificationResult, b: &VerificationResult) -> Ordering {
    rank(a).cmp(&rank(b))
}

type Rank = (bool, Reverse<u64>, Option<AnonymityLevel>, Reverse<&'static str>);

fn rank(result: &VerificationResult) -> Rank {
    (
        result.is_alive(),
        Reverse(result.latency_millis().unwrap_or(u64::MAX)),
        result.anonymity_level(),
        Reverse(result.confirmed_protocol().map_or("~", |p| p.scheme())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{Candidate, FailureReason, Protocol, ProtocolHint};

    fn alive(port: u16, latency: u64, level: AnonymityLevel) -> VerificationResult {
        VerificationResult::alive(
            Candidate::new("1.2.3.4", port, ProtocolHint::Unknown),
            Protocol::Http,
            level,
            latency,
        )
    }

    fn dead(port: u16) -> VerificationResult {
        VerificationResult::dead(
            Candidate::new("1.2.3.4", port, ProtocolHint::Unknown),
            FailureReason::Timeout,
        )
    }

    #[test]
    fn test_lower_latency_wins() {
        let fast = alive(8080, 120, AnonymityLevel::Transparent);
        let slow = alive(8080, 300, AnonymityLevel::Elite);

        for order in [vec![fast.clone(), slow.clone()], vec![slow, fast]] {
            let set: VerifiedSet = order.into_iter().collect();
            assert_eq!(set.len(), 1);
            let key = ("1.2.3.4".to_string(), 8080);
            assert_eq!(set.get(&key).unwrap().latency_millis(), Some(120));
        }
    }

    #[test]
    fn test_alive_beats_dead_in_any_order() {
        let mut set = VerifiedSet::new();
        assert!(set.insert(dead(8080)));
        assert!(set.insert(alive(8080, 900, AnonymityLevel::Anonymous)));
        assert!(!set.insert(dead(8080)));
        assert_eq!(set.alive_count(), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_equal_latency_prefers_more_private() {
        let set: VerifiedSet = vec![
            alive(3128, 200, AnonymityLevel::Anonymous),
            alive(3128, 200, AnonymityLevel::Elite),
            alive(3128, 200, AnonymityLevel::Transparent),
        ]
        .into_iter()
        .collect();
        let key = ("1.2.3.4".to_string(), 3128);
        assert_eq!(
            set.get(&key).unwrap().anonymity_level(),
            Some(AnonymityLevel::Elite)
        );
    }

    #[test]
    fn test_one_entry_per_endpoint() {
        let mut set = VerifiedSet::new();
        for i in 0..10 {
            set.insert(alive(80 + (i % 3), 100 + i as u64, AnonymityLevel::Elite));
            set.insert(dead(80 + (i % 3)));
        }
        assert_eq!(set.len(), 3);
        assert_eq!(set.alive_count(), 3);
    }
}
