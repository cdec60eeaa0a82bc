//! Pre-check aggregation and deduplication of source output

use crate::proxy::crawler::SourceOutput;
use crate::proxy::models::{Candidate, CandidateKey};
use crate::proxy::parser::{ParsedLine, ProxyParser};
use serde::Serialize;
use std::collections::HashSet;

/// Counters collected while merging source output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    /// Lines that parsed to a candidate, duplicates included
    pub parsed: usize,
    /// Candidates dropped because their `(host, port)` was already seen
    pub duplicates: usize,
    /// Malformed lines
    pub parse_skips: usize,
}

/// Deduplicated candidate set, in first-seen order
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub candidates: Vec<Candidate>,
    pub stats: AggregateStats,
}

/// Merge the output of every source.
///
/// The first occurrence of an endpoint wins and keeps its protocol hint.
pub fn merge<I>(outputs: I) -> Aggregate
where
    I: IntoIterator<Item = SourceOutput>,
{
    let mut seen: HashSet<CandidateKey> = HashSet::new();
    let mut aggregate = Aggregate::default();

    for output in outputs {
        for line in &output.lines {
            match ProxyParser::parse_line(line, output.default_hint) {
                ParsedLine::Candidate(candidate) => {
                    aggregate.stats.parsed += 1;
                    if seen.insert(candidate.key()) {
                        aggregate.candidates.push(candidate);
                    } else {
                        aggregate.stats.duplicates += 1;
                    }
                }
                ParsedLine::Skip => aggregate.stats.parse_skips += 1,
                ParsedLine::Ignored => {}
            }
        }
    }

    tracing::info!(
        unique = aggregate.candidates.len(),
        duplicates = aggregate.stats.duplicates,
        parse_skips = aggregate.stats.parse_skips,
        "Aggregated candidates"
    );

    aggregate
}

/// Convenience wrapper for a single anonymous batch of lines
pub fn merge_lines<S: AsRef<str>>(lines: &[S]) -> Aggregate {
    merge([SourceOutput::from_lines(
        "inline",
        lines.iter().map(|l| l.as_ref().to_string()).collect(),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::ProtocolHint;

    #[test]
    fn test_merge_drops_duplicates_and_bad_lines() {
        let aggregate = merge_lines(&["1.2.3.4:8080", "1.2.3.4:8080", "bad-line", "5.6.7.8:1080"]);
        let authorities: Vec<String> =
            aggregate.candidates.iter().map(|c| c.authority()).collect();
        assert_eq!(authorities, vec!["1.2.3.4:8080", "5.6.7.8:1080"]);
        assert_eq!(aggregate.stats.parse_skips, 1);
        assert_eq!(aggregate.stats.duplicates, 1);
        assert_eq!(aggregate.stats.parsed, 3);
    }

    #[test]
    fn test_first_occurrence_keeps_hint() {
        let first = SourceOutput::new("socks", ProtocolHint::Socks5, vec!["9.9.9.9:1080".into()]);
        let second = SourceOutput::new("http", ProtocolHint::Http, vec!["9.9.9.9:1080".into()]);
        let aggregate = merge([first, second]);
        assert_eq!(aggregate.candidates.len(), 1);
        assert_eq!(aggregate.candidates[0].protocol_hint, ProtocolHint::Socks5);
    }

    #[test]
    fn test_scheme_does_not_split_identity() {
        let aggregate = merge_lines(&["http://1.1.1.1:80", "socks5://1.1.1.1:80", "1.1.1.1:81"]);
        assert_eq!(aggregate.candidates.len(), 2);
    }

    #[test]
    fn test_merge_scales_linearly() {
        let lines: Vec<String> = (0..20_000)
            .map(|i| format!("10.{}.{}.1:{}", i / 256 % 256, i % 256, 1000 + i % 3))
            .collect();
        let aggregate = merge_lines(&lines);
        assert_eq!(aggregate.candidates.len(), 20_000);
        assert_eq!(aggregate.stats.duplicates, 0);
    }

    #[test]
    fn test_blank_lines_are_not_skips() {
        let aggregate = merge_lines(&["", "  ", "# comment", "1.2.3.4:80"]);
        assert_eq!(aggregate.candidates.len(), 1);
        assert_eq!(aggregate.stats.parse_skips, 0);
    }
}
