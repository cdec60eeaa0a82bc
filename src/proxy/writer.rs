//! Final output: deduplicated, sorted list of working proxies

use crate::error::PipelineError;
use crate::proxy::models::{CandidateKey, VerificationResult};
use crate::proxy::verified::VerifiedSet;
use crate::Result;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Line format of the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `host:port`
    #[default]
    Plain,
    /// `protocol://host:port`
    WithScheme,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub written: usize,
}

pub struct ProxyWriter {
    path: PathBuf,
    format: OutputFormat,
}

impl ProxyWriter {
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Alive results in output order: ascending latency, then host, then port
    pub fn select<'a>(&self, set: &'a VerifiedSet) -> Vec<&'a VerificationResult> {
        let mut seen: HashSet<CandidateKey> = HashSet::new();
        let mut alive: Vec<&VerificationResult> = set
            .alive()
            .filter(|r| seen.insert(r.key()))
            .collect();

        alive.sort_by(|a, b| {
            a.latency_millis()
                .cmp(&b.latency_millis())
                .then_with(|| a.candidate().host.cmp(&b.candidate().host))
                .then_with(|| a.candidate().port.cmp(&b.candidate().port))
        });
        alive
    }

    /// File contents for a set; one newline-terminated line per proxy
    pub fn render(&self, set: &VerifiedSet) -> String {
        let mut lines: HashSet<String> = HashSet::new();
        let mut out = String::new();
        for result in self.select(set) {
            let line = self.format_line(result);
            if lines.insert(line.clone()) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }

    fn format_line(&self, result: &VerificationResult) -> String {
        match (self.format, result.confirmed_protocol()) {
            (OutputFormat::WithScheme, Some(protocol)) => result.candidate().url(protocol),
            _ => result.candidate().authority(),
        }
    }

    /// Atomically replace the destination with the rendered set
    pub fn write(&self, set: &VerifiedSet) -> Result<WriteSummary> {
        let content = self.render(set);
        let written = content.lines().count();
        write_atomic(&self.path, content.as_bytes())?;

        tracing::info!(path = %self.path.display(), written, "Saved proxies");
        Ok(WriteSummary {
            path: self.path.clone(),
            written,
        })
    }
}

/// Write `bytes` to a temporary file next to `path`, then rename it into
/// place. A crash leaves either the old file or the new one, never a torn one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let write_error = |source: std::io::Error| PipelineError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(write_error)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_error)?;
    tmp.write_all(bytes).map_err(write_error)?;
    tmp.as_file().sync_all().map_err(write_error)?;
    tmp.persist(path).map_err(|e| write_error(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{AnonymityLevel, Candidate, FailureReason, Protocol, ProtocolHint};

    fn alive(host: &str, port: u16, latency: u64) -> VerificationResult {
        VerificationResult::alive(
            Candidate::new(host, port, ProtocolHint::Unknown),
            Protocol::Socks5,
            AnonymityLevel::Elite,
            latency,
        )
    }

    fn sample_set() -> VerifiedSet {
        vec![
            alive("9.9.9.9", 80, 300),
            alive("1.1.1.1", 8080, 120),
            alive("2.2.2.2", 3128, 120),
            alive("1.1.1.1", 8080, 500),
            VerificationResult::dead(
                Candidate::new("3.3.3.3", 80, ProtocolHint::Http),
                FailureReason::Timeout,
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_render_sorted_alive_only() {
        let writer = ProxyWriter::new("unused.txt", OutputFormat::Plain);
        assert_eq!(
            writer.render(&sample_set()),
            "1.1.1.1:8080\n2.2.2.2:3128\n9.9.9.9:80\n"
        );
    }

    #[test]
    fn test_render_with_scheme() {
        let writer = ProxyWriter::new("unused.txt", OutputFormat::WithScheme);
        let rendered = writer.render(&sample_set());
        assert!(rendered.starts_with("socks5://1.1.1.1:8080\n"));
        assert!(!rendered.contains("3.3.3.3"));
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("active_proxies.txt");
        let writer = ProxyWriter::new(&path, OutputFormat::Plain);
        let set = sample_set();

        let first = writer.write(&set).unwrap();
        let bytes_first = fs::read(&path).unwrap();
        writer.write(&set).unwrap();
        let bytes_second = fs::read(&path).unwrap();

        assert_eq!(first.written, 3);
        assert_eq!(bytes_first, bytes_second);
    }

    #[test]
    fn test_write_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "stale:1\nstale:2\nstale:3\nstale:4\n").unwrap();

        ProxyWriter::new(&path, OutputFormat::Plain)
            .write(&sample_set())
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale"));
        // only the destination remains, no temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_empty_set_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let summary = ProxyWriter::new(&path, OutputFormat::Plain)
            .write(&VerifiedSet::new())
            .unwrap();
        assert_eq!(summary.written, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_unwritable_destination_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let err = ProxyWriter::new(blocker.join("out.txt"), OutputFormat::Plain)
            .write(&sample_set())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Write { .. }));
    }
}
