//! Source adapters for fetching raw proxy lists
//!
//! Each adapter talks to exactly one provider and returns raw lines. Failures
//! stay local to the adapter: [`fetch_all`] logs them and carries on with the
//! remaining sources.

use crate::error::{is_reset, PipelineError};
use crate::proxy::models::ProtocolHint;
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Sources fetched at the same time
const FETCH_CONCURRENCY: usize = 8;

/// Raw lines produced by one source
#[derive(Debug, Clone)]
pub struct SourceOutput {
    pub source: String,
    /// Hint applied to lines that carry no scheme
    pub default_hint: ProtocolHint,
    pub lines: Vec<String>,
}

impl SourceOutput {
    pub fn new(source: &str, default_hint: ProtocolHint, lines: Vec<String>) -> Self {
        Self {
            source: source.to_string(),
            default_hint,
            lines,
        }
    }

    pub fn from_lines(source: &str, lines: Vec<String>) -> Self {
        Self::new(source, ProtocolHint::Unknown, lines)
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn default_hint(&self) -> ProtocolHint {
        ProtocolHint::Unknown
    }

    async fn fetch(&self) -> Result<Vec<String>>;
}

/// Payload format served by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceFormat {
    #[default]
    Text,
    Json,
}

/// Configuration shared by HTTP sources
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client shared by every [`UrlSource`] of a run
    pub fn build_client(&self) -> Result<Client> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()?;
        Ok(client)
    }
}

/// A remote list served over HTTP(S)
#[derive(Debug, Clone)]
pub struct UrlSource {
    pub name: String,
    pub url: String,
    pub format: SourceFormat,
    pub protocol_hint: ProtocolHint,
    client: Client,
}

impl UrlSource {
    pub fn new(client: Client, name: &str, url: &str, protocol_hint: ProtocolHint) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format: SourceFormat::Text,
            protocol_hint,
            client,
        }
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = format;
        self
    }

    async fn fetch_once(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.unavailable(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::SourceUnavailable {
                source_name: self.name.clone(),
                reason: format!("HTTP status: {}", status),
                transient: false,
            });
        }

        response.text().await.map_err(|e| self.unavailable(&e))
    }

    fn unavailable(&self, err: &reqwest::Error) -> PipelineError {
        PipelineError::SourceUnavailable {
            source_name: self.name.clone(),
            reason: err.to_string(),
            transient: err.is_timeout() || err.is_connect() || is_reset(err),
        }
    }
}

#[async_trait]
impl SourceAdapter for UrlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_hint(&self) -> ProtocolHint {
        self.protocol_hint
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        let body = match self.fetch_once().await {
            Ok(body) => body,
            Err(e) if e.is_transient() => {
                tracing::debug!(source = %self.name, error = %e, "Retrying source once");
                self.fetch_once().await?
            }
            Err(e) => return Err(e),
        };

        match self.format {
            SourceFormat::Text => Ok(split_lines(&body)),
            SourceFormat::Json => {
                let value: Value =
                    serde_json::from_str(&body).map_err(|e| PipelineError::SourceUnavailable {
                        source_name: self.name.clone(),
                        reason: format!("malformed JSON: {}", e),
                        transient: false,
                    })?;
                Ok(lines_from_json(&value))
            }
        }
    }
}

/// A list stored on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSource {
    pub path: PathBuf,
    pub protocol_hint: ProtocolHint,
    name: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, protocol_hint: ProtocolHint) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self {
            path,
            protocol_hint,
            name,
        }
    }
}

#[async_trait]
impl SourceAdapter for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_hint(&self) -> ProtocolHint {
        self.protocol_hint
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PipelineError::SourceUnavailable {
                source_name: self.name.clone(),
                reason: e.to_string(),
                transient: false,
            }
        })?;
        Ok(split_lines(&content))
    }
}

/// Lines held in memory
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    hint: ProtocolHint,
    lines: Vec<String>,
}

impl StaticSource {
    pub fn new(name: &str, hint: ProtocolHint, lines: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            hint,
            lines,
        }
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_hint(&self) -> ProtocolHint {
        self.hint
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        Ok(self.lines.clone())
    }
}

/// Result of fetching every configured source
#[derive(Debug, Default)]
pub struct FetchReport {
    pub outputs: Vec<SourceOutput>,
    pub failed_sources: Vec<String>,
}

/// Fetch every source; a failing source contributes nothing.
///
/// Outputs keep the order of `sources` so first-seen dedup is reproducible.
pub async fn fetch_all(sources: &[Box<dyn SourceAdapter>]) -> FetchReport {
    let mut fetched: Vec<(usize, Result<Vec<String>>)> = stream::iter(sources.iter().enumerate())
        .map(|(idx, source)| async move { (idx, source.fetch().await) })
        .buffer_unordered(FETCH_CONCURRENCY)
        .collect()
        .await;

    fetched.sort_by_key(|(idx, _)| *idx);

    let mut report = FetchReport::default();
    for (idx, result) in fetched {
        let source = &sources[idx];
        match result {
            Ok(lines) => {
                tracing::info!(source = source.name(), lines = lines.len(), "Fetched source");
                report.outputs.push(SourceOutput::new(
                    source.name(),
                    source.default_hint(),
                    lines,
                ));
            }
            Err(e) => {
                tracing::warn!(source = source.name(), error = %e, "Source unavailable");
                report.failed_sources.push(source.name().to_string());
            }
        }
    }
    report
}

fn split_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Flatten a JSON payload into candidate lines.
///
/// Strings are taken verbatim; objects carrying `ip`/`host` and `port` become
/// `host:port`, prefixed with `protocol://` when present.
fn lines_from_json(value: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    collect_json(value, &mut lines);
    lines
}

fn collect_json(value: &Value, lines: &mut Vec<String>) {
    match value {
        Value::String(s) => lines.extend(split_lines(s)),
        Value::Array(items) => items.iter().for_each(|item| collect_json(item, lines)),
        Value::Object(map) => {
            let host = map
                .get("ip")
                .or_else(|| map.get("host"))
                .and_then(Value::as_str);
            let port = map.get("port").and_then(|p| match p {
                Value::Number(n) => n.as_u64().map(|n| n.to_string()),
                Value::String(s) => Some(s.clone()),
                _ => None,
            });

            match (host, port) {
                (Some(host), Some(port)) => {
                    let scheme = map
                        .get("protocol")
                        .or_else(|| map.get("type"))
                        .and_then(Value::as_str);
                    match scheme {
                        Some(scheme) => lines.push(format!("{}://{}:{}", scheme, host, port)),
                        None => lines.push(format!("{}:{}", host, port)),
                    }
                }
                _ => map.values().for_each(|v| collect_json(v, lines)),
            }
        }
        _ => {}
    }
}

/// Public lists scraped by default, grouped by the protocol they advertise
pub fn builtin_sources(client: &Client) -> Vec<UrlSource> {
    const HTTP: &[&str] = &[
        "https://api.proxyscrape.com/v2/?request=get&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all",
        "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/http/data.txt",
        "https://raw.githubusercontent.com/mmpx12/proxy-list/master/http.txt",
        "https://raw.githubusercontent.com/Zaeem20/FREE_PROXIES_LIST/master/http.txt",
        "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/http.txt",
        "https://raw.githubusercontent.com/sunny9577/proxy-scraper/master/generated/http_proxies.txt",
        "https://raw.githubusercontent.com/mzyui/proxy-list/main/http.txt",
        "https://raw.githubusercontent.com/vakhov/fresh-proxy-list/master/http.txt",
        "https://raw.githubusercontent.com/elliottophellia/proxylist/master/results/http/global/http_checked.txt",
        "https://raw.githubusercontent.com/zloi-user/hideip.me/master/http.txt",
        "https://raw.githubusercontent.com/dpangestuw/Free-Proxy/main/http_proxies.txt",
        "https://raw.githubusercontent.com/casa-ls/proxy-list/main/http",
        "https://raw.githubusercontent.com/SevenworksDev/proxy-list/main/proxies/http.txt",
        "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
        "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/http.txt",
    ];
    const HTTPS: &[&str] = &[
        "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/https/data.txt",
        "https://raw.githubusercontent.com/mmpx12/proxy-list/master/https.txt",
        "https://raw.githubusercontent.com/Zaeem20/FREE_PROXIES_LIST/master/https.txt",
        "https://raw.githubusercontent.com/vakhov/fresh-proxy-list/master/https.txt",
        "https://raw.githubusercontent.com/roosterkid/openproxylist/main/HTTPS_RAW.txt",
        "https://raw.githubusercontent.com/zloi-user/hideip.me/master/https.txt",
        "https://raw.githubusercontent.com/SevenworksDev/proxy-list/main/proxies/https.txt",
        "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/https.txt",
    ];
    const SOCKS4: &[&str] = &[
        "https://api.proxyscrape.com/v2/?request=get&protocol=socks4&timeout=10000&country=all",
        "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/socks4/data.txt",
        "https://raw.githubusercontent.com/mmpx12/proxy-list/master/socks4.txt",
        "https://raw.githubusercontent.com/Zaeem20/FREE_PROXIES_LIST/master/socks4.txt",
        "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/socks4.txt",
        "https://raw.githubusercontent.com/sunny9577/proxy-scraper/master/generated/socks4_proxies.txt",
        "https://raw.githubusercontent.com/mzyui/proxy-list/main/socks4.txt",
        "https://raw.githubusercontent.com/vakhov/fresh-proxy-list/master/socks4.txt",
        "https://raw.githubusercontent.com/roosterkid/openproxylist/main/SOCKS4_RAW.txt",
        "https://raw.githubusercontent.com/elliottophellia/proxylist/master/results/socks4/global/socks4_checked.txt",
        "https://raw.githubusercontent.com/zloi-user/hideip.me/master/socks4.txt",
        "https://raw.githubusercontent.com/dpangestuw/Free-Proxy/main/socks4_proxies.txt",
        "https://raw.githubusercontent.com/casa-ls/proxy-list/main/socks4",
        "https://raw.githubusercontent.com/SevenworksDev/proxy-list/main/proxies/socks4.txt",
        "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks4.txt",
        "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/socks4.txt",
    ];
    const SOCKS5: &[&str] = &[
        "https://api.proxyscrape.com/v2/?request=get&protocol=socks5&timeout=10000&country=all",
        "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/protocols/socks5/data.txt",
        "https://raw.githubusercontent.com/hookzof/socks5_list/master/proxy.txt",
        "https://raw.githubusercontent.com/mmpx12/proxy-list/master/socks5.txt",
        "https://raw.githubusercontent.com/Zaeem20/FREE_PROXIES_LIST/master/socks5.txt",
        "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/socks5.txt",
        "https://raw.githubusercontent.com/sunny9577/proxy-scraper/master/generated/socks5_proxies.txt",
        "https://raw.githubusercontent.com/mzyui/proxy-list/main/socks5.txt",
        "https://raw.githubusercontent.com/vakhov/fresh-proxy-list/master/socks5.txt",
        "https://raw.githubusercontent.com/roosterkid/openproxylist/main/SOCKS5_RAW.txt",
        "https://raw.githubusercontent.com/elliottophellia/proxylist/master/results/socks5/global/socks5_checked.txt",
        "https://raw.githubusercontent.com/zloi-user/hideip.me/master/socks5.txt",
        "https://raw.githubusercontent.com/dpangestuw/Free-Proxy/main/socks5_proxies.txt",
        "https://raw.githubusercontent.com/casa-ls/proxy-list/main/socks5",
        "https://raw.githubusercontent.com/SevenworksDev/proxy-list/main/proxies/socks5.txt",
        "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
        "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/socks5.txt",
    ];
    const MIXED: &[&str] = &[
        "https://raw.githubusercontent.com/proxifly/free-proxy-list/main/proxies/all/data.txt",
        "https://raw.githubusercontent.com/mmpx12/proxy-list/master/proxies.txt",
        "https://raw.githubusercontent.com/mzyui/proxy-list/main/all.txt",
        "https://raw.githubusercontent.com/vakhov/fresh-proxy-list/master/proxylist.txt",
        "https://raw.githubusercontent.com/themiralay/Proxy-List-World/master/data.txt",
        "https://raw.githubusercontent.com/gitrecon1455/fresh-proxy-list/main/proxylist.txt",
        "https://raw.githubusercontent.com/SevenworksDev/proxy-list/main/proxies/unknown.txt",
    ];

    [
        (HTTP, ProtocolHint::Http),
        (HTTPS, ProtocolHint::Https),
        (SOCKS4, ProtocolHint::Socks4),
        (SOCKS5, ProtocolHint::Socks5),
        (MIXED, ProtocolHint::Unknown),
    ]
    .into_iter()
    .flat_map(|(urls, hint)| {
        urls.iter()
            .map(move |url| UrlSource::new(client.clone(), &source_name(url), url, hint))
    })
    .collect()
}

/// Short display name for a source URL: host plus the last path segment
fn source_name(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let without_query = without_scheme.split('?').next().unwrap_or(without_scheme);
    let mut parts = without_query.split('/');
    let host = parts.next().unwrap_or_default();
    match parts.filter(|p| !p.is_empty()).last() {
        Some(last) => format!("{}/{}", host, last),
        None => host.to_string(),
    }
}
