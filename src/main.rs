use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use proxy_sieve::{
    aggregator, builtin_sources, echo::DEFAULT_ECHO_URL, fetch_all, writer::write_atomic,
    CrawlerConfig, FileSource, JsonFileReporter, LogReporter, OutputFormat, Pipeline,
    PipelineConfig, ProtocolHint, RunSummary, SourceAdapter, SourceFormat, UrlSource,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Aggregate public proxy lists and keep the ones that actually work
#[derive(Parser)]
#[command(name = "proxy-sieve")]
#[command(about = "Aggregate public proxy lists and keep the ones that actually work")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, verify and save working proxies (default)
    Run(RunArgs),
    /// Verify proxies from a local file
    Check {
        /// Input file containing proxies
        input: PathBuf,
        /// Proxy type for lines without a scheme (http, https, socks4, socks5)
        #[arg(short = 't', long)]
        proxy_type: Option<String>,
        #[command(flatten)]
        verify: VerifyArgs,
    },
    /// Fetch and deduplicate proxies without verifying them
    Crawl {
        #[command(flatten)]
        sources: SourceArgs,
        /// Output file for crawled proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    sources: SourceArgs,
    #[command(flatten)]
    verify: VerifyArgs,
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// URLs to fetch proxy lists from (can specify multiple)
    #[arg(short, long)]
    url: Vec<String>,
    /// File containing list of URLs to fetch (one URL per line)
    #[arg(short = 'f', long)]
    url_file: Option<PathBuf>,
    /// Use the built-in catalogue of public lists
    #[arg(long)]
    builtin_sources: bool,
    /// Proxy type for lines without a scheme (http, https, socks4, socks5)
    #[arg(short = 't', long)]
    proxy_type: Option<String>,
    /// Timeout in seconds for each list download
    #[arg(long, default_value = "30")]
    source_timeout: u64,
}

#[derive(Args, Clone)]
struct VerifyArgs {
    /// Number of concurrent checks
    #[arg(short = 'n', long, default_value = "64")]
    concurrency: usize,
    /// Budget per proxy in milliseconds
    #[arg(long, default_value = "6000")]
    timeout_ms: u64,
    /// Abandon unstarted checks after this many seconds
    #[arg(long, default_value = "900")]
    deadline_secs: u64,
    /// Echo endpoint requested through each proxy
    #[arg(long, default_value = DEFAULT_ECHO_URL)]
    echo_url: String,
    /// Our outbound IP (discovered through the echo endpoint when omitted)
    #[arg(long)]
    real_ip: Option<IpAddr>,
    /// MaxMind City database for geolocation
    #[arg(long)]
    mmdb: Option<PathBuf>,
    /// Header name that marks a proxy as anonymous (repeatable, replaces the defaults)
    #[arg(long = "proxy-marker")]
    proxy_markers: Vec<String>,
    /// Output file for working proxies
    #[arg(short, long, default_value = "output/active_proxies.txt")]
    output: PathBuf,
    /// Write protocol://host:port instead of host:port
    #[arg(long)]
    with_scheme: bool,
    /// Also write the run summary as JSON to this file
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match cli.command {
        Some(Commands::Run(args)) => run(args).await,
        None => run(cli.run).await,
        Some(Commands::Check {
            input,
            proxy_type,
            verify,
        }) => check(input, proxy_type, verify).await,
        Some(Commands::Crawl { sources, output }) => crawl(sources, output).await,
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = pipeline_config(&args.verify)
        .with_source_timeout(Duration::from_secs(args.sources.source_timeout));
    let sources = build_sources(&args.sources, &config.crawler_config())?;
    let summary = verify(&sources, config, args.verify.summary).await?;
    print_summary(&summary);
    Ok(())
}

async fn check(input: PathBuf, proxy_type: Option<String>, args: VerifyArgs) -> Result<()> {
    let hint = parse_hint(proxy_type.as_deref())?;
    println!("Loading proxies from {:?}", input);
    let sources: Vec<Box<dyn SourceAdapter>> = vec![Box::new(FileSource::new(input, hint))];
    let summary = verify(&sources, pipeline_config(&args), args.summary).await?;
    print_summary(&summary);
    Ok(())
}

async fn crawl(args: SourceArgs, output: Option<PathBuf>) -> Result<()> {
    let config =
        PipelineConfig::new().with_source_timeout(Duration::from_secs(args.source_timeout));
    let sources = build_sources(&args, &config.crawler_config())?;
    let report = fetch_all(&sources).await;
    for failed in &report.failed_sources {
        eprintln!("Error crawling {}", failed);
    }

    let aggregate = aggregator::merge(report.outputs);
    println!(
        "Total unique proxies: {} ({} duplicates, {} malformed lines)",
        aggregate.candidates.len(),
        aggregate.stats.duplicates,
        aggregate.stats.parse_skips
    );

    let lines: Vec<String> = aggregate
        .candidates
        .iter()
        .map(|c| match c.protocol_hint.as_protocol() {
            Some(protocol) => c.url(protocol),
            None => c.authority(),
        })
        .collect();

    match output {
        Some(path) => {
            let mut content = lines.join("\n");
            if !content.is_empty() {
                content.push('\n');
            }
            write_atomic(&path, content.as_bytes())?;
            println!("Saved proxies to {:?}", path);
        }
        None => lines.iter().for_each(|line| println!("{}", line)),
    }
    Ok(())
}

fn pipeline_config(args: &VerifyArgs) -> PipelineConfig {
    let format = if args.with_scheme {
        OutputFormat::WithScheme
    } else {
        OutputFormat::Plain
    };

    let mut config = PipelineConfig::new()
        .with_concurrency(args.concurrency)
        .with_timeout(Duration::from_millis(args.timeout_ms))
        .with_run_deadline(Duration::from_secs(args.deadline_secs))
        .with_echo_url(args.echo_url.clone())
        .with_output(args.output.clone(), format);
    if let Some(ip) = args.real_ip {
        config = config.with_real_ip(ip);
    }
    if let Some(path) = &args.mmdb {
        config = config.with_mmdb_path(path.clone());
    }
    if !args.proxy_markers.is_empty() {
        config = config.with_proxy_markers(args.proxy_markers.clone());
    }
    config
}

async fn verify(
    sources: &[Box<dyn SourceAdapter>],
    config: PipelineConfig,
    summary: Option<PathBuf>,
) -> Result<RunSummary> {
    let mut pipeline = Pipeline::new(config).await?.with_reporter(LogReporter);
    if let Some(path) = summary {
        pipeline = pipeline.with_reporter(JsonFileReporter::new(path));
    }

    pipeline.run(sources).await.context("run failed")
}

/// Sources from flags; falls back to the built-in catalogue when none are given
fn build_sources(
    args: &SourceArgs,
    crawler: &CrawlerConfig,
) -> Result<Vec<Box<dyn SourceAdapter>>> {
    let hint = parse_hint(args.proxy_type.as_deref())?;
    let client = crawler.build_client()?;

    let mut urls: Vec<String> = args.url.clone();
    if let Some(file_path) = &args.url_file {
        let content = std::fs::read_to_string(file_path)
            .with_context(|| format!("reading URL file {:?}", file_path))?;
        urls.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }

    let mut sources: Vec<Box<dyn SourceAdapter>> = urls
        .iter()
        .map(|url| {
            let format = if url.ends_with(".json") {
                SourceFormat::Json
            } else {
                SourceFormat::Text
            };
            Box::new(UrlSource::new(client.clone(), url, url, hint).with_format(format))
                as Box<dyn SourceAdapter>
        })
        .collect();

    if args.builtin_sources || sources.is_empty() {
        sources.extend(
            builtin_sources(&client)
                .into_iter()
                .map(|s| Box::new(s) as Box<dyn SourceAdapter>),
        );
    }

    tracing::info!(sources = sources.len(), "Configured sources");
    Ok(sources)
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Results: {} alive, {} dead, {} not attempted ({} candidates)",
        summary.alive_count,
        summary.dead_count,
        summary.not_attempted_count,
        summary.candidates_seen
    );
    println!(
        "Saved {} proxies to {:?}",
        summary.alive_count, summary.output_path
    );
    if summary.is_degraded() {
        println!(
            "Degraded run: {} failed sources, deadline exceeded: {}",
            summary.failed_sources.len(),
            summary.deadline_exceeded
        );
    }
}

fn parse_hint(s: Option<&str>) -> Result<ProtocolHint> {
    match s {
        None => Ok(ProtocolHint::Unknown),
        Some(s) => ProtocolHint::from_scheme(s).ok_or_else(|| {
            anyhow!(
                "Invalid proxy type: {}. Use: http, https, socks4, socks5",
                s
            )
        }),
    }
}
