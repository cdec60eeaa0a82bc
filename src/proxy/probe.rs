//! Network probes: one request to the echo endpoint through a candidate

use crate::error::PipelineError;
use crate::proxy::echo::{EchoEndpoint, EchoResponse};
use crate::proxy::models::{Candidate, Protocol};
use crate::Result;
use async_trait::async_trait;
use reqwest::{redirect, Client, Proxy as ReqwestProxy, Url};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const PROBE_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0";

/// Largest echo response read over a raw SOCKS4 tunnel
const MAX_RAW_RESPONSE: u64 = 256 * 1024;

const SOCKS4_VERSION: u8 = 4;
const SOCKS4_CONNECT: u8 = 1;
const SOCKS4_GRANTED: u8 = 90;

/// Sends the echo request through a candidate acting as a proxy
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(
        &self,
        candidate: &Candidate,
        protocol: Protocol,
        echo: &EchoEndpoint,
        timeout: Duration,
    ) -> Result<EchoResponse>;
}

/// Live probe over the network
#[derive(Debug, Clone, Default)]
pub struct NetworkProbe;

impl NetworkProbe {
    pub fn new() -> Self {
        Self
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(
        &self,
        candidate: &Candidate,
        protocol: Protocol,
        timeout: Duration,
    ) -> Result<Client> {
        let proxy_url = match protocol {
            Protocol::Http | Protocol::Https => candidate.url(Protocol::Http),
            Protocol::Socks5 => format!("socks5h://{}", candidate.authority()),
            Protocol::Socks4 => {
                return Err(PipelineError::Config(
                    "SOCKS4 is not routed through the HTTP client".to_string(),
                ))
            }
        };

        let client = Client::builder()
            .proxy(ReqwestProxy::all(&proxy_url)?)
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .user_agent(PROBE_USER_AGENT)
            .build()?;

        Ok(client)
    }

    async fn probe_http(
        &self,
        candidate: &Candidate,
        protocol: Protocol,
        echo: &EchoEndpoint,
        timeout: Duration,
    ) -> Result<EchoResponse> {
        let client = self.create_client(candidate, protocol, timeout)?;
        let url = match protocol {
            Protocol::Https => echo.tls_url(),
            _ => echo.url().to_string(),
        };

        let response = client.get(&url).send().await.map_err(probe_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await.map_err(probe_error)?;

        Ok(EchoResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Probe for NetworkProbe {
    async fn probe(
        &self,
        candidate: &Candidate,
        protocol: Protocol,
        echo: &EchoEndpoint,
        timeout: Duration,
    ) -> Result<EchoResponse> {
        match protocol {
            Protocol::Socks4 => socks4_probe(candidate, echo, timeout).await,
            _ => self.probe_http(candidate, protocol, echo, timeout).await,
        }
    }
}

fn probe_error(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::ProbeTimeout
    } else {
        PipelineError::ProbeConnectionFailed(err.to_string())
    }
}

fn io_error(err: std::io::Error) -> PipelineError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        PipelineError::ProbeTimeout
    } else {
        PipelineError::ProbeConnectionFailed(err.to_string())
    }
}

/// SOCKS4 CONNECT followed by a plain HTTP/1.0 GET over the tunnel.
///
/// SOCKS4 carries only IPv4 destinations, so the echo host is resolved
/// locally and the echo URL must be plain `http`.
async fn socks4_probe(
    candidate: &Candidate,
    echo: &EchoEndpoint,
    timeout: Duration,
) -> Result<EchoResponse> {
    let url = Url::parse(echo.url()).map_err(|e| PipelineError::Config(e.to_string()))?;
    if url.scheme() != "http" {
        return Err(PipelineError::ProbeConnectionFailed(
            "SOCKS4 probe requires a plain http echo URL".to_string(),
        ));
    }
    let echo_host = url
        .host_str()
        .ok_or_else(|| PipelineError::Config("echo URL has no host".to_string()))?
        .to_string();
    let echo_port = url.port_or_known_default().unwrap_or(80);

    let work = async {
        let target = resolve_ipv4(&echo_host, echo_port).await?;
        let mut stream = TcpStream::connect((candidate.host.as_str(), candidate.port))
            .await
            .map_err(io_error)?;

        stream
            .write_all(&socks4_connect_request(target))
            .await
            .map_err(io_error)?;

        let mut reply = [0u8; 8];
        stream.read_exact(&mut reply).await.map_err(io_error)?;
        if reply[0] != 0 || reply[1] != SOCKS4_GRANTED {
            return Err(PipelineError::ProbeConnectionFailed(format!(
                "SOCKS4 request rejected (code {})",
                reply[1]
            )));
        }

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        let request = format!(
            "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            path, echo_host, PROBE_USER_AGENT
        );
        stream.write_all(request.as_bytes()).await.map_err(io_error)?;

        let mut raw = Vec::new();
        (&mut stream)
            .take(MAX_RAW_RESPONSE)
            .read_to_end(&mut raw)
            .await
            .map_err(io_error)?;

        parse_raw_response(&raw)
    };

    tokio::time::timeout(timeout, work)
        .await
        .map_err(|_| PipelineError::ProbeTimeout)?
}

async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(_) => Ok(SocketAddr::new(ip, port)),
            IpAddr::V6(_) => Err(PipelineError::Config(
                "SOCKS4 cannot reach an IPv6 echo endpoint".to_string(),
            )),
        };
    }

    tokio::net::lookup_host((host, port))
        .await
        .map_err(io_error)?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| {
            PipelineError::ProbeConnectionFailed(format!("no IPv4 address for {}", host))
        })
}

fn socks4_connect_request(target: SocketAddr) -> Vec<u8> {
    let mut request = Vec::with_capacity(9);
    request.push(SOCKS4_VERSION);
    request.push(SOCKS4_CONNECT);
    request.extend_from_slice(&target.port().to_be_bytes());
    if let IpAddr::V4(ip) = target.ip() {
        request.extend_from_slice(&ip.octets());
    }
    // empty user id
    request.push(0);
    request
}

fn parse_raw_response(raw: &[u8]) -> Result<EchoResponse> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .or_else(|| text.split_once("\n\n"))
        .unwrap_or((text.as_ref(), ""));

    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|_| status_line.starts_with("HTTP/"))
        .ok_or_else(|| {
            PipelineError::ProbeConnectionFailed("malformed HTTP response".to_string())
        })?;

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    Ok(EchoResponse {
        status,
        headers,
        body: body.to_string(),
    })
}
