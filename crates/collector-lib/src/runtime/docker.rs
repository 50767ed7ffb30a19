//! Docker Engine API client
//!
//! Speaks HTTP/1.1 over a Unix socket or TCP (optionally mutual TLS). Each
//! request uses its own connection; the stats subscription keeps its
//! connection open until the container stops or the subscriber goes away.

use super::{load_tls_connector, ContainerRuntime, StatsStream};
use crate::error::{ConfigError, RuntimeError};
use crate::models::{ContainerDescriptor, RawStats};
use async_trait::async_trait;
use hyper::body::HttpBody;
use hyper::{header, Body, Request, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::mpsc;
use tokio_rustls::rustls::ServerName;
use tokio_rustls::TlsConnector;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use url::Url;

/// Port used when a `tcp://` endpoint does not name one
const DEFAULT_TCP_PORT: u16 = 2375;

/// Decoded ticks buffered between the connection reader and the monitor
const STATS_BUFFER: usize = 1;

/// Where the Docker daemon listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    /// Parse `unix:///path/to/socket` or `tcp://host[:port]`
    pub fn parse(endpoint: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "unix" => {
                if url.path().is_empty() || url.path() == "/" {
                    return Err(invalid("missing socket path".to_string()));
                }
                Ok(Endpoint::Unix(PathBuf::from(url.path())))
            }
            "tcp" | "http" | "https" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| invalid("missing host".to_string()))?;
                Ok(Endpoint::Tcp {
                    host: host.to_string(),
                    port: url.port().unwrap_or(DEFAULT_TCP_PORT),
                })
            }
            other => Err(invalid(format!("unsupported scheme {other}"))),
        }
    }

    fn host_header(&self) -> &str {
        match self {
            Endpoint::Unix(_) => "docker",
            Endpoint::Tcp { host, .. } => host,
        }
    }
}

/// Container runtime backed by the Docker Engine API
pub struct DockerClient {
    endpoint: Endpoint,
    tls: Option<TlsConnector>,
}

impl DockerClient {
    /// Create a client for `endpoint`, using mutual TLS when `cert_dir` is set
    pub fn new(endpoint: &str, cert_dir: Option<&Path>) -> Result<Self, RuntimeError> {
        let endpoint = Endpoint::parse(endpoint)?;

        let tls = match (cert_dir, &endpoint) {
            (Some(dir), Endpoint::Tcp { .. }) => Some(load_tls_connector(dir)?),
            (Some(dir), Endpoint::Unix(_)) => {
                warn!(
                    cert_dir = %dir.display(),
                    "Ignoring TLS certificates for unix socket endpoint"
                );
                None
            }
            (None, _) => None,
        };

        Ok(Self { endpoint, tls })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Check that the daemon answers
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        check_status(self.get("/_ping").await?).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Response<Body>, RuntimeError> {
        let request = Request::get(path)
            .header(header::HOST, self.endpoint.host_header())
            .body(Body::empty())
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))?;

        match &self.endpoint {
            Endpoint::Unix(socket) => {
                let stream = UnixStream::connect(socket).await.map_err(|e| {
                    RuntimeError::Unreachable(format!("{}: {e}", socket.display()))
                })?;
                send(stream, request).await
            }
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| RuntimeError::Unreachable(format!("{host}:{port}: {e}")))?;

                match &self.tls {
                    Some(connector) => {
                        let server_name = ServerName::try_from(host.as_str())
                            .map_err(|e| RuntimeError::Tls(format!("{host}: {e}")))?;
                        let stream = connector.connect(server_name, stream).await?;
                        send(stream, request).await
                    }
                    None => send(stream, request).await,
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RuntimeError> {
        let response = check_status(self.get(path).await?).await?;
        let body = hyper::body::to_bytes(response.into_body()).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError> {
        let containers: Vec<ContainerSummary> = self.get_json("/containers/json").await?;
        Ok(containers.into_iter().map(|c| c.id).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDescriptor, RuntimeError> {
        let container: ContainerInspect = self
            .get_json(&format!("/containers/{id}/json"))
            .await
            .map_err(|e| not_found(e, id))?;
        Ok(container.into())
    }

    async fn stream_stats(&self, id: &str) -> Result<StatsStream, RuntimeError> {
        let response = self
            .get(&format!("/containers/{id}/stats?stream=true"))
            .await?;
        let response = check_status(response).await.map_err(|e| not_found(e, id))?;

        let (tx, rx) = mpsc::channel(STATS_BUFFER);
        let container_id = id.to_string();

        tokio::spawn(async move {
            let mut body = response.into_body();
            let mut decoder = NdjsonDecoder::default();

            while let Some(chunk) = body.data().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };

                decoder.push(&chunk);
                while let Some(line) = decoder.next_line() {
                    let tick = serde_json::from_slice::<RawStats>(&line).map_err(RuntimeError::from);
                    if tx.send(tick).await.is_err() {
                        debug!(container_id = %container_id, "Stats subscriber dropped");
                        return;
                    }
                }
            }

            if let Some(line) = decoder.finish() {
                let tick = serde_json::from_slice::<RawStats>(&line).map_err(RuntimeError::from);
                let _ = tx.send(tick).await;
            }

            debug!(container_id = %container_id, "Stats stream closed by runtime");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn send<T>(io: T, request: Request<Body>) -> Result<Response<Body>, RuntimeError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::handshake(io).await?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Runtime connection closed with error");
        }
    });

    Ok(sender.send_request(request).await?)
}

async fn check_status(response: Response<Body>) -> Result<Response<Body>, RuntimeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = hyper::body::to_bytes(response.into_body())
        .await
        .unwrap_or_default();
    let message = serde_json::from_slice::<ErrorMessage>(&body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());

    Err(RuntimeError::Status {
        status: status.as_u16(),
        message,
    })
}

fn not_found(err: RuntimeError, id: &str) -> RuntimeError {
    match err {
        RuntimeError::Status { status: 404, .. } => RuntimeError::NotFound(id.to_string()),
        other => other,
    }
}

/// Splits a byte stream into newline-delimited JSON documents
#[derive(Debug, Default)]
pub(crate) struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete, non-blank line without its terminator
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let end = self.buffer.iter().position(|b| *b == b'\n')?;
            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop();
            if !is_blank(&line) {
                return Some(line);
            }
        }
    }

    /// Whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buffer);
        (!is_blank(&rest)).then_some(rest)
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_whitespace())
}

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Config", default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
    #[serde(rename = "Env", default)]
    env: Option<Vec<String>>,
}

impl From<ContainerInspect> for ContainerDescriptor {
    fn from(container: ContainerInspect) -> Self {
        let config = container.config.unwrap_or_default();
        Self {
            id: container.id,
            name: container.name,
            labels: config.labels.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}
