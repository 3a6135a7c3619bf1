//! Scan daemon transports: TCP via reqwest, Unix socket via hand framing.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixStream};
use tracing::trace;

use crate::error::TransportError;
use crate::scan::endpoint::Endpoint;
use crate::scan::http::{self, CHECK_PATH, HttpResponse, ScanRequest, header_value};

/// One way of reaching the scan daemon.
#[async_trait]
pub trait ScanTransport: Send + Sync {
    /// The endpoint this transport talks to.
    fn endpoint(&self) -> &Endpoint;

    /// Send one scan request and return the daemon's response.
    async fn post(&self, request: &ScanRequest) -> Result<HttpResponse, TransportError>;

    /// Open and immediately close a connection.
    async fn check_reachable(&self) -> Result<(), TransportError>;
}

/// Timeouts shared by both transports.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Duration,
}

// ── TCP ─────────────────────────────────────────────────────────────

/// TCP transport using a standard HTTP client.
pub struct TcpTransport {
    endpoint: Endpoint,
    host: String,
    port: u16,
    url: String,
    client: reqwest::Client,
    timeouts: Timeouts,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16, timeouts: Timeouts) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()?;
        Ok(Self {
            endpoint: Endpoint::Tcp {
                host: host.to_string(),
                port,
            },
            host: host.to_string(),
            port,
            url: format!("http://{host}:{port}{CHECK_PATH}"),
            client,
            timeouts,
        })
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                endpoint: self.endpoint.to_string(),
                timeout: self.timeouts.request,
            }
        } else if err.is_connect() {
            TransportError::Connect {
                endpoint: self.endpoint.to_string(),
                reason: err.to_string(),
            }
        } else {
            TransportError::Http(err)
        }
    }
}

#[async_trait]
impl ScanTransport for TcpTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn post(&self, request: &ScanRequest) -> Result<HttpResponse, TransportError> {
        // reqwest derives Host and Content-Length itself.
        let mut builder = self.client.post(&self.url);
        for (name, value) in http::base_headers(&self.endpoint)
            .into_iter()
            .filter(|(name, _)| name != "Host")
            .chain(request.extra_headers.iter().cloned())
        {
            builder = builder.header(name.trim(), header_value(&value));
        }

        trace!(url = %self.url, len = request.message.len(), "POST over TCP");
        let response = builder
            .body(request.message.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }

    async fn check_reachable(&self) -> Result<(), TransportError> {
        let stream = tokio::time::timeout(
            self.timeouts.connect,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            endpoint: self.endpoint.to_string(),
            timeout: self.timeouts.connect,
        })?
        .map_err(|e| TransportError::Connect {
            endpoint: self.endpoint.to_string(),
            reason: e.to_string(),
        })?;
        drop(stream);
        Ok(())
    }
}

// ── Unix socket ─────────────────────────────────────────────────────

/// Unix domain socket transport with hand-written HTTP framing.
pub struct UnixTransport {
    endpoint: Endpoint,
    path: PathBuf,
    timeouts: Timeouts,
}

impl UnixTransport {
    pub fn new(path: PathBuf, timeouts: Timeouts) -> Self {
        Self {
            endpoint: Endpoint::Unix(path.clone()),
            path,
            timeouts,
        }
    }

    async fn connect(&self) -> Result<UnixStream, TransportError> {
        tokio::time::timeout(self.timeouts.connect, UnixStream::connect(&self.path))
            .await
            .map_err(|_| TransportError::Timeout {
                endpoint: self.endpoint.to_string(),
                timeout: self.timeouts.connect,
            })?
            .map_err(|e| TransportError::Connect {
                endpoint: self.endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    async fn exchange(&self, request: &ScanRequest) -> Result<HttpResponse, TransportError> {
        let mut stream = self.connect().await?;
        let bytes = http::encode_request(&self.endpoint, request);
        trace!(path = %self.path.display(), len = bytes.len(), "POST over Unix socket");
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        http::read_response(&mut stream).await
    }
}

#[async_trait]
impl ScanTransport for UnixTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn post(&self, request: &ScanRequest) -> Result<HttpResponse, TransportError> {
        tokio::time::timeout(self.timeouts.request, self.exchange(request))
            .await
            .map_err(|_| TransportError::Timeout {
                endpoint: self.endpoint.to_string(),
                timeout: self.timeouts.request,
            })?
    }

    async fn check_reachable(&self) -> Result<(), TransportError> {
        let stream = self.connect().await?;
        drop(stream);
        Ok(())
    }
}
