//! Scan client: picks a transport once and turns replies into verdicts.

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::scan::endpoint::Endpoint;
use crate::scan::http::ScanRequest;
use crate::scan::transport::{ScanTransport, TcpTransport, Timeouts, UnixTransport};
use crate::scan::verdict::ScanVerdict;

/// Client for an Rspamd-compatible scan daemon.
pub struct ScanClient {
    transport: Box<dyn ScanTransport>,
}

impl ScanClient {
    /// Build a client for a configured endpoint string.
    ///
    /// `ip:port` selects TCP; anything else is treated as a socket path.
    pub fn new(endpoint: &str, timeouts: Timeouts) -> Result<Self, TransportError> {
        let transport: Box<dyn ScanTransport> = match Endpoint::parse(endpoint) {
            Endpoint::Tcp { host, port } => Box::new(TcpTransport::new(&host, port, timeouts)?),
            Endpoint::Unix(path) => Box::new(UnixTransport::new(path, timeouts)),
        };
        Ok(Self { transport })
    }

    /// Build a client around an existing transport.
    pub fn with_transport<T>(transport: T) -> Self
    where
        T: ScanTransport + 'static,
    {
        Self {
            transport: Box::new(transport),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    /// Scan a message, never failing.
    ///
    /// Transport and decoding problems come back as a verdict whose `error`
    /// is set, so the caller can let the message through.
    pub async fn check_message(&self, request: &ScanRequest) -> ScanVerdict {
        match self.try_check(request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(endpoint = %self.endpoint(), error = %e, "Scan failed");
                ScanVerdict::failed(e.to_string())
            }
        }
    }

    /// Scan a message, surfacing transport errors.
    pub async fn try_check(&self, request: &ScanRequest) -> Result<ScanVerdict, TransportError> {
        let response = self.transport.post(request).await?;

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Err(TransportError::EmptyReply);
        }

        match ScanVerdict::from_json(&response.body) {
            Ok(verdict) => {
                debug!(
                    status = response.status,
                    symbols = verdict.symbols.len(),
                    "Verdict received"
                );
                Ok(verdict)
            }
            Err(_) if !(200..300).contains(&response.status) => {
                Err(TransportError::MalformedResponse(format!(
                    "daemon answered HTTP {}",
                    response.status
                )))
            }
            Err(e) => Err(TransportError::InvalidVerdict(e)),
        }
    }

    /// Check that the daemon accepts connections.
    pub async fn test_connection(&self) -> Result<(), TransportError> {
        self.transport.check_reachable().await
    }
}
