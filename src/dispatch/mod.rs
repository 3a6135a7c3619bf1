//! Command dispatcher.
//!
//! One call to [`Dispatcher::dispatch`] takes a raw request line through
//! parsing, routing and execution, and writes at most one reply. Handler
//! failures, panics included, are answered with a plain `OK` so a scanning
//! problem never holds up mail delivery.

mod file;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{HandlerError, ProtocolError};
use crate::protocol::{Command, PROTOCOL_VERSION, ReplyWriter, Request, Response, parse_request};
use crate::scan::ScanClient;

/// Name used in startup and shutdown diagnostics.
pub const HELPER_NAME: &str = "mailscan-helper";

/// Routes parsed requests to their handlers.
pub struct Dispatcher {
    client: Arc<ScanClient>,
    writer: Arc<ReplyWriter>,
    cgp_path: PathBuf,
    shutdown: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(client: Arc<ScanClient>, writer: Arc<ReplyWriter>, cgp_path: PathBuf) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            client,
            writer,
            cgp_path,
            shutdown,
        }
    }

    /// Receiver that flips to `true` once a `QUIT` has been answered.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Handle one request line end to end.
    pub async fn dispatch(&self, line: &str) {
        let request = match parse_request(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(line = %line.trim(), "Dropping malformed request");
                self.note(&e.to_string()).await;
                return;
            }
        };

        let seq = request.seq.clone();
        debug!(seq = %seq, command = request.command.as_str(), "Dispatching");

        let reply = match AssertUnwindSafe(self.route(&request)).catch_unwind().await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(seq = %seq, error = %e, "Handler failed, accepting message");
                Some(Response::ok(&seq))
            }
            Err(panic) => {
                let e = HandlerError::Panicked(panic_message(panic.as_ref()));
                error!(seq = %seq, error = %e, "Handler panicked, accepting message");
                Some(Response::ok(&seq))
            }
        };

        if let Some(reply) = reply {
            self.send(&reply).await;
        }
    }

    async fn route(&self, request: &Request) -> Result<Option<Response>, HandlerError> {
        match &request.command {
            Command::Intf => Ok(Some(Response::intf(&request.seq, PROTOCOL_VERSION))),
            Command::Quit => {
                self.quit(&request.seq).await;
                Ok(None)
            }
            Command::File => {
                let Some(path) = request.args.first() else {
                    let e = HandlerError::MissingArgument { command: "FILE" };
                    warn!(seq = %request.seq, "{e}");
                    self.note(&e.to_string()).await;
                    return Ok(None);
                };
                self.scan_file(&request.seq, path).await.map(Some)
            }
            Command::Unknown(word) => {
                let e = ProtocolError::UnknownCommand {
                    seq: request.seq.clone(),
                    command: word.clone(),
                };
                warn!(seq = %request.seq, command = %word, "Unknown command");
                self.note(&e.to_string()).await;
                Ok(None)
            }
        }
    }

    /// Answer `QUIT`, then tell the listener to stop.
    async fn quit(&self, seq: &str) {
        info!(seq, "QUIT received");
        self.note(&format!("{HELPER_NAME} stopped")).await;
        self.send(&Response::ok(seq)).await;
        self.shutdown.send_replace(true);
    }

    async fn send(&self, reply: &Response) {
        if let Err(e) = self.writer.send(reply).await {
            error!(seq = %reply.seq, error = %e, "Failed to write reply");
        }
    }

    async fn note(&self, message: &str) {
        if let Err(e) = self.writer.diagnostic(message).await {
            error!(error = %e, "Failed to write diagnostic");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
