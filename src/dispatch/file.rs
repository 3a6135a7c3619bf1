//! `FILE` command: load a queued message, scan it, build the reply.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use super::Dispatcher;
use crate::envelope::split_queue_file;
use crate::error::HandlerError;
use crate::headers::add_header_response;
use crate::protocol::Response;
use crate::scan::ScanRequest;

/// Paths the server hands us for messages sitting in its own queue.
static QUEUE_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Queue/.*\.msg").unwrap());

/// Resolve where a `FILE` argument lives on disk.
///
/// Queue paths are relative to the server root; everything else is used as is.
fn resolve(cgp_path: &Path, arg: &str) -> (PathBuf, bool) {
    if QUEUE_PATH.is_match(arg) {
        (cgp_path.join(arg), true)
    } else {
        (PathBuf::from(arg), false)
    }
}

/// Read a message and turn it into a scan request.
///
/// Queue files carry an envelope block whose sender, recipients and client
/// address ride along as extra request headers.
pub(crate) async fn load_message(cgp_path: &Path, arg: &str) -> Result<ScanRequest, HandlerError> {
    let (path, queued) = resolve(cgp_path, arg);
    let contents = tokio::fs::read(&path)
        .await
        .map_err(|source| HandlerError::ReadMessage {
            path: path.display().to_string(),
            source,
        })?;

    if !queued {
        return Ok(ScanRequest::new(contents));
    }

    let (envelope, message) = split_queue_file(&contents);
    debug!(
        sender = %envelope.sender,
        recipients = envelope.recipients.len(),
        ip = %envelope.origin_ip,
        "Parsed queue envelope"
    );
    Ok(ScanRequest::new(message.to_vec()).with_headers(envelope.scan_headers()))
}

impl Dispatcher {
    pub(super) async fn scan_file(&self, seq: &str, arg: &str) -> Result<Response, HandlerError> {
        let request = load_message(&self.cgp_path, arg).await?;
        let verdict = self.client.check_message(&request).await;

        if let Some(reason) = verdict.failure() {
            warn!(seq, file = arg, error = reason, "Scan error, accepting message");
            self.note(&format!("Rspamd error for {arg}: {reason}")).await;
            return Ok(Response::ok(seq));
        }

        let response = add_header_response(seq, &verdict)?;
        info!(
            seq,
            file = arg,
            score = %verdict.score.as_ref().map(ToString::to_string).unwrap_or_default(),
            action = verdict.action.as_deref().unwrap_or("-"),
            "Scanned"
        );
        Ok(response)
    }
}
