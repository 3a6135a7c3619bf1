//! Queue-side mode: scan a message from stdin and resubmit it.
//!
//! The message gets scan headers appended to its header block and is written
//! to the server's `Submitted` directory. The file is renamed to `.sub` only
//! once complete, so the server never picks up a partial message.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::InjectError;
use crate::scan::{ScanClient, ScanRequest, ScanVerdict};

pub struct Injector {
    client: ScanClient,
    submitted_dir: PathBuf,
}

impl Injector {
    pub fn new(client: ScanClient, submitted_dir: PathBuf) -> Self {
        Self {
            client,
            submitted_dir,
        }
    }

    /// Read, scan and submit one message. Returns the submitted file path.
    ///
    /// A failed scan still submits the message, marked
    /// `X-Spamd-Connection: false`.
    pub async fn inject<R>(&self, mut input: R) -> Result<PathBuf, InjectError>
    where
        R: AsyncRead + Unpin,
    {
        let mut message = Vec::new();
        input
            .read_to_end(&mut message)
            .await
            .map_err(InjectError::ReadInput)?;

        let verdict = self.client.check_message(&ScanRequest::new(message.clone())).await;
        if let Some(reason) = verdict.failure() {
            warn!(error = reason, "Scan failed, submitting unmarked");
        }

        let filtered = annotate(&message, &verdict);
        let path = submit(&self.submitted_dir, &filtered).await?;
        info!(path = %path.display(), "Message submitted");
        Ok(path)
    }
}

/// Headers describing a verdict.
fn scan_headers(verdict: &ScanVerdict) -> Vec<String> {
    let connected = verdict.failure().is_none();
    let mut headers = vec![format!("X-Spamd-Connection: {connected}")];
    if !connected {
        return headers;
    }
    if let Some(score) = &verdict.score {
        headers.push(format!("X-Spam-Score: {score}"));
    }
    if let Some(threshold) = &verdict.required_score {
        headers.push(format!("X-Spam-Threshold: {threshold}"));
    }
    if let Some(action) = verdict.action.as_deref().filter(|a| !a.is_empty()) {
        headers.push(format!("X-Spam-Action: {action}"));
    }
    headers
}

/// Insert scan headers at the end of the message's header block.
fn annotate(message: &[u8], verdict: &ScanVerdict) -> Vec<u8> {
    let (head, body) = split_header_block(message);
    let eol: &[u8] = if head.ends_with(b"\r\n") { b"\r\n" } else { b"\n" };

    let mut out = Vec::with_capacity(message.len() + 128);
    out.extend_from_slice(head);
    if !head.is_empty() && !head.ends_with(b"\n") {
        out.extend_from_slice(eol);
    }
    for header in scan_headers(verdict) {
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(eol);
    }
    out.extend_from_slice(eol);
    out.extend_from_slice(body);
    out
}

/// Split at the first blank line. The header part keeps its final line
/// break; a message with no blank line is all headers.
fn split_header_block(message: &[u8]) -> (&[u8], &[u8]) {
    let crlf = message.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p + 2, p + 4));
    let lf = message.windows(2).position(|w| w == b"\n\n").map(|p| (p + 1, p + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((head_end, body_start)) => (&message[..head_end], &message[body_start..]),
        None => (message, &[]),
    }
}

/// Write to a `.tmp` file, then rename it to `.tmp.sub`.
async fn submit(dir: &Path, contents: &[u8]) -> Result<PathBuf, InjectError> {
    let tmp = dir.join(format!("filtered_message_{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|source| InjectError::WriteQueue {
            path: tmp.display().to_string(),
            source,
        })?;

    let mut sub = tmp.clone().into_os_string();
    sub.push(".sub");
    let sub = PathBuf::from(sub);
    tokio::fs::rename(&tmp, &sub)
        .await
        .map_err(|source| InjectError::Submit {
            path: sub.display().to_string(),
            source,
        })?;
    Ok(sub)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::scan::{Score, Timeouts};

    fn verdict() -> ScanVerdict {
        ScanVerdict {
            score: Some(Score::from(4.5)),
            required_score: Some(Score::from(15.0)),
            action: Some("no action".into()),
            ..Default::default()
        }
    }

    #[test]
    fn headers_go_after_existing_header_block() {
        let out = annotate(b"Subject: hi\nFrom: a@x.com\n\nbody\n", &verdict());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Subject: hi\nFrom: a@x.com\n\
             X-Spamd-Connection: true\n\
             X-Spam-Score: 4.5\n\
             X-Spam-Threshold: 15.0\n\
             X-Spam-Action: no action\n\
             \nbody\n"
        );
    }

    #[test]
    fn crlf_messages_keep_crlf() {
        let out = annotate(b"Subject: hi\r\n\r\nbody", &ScanVerdict::failed("down"));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Subject: hi\r\nX-Spamd-Connection: false\r\n\r\nbody"
        );
    }

    #[test]
    fn message_without_body() {
        let out = annotate(b"Subject: hi", &ScanVerdict::failed("down"));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Subject: hi\nX-Spamd-Connection: false\n\n"
        );
    }

    #[tokio::test]
    async fn unreachable_daemon_still_submits() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScanClient::new(
            dir.path().join("missing.sock").to_str().unwrap(),
            Timeouts {
                connect: Duration::from_millis(100),
                request: Duration::from_millis(100),
            },
        )
        .unwrap();
        let injector = Injector::new(client, dir.path().to_path_buf());

        let input: &[u8] = b"Subject: hi\n\nbody\n";
        let path = injector.inject(input).await.unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("filtered_message_"));
        assert!(name.ends_with(".tmp.sub"));
        assert!(!dir.path().join(name.trim_end_matches(".sub")).exists());

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "Subject: hi\nX-Spamd-Connection: false\n\nbody\n");
    }

    #[tokio::test]
    async fn missing_submitted_dir_is_an_error() {
        let err = submit(Path::new("/nonexistent/Submitted"), b"x").await.unwrap_err();
        assert!(matches!(err, InjectError::WriteQueue { .. }));
    }
}
