//! Shared reply stream.
//!
//! Every worker writes to the same stdout. Each record goes out with a
//! single `write_all` + `flush` under an async mutex, so lines from
//! concurrent workers never interleave.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::protocol::response::{Response, diagnostic_line};
use crate::protocol::MAX_RESPONSE_BYTES;

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-atomic writer for replies and diagnostics.
pub struct ReplyWriter {
    sink: Mutex<Sink>,
}

impl ReplyWriter {
    /// Wrap an arbitrary async writer.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            sink: Mutex::new(Box::new(writer)),
        }
    }

    /// Writer bound to the process stdout.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Send a reply line.
    ///
    /// An over-long line is still sent, preceded by a diagnostic, so the
    /// server sees both the reply and the reason it may reject it.
    pub async fn send(&self, response: &Response) -> std::io::Result<()> {
        let line = response.to_line();
        let mut sink = self.sink.lock().await;

        if line.len() > MAX_RESPONSE_BYTES {
            warn!(
                seq = %response.seq,
                len = line.len(),
                max = MAX_RESPONSE_BYTES,
                "Reply exceeds helper protocol line limit"
            );
            let note = diagnostic_line(&format!(
                "Error: response length greater than {MAX_RESPONSE_BYTES} bytes"
            ));
            sink.write_all(note.as_bytes()).await?;
        }

        sink.write_all(line.as_bytes()).await?;
        sink.flush().await?;
        debug!(seq = %response.seq, "Reply sent");
        Ok(())
    }

    /// Send an informational `* message` line.
    pub async fn diagnostic(&self, message: &str) -> std::io::Result<()> {
        let line = diagnostic_line(message);
        let mut sink = self.sink.lock().await;
        sink.write_all(line.as_bytes()).await?;
        sink.flush().await
    }
}
