//! Helper protocol event loop.
//!
//! Reads request lines from the server and hands each one to the worker
//! pool. A periodic tick reaps finished workers between reads. The loop does
//! no network I/O of its own.

use std::borrow::Cow;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::worker::WorkerPool;

/// Why the listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// A `QUIT` request was answered.
    Quit,
    /// The server closed our stdin.
    InputClosed,
}

pub struct Listener {
    pool: WorkerPool,
    shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
    drain_timeout: Duration,
}

impl Listener {
    pub fn new(
        pool: WorkerPool,
        shutdown: watch::Receiver<bool>,
        poll_interval: Duration,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            shutdown,
            poll_interval,
            drain_timeout,
        }
    }

    /// Run until `QUIT`, end of input, or a read error.
    ///
    /// After `QUIT` live workers are abandoned straight away. At end of input
    /// they get the drain period first. While the worker limit is reached the
    /// next line is held back but `QUIT` is still honoured.
    pub async fn run<R>(mut self, mut input: R) -> std::io::Result<ListenerExit>
    where
        R: AsyncBufRead + Unpin,
    {
        // Survives cancelled reads, so a partly read line is never lost.
        let mut buf = Vec::new();
        let mut pending: Option<String> = None;
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow_and_update() {
                        info!(live = self.pool.len(), "Shutting down on QUIT");
                        self.pool.abandon();
                        return Ok(ListenerExit::Quit);
                    }
                }

                slot = self.pool.reserve(), if pending.is_some() => {
                    if let Some(line) = pending.take() {
                        self.pool.spawn(line, slot);
                    }
                }

                read = input.read_until(b'\n', &mut buf), if pending.is_none() => match read {
                    Ok(0) if buf.is_empty() => {
                        info!(live = self.pool.len(), "Input closed, draining workers");
                        self.pool.drain(self.drain_timeout).await;
                        return Ok(ListenerExit::InputClosed);
                    }
                    Ok(_) => {
                        let line = decode_line(&buf);
                        buf.clear();
                        debug!(line = %line, "Request received");
                        pending = Some(line);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read request line");
                        self.pool.abandon();
                        return Err(e);
                    }
                },

                _ = tick.tick() => {
                    let reaped = self.pool.reap_finished();
                    if reaped > 0 {
                        debug!(reaped, live = self.pool.len(), "Reaped workers");
                    }
                }
            }
        }
    }
}

/// Strip the line terminator and replace invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    if let Cow::Owned(_) = line {
        warn!(line = %line, "Request line is not valid UTF-8");
    }
    line.into_owned()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::protocol::ReplyWriter;
    use crate::scan::{ScanClient, Timeouts};

    fn listener_with(
        socket: &str,
        request_timeout: Duration,
        max_workers: Option<usize>,
    ) -> (Listener, Arc<Dispatcher>, tokio::io::DuplexStream) {
        let (out_client, out_server) = tokio::io::duplex(64 * 1024);
        let client = ScanClient::new(
            socket,
            Timeouts {
                connect: Duration::from_millis(100),
                request: request_timeout,
            },
        )
        .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(client),
            Arc::new(ReplyWriter::new(out_client)),
            PathBuf::from("/nonexistent"),
        ));
        let shutdown = dispatcher.subscribe_shutdown();
        let listener = Listener::new(
            WorkerPool::new(Arc::clone(&dispatcher), max_workers),
            shutdown,
            Duration::from_millis(10),
            Duration::from_secs(2),
        );
        (listener, dispatcher, out_server)
    }

    fn listener() -> (Listener, tokio::io::DuplexStream) {
        let (listener, _, out) =
            listener_with("/nonexistent/rspamd.sock", Duration::from_millis(100), None);
        (listener, out)
    }

    #[tokio::test]
    async fn stops_on_quit() {
        let (listener, _out) = listener();
        let (mut input, input_rx) = tokio::io::duplex(1024);
        input.write_all(b"1 INTF 4\n2 QUIT\n").await.unwrap();

        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            listener.run(BufReader::new(input_rx)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(exit, ListenerExit::Quit);
    }

    #[tokio::test]
    async fn stops_on_end_of_input() {
        let (listener, _out) = listener();
        let input: &[u8] = b"1 INTF 4\n";

        let exit = tokio::time::timeout(Duration::from_secs(5), listener.run(input))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ListenerExit::InputClosed);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_stop_the_loop() {
        let (listener, mut out) = listener();
        let input: &[u8] = b"1 FILE Queue/\xff\xfe.msg\n2 INTF 4\n";

        let exit = tokio::time::timeout(Duration::from_secs(5), listener.run(input))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ListenerExit::InputClosed);

        let mut replies = String::new();
        tokio::time::timeout(Duration::from_secs(5), out.read_to_string(&mut replies))
            .await
            .unwrap()
            .unwrap();
        assert!(replies.contains("2 INTF 4\r\n"), "{replies:?}");
        assert!(replies.contains("1 OK\r\n"), "{replies:?}");
    }

    #[tokio::test]
    async fn quit_is_honoured_while_worker_limit_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("rspamd.sock");
        let message = dir.path().join("m.eml");
        std::fs::write(&message, "Subject: x\n\nbody\n").unwrap();

        // Daemon that accepts and never answers.
        let daemon = UnixListener::bind(&socket).unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = daemon.accept().await {
                held.push(stream);
            }
        });

        let (listener, dispatcher, _out) = listener_with(
            &socket.display().to_string(),
            Duration::from_secs(30),
            Some(1),
        );
        let (mut input, input_rx) = tokio::io::duplex(1024);
        input
            .write_all(format!("1 FILE {}\n2 INTF 4\n", message.display()).as_bytes())
            .await
            .unwrap();
        let run = tokio::spawn(listener.run(BufReader::new(input_rx)));

        // The only slot is held by the stuck scan and line 2 is waiting for it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!run.is_finished());
        dispatcher.dispatch("3 QUIT").await;

        let exit = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, ListenerExit::Quit);
    }

    #[test]
    fn decode_line_strips_terminators() {
        assert_eq!(decode_line(b"1 INTF 4\r\n"), "1 INTF 4");
        assert_eq!(decode_line(b"1 INTF 4\n"), "1 INTF 4");
        assert_eq!(decode_line(b"1 INTF 4"), "1 INTF 4");
        assert_eq!(decode_line(b"1 FILE \xff.msg\n"), "1 FILE \u{fffd}.msg");
    }
}
