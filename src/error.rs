//! Error types for the helper.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Inject error: {0}")]
    Inject(#[from] InjectError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to initialise logging: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Helper line protocol errors. Both variants drop the request line.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Bad Syntax: <seqnum> <command> <parameters> expected")]
    Parse { line: String },

    #[error("Unknown command: {command}")]
    UnknownCommand { seq: String, command: String },
}

/// Scan daemon transport errors.
///
/// The scan client never propagates these past its own boundary; they are
/// folded into `ScanVerdict::error` so the caller can fail open.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Cannot connect to Rspamd at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Rspamd request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Rspamd server is not responding")]
    EmptyReply,

    #[error("Malformed HTTP response: {0}")]
    MalformedResponse(String),

    #[error("Invalid verdict: {0}")]
    InvalidVerdict(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised inside a command handler.
///
/// The dispatcher converts every one of these into a plain `OK` reply.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{command} command requires <parameter>")]
    MissingArgument { command: &'static str },

    #[error("Failed to read message {path}: {source}")]
    ReadMessage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Verdict has no {0}")]
    IncompleteVerdict(&'static str),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Queue-side injection errors.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("Failed to read message from stdin: {0}")]
    ReadInput(std::io::Error),

    #[error("Failed to write {path}: {source}")]
    WriteQueue {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to submit {path}: {source}")]
    Submit {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for the helper.
pub type Result<T> = std::result::Result<T, Error>;
