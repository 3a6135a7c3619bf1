//! Scan daemon client.
//!
//! Speaks the Rspamd `/checkv2` HTTP protocol over one of two transports:
//! - `ip:port` endpoints go through reqwest
//! - anything else is a Unix socket path with hand-written HTTP framing

pub mod client;
pub mod endpoint;
pub mod http;
pub mod transport;
pub mod verdict;

pub use client::ScanClient;
pub use endpoint::Endpoint;
pub use http::{HttpResponse, ScanRequest};
pub use transport::{ScanTransport, TcpTransport, Timeouts, UnixTransport};
pub use verdict::{ScanVerdict, Score, Symbol};
