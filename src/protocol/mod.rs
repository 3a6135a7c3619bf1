//! CommuniGate Pro helper protocol.
//!
//! Requests arrive one per line as `<seqnum> <command> [args...]`; replies
//! go out as `<seqnum> <token>...\r\n`. Lines starting with `*` are
//! informational and only show up in the server log.

pub mod request;
pub mod response;
pub mod writer;

pub use request::{Command, Request, parse_request};
pub use response::{Response, diagnostic_line};
pub use writer::ReplyWriter;

/// Helper protocol version reported by `INTF`.
pub const PROTOCOL_VERSION: u32 = 4;

/// Maximum length of a single reply line, including the CRLF.
pub const MAX_RESPONSE_BYTES: usize = 4096;
