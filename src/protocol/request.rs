//! Request line parsing.

use std::fmt;

use crate::error::ProtocolError;

/// Commands this helper understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Protocol version negotiation.
    Intf,
    /// Stop the helper.
    Quit,
    /// Scan a queued message file.
    File,
    /// Anything else; kept verbatim for diagnostics.
    Unknown(String),
}

impl Command {
    /// Map a protocol command word to its variant.
    pub fn from_word(word: &str) -> Self {
        match word {
            "INTF" => Self::Intf,
            "QUIT" => Self::Quit,
            "FILE" => Self::File,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The command word as sent on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Intf => "INTF",
            Self::Quit => "QUIT",
            Self::File => "FILE",
            Self::Unknown(word) => word,
        }
    }
}

/// A parsed helper request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Opaque correlation token, echoed back verbatim.
    pub seq: String,
    pub command: Command,
    pub args: Vec<String>,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.command.as_str())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Parse one request line.
///
/// The line is split on whitespace: sequence number, command word, then
/// arguments. Fewer than two tokens is a syntax error.
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let mut tokens = line.split_whitespace();

    let (Some(seq), Some(command)) = (tokens.next(), tokens.next()) else {
        return Err(ProtocolError::Parse {
            line: line.trim().to_string(),
        });
    };

    Ok(Request {
        seq: seq.to_string(),
        command: Command::from_word(command),
        args: tokens.map(str::to_string).collect(),
    })
}
