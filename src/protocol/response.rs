//! Reply and diagnostic line formatting.

/// A reply to a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Sequence number of the request being answered.
    pub seq: String,
    pub tokens: Vec<String>,
}

impl Response {
    pub fn new(seq: impl Into<String>, tokens: Vec<String>) -> Self {
        Self {
            seq: seq.into(),
            tokens,
        }
    }

    /// `seq OK`: accept the message unchanged.
    pub fn ok(seq: impl Into<String>) -> Self {
        Self::new(seq, vec!["OK".into()])
    }

    /// `seq INTF <version>`.
    pub fn intf(seq: impl Into<String>, version: u32) -> Self {
        Self::new(seq, vec!["INTF".into(), version.to_string()])
    }

    /// `seq ADDHEADER <quoted headers> OK`.
    pub fn add_header(seq: impl Into<String>, quoted_headers: impl Into<String>) -> Self {
        Self::new(
            seq,
            vec!["ADDHEADER".into(), quoted_headers.into(), "OK".into()],
        )
    }

    /// Serialise as a CRLF-terminated line.
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(
            self.seq.len() + self.tokens.iter().map(|t| t.len() + 1).sum::<usize>() + 2,
        );
        line.push_str(self.seq.trim());
        for token in &self.tokens {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            line.push(' ');
            line.push_str(token);
        }
        line.push_str("\r\n");
        line
    }
}

/// Format an informational `* message` line.
///
/// Embedded line breaks are flattened so the message stays one record.
pub fn diagnostic_line(message: &str) -> String {
    let flat: String = message
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    format!("* {}\r\n", flat.trim_end())
}
