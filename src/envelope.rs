//! Queue file envelope parsing.
//!
//! CommuniGate Pro prepends a metadata block to every queued message:
//!
//! ```text
//! S <user1@test.test> SMTP [10.4.0.159]
//! A testlab1.test [10.21.2.87]
//! O L
//! P I 26-04-2019 15:57:14 0000 ____ ____ <user1@test.test>
//! R W 26-04-2019 15:57:14 0000 ____ _FY_ <user3@test.test>
//!
//! <raw MIME message>
//! ```
//!
//! Pure string parsing; no I/O.

use std::sync::LazyLock;

use regex::Regex;

static SENDER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^P\s[^<]*<([^>]*)>").unwrap());

static RECIPIENT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^R\s[^<]*<([^>]*)>").unwrap());

static CONNECTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^S .*\[([0-9a-f.:]+)\]").unwrap());

/// Sender, recipients and origin IP of a queued message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope sender (`P` line). Empty when absent.
    pub sender: String,
    /// Envelope recipients (`R` lines) in file order. May repeat.
    pub recipients: Vec<String>,
    /// Connecting client IP (`S` line). Empty when absent.
    pub origin_ip: String,
}

impl Envelope {
    /// Extra scan-request headers carrying this envelope.
    ///
    /// `Rcpt` is repeated once per recipient, as Rspamd expects.
    pub fn scan_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(self.recipients.len() + 2);
        headers.push(("From".to_string(), self.sender.clone()));
        for rcpt in &self.recipients {
            headers.push(("Rcpt".to_string(), rcpt.clone()));
        }
        headers.push(("Ip".to_string(), self.origin_ip.clone()));
        headers
    }
}

/// Parse an envelope metadata block.
///
/// Never fails: unrecognised lines, and recognised lines whose address can't
/// be extracted, are skipped and leave the field at its default.
pub fn parse_envelope(metadata: &str) -> Envelope {
    let mut envelope = Envelope::default();

    for line in metadata.lines() {
        let line = line.trim_end_matches('\r');

        if line.starts_with("P ") {
            if let Some(caps) = SENDER_LINE.captures(line) {
                envelope.sender = caps[1].to_string();
            }
        } else if line.starts_with("R ") {
            if let Some(caps) = RECIPIENT_LINE.captures(line) {
                envelope.recipients.push(caps[1].to_string());
            }
        } else if line.starts_with("S ")
            && let Some(caps) = CONNECTION_LINE.captures(line)
        {
            envelope.origin_ip = caps[1].to_string();
        }
    }

    envelope
}

/// Split a queue file into its parsed envelope and the raw message bytes.
///
/// The metadata block ends at the first blank line. A file that opens with
/// a blank line has an empty block. A file without a blank line carries no
/// metadata and is returned whole as the message.
pub fn split_queue_file(contents: &[u8]) -> (Envelope, &[u8]) {
    if let Some(message) = contents
        .strip_prefix(b"\n")
        .or_else(|| contents.strip_prefix(b"\r\n"))
    {
        return (Envelope::default(), message);
    }
    match find_blank_line(contents) {
        Some(pos) => {
            let metadata = String::from_utf8_lossy(&contents[..pos]);
            (parse_envelope(&metadata), &contents[pos + 2..])
        }
        None => (Envelope::default(), contents),
    }
}

fn find_blank_line(contents: &[u8]) -> Option<usize> {
    contents.windows(2).position(|w| w == b"\n\n")
}
