//! Verdict → `ADDHEADER` reply.

use tracing::warn;

use crate::error::HandlerError;
use crate::protocol::{MAX_RESPONSE_BYTES, Response};
use crate::scan::ScanVerdict;

/// Separator between header fields inside an `ADDHEADER` string.
pub const HEADER_SEPARATOR: &str = "\\e";

/// Score above which `X-Junk-Score` starts growing.
const JUNK_EXPONENT_OFFSET: i32 = 4;

/// Binary exponent `e` such that `x = m * 2^e` with `0.5 <= |m| < 1`.
///
/// Zero, infinities and NaN report `0`.
pub fn frexp_exponent(x: f64) -> i32 {
    if x == 0.0 || !x.is_finite() {
        return 0;
    }
    let biased = ((x.abs().to_bits() >> 52) & 0x7ff) as i32;
    if biased == 0 {
        // Subnormal: scale into the normal range first.
        return frexp_exponent(x * 2f64.powi(64)) - 64;
    }
    biased - 1022
}

/// A run of `X`s that grows with the order of magnitude of the score.
pub fn junk_score(score: f64) -> String {
    let len = (frexp_exponent(score) - JUNK_EXPONENT_OFFSET).max(0);
    "X".repeat(len as usize)
}

/// Header fields to inject for a successful verdict.
///
/// Mandatory fields come first, then `X-Spam-Action`, then one
/// `X-Spam-Symbol-<n>` per symbol in verdict order.
pub fn verdict_headers(verdict: &ScanVerdict) -> Result<Vec<String>, HandlerError> {
    let score = verdict
        .score
        .as_ref()
        .ok_or(HandlerError::IncompleteVerdict("score"))?;
    let threshold = verdict
        .required_score
        .as_ref()
        .ok_or(HandlerError::IncompleteVerdict("required_score"))?;

    let mut headers = vec![
        format!("X-Spam-Score: {score}"),
        format!("X-Spam-Threshold: {threshold}"),
        format!("X-Junk-Score: {}", junk_score(score.value())),
    ];

    if let Some(action) = verdict.action.as_deref().filter(|a| !a.is_empty()) {
        headers.push(format!("X-Spam-Action: {action}"));
    }

    for (index, symbol) in verdict.symbols.iter().enumerate() {
        let line = format!(
            "X-Spam-Symbol-{}: {} ({}) {}",
            index + 1,
            symbol.name,
            symbol.score,
            symbol.description.as_deref().unwrap_or_default()
        );
        headers.push(line.trim_end().to_string());
    }

    Ok(headers)
}

/// Escape, join and quote header fields for `ADDHEADER`.
pub fn quote_headers(headers: &[String]) -> String {
    let joined = headers
        .iter()
        .map(|h| escape(h))
        .collect::<Vec<_>>()
        .join(HEADER_SEPARATOR);
    format!("\"{joined}\"")
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\r' | '\n' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Build the `ADDHEADER` reply for a verdict.
///
/// Symbol headers are dropped from the end until the reply fits in one
/// helper protocol line; the mandatory fields always stay.
pub fn add_header_response(seq: &str, verdict: &ScanVerdict) -> Result<Response, HandlerError> {
    let mut headers = verdict_headers(verdict)?;
    let mandatory = headers.len() - verdict.symbols.len();

    let mut response = Response::add_header(seq, quote_headers(&headers));
    let mut dropped = 0usize;
    while response.to_line().len() > MAX_RESPONSE_BYTES && headers.len() > mandatory {
        headers.pop();
        dropped += 1;
        response = Response::add_header(seq, quote_headers(&headers));
    }

    if dropped > 0 {
        warn!(seq, dropped, "Dropped symbol headers to fit reply line limit");
    }
    Ok(response)
}
