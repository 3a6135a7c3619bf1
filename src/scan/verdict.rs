//! Rspamd `/checkv2` verdict.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

/// A score as Rspamd sent it.
///
/// Keeps the JSON number so `15` renders as `15` and `3.0` as `3.0` in the
/// generated headers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Score(serde_json::Number);

impl Score {
    /// Numeric value; non-representable numbers read as zero.
    pub fn value(&self) -> f64 {
        self.0.as_f64().unwrap_or(0.0)
    }
}

impl From<f64> for Score {
    fn from(value: f64) -> Self {
        Self(serde_json::Number::from_f64(value).unwrap_or_else(|| 0.into()))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One matched rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub score: Score,
    pub description: Option<String>,
}

/// Scan result returned by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScanVerdict {
    #[serde(default)]
    pub score: Option<Score>,
    #[serde(default)]
    pub required_score: Option<Score>,
    #[serde(default)]
    pub action: Option<String>,
    /// Matched symbols in the order the daemon listed them.
    #[serde(default, deserialize_with = "ordered_symbols")]
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScanVerdict {
    /// A verdict carrying only an error, used when the daemon can't be asked.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// The error message, if the scan did not produce a usable result.
    pub fn failure(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    /// Parse a JSON response body.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[derive(Deserialize)]
struct SymbolBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    score: Option<Score>,
    #[serde(default)]
    description: Option<String>,
}

fn ordered_symbols<'de, D>(deserializer: D) -> Result<Vec<Symbol>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SymbolsVisitor;

    impl<'de> Visitor<'de> for SymbolsVisitor {
        type Value = Vec<Symbol>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of symbol name to symbol object")
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut symbols = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, body)) = map.next_entry::<String, SymbolBody>()? {
                symbols.push(Symbol {
                    name: body.name.unwrap_or(key),
                    score: body.score.unwrap_or_else(|| Score::from(0.0)),
                    description: body.description,
                });
            }
            Ok(symbols)
        }
    }

    deserializer.deserialize_any(SymbolsVisitor)
}
