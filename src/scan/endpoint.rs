//! Scan daemon endpoint selection.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

static TCP_ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})").unwrap()
});

/// Where the scan daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `ip:port`, spoken to with a regular HTTP client.
    Tcp { host: String, port: u16 },
    /// Filesystem socket path, spoken to with hand-framed HTTP.
    Unix(PathBuf),
}

impl Endpoint {
    /// Classify a configured endpoint string.
    ///
    /// Anything that starts with an IPv4 `address:port` is TCP; everything
    /// else, including a port that doesn't fit in `u16`, is a socket path.
    pub fn parse(raw: &str) -> Self {
        if let Some(caps) = TCP_ENDPOINT.captures(raw)
            && let Ok(port) = caps[2].parse::<u16>()
        {
            return Self::Tcp {
                host: caps[1].to_string(),
                port,
            };
        }
        Self::Unix(PathBuf::from(raw))
    }

    /// Value for the `Host` request header.
    pub fn host_header(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_with_port_is_tcp() {
        assert_eq!(
            Endpoint::parse("127.0.0.1:8020"),
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 8020
            }
        );
    }

    #[test]
    fn socket_path_is_unix() {
        assert_eq!(
            Endpoint::parse("/tmp/drweb.socket"),
            Endpoint::Unix(PathBuf::from("/tmp/drweb.socket"))
        );
    }

    #[test]
    fn hostname_is_not_tcp() {
        assert!(matches!(Endpoint::parse("localhost:11333"), Endpoint::Unix(_)));
    }

    #[test]
    fn out_of_range_port_is_not_tcp() {
        assert!(matches!(Endpoint::parse("10.0.0.1:99999"), Endpoint::Unix(_)));
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(Endpoint::parse("10.1.2.3:11333").host_header(), "10.1.2.3:11333");
    }
}
