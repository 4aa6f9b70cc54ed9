//! ProtonVPN server filename parsing
//!
//! The bundle ships one file per server and transport:
//!
//! | Filename | Country | Index | Tor |
//! |----------|---------|-------|-----|
//! | `de-01.protonvpn.com.udp1194.ovpn` | `de` | `1` | no |
//! | `nl-01-tor.protonvpn.com.udp1194.ovpn` | `nl` | `1` | yes |
//! | `is.protonvpn.com.tcp443.ovpn` | `is` | - | no |
//! | `ch-us-01.protonvpn.com.udp1194.ovpn` | `ch` | `1` | no |
//! | `us-free-02.protonvpn.com.udp1194.ovpn` | `us` | `2` | no |
//!
//! The country is always the leading token; the id is everything before
//! `.protonvpn.com`.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static SERVER_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<id>[a-z]+(?:-[a-z0-9]+)*)\.protonvpn\.com\.(?P<proto>udp|tcp)(?P<port>\d+)\.ovpn$",
    )
    .expect("server filename pattern is valid")
});

const TOR_TOKEN: &str = "tor";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Not a ProtonVPN server file: {0}")]
    NotServerFile(String),
    #[error("'{0}' is not a country")]
    NotACountry(String),
    #[error("Invalid {field} in {filename}")]
    InvalidNumber { field: &'static str, filename: String },
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl std::str::FromStr for Protocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            _ => Err(ParseError::UnknownProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => f.write_str("udp"),
            Protocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// One `.ovpn` file from the bundle
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerFile {
    /// Server id, e.g. `de-01` or `nl-01-tor`
    pub id: String,
    /// Lowercase country code
    pub country: String,
    pub index: Option<u32>,
    pub tor: bool,
    pub protocol: Protocol,
    pub port: u16,
    /// Filename on disk
    pub filename: String,
}

impl ServerFile {
    pub fn parse(filename: &str) -> Result<Self, ParseError> {
        let caps = SERVER_FILE_RE
            .captures(filename)
            .ok_or_else(|| ParseError::NotServerFile(filename.to_string()))?;

        let id = caps["id"].to_ascii_lowercase();
        let mut tokens: Vec<&str> = id.split('-').collect();
        let country = tokens.remove(0).to_string();
        if country == TOR_TOKEN {
            return Err(ParseError::NotACountry(country));
        }

        let tor = tokens.last() == Some(&TOR_TOKEN);
        if tor {
            tokens.pop();
        }

        let index = tokens
            .last()
            .filter(|token| token.chars().all(|c| c.is_ascii_digit()))
            .map(|token| token.parse::<u32>())
            .transpose()
            .map_err(|_| ParseError::InvalidNumber {
                field: "index",
                filename: filename.to_string(),
            })?;

        let port = caps["port"]
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidNumber {
                field: "port",
                filename: filename.to_string(),
            })?;

        Ok(Self {
            id,
            country,
            index,
            tor,
            protocol: caps["proto"].parse()?,
            port,
            filename: filename.to_string(),
        })
    }
}

impl fmt::Display for ServerFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
