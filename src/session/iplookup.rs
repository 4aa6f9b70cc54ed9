//! Public IP lookup after the tunnel comes up

use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const LOOKUP_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Lookup service returned HTTP {0}")]
    BadStatus(reqwest::StatusCode),
    #[error("Unrecognized lookup response")]
    InvalidResponse,
}

/// What the lookup service reports about our public address
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IpInfo {
    pub ip: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
}

impl fmt::Display for IpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ip)?;
        let details: Vec<&str> = [&self.city, &self.country, &self.org]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .collect();
        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }
        Ok(())
    }
}

/// Accept either an ipinfo-style JSON object or a bare address
pub fn parse_response(body: &str) -> Result<IpInfo, LookupError> {
    let body = body.trim();
    if let Ok(info) = serde_json::from_str::<IpInfo>(body) {
        return Ok(info);
    }
    match body.parse::<std::net::IpAddr>() {
        Ok(ip) => Ok(IpInfo {
            ip: ip.to_string(),
            city: None,
            country: None,
            org: None,
        }),
        Err(_) => Err(LookupError::InvalidResponse),
    }
}

pub async fn lookup(url: &str) -> Result<IpInfo, LookupError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
        .build()?;

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(LookupError::BadStatus(response.status()));
    }

    let body = response.text().await?;
    parse_response(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipinfo_json() {
        let body = r#"{
            "ip": "185.107.56.10",
            "city": "Amsterdam",
            "region": "North Holland",
            "country": "NL",
            "org": "AS43350 NForce Entertainment B.V."
        }"#;

        let info = parse_response(body).unwrap();

        assert_eq!(info.ip, "185.107.56.10");
        assert_eq!(info.country.as_deref(), Some("NL"));
        assert_eq!(
            info.to_string(),
            "185.107.56.10 (Amsterdam, NL, AS43350 NForce Entertainment B.V.)"
        );
    }

    #[test]
    fn test_parse_plain_address() {
        let info = parse_response("203.0.113.7\n").unwrap();
        assert_eq!(info.ip, "203.0.113.7");
        assert_eq!(info.to_string(), "203.0.113.7");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_response("<html>rate limited</html>").unwrap_err(),
            LookupError::InvalidResponse
        ));
    }
}
