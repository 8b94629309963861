//! Server target descriptors.
//!
//! Target format: `host:port`, one per line in a targets file.
//!
//! The host may be a name or an IPv4 address. Names are resolved by the
//! driver, not here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A server under test, as written in the targets file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or literal address, unresolved.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse a targets file. Blank lines and `#` comments are skipped; every
    /// other line yields either a target or the reason it was rejected.
    pub fn parse_list(text: &str) -> Vec<Result<Target, TargetParseError>> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .split_once(':')
            .ok_or_else(|| TargetParseError::MissingColon(s.to_string()))?;

        if host.is_empty() {
            return Err(TargetParseError::EmptyHost(s.to_string()));
        }
        if port.contains(':') {
            return Err(TargetParseError::TooManyColons(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| TargetParseError::BadPort(s.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl TryFrom<String> for Target {
    type Error = TargetParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

/// Error parsing a target line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetParseError {
    #[error("target must be host:port, got: {0}")]
    MissingColon(String),
    #[error("target must contain exactly one ':', got: {0}")]
    TooManyColons(String),
    #[error("target host cannot be empty: {0}")]
    EmptyHost(String),
    #[error("target port is not a number in 0..=65535: {0}")]
    BadPort(String),
}

impl TargetParseError {
    /// The offending line.
    pub fn line(&self) -> &str {
        match self {
            TargetParseError::MissingColon(s)
            | TargetParseError::TooManyColons(s)
            | TargetParseError::EmptyHost(s)
            | TargetParseError::BadPort(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port() {
        let target: Target = "pl1.cs.example.org:10129".parse().unwrap();
        assert_eq!(target.host(), "pl1.cs.example.org");
        assert_eq!(target.port(), 10129);
        assert_eq!(target.to_string(), "pl1.cs.example.org:10129");
    }

    #[test]
    fn reject_malformed() {
        assert!(matches!(
            "localhost".parse::<Target>(),
            Err(TargetParseError::MissingColon(_))
        ));
        assert!(matches!(
            ":4000".parse::<Target>(),
            Err(TargetParseError::EmptyHost(_))
        ));
        assert!(matches!(
            "a:b:c".parse::<Target>(),
            Err(TargetParseError::TooManyColons(_))
        ));
        assert!(matches!(
            "localhost:70000".parse::<Target>(),
            Err(TargetParseError::BadPort(_))
        ));
    }

    #[test]
    fn parse_list_skips_blanks_and_comments() {
        let parsed = Target::parse_list("# cluster\n127.0.0.1:4000\n\n  127.0.0.1:4001  \nnonsense\n");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], Ok(Target::new("127.0.0.1", 4000)));
        assert_eq!(parsed[1], Ok(Target::new("127.0.0.1", 4001)));
        assert_eq!(parsed[2].as_ref().unwrap_err().line(), "nonsense");
    }
}
