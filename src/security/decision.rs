//! Allow/deny decision values shared by the broker engines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome of an auth or ACL check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny(reason.into())
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Allow => None,
            Decision::Deny(reason) => Some(reason),
        }
    }

    /// Webhook `result` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny(_) => "deny",
        }
    }
}

/// MQTT operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Publish,
    Subscribe,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Publish => "publish",
            Access::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Access {
    type Err = String;

    /// Accepts the names and the numeric codes some brokers send
    /// (`1` subscribe, `2` publish).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "publish" | "pub" | "2" => Ok(Access::Publish),
            "subscribe" | "sub" | "1" => Ok(Access::Subscribe),
            other => Err(format!("unknown access type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_parsing() {
        assert_eq!("publish".parse::<Access>(), Ok(Access::Publish));
        assert_eq!("SUBSCRIBE".parse::<Access>(), Ok(Access::Subscribe));
        assert_eq!("2".parse::<Access>(), Ok(Access::Publish));
        assert!("write".parse::<Access>().is_err());
    }

    #[test]
    fn test_decision_strings() {
        assert_eq!(Decision::Allow.as_str(), "allow");
        let deny = Decision::deny("malformed topic");
        assert_eq!(deny.as_str(), "deny");
        assert_eq!(deny.reason(), Some("malformed topic"));
    }
}
