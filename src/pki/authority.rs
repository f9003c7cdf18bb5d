//! Client side of the external PKI issuing authority.
//!
//! Only the issue contract is modeled: request `{common_name, role_name}`,
//! response PEM material plus serial number. Material stays in memory.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PkiError;

use super::certificate::ServerCertificate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub common_name: String,
    pub role_name: String,
}

/// External PKI authority able to issue client certificates.
#[async_trait]
pub trait PkiAuthority: Send + Sync {
    async fn issue(&self, request: &CertificateRequest) -> Result<ServerCertificate, PkiError>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct IssueBody<'a> {
    common_name: &'a str,
    ttl: &'a str,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    data: IssueData,
}

#[derive(Debug, Deserialize)]
struct IssueData {
    certificate: String,
    private_key: String,
    issuing_ca: String,
    serial_number: String,
    /// Unix seconds.
    #[serde(default)]
    expiration: Option<i64>,
}

/// Vault-style PKI secrets engine over HTTPS.
///
/// `POST {address}/v1/{mount}/issue/{role}` with the token in
/// `X-Vault-Token`.
pub struct VaultPkiClient {
    address: String,
    token: String,
    mount: String,
    ttl: String,
    http_client: reqwest::Client,
}

impl VaultPkiClient {
    pub fn new(
        address: &str,
        token: &str,
        mount: &str,
        ttl: &str,
        request_timeout: Duration,
    ) -> Result<Self, PkiError> {
        if address.trim().is_empty() {
            return Err(PkiError::Transport("PKI address is empty".to_string()));
        }
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()
            .map_err(|e| PkiError::Transport(e.to_string()))?;

        Ok(Self {
            address: address.trim_end_matches('/').to_string(),
            token: token.to_string(),
            mount: mount.trim_matches('/').to_string(),
            ttl: ttl.to_string(),
            http_client,
        })
    }

    fn issue_url(&self, role_name: &str) -> String {
        format!("{}/v1/{}/issue/{}", self.address, self.mount, role_name)
    }

    /// Parse ttl strings like `720h`, `30m`, `3600s` or bare seconds.
    fn ttl_duration(&self) -> Option<chrono::Duration> {
        parse_ttl(&self.ttl)
    }
}

pub fn parse_ttl(ttl: &str) -> Option<chrono::Duration> {
    let ttl = ttl.trim();
    let (digits, unit) = match ttl.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => ttl.split_at(idx),
        None => (ttl, "s"),
    };
    let amount: i64 = digits.parse().ok()?;
    match unit {
        "s" => Some(chrono::Duration::seconds(amount)),
        "m" => Some(chrono::Duration::minutes(amount)),
        "h" => Some(chrono::Duration::hours(amount)),
        "d" => Some(chrono::Duration::days(amount)),
        _ => None,
    }
}

fn expiration_from(
    unix_secs: Option<i64>,
    fallback: Option<chrono::Duration>,
    issued_at: DateTime<Utc>,
) -> Result<DateTime<Utc>, PkiError> {
    match (unix_secs, fallback) {
        (Some(secs), _) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| PkiError::Malformed(format!("expiration out of range: {}", secs))),
        (None, Some(ttl)) => Ok(issued_at + ttl),
        (None, None) => Err(PkiError::Malformed(
            "response has no expiration and ttl is unparseable".to_string(),
        )),
    }
}

#[async_trait]
impl PkiAuthority for VaultPkiClient {
    async fn issue(&self, request: &CertificateRequest) -> Result<ServerCertificate, PkiError> {
        let issued_at = Utc::now();
        let response = self
            .http_client
            .post(self.issue_url(&request.role_name))
            .header("X-Vault-Token", &self.token)
            .json(&IssueBody {
                common_name: &request.common_name,
                ttl: &self.ttl,
            })
            .send()
            .await
            .map_err(|e| PkiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read PKI response body".to_string());
            return Err(PkiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: IssueResponse = response
            .json()
            .await
            .map_err(|e| PkiError::Malformed(e.to_string()))?;

        let data = payload.data;
        if data.certificate.is_empty() || data.private_key.is_empty() {
            return Err(PkiError::Malformed("empty certificate material".to_string()));
        }

        Ok(ServerCertificate {
            certificate: data.certificate,
            private_key: data.private_key,
            issuing_ca: data.issuing_ca,
            serial_number: data.serial_number,
            common_name: request.common_name.clone(),
            issued_at,
            expiration: expiration_from(data.expiration, self.ttl_duration(), issued_at)?,
        })
    }

    fn name(&self) -> &'static str {
        "vault"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ttl() {
        assert_eq!(parse_ttl("720h"), Some(chrono::Duration::hours(720)));
        assert_eq!(parse_ttl("30m"), Some(chrono::Duration::minutes(30)));
        assert_eq!(parse_ttl("3600"), Some(chrono::Duration::seconds(3600)));
        assert_eq!(parse_ttl("7d"), Some(chrono::Duration::days(7)));
        assert_eq!(parse_ttl("soon"), None);
        assert_eq!(parse_ttl("12y"), None);
    }

    #[test]
    fn test_issue_url_normalises_slashes() {
        let client = VaultPkiClient::new(
            "https://vault.local:8200/",
            "token",
            "/pki/",
            "720h",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.issue_url("ares-server"),
            "https://vault.local:8200/v1/pki/issue/ares-server"
        );
    }

    #[test]
    fn test_expiration_prefers_response() {
        let issued = Utc::now();
        let from_response = expiration_from(Some(1_900_000_000), Some(chrono::Duration::hours(1)), issued).unwrap();
        assert_eq!(from_response.timestamp(), 1_900_000_000);

        let from_ttl = expiration_from(None, Some(chrono::Duration::hours(1)), issued).unwrap();
        assert_eq!(from_ttl, issued + chrono::Duration::hours(1));

        assert!(expiration_from(None, None, issued).is_err());
    }

    #[test]
    fn test_issue_response_shape() {
        let raw = r#"{"data":{"certificate":"C","private_key":"K","issuing_ca":"CA","serial_number":"01:02","expiration":1900000000}}"#;
        let parsed: IssueResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.serial_number, "01:02");
        assert_eq!(parsed.data.expiration, Some(1_900_000_000));
    }

    #[test]
    fn test_empty_address_rejected() {
        assert!(VaultPkiClient::new(" ", "t", "pki", "1h", Duration::from_secs(1)).is_err());
    }
}
