//! Request and response bodies of the authority operations.

use serde::{Deserialize, Serialize};

use offca_core::config::TlsOptions;
use offca_core::duration::TimeDuration;
use offca_core::{OffcaError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    #[serde(alias = "csrPEM")]
    pub csr: String,
    pub ott: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<TimeDuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<TimeDuration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    /// Issued leaf, PEM
    #[serde(alias = "serverPEM")]
    pub crt: String,
    /// Issuing intermediate, PEM
    #[serde(alias = "caPEM")]
    pub ca: String,
    #[serde(rename = "tlsOptions", default)]
    pub tls_options: TlsOptions,
}

impl SignResponse {
    /// Leaf followed by the intermediate.
    #[must_use]
    pub fn chain_pem(&self) -> String {
        let mut chain = self.crt.clone();
        if !chain.ends_with('\n') {
            chain.push('\n');
        }
        chain.push_str(&self.ca);
        chain
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    /// Decimal serial number
    pub serial: String,
    /// Revoke token; empty when the peer certificate authorizes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ott: String,
    #[serde(default)]
    pub reason_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default)]
    pub passive: bool,
}

impl RevokeRequest {
    /// Check the reason code and revocation mode.
    pub fn validate(&self) -> Result<u8> {
        if !self.passive {
            return Err(OffcaError::Revocation(
                "only passive revocation is supported".to_string(),
            ));
        }
        reason_code(self.reason_code)
    }
}

/// RFC 5280 CRLReason codes. 7 is unassigned.
pub fn reason_code(code: i32) -> Result<u8> {
    match u8::try_from(code) {
        Ok(code @ (0..=6 | 8..=10)) => Ok(code),
        _ => Err(OffcaError::Revocation(format!(
            "reason code {code} is not valid: expected 0-6 or 8-10"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub status: String,
}

impl RevokeResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_field_names() {
        let request: SignRequest = serde_json::from_str(
            r#"{"csrPEM":"CSR","ott":"token","notAfter":"24h"}"#,
        )
        .unwrap();
        assert_eq!(request.csr, "CSR");
        assert!(request.not_before.is_none());
        assert!(request.not_after.is_some());

        let response: SignResponse =
            serde_json::from_str(r#"{"serverPEM":"LEAF","caPEM":"CA"}"#).unwrap();
        assert_eq!(response.chain_pem(), "LEAF\nCA");
    }

    #[test]
    fn reason_codes_follow_crl_reasons() {
        assert_eq!(reason_code(0).unwrap(), 0);
        assert_eq!(reason_code(10).unwrap(), 10);
        assert!(matches!(reason_code(7), Err(OffcaError::Revocation(_))));
        assert!(reason_code(11).is_err());
        assert!(reason_code(-1).is_err());
    }

    #[test]
    fn active_revocation_is_rejected() {
        let request = RevokeRequest {
            serial: "1".into(),
            ..RevokeRequest::default()
        };
        let err = request.validate().unwrap_err();
        assert!(matches!(err, OffcaError::Revocation(_)));
        assert!(err.to_string().contains("only passive revocation"));
    }
}
