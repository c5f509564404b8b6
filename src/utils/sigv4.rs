//! AWS Signature Version 4 request signing
//!
//! Minimal SigV4 implementation covering the POST-with-JSON-body shape the
//! Bedrock adapter issues. Credentials come from the deployment settings or
//! the standard AWS environment variables.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::utils::error::{GatewayError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Resolved AWS credentials
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

impl AwsCredentials {
    /// Resolve from the standard environment variables
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            GatewayError::authentication(
                "AWS credentials not found. Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
            )
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            GatewayError::authentication(
                "AWS credentials not found. Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
            )
        })?;
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .map_err(|_| {
                GatewayError::authentication("AWS region not configured. Set AWS_REGION")
            })?;

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
            region,
        })
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Sign a POST request and return the headers to attach.
///
/// `host` and `path` describe the request target; the body is hashed as-is.
pub fn sign_request(
    creds: &AwsCredentials,
    service: &str,
    host: &str,
    path: &str,
    body: &[u8],
) -> Vec<(String, String)> {
    let now = Utc::now();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let payload_hash = hex::encode(Sha256::digest(body));

    // Canonical headers must be sorted by name
    let mut canonical_headers: BTreeMap<String, String> = BTreeMap::new();
    canonical_headers.insert("content-type".into(), "application/json".into());
    canonical_headers.insert("host".into(), host.to_string());
    canonical_headers.insert("x-amz-date".into(), amz_date.clone());
    if let Some(token) = &creds.session_token {
        canonical_headers.insert("x-amz-security-token".into(), token.clone());
    }

    let signed_headers = canonical_headers
        .keys()
        .cloned()
        .collect::<Vec<_>>()
        .join(";");
    let canonical_header_str = canonical_headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect::<String>();

    let canonical_request = format!(
        "POST\n{}\n\n{}\n{}\n{}",
        path, canonical_header_str, signed_headers, payload_hash
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, creds.region, service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(
        format!("AWS4{}", creds.secret_access_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, creds.region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("X-Amz-Date".to_string(), amz_date),
        ("Authorization".to_string(), authorization),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }
    headers
}
