//! Image handling for multimodal messages
//!
//! Vision content arrives as either `data:` URIs or remote HTTP(S) URLs.
//! Data URIs are decoded locally; remote URLs are downloaded with a bounded
//! timeout and size cap, then re-emitted in whatever encoding the target
//! provider expects.

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use url::Url;

use crate::utils::error::{GatewayError, Result};

/// Maximum bytes accepted for a downloaded image
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Download timeout for remote images
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

static DATA_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:([^;]+);base64,(.+)$").expect("valid data-url regex"));

/// Check whether a URL is a `data:` URI
pub fn is_data_url(url: &str) -> bool {
    url.starts_with("data:")
}

/// Split a `data:` URI into (mime_type, base64_data)
pub fn parse_data_url(url: &str) -> Result<(String, String)> {
    let captures = DATA_URL_RE
        .captures(url)
        .ok_or_else(|| GatewayError::bad_request("Invalid data URL format"))?;
    Ok((captures[1].to_string(), captures[2].to_string()))
}

/// Download an image over HTTPS, enforcing the size cap.
///
/// Returns (bytes, mime type from Content-Type, defaulting to image/jpeg).
pub async fn download_image(url: &str) -> Result<(Vec<u8>, String)> {
    let parsed = Url::parse(url)
        .map_err(|e| GatewayError::bad_request(format!("Invalid image URL '{}': {}", url, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(GatewayError::bad_request(format!(
            "Unsupported image URL scheme: {}",
            parsed.scheme()
        )));
    }

    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()?;

    let response = client.get(parsed).send().await?;
    if !response.status().is_success() {
        return Err(GatewayError::bad_request(format!(
            "Image download failed with status {}",
            response.status()
        )));
    }

    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_string();

    let bytes = response.bytes().await?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(GatewayError::bad_request(format!(
            "Image exceeds the {} byte download cap",
            MAX_IMAGE_BYTES
        )));
    }

    Ok((bytes.to_vec(), mime_type))
}

/// Resolve an image URL to (base64_data, mime_type).
///
/// Handles both data URIs (decoded locally) and remote URLs (downloaded).
pub async fn image_as_base64(url: &str) -> Result<(String, String)> {
    if is_data_url(url) {
        let (mime_type, data) = parse_data_url(url)?;
        return Ok((data, mime_type));
    }

    let (bytes, mime_type) = download_image(url).await?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok((encoded, mime_type))
}
