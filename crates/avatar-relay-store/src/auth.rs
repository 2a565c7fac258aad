//! Master-key request signing for the document store REST API.

use crate::error::StoreError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Formats a timestamp the way the `x-ms-date` header expects it.
pub fn http_date(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Builds the URL-encoded `Authorization` value for one request.
///
/// The signed payload is `verb\nresource_type\nresource_link\ndate\n\n` with
/// the verb, resource type and date lowercased.
pub fn master_key_token(
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
    master_key: &str,
) -> Result<String, StoreError> {
    let key = BASE64
        .decode(master_key.trim())
        .map_err(|e| StoreError::Config(format!("store key is not valid base64: {e}")))?;

    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| StoreError::Config(format!("invalid store key: {e}")))?;
    mac.update(payload.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let token = format!("type=master&ver=1.0&sig={signature}");
    Ok(url::form_urlencoded::byte_serialize(token.as_bytes()).collect())
}
