//! HMAC-SHA256 signing of webhook payloads.
//!
//! The signature covers the canonical JSON form of the payload: object keys
//! sorted at every depth, no insignificant whitespace and the top-level
//! `signature` field removed. Signatures are rendered as `sha256=<hex>`.

use crate::error::WebhookError;
use crate::models::WebhookPayload;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";
const SIGNATURE_LEN: usize = 32;

/// Sign a payload with the endpoint's plaintext secret.
pub fn sign(payload: &WebhookPayload, secret: &str) -> Result<String, WebhookError> {
    let value = serde_json::to_value(payload)?;
    sign_value(&value, secret)
}

/// Sign an arbitrary JSON value, ignoring any top-level `signature` field.
pub fn sign_value(value: &Value, secret: &str) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidConfiguration(format!("invalid HMAC key: {}", e)))?;
    mac.update(canonical_json(value).as_bytes());
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check a `sha256=<hex>` signature in constant time.
pub fn verify(payload: &WebhookPayload, signature: &str, secret: &str) -> bool {
    match serde_json::to_value(payload) {
        Ok(value) => verify_value(&value, signature, secret),
        Err(_) => false,
    }
}

pub fn verify_value(value: &Value, signature: &str, secret: &str) -> bool {
    let Some(hex_part) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(provided) = hex::decode(hex_part) else {
        return false;
    };
    if provided.len() != SIGNATURE_LEN {
        return false;
    }
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical_json(value).as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Deterministic serialization used as the HMAC message.
pub fn canonical_json(value: &Value) -> String {
    let stripped = match value {
        Value::Object(map) => {
            let mut map = map.clone();
            map.remove("signature");
            Value::Object(map)
        }
        other => other.clone(),
    };
    sort_keys(&stripped).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
