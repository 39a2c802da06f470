//! KV host function implementation.
//!
//! Values cross the guest boundary as bytes. Bytes that parse as JSON are
//! stored as that JSON value; anything else is stored as a JSON string.
//! Reading a string value returns its raw text, other values return their
//! JSON encoding.

use mini_edge_state::{KvNamespace, StateError};
use serde_json::Value;
use tracing::warn;

/// Return code: success.
pub const KV_OK: i32 = 0;
/// Return code: the write would exceed the plan's KV limits.
pub const KV_QUOTA_EXCEEDED: i32 = -1;
/// Return code: no namespace bound, or storage failed.
pub const KV_FAILURE: i32 = -2;

/// Host implementation for the `env::kv_*` imports.
pub struct KvHost;

impl KvHost {
    /// Decode guest bytes into a stored value.
    pub fn decode_value(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Encode a stored value for the guest.
    pub fn encode_value(value: &Value) -> Vec<u8> {
        match value {
            Value::String(s) => s.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        }
    }

    /// Look up a key. `None` when absent or when no namespace is bound.
    pub async fn get(kv: Option<&KvNamespace>, key: &str) -> Option<Vec<u8>> {
        let kv = kv?;
        match kv.get(key).await {
            Ok(value) => value.as_ref().map(Self::encode_value),
            Err(e) => {
                warn!(key, error = %e, "kv_get failed");
                None
            }
        }
    }

    /// Store a value, returning an ABI code.
    pub async fn put(kv: Option<&KvNamespace>, key: &str, value: &[u8]) -> i32 {
        let Some(kv) = kv else {
            return KV_FAILURE;
        };
        match kv.put(key, Self::decode_value(value)).await {
            Ok(()) => KV_OK,
            Err(StateError::QuotaExceeded { message, .. }) => {
                warn!(key, %message, "kv_put rejected");
                KV_QUOTA_EXCEEDED
            }
            Err(e) => {
                warn!(key, error = %e, "kv_put failed");
                KV_FAILURE
            }
        }
    }

    /// Delete a key, returning `1` if removed, `0` if absent.
    pub async fn delete(kv: Option<&KvNamespace>, key: &str) -> i32 {
        let Some(kv) = kv else {
            return KV_FAILURE;
        };
        match kv.delete(key).await {
            Ok(removed) => i32::from(removed),
            Err(e) => {
                warn!(key, error = %e, "kv_delete failed");
                KV_FAILURE
            }
        }
    }
}
