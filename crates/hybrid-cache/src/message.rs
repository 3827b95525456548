//! Invalidation messages and their JSON wire format.
//!
//! ```text
//! { "action": "invalidate", "key": "<string>" }
//! { "action": "invalidateAndUpdate", "key": "<string>", "value": <any>, "timeout": <ms> }
//! ```
//!
//! Any payload that is not a JSON object carrying an `action` field is a
//! legacy bare key and decodes to [`InvalidationMessage::Evict`] of exactly
//! that payload text.
//!
//! `timeout` may be any JSON number of milliseconds, fractional included.
//! An `invalidateAndUpdate` whose `value` or `timeout` can't be read but
//! whose `key` can decodes to an evict of that key: the peer drops its copy
//! instead of keeping a stale one.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::error::CacheError;

/// The only event name accepted by [`crate::HybridCache::on`].
pub const INVALIDATE_EVENT: &str = "invalidate";

const INVALIDATE_AND_UPDATE: &str = "invalidateAndUpdate";

/// What a peer should do with its local copy of `key`.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidationMessage<V> {
    /// Remove the key.
    Evict { key: String },
    /// Overwrite the key with `value`, expiring after `timeout` if set.
    EvictAndReplace {
        key: String,
        value: V,
        timeout: Option<Duration>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "action")]
enum WireMessage<V> {
    #[serde(rename = "invalidate")]
    Invalidate { key: String },
    #[serde(rename = "invalidateAndUpdate")]
    InvalidateAndUpdate {
        key: String,
        value: V,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<Number>,
    },
}

impl<V> InvalidationMessage<V> {
    pub fn evict(key: impl Into<String>) -> Self {
        Self::Evict { key: key.into() }
    }

    pub fn replace(key: impl Into<String>, value: V, timeout: Option<Duration>) -> Self {
        Self::EvictAndReplace {
            key: key.into(),
            value,
            timeout,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Evict { key } | Self::EvictAndReplace { key, .. } => key,
        }
    }

    /// Wire name of the action.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Evict { .. } => "invalidate",
            Self::EvictAndReplace { .. } => INVALIDATE_AND_UPDATE,
        }
    }
}

impl<V: Serialize> InvalidationMessage<V> {
    /// Encodes the structured JSON payload.
    pub fn encode(&self) -> Result<String, CacheError> {
        let wire = match self {
            Self::Evict { key } => WireMessage::Invalidate { key: key.clone() },
            Self::EvictAndReplace {
                key,
                value,
                timeout,
            } => WireMessage::InvalidateAndUpdate {
                key: key.clone(),
                value,
                timeout: timeout
                    .filter(|t| !t.is_zero())
                    .map(|t| Number::from(u64::try_from(t.as_millis()).unwrap_or(u64::MAX))),
            },
        };
        Ok(serde_json::to_string(&wire)?)
    }
}

impl<V: DeserializeOwned> InvalidationMessage<V> {
    /// Decodes a payload, accepting both the structured and the bare-key form.
    pub fn decode(payload: &str) -> Result<Self, CacheError> {
        let object = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(object)) if object.contains_key("action") => object,
            _ => return Ok(Self::evict(payload)),
        };
        let fallback = update_key(&object);

        let wire = match serde_json::from_value(Value::Object(object)) {
            Ok(wire) => wire,
            Err(e) => match fallback {
                Some(key) => {
                    warn!(key = %key, error = %e, "Unreadable replacement, evicting instead");
                    return Ok(Self::Evict { key });
                }
                None => return Err(e.into()),
            },
        };

        let message = match wire {
            WireMessage::Invalidate { key } => Self::Evict { key },
            WireMessage::InvalidateAndUpdate {
                key,
                value,
                timeout,
            } => Self::EvictAndReplace {
                key,
                value,
                timeout: timeout.as_ref().and_then(millis),
            },
        };
        Ok(message)
    }
}

/// Key of an `invalidateAndUpdate` object, if it has a string one.
fn update_key(object: &Map<String, Value>) -> Option<String> {
    if object.get("action").and_then(Value::as_str) != Some(INVALIDATE_AND_UPDATE) {
        return None;
    }
    object.get("key").and_then(Value::as_str).map(str::to_owned)
}

/// Milliseconds to a timeout. Zero, negative, non-finite or out-of-range
/// values mean no expiry.
fn millis(ms: &Number) -> Option<Duration> {
    let ms = ms.as_f64().filter(|ms| ms.is_finite() && *ms > 0.0)?;
    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    type Message = InvalidationMessage<Value>;

    #[test]
    fn test_decode_bare_key() {
        let message = Message::decode("user:42").unwrap();
        assert_eq!(message, Message::evict("user:42"));
    }

    #[test]
    fn test_decode_bare_key_that_is_valid_json() {
        assert_eq!(Message::decode("42").unwrap(), Message::evict("42"));
        assert_eq!(
            Message::decode(r#"{"key":"k"}"#).unwrap(),
            Message::evict(r#"{"key":"k"}"#)
        );
    }

    #[test]
    fn test_decode_invalidate() {
        let message = Message::decode(r#"{"action":"invalidate","key":"k"}"#).unwrap();
        assert_eq!(message, Message::evict("k"));
        assert_eq!(message.action(), "invalidate");
    }

    #[test]
    fn test_decode_invalidate_and_update() {
        let payload = r#"{"action":"invalidateAndUpdate","key":"k","value":{"rich":"object"},"timeout":1500}"#;
        let message = Message::decode(payload).unwrap();
        assert_eq!(
            message,
            Message::replace(
                "k",
                json!({"rich": "object"}),
                Some(Duration::from_millis(1500))
            )
        );
    }

    #[test]
    fn test_decode_update_without_timeout() {
        let payload = r#"{"action":"invalidateAndUpdate","key":"k","value":[1,2]}"#;
        let message = Message::decode(payload).unwrap();
        assert_eq!(message, Message::replace("k", json!([1, 2]), None));

        let payload = r#"{"action":"invalidateAndUpdate","key":"k","value":null,"timeout":0}"#;
        let message = Message::decode(payload).unwrap();
        assert_eq!(message, Message::replace("k", Value::Null, None));
    }

    #[test]
    fn test_decode_unknown_action_fails() {
        let result = Message::decode(r#"{"action":"flush","key":"k"}"#);
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn test_decode_fractional_timeout() {
        let payload = r#"{"action":"invalidateAndUpdate","key":"k","value":"new","timeout":1500.5}"#;
        let Message::EvictAndReplace { key, value, timeout } = Message::decode(payload).unwrap()
        else {
            panic!("expected a replacement");
        };
        assert_eq!((key.as_str(), value), ("k", json!("new")));
        let drift = timeout.unwrap().abs_diff(Duration::from_micros(1_500_500));
        assert!(drift < Duration::from_micros(1));
    }

    #[test]
    fn test_decode_non_positive_timeout_never_expires() {
        for timeout in ["-5", "0.0", "-0.5", "1e300"] {
            let payload = format!(
                r#"{{"action":"invalidateAndUpdate","key":"k","value":1,"timeout":{timeout}}}"#
            );
            let message = Message::decode(&payload).unwrap();
            assert_eq!(message, Message::replace("k", json!(1), None), "{timeout}");
        }
    }

    #[test]
    fn test_decode_unreadable_value_evicts_key() {
        let message = InvalidationMessage::<u32>::decode(
            r#"{"action":"invalidateAndUpdate","key":"k","value":"nope"}"#,
        )
        .unwrap();
        assert_eq!(message, InvalidationMessage::evict("k"));
    }

    #[test]
    fn test_decode_unreadable_timeout_evicts_key() {
        let message =
            Message::decode(r#"{"action":"invalidateAndUpdate","key":"k","value":1,"timeout":"soon"}"#)
                .unwrap();
        assert_eq!(message, Message::evict("k"));
    }

    #[test]
    fn test_decode_update_without_key_fails() {
        let result = Message::decode(r#"{"action":"invalidateAndUpdate","value":1}"#);
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn test_encode_invalidate() {
        let encoded = Message::evict("k").encode().unwrap();
        let wire: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(wire, json!({"action": "invalidate", "key": "k"}));
    }

    #[test]
    fn test_encode_update_omits_missing_timeout() {
        let encoded = Message::replace("k", json!(1), None).encode().unwrap();
        let wire: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            wire,
            json!({"action": "invalidateAndUpdate", "key": "k", "value": 1})
        );

        let encoded = Message::replace("k", json!(1), Some(Duration::from_secs(2)))
            .encode()
            .unwrap();
        let wire: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(wire["timeout"], json!(2000));
    }

    #[test]
    fn test_key_accessor() {
        assert_eq!(Message::evict("a").key(), "a");
        assert_eq!(Message::replace("b", Value::Null, None).key(), "b");
    }
}
