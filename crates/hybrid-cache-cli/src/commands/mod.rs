pub mod keys;
pub mod watch;

use std::time::Duration;

use serde_json::Value;

/// Parses a command-line value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn ttl(ttl_ms: Option<u64>) -> Option<Duration> {
    ttl_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
}
