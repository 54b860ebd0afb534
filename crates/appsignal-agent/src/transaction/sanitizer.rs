// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scrubbing of request data before it is queued for transmission.

use serde_json::Value;
use tracing::debug;

use crate::transaction::event::Payload;

pub const FILTERED: &str = "[FILTERED]";
pub const MAX_TAG_LENGTH: usize = 100;

/// Request environment keys that may leave the process.
pub const ENV_METHODS: [&str; 30] = [
    "CONTENT_LENGTH",
    "AUTH_TYPE",
    "GATEWAY_INTERFACE",
    "PATH_TRANSLATED",
    "REMOTE_HOST",
    "REMOTE_IDENT",
    "REMOTE_USER",
    "REMOTE_ADDR",
    "REQUEST_METHOD",
    "SERVER_NAME",
    "SERVER_PORT",
    "SERVER_PROTOCOL",
    "HTTP_X_REQUEST_START",
    "HTTP_X_MIDDLEWARE_START",
    "HTTP_X_QUEUE_START",
    "HTTP_X_QUEUE_TIME",
    "HTTP_X_HEROKU_QUEUE_WAIT_TIME",
    "HTTP_X_APPLICATION_START",
    "HTTP_ACCEPT",
    "HTTP_ACCEPT_CHARSET",
    "HTTP_ACCEPT_ENCODING",
    "HTTP_ACCEPT_LANGUAGE",
    "HTTP_CACHE_CONTROL",
    "HTTP_CONNECTION",
    "HTTP_USER_AGENT",
    "HTTP_FROM",
    "HTTP_NEGOTIATE",
    "HTTP_PRAGMA",
    "HTTP_REFERER",
    "HTTP_X_FORWARDED_FOR",
];

/// Params sanitizer. Values stored under any of the filter keys are replaced
/// with [`FILTERED`], at every depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamsSanitizer {
    filter_keys: Vec<String>,
}

impl ParamsSanitizer {
    #[must_use]
    pub fn new(filter_keys: Vec<String>) -> Self {
        Self { filter_keys }
    }

    fn is_filtered(&self, key: &str) -> bool {
        self.filter_keys.iter().any(|filter| filter == key)
    }

    /// Sanitized copy of `value`; the original is untouched.
    #[must_use]
    pub fn sanitize(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        let value = if self.is_filtered(key) {
                            Value::String(FILTERED.to_string())
                        } else {
                            self.sanitize(value)
                        };
                        (key.clone(), value)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.sanitize(item)).collect()),
            other => other.clone(),
        }
    }

    /// Sanitizes `value` where it lives.
    pub fn sanitize_in_place(&self, value: &mut Value) {
        match value {
            Value::Object(map) => self.sanitize_payload_in_place(map),
            Value::Array(items) => items.iter_mut().for_each(|item| self.sanitize_in_place(item)),
            _ => {}
        }
    }

    pub fn sanitize_payload_in_place(&self, payload: &mut Payload) {
        for (key, value) in payload.iter_mut() {
            if self.is_filtered(key) {
                *value = Value::String(FILTERED.to_string());
            } else {
                self.sanitize_in_place(value);
            }
        }
    }
}

/// Keeps only the whitelisted environment keys.
#[must_use]
pub fn sanitize_environment(env: &Payload) -> Payload {
    ENV_METHODS
        .iter()
        .filter_map(|key| env.get(*key).map(|value| ((*key).to_string(), value.clone())))
        .collect()
}

fn is_valid_tag(key: &str, value: &Value) -> bool {
    if key.chars().count() > MAX_TAG_LENGTH {
        return false;
    }
    match value {
        Value::String(s) => s.chars().count() <= MAX_TAG_LENGTH,
        Value::Number(n) => n.is_i64() || n.is_u64(),
        _ => false,
    }
}

/// Keeps tags whose key is at most 100 characters and whose value is either
/// a string of at most 100 characters or an integer.
#[must_use]
pub fn sanitize_tags(tags: &Payload) -> Payload {
    tags.iter()
        .filter(|(key, value)| {
            let valid = is_valid_tag(key, value);
            if !valid {
                debug!("Dropping invalid tag '{}'", key);
            }
            valid
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => Payload::new(),
        }
    }

    #[test]
    fn test_sanitize_copy_filters_nested_keys() {
        let sanitizer = ParamsSanitizer::new(vec!["password".to_string()]);
        let params = json!({
            "user": {"name": "jane", "password": "hunter2"},
            "items": [{"password": "x"}, 3],
            "page": 1
        });
        let sanitized = sanitizer.sanitize(&params);
        assert_eq!(
            sanitized,
            json!({
                "user": {"name": "jane", "password": "[FILTERED]"},
                "items": [{"password": "[FILTERED]"}, 3],
                "page": 1
            })
        );
        assert_eq!(params["user"]["password"], "hunter2");
    }

    #[test]
    fn test_sanitize_in_place() {
        let sanitizer = ParamsSanitizer::new(vec!["token".to_string()]);
        let mut params = json!({"token": {"nested": true}, "query": "shoes"});
        sanitizer.sanitize_in_place(&mut params);
        assert_eq!(params, json!({"token": "[FILTERED]", "query": "shoes"}));
    }

    #[test]
    fn test_environment_whitelist() {
        let env = payload(json!({
            "REQUEST_METHOD": "GET",
            "HTTP_USER_AGENT": "curl",
            "HTTP_COOKIE": "session=secret",
            "rack.session": {"user_id": 1}
        }));
        let sanitized = sanitize_environment(&env);
        assert_eq!(
            Value::Object(sanitized),
            json!({"REQUEST_METHOD": "GET", "HTTP_USER_AGENT": "curl"})
        );
    }

    #[test]
    fn test_tag_validation() {
        let long = "x".repeat(101);
        let mut tags = payload(json!({
            "user": "jane",
            "account_id": 42,
            "ratio": 0.5,
            "list": ["a"],
            "long_value": long.clone()
        }));
        tags.insert(long, json!("value"));
        let sanitized = sanitize_tags(&tags);
        assert_eq!(
            Value::Object(sanitized),
            json!({"user": "jane", "account_id": 42})
        );
    }
}
