// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use crate::event_formatter::{BodyFormat, EventFormatter, FormattedEvent};
use crate::transaction::event::Payload;

pub const EVENT_NAMES: [&str; 8] = [
    "cache_delete.active_support",
    "cache_delete_multi.active_support",
    "cache_exist?.active_support",
    "cache_fetch.active_support",
    "cache_read.active_support",
    "cache_read_multi.active_support",
    "cache_write.active_support",
    "cache_write_multi.active_support",
];

/// Sorted cache keys as title. Multi-key operations pass either a list of
/// keys or a key → value map.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheFormatter;

fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl EventFormatter for CacheFormatter {
    fn format(&self, payload: &Payload) -> Option<FormattedEvent> {
        let mut keys: Vec<String> = match payload.get("key") {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            Some(Value::Array(keys)) => keys.iter().map(key_to_string).collect(),
            Some(key) => vec![key_to_string(key)],
            None => vec![String::new()],
        };
        keys.sort();
        Some(FormattedEvent::new(keys.join(", "), "", BodyFormat::Default))
    }
}
