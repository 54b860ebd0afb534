// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use crate::event_formatter::{BodyFormat, EventFormatter, FormattedEvent};
use crate::transaction::event::Payload;

pub const EVENT_NAMES: [&str; 2] = ["sql.sequel", "sql.active_record"];

/// Query name as title, SQL statement as body.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlFormatter;

impl EventFormatter for SqlFormatter {
    fn format(&self, payload: &Payload) -> Option<FormattedEvent> {
        let sql = payload.get("sql")?.as_str()?;
        let title = match payload.get("name") {
            Some(Value::String(name)) => name.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Some(FormattedEvent::new(title, sql, BodyFormat::Sql))
    }
}
