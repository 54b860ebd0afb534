// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Post-processing middleware run over every event right before a batch is
//! serialized.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::Config;
use crate::transaction::event::Event;
use crate::transaction::Transaction;

pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    fn call(&self, event: &mut Event);
}

/// Ordered middleware chain.
#[derive(Clone, Default)]
pub struct PostProcessor {
    entries: Vec<Arc<dyn Middleware>>,
}

impl PostProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL literal scrubbing, blank payload removal and, when the application
    /// root is known, view path shortening.
    #[must_use]
    pub fn default_chain(config: &Config) -> Self {
        let mut chain = Self::new();
        match SqlEventSanitizer::new() {
            Ok(sanitizer) => chain.add(Arc::new(sanitizer)),
            Err(e) => error!("Failed to build SQL sanitizer, SQL is sent as-is: {}", e),
        }
        chain.add(Arc::new(DeleteBlanks));
        if let Some(root_path) = config.root_path_prefix() {
            chain.add(Arc::new(ActionViewSanitizer::new(root_path)));
        }
        chain
    }

    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        if self.exists(middleware.name()) {
            debug!("Middleware '{}' already in chain", middleware.name());
            return;
        }
        self.entries.push(middleware);
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|entry| entry.name() != name);
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name() == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn invoke(&self, event: &mut Event) {
        for entry in &self.entries {
            entry.call(event);
        }
    }

    /// Runs the chain over the transaction's root event and every nested event.
    pub fn process(&self, transaction: &mut Transaction) {
        transaction.for_each_event_mut(|event| self.invoke(event));
    }
}

const SQL_EVENT_NAMES: [&str; 2] = ["sql.active_record", "sql.activerecord"];
const REPLACEMENT: &str = "?";

/// Replaces quoted strings and numeric literals in SQL with `?`.
pub struct SqlEventSanitizer {
    single_quoted: Regex,
    double_quoted: Regex,
    numeric: Regex,
}

impl SqlEventSanitizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            single_quoted: Regex::new(r"'(?:[^']|'')*'")?,
            double_quoted: Regex::new(r#""(?:[^"]|"")*""#)?,
            numeric: Regex::new(r"\b\d+\b")?,
        })
    }

    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        let sql = self.single_quoted.replace_all(sql, REPLACEMENT);
        let sql = self.double_quoted.replace_all(&sql, REPLACEMENT);
        self.numeric.replace_all(&sql, REPLACEMENT).into_owned()
    }
}

impl Middleware for SqlEventSanitizer {
    fn name(&self) -> &'static str {
        "sql_event_sanitizer"
    }

    fn call(&self, event: &mut Event) {
        if !SQL_EVENT_NAMES.contains(&event.name.as_str()) {
            return;
        }
        if let Some(Value::String(sql)) = event.payload.get_mut("sql") {
            *sql = self.sanitize(sql);
        }
        if event.body_format == crate::event_formatter::BodyFormat::Sql && !event.body.is_empty() {
            event.body = self.sanitize(&event.body);
        }
    }
}

/// Removes `null`, empty string, empty list and empty map payload values.
pub struct DeleteBlanks;

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

impl Middleware for DeleteBlanks {
    fn name(&self) -> &'static str {
        "delete_blanks"
    }

    fn call(&self, event: &mut Event) {
        event.payload.retain(|_, value| !is_blank(value));
    }
}

/// Strips the application root from `identifier` in view events.
pub struct ActionViewSanitizer {
    root_path: String,
}

impl ActionViewSanitizer {
    #[must_use]
    pub fn new(root_path: String) -> Self {
        Self { root_path }
    }
}

impl Middleware for ActionViewSanitizer {
    fn name(&self) -> &'static str {
        "action_view_sanitizer"
    }

    fn call(&self, event: &mut Event) {
        if !event.name.ends_with("action_view") {
            return;
        }
        if let Some(Value::String(identifier)) = event.payload.get_mut("identifier") {
            *identifier = identifier.replace(&self.root_path, "");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::transaction::tests::{payload, request};

    fn event(name: &str, value: Value) -> Event {
        Event::new(name, 0.0, 1.0, payload(value))
    }

    #[test]
    fn test_sql_sanitizer() {
        let sanitizer = SqlEventSanitizer::new().expect("valid regexes");
        let mut sql_event = event(
            "sql.active_record",
            json!({"sql": r#"SELECT * FROM "users" WHERE name = 'O''Brien' AND id = 42 AND t2 = 1"#}),
        );
        sanitizer.call(&mut sql_event);
        assert_eq!(
            sql_event.payload["sql"],
            "SELECT * FROM ? WHERE name = ? AND id = ? AND t2 = ?"
        );

        let mut other = event("sql.sequel", json!({"sql": "SELECT 1"}));
        sanitizer.call(&mut other);
        assert_eq!(other.payload["sql"], "SELECT 1");
    }

    #[test]
    fn test_delete_blanks() {
        let mut blank_event = event(
            "something",
            json!({
                "string": "not empty",
                "array": ["something"],
                "hash": {"something": "something"},
                "zero": 0,
                "empty_string": "",
                "empty_array": [],
                "empty_hash": {},
                "nil": null
            }),
        );
        DeleteBlanks.call(&mut blank_event);
        assert_eq!(
            Value::Object(blank_event.payload),
            json!({
                "string": "not empty",
                "array": ["something"],
                "hash": {"something": "something"},
                "zero": 0
            })
        );
    }

    #[test]
    fn test_action_view_sanitizer() {
        let sanitizer = ActionViewSanitizer::new("/srv/app/".to_string());
        let mut view = event(
            "render_partial.action_view",
            json!({"identifier": "/srv/app/app/views/_row.html.erb"}),
        );
        sanitizer.call(&mut view);
        assert_eq!(view.payload["identifier"], "app/views/_row.html.erb");

        let mut other = event("render.other", json!({"identifier": "/srv/app/x"}));
        sanitizer.call(&mut other);
        assert_eq!(other.payload["identifier"], "/srv/app/x");
    }

    #[test]
    fn test_default_chain() {
        let chain = PostProcessor::default_chain(&Config::default());
        assert!(chain.exists("sql_event_sanitizer"));
        assert!(chain.exists("delete_blanks"));
        assert!(!chain.exists("action_view_sanitizer"));

        let config = Config {
            root_path: PathBuf::from("/srv/app"),
            ..Config::default()
        };
        let mut chain = PostProcessor::default_chain(&config);
        assert_eq!(chain.len(), 3);
        chain.add(Arc::new(DeleteBlanks));
        assert_eq!(chain.len(), 3);
        chain.remove("delete_blanks");
        assert!(!chain.exists("delete_blanks"));
    }

    #[test]
    fn test_process_runs_over_root_and_events() {
        let mut transaction = request("1", "A#b", 500.0);
        transaction.add_event(event("sql.active_record", json!({"sql": "SELECT 5", "binds": []})));
        let chain = PostProcessor::default_chain(&Config::default());
        chain.process(&mut transaction);

        assert_eq!(transaction.events()[0].payload["sql"], "SELECT ?");
        assert!(transaction.events()[0].payload.get("binds").is_none());
        assert_eq!(
            transaction.process_action_event().map(|e| e.payload.len()),
            Some(2)
        );
    }
}
