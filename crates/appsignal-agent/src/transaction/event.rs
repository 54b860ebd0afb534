// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::event_formatter::{BodyFormat, FormattedEvent};

/// Arbitrary key/value data attached to an event or a transaction.
pub type Payload = Map<String, Value>;

/// Seconds since the Unix epoch, as sent to the collector.
#[must_use]
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// A finished, timed unit of work inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub title: String,
    pub body: String,
    pub body_format: BodyFormat,
    /// Start, in seconds since the Unix epoch.
    pub time: f64,
    /// Milliseconds.
    pub duration: f64,
    /// Milliseconds spent in nested events.
    pub child_duration: f64,
    pub payload: Payload,
}

impl Event {
    #[must_use]
    pub fn new(name: impl Into<String>, time: f64, duration: f64, payload: Payload) -> Self {
        Self {
            name: name.into(),
            title: String::new(),
            body: String::new(),
            body_format: BodyFormat::Default,
            time,
            duration,
            child_duration: 0.0,
            payload,
        }
    }

    #[must_use]
    pub fn with_formatted(mut self, formatted: FormattedEvent) -> Self {
        self.title = formatted.title;
        self.body = formatted.body;
        self.body_format = formatted.body_format;
        self
    }

    #[must_use]
    pub fn with_child_duration(mut self, child_duration: f64) -> Self {
        self.child_duration = child_duration;
        self
    }

    /// End, in seconds since the Unix epoch.
    #[must_use]
    pub fn end(&self) -> f64 {
        self.time + self.duration / 1000.0
    }
}

/// The error recorded on a failed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    #[serde(rename = "exception")]
    pub class_name: String,
    pub message: String,
    pub backtrace: Vec<String>,
}

impl ExceptionInfo {
    #[must_use]
    pub fn new(
        class_name: impl Into<String>,
        message: impl Into<String>,
        backtrace: Vec<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            backtrace,
        }
    }

    /// Records `error` under its type name, without path or generic
    /// arguments; its `source()` chain becomes the backtrace, outermost cause
    /// first.
    #[must_use]
    pub fn from_error<E: Error + 'static>(error: &E) -> Self {
        let type_name = std::any::type_name::<E>();
        let class_name = type_name
            .split('<')
            .next()
            .unwrap_or(type_name)
            .rsplit("::")
            .next()
            .unwrap_or_default()
            .to_string();
        let mut backtrace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            backtrace.push(cause.to_string());
            source = cause.source();
        }
        Self::new(class_name, error.to_string(), backtrace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("checkout failed")]
    struct CheckoutError {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn test_end_is_start_plus_duration() {
        let event = Event::new("sql.active_record", 1_000.0, 250.0, Payload::new());
        assert!((event.end() - 1_000.25).abs() < 1e-9);
    }

    #[test]
    fn test_exception_from_error() {
        let error = CheckoutError {
            source: std::io::Error::new(std::io::ErrorKind::Other, "connection reset"),
        };
        let info = ExceptionInfo::from_error(&error);
        assert_eq!(info.class_name, "CheckoutError");
        assert_eq!(info.message, "checkout failed");
        assert_eq!(info.backtrace, vec!["connection reset".to_string()]);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("request to {0:?} failed")]
    struct RequestError<T: std::fmt::Debug>(T);

    #[test]
    fn test_exception_from_generic_error() {
        let error = RequestError(std::collections::HashMap::from([("id", 1)]));
        let info = ExceptionInfo::from_error(&error);
        assert_eq!(info.class_name, "RequestError");
        assert_eq!(info.message, "request to {\"id\": 1} failed");
        assert!(info.backtrace.is_empty());

        let nested = RequestError(RequestError(std::io::ErrorKind::Other));
        assert_eq!(ExceptionInfo::from_error(&nested).class_name, "RequestError");
    }

    #[test]
    fn test_exception_serializes_class_as_exception() {
        let info = ExceptionInfo::new("ArgumentError", "bad", vec!["app.rb:1".to_string()]);
        let value = serde_json::to_value(&info).expect("serializes");
        assert_eq!(value["exception"], "ArgumentError");
        assert_eq!(value["backtrace"][0], "app.rb:1");
    }
}
