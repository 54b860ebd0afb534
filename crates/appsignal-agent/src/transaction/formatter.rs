// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire shapes of a completed transaction.
//!
//! Regular requests carry only the log entry. Slow requests add every event
//! and, when `send_params` is on, the request params. Failed requests add the
//! exception and their tags, but no events.

use serde::Serialize;
use serde_json::Value;

use crate::event_formatter::BodyFormat;
use crate::transaction::event::{Event, ExceptionInfo, Payload};
use crate::transaction::{Kind, Transaction, TransactionType};

/// Root payload keys that are folded into named fields or never sent.
const ROOT_PAYLOAD_EXCLUDED: [&str; 7] = [
    "controller",
    "action",
    "name",
    "class",
    "method",
    "queue_start",
    "params",
];

const LOG_ENTRY_FIELDS: [&str; 11] = [
    "action",
    "duration",
    "time",
    "end",
    "kind",
    "path",
    "environment",
    "session_data",
    "queue_duration",
    "params",
    "tags",
];

#[derive(Serialize)]
struct TransactionPayload<'a> {
    request_id: &'a str,
    log_entry: LogEntry<'a>,
    failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<EventPayload<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<&'a ExceptionInfo>,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    action: Option<&'a str>,
    duration: f64,
    time: f64,
    end: f64,
    kind: Kind,
    path: Option<&'a str>,
    environment: &'a Payload,
    session_data: &'a Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a Payload>,
    #[serde(flatten)]
    root_payload: Payload,
}

#[derive(Serialize)]
struct EventPayload<'a> {
    name: &'a str,
    title: &'a str,
    body: &'a str,
    body_format: BodyFormat,
    duration: f64,
    child_duration: f64,
    time: f64,
    end: f64,
    payload: &'a Payload,
}

impl<'a> From<&'a Event> for EventPayload<'a> {
    fn from(event: &'a Event) -> Self {
        Self {
            name: &event.name,
            title: &event.title,
            body: &event.body,
            body_format: event.body_format,
            duration: event.duration,
            child_duration: event.child_duration,
            time: event.time,
            end: event.end(),
            payload: &event.payload,
        }
    }
}

fn log_entry(transaction: &Transaction, transaction_type: TransactionType) -> LogEntry<'_> {
    let root = transaction.process_action_event();
    let time = root.map_or(transaction.time(), |event| event.time);
    let end = root.map_or(transaction.time(), Event::end);

    let action = transaction.action().or_else(|| {
        transaction
            .exception()
            .map(|exception| exception.class_name.as_str())
    });

    let queue_duration = transaction
        .queue_start()
        .map(|queue_start| (time - queue_start) * 1000.0)
        .filter(|duration| *duration >= 0.0);

    let params = match transaction_type {
        TransactionType::SlowRequest if transaction.send_params() => transaction.params(),
        _ => None,
    };

    let tags = match transaction_type {
        TransactionType::Exception => Some(transaction.tags()),
        _ => None,
    };

    let root_payload = root
        .map(|event| {
            event
                .payload
                .iter()
                .filter(|(key, _)| {
                    !ROOT_PAYLOAD_EXCLUDED.contains(&key.as_str())
                        && !LOG_ENTRY_FIELDS.contains(&key.as_str())
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    LogEntry {
        action,
        duration: transaction.duration(),
        time,
        end,
        kind: transaction.kind(),
        path: transaction.fullpath(),
        environment: transaction.sanitized_environment(),
        session_data: transaction.session_data(),
        queue_duration,
        params,
        tags,
        root_payload,
    }
}

/// Serializes `transaction` into the shape matching its type.
pub fn to_value(transaction: &Transaction) -> serde_json::Result<Value> {
    let transaction_type = transaction.transaction_type();

    let events = match transaction_type {
        TransactionType::SlowRequest => {
            Some(transaction.events().iter().map(EventPayload::from).collect())
        }
        _ => None,
    };

    let payload = TransactionPayload {
        request_id: transaction.request_id(),
        log_entry: log_entry(transaction, transaction_type),
        failed: transaction_type == TransactionType::Exception,
        events,
        exception: transaction.exception(),
    };

    serde_json::to_value(payload)
}
