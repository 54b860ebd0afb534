// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transactions.
//!
//! A [`Transaction`] records one unit of application work: a web request or
//! a background job. It collects the timed [`Event`]s emitted while the work
//! runs, the root event that names it, and at most one exception.
//!
//! Transactions live in the [`registry::TransactionRegistry`] while they are
//! in flight and are handed to the agent as owned values once completed.
//! Classification happens at queue time:
//!
//! | Has exception | Root duration ≥ threshold | Type |
//! |---|---|---|
//! | yes | any | `Exception` |
//! | no | yes | `SlowRequest` |
//! | no | no | `RegularRequest` |

pub mod event;
pub mod formatter;
pub mod registry;
pub mod sanitizer;

use std::error::Error;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::Config;
use crate::transaction::event::{unix_now, Event, ExceptionInfo, Payload};
use crate::transaction::sanitizer::{sanitize_environment, sanitize_tags, ParamsSanitizer};

const QUEUE_START_HEADERS: [&str; 2] = ["HTTP_X_QUEUE_START", "HTTP_X_REQUEST_START"];
const RACK_SESSION: &str = "rack.session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    #[default]
    HttpRequest,
    BackgroundJob,
    Frontend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    RegularRequest,
    SlowRequest,
    Exception,
}

impl TransactionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::RegularRequest => "regular_request",
            TransactionType::SlowRequest => "slow_request",
            TransactionType::Exception => "exception",
        }
    }
}

/// Named sample data that can be attached to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleData {
    Params,
    SessionData,
    Environment,
    Tags,
}

/// Open event on the transaction's timer stack.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) started: Instant,
    pub(crate) time: f64,
    pub(crate) child_duration: f64,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    request_id: String,
    kind: Kind,
    time: f64,
    events: Vec<Event>,
    process_action_event: Option<Event>,
    action: Option<String>,
    exception: Option<ExceptionInfo>,
    env: Payload,
    sanitized_environment: Payload,
    session_data: Payload,
    params: Option<Value>,
    tags: Payload,
    fullpath: Option<String>,
    queue_start: Option<f64>,
    paused: bool,
    slow_request_threshold: f64,
    send_params: bool,
    params_sanitizer: ParamsSanitizer,
    timestack: Vec<Frame>,
}

impl Transaction {
    /// New transaction for `request_id`. `env` is the raw request environment;
    /// only whitelisted keys of it are ever transmitted.
    #[must_use]
    pub fn new(request_id: impl Into<String>, env: Payload, config: &Config) -> Self {
        let fullpath = request_fullpath(&env);
        Self {
            request_id: request_id.into(),
            kind: Kind::default(),
            time: unix_now(),
            events: Vec::new(),
            process_action_event: None,
            action: None,
            exception: None,
            env,
            sanitized_environment: Payload::new(),
            session_data: Payload::new(),
            params: None,
            tags: Payload::new(),
            fullpath,
            queue_start: None,
            paused: false,
            slow_request_threshold: config.slow_request_threshold,
            send_params: config.send_params,
            params_sanitizer: ParamsSanitizer::new(config.filter_parameters.clone()),
            timestack: Vec::new(),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: Kind) {
        self.kind = kind;
    }

    /// Start of the transaction, in seconds since the Unix epoch.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = Some(action.into());
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[must_use]
    pub fn process_action_event(&self) -> Option<&Event> {
        self.process_action_event.as_ref()
    }

    #[must_use]
    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    #[must_use]
    pub fn env(&self) -> &Payload {
        &self.env
    }

    #[must_use]
    pub fn sanitized_environment(&self) -> &Payload {
        &self.sanitized_environment
    }

    #[must_use]
    pub fn session_data(&self) -> &Payload {
        &self.session_data
    }

    #[must_use]
    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    #[must_use]
    pub fn tags(&self) -> &Payload {
        &self.tags
    }

    #[must_use]
    pub fn fullpath(&self) -> Option<&str> {
        self.fullpath.as_deref()
    }

    /// When the request entered the front-end queue, in seconds since the
    /// Unix epoch.
    #[must_use]
    pub fn queue_start(&self) -> Option<f64> {
        self.queue_start
    }

    #[must_use]
    pub fn send_params(&self) -> bool {
        self.send_params
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Visits the root event first, then the nested events in order.
    pub fn for_each_event_mut(&mut self, mut f: impl FnMut(&mut Event)) {
        if let Some(event) = self.process_action_event.as_mut() {
            f(event);
        }
        for event in &mut self.events {
            f(event);
        }
    }

    /// Sets the root event of a web request and derives the action name from
    /// its `controller` and `action` payload fields.
    pub fn set_process_action_event(&mut self, event: Event) {
        let controller = payload_str(&event.payload, "controller");
        let action = payload_str(&event.payload, "action");
        if controller.is_some() || action.is_some() {
            self.action = Some(format!(
                "{}#{}",
                controller.unwrap_or_default(),
                action.unwrap_or_default()
            ));
        }
        self.kind = Kind::HttpRequest;
        self.process_action_event = Some(event);
        self.set_http_queue_start();
    }

    /// Sets the root event of a background job and derives the action name
    /// from its `class` and `method` payload fields.
    pub fn set_perform_job_event(&mut self, event: Event) {
        let class = payload_str(&event.payload, "class");
        let method = payload_str(&event.payload, "method");
        if class.is_some() || method.is_some() {
            self.action = Some(format!(
                "{}#{}",
                class.unwrap_or_default(),
                method.unwrap_or_default()
            ));
        }
        self.queue_start = event
            .payload
            .get("queue_start")
            .and_then(Value::as_f64)
            .filter(|queue_start| *queue_start > 0.0);
        self.kind = Kind::BackgroundJob;
        self.process_action_event = Some(event);
    }

    fn set_http_queue_start(&mut self) {
        let header = QUEUE_START_HEADERS
            .iter()
            .find_map(|key| self.env.get(*key).and_then(Value::as_str));
        let Some(header) = header else {
            return;
        };
        let digits: String = header.chars().filter(char::is_ascii_digit).collect();
        match digits.parse::<u64>() {
            Ok(millis) if millis > 0 => {
                #[allow(clippy::cast_precision_loss)]
                let queue_start = millis as f64 / 1000.0;
                self.queue_start = Some(queue_start);
            }
            _ => debug!("Ignoring unparseable queue start header '{}'", header),
        }
    }

    /// Records `exception`; a later call replaces an earlier one.
    pub fn add_exception(&mut self, exception: ExceptionInfo) {
        self.exception = Some(exception);
    }

    pub fn set_error<E: Error + 'static>(&mut self, error: &E) {
        self.add_exception(ExceptionInfo::from_error(error));
    }

    /// Merges `tags` into the transaction's tags.
    pub fn set_tags(&mut self, tags: Payload) {
        self.tags.extend(tags);
    }

    /// Attaches serializable sample data. Data that does not serialize to a
    /// map is dropped and logged.
    pub fn set_sample_data<T: Serialize + ?Sized>(&mut self, key: SampleData, data: &T) -> bool {
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                error!("Error generating data ({:?}) for '{}': {}", key, self.request_id, e);
                return false;
            }
        };
        let map = match value {
            Value::Object(map) => map,
            other if key == SampleData::Params && other.is_array() => {
                self.params = Some(other);
                return true;
            }
            other => {
                error!(
                    "Invalid sample data ({:?}) for '{}': expected a map, got {}",
                    key, self.request_id, other
                );
                return false;
            }
        };
        match key {
            SampleData::Params => self.params = Some(Value::Object(map)),
            SampleData::SessionData => self.session_data = map,
            SampleData::Environment => self.sanitized_environment = sanitize_environment(&map),
            SampleData::Tags => self.set_tags(map),
        }
        true
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Root event duration in milliseconds, `0.0` without a root event.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.process_action_event
            .as_ref()
            .map_or(0.0, |event| event.duration)
    }

    #[must_use]
    pub fn is_slow_request(&self) -> bool {
        self.process_action_event
            .as_ref()
            .is_some_and(|event| event.duration >= self.slow_request_threshold)
    }

    #[must_use]
    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    #[must_use]
    pub fn transaction_type(&self) -> TransactionType {
        if self.has_exception() {
            TransactionType::Exception
        } else if self.is_slow_request() {
            TransactionType::SlowRequest
        } else {
            TransactionType::RegularRequest
        }
    }

    #[must_use]
    pub fn is_slower_than(&self, other: &Transaction) -> bool {
        self.duration() > other.duration()
    }

    /// Whether the transaction carries anything worth sending.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        self.process_action_event.is_some() || self.exception.is_some()
    }

    /// Drops the bulky parts: root payload, events, tags, environment,
    /// session data and params. Timing and identity remain.
    pub fn truncate(&mut self) {
        if let Some(event) = self.process_action_event.as_mut() {
            event.payload.clear();
        }
        self.events.clear();
        self.tags.clear();
        self.sanitized_environment.clear();
        self.session_data.clear();
        self.params = None;
        self.env.clear();
    }

    /// Scrubs everything that will be transmitted: payloads and params go
    /// through the params sanitizer, the environment through the whitelist,
    /// tags through validation. The raw environment is dropped afterwards.
    pub fn convert_values_to_primitives(&mut self) {
        if self.params.is_none() {
            self.params = self
                .process_action_event
                .as_ref()
                .and_then(|event| event.payload.get("params"))
                .cloned();
        }
        if let Some(params) = self.params.as_mut() {
            self.params_sanitizer.sanitize_in_place(params);
        }

        if let Some(event) = self.process_action_event.as_mut() {
            self.params_sanitizer
                .sanitize_payload_in_place(&mut event.payload);
        }
        for event in &mut self.events {
            self.params_sanitizer
                .sanitize_payload_in_place(&mut event.payload);
        }

        self.sanitized_environment
            .extend(sanitize_environment(&self.env));

        if self.session_data.is_empty() {
            if let Some(Value::Object(session)) = self.env.get(RACK_SESSION) {
                if let Value::Object(session) =
                    self.params_sanitizer.sanitize(&Value::Object(session.clone()))
                {
                    self.session_data = session;
                }
            }
        } else {
            self.params_sanitizer
                .sanitize_payload_in_place(&mut self.session_data);
        }

        self.tags = sanitize_tags(&self.tags);
        self.env.clear();
    }

    /// Wire representation, see [`formatter`].
    pub fn to_hash(&self) -> serde_json::Result<Value> {
        formatter::to_value(self)
    }

    pub(crate) fn push_frame(&mut self) {
        self.timestack.push(Frame {
            started: Instant::now(),
            time: unix_now(),
            child_duration: 0.0,
        });
    }

    pub(crate) fn pop_frame(&mut self) -> Option<Frame> {
        self.timestack.pop()
    }

    pub(crate) fn add_child_duration(&mut self, duration: f64) {
        if let Some(parent) = self.timestack.last_mut() {
            parent.child_duration += duration;
        }
    }

    #[must_use]
    pub(crate) fn open_events(&self) -> usize {
        self.timestack.len()
    }
}

fn payload_str<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn request_fullpath(env: &Payload) -> Option<String> {
    let path = ["REQUEST_PATH", "PATH_INFO"]
        .iter()
        .find_map(|key| env.get(*key).and_then(Value::as_str))?;
    match env.get("QUERY_STRING").and_then(Value::as_str) {
        Some(query) if !query.is_empty() => Some(format!("{path}?{query}")),
        _ => Some(path.to_string()),
    }
}
