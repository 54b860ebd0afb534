// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Instrumentation entry point.
//!
//! Instrumented code reports `start`/`finish` pairs by event name. The
//! subscriber times each pair on the current transaction's timer stack,
//! resolves title and body through the formatter registry and records the
//! event. The outermost `process_action*` or `perform_job*` event becomes the
//! transaction's root event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use tracing::debug;

use crate::event_formatter::EventFormatterRegistry;
use crate::transaction::event::{Event, Payload};
use crate::transaction::registry::{TransactionHandle, TransactionRegistry};

pub const PROCESS_ACTION_PREFIX: &str = "process_action";
pub const PERFORM_JOB_PREFIX: &str = "perform_job";
/// Events whose name starts with this are never recorded.
pub const IGNORED_PREFIX: char = '!';

pub struct Subscriber {
    registry: Arc<TransactionRegistry>,
    formatters: Arc<EventFormatterRegistry>,
    subscribed: AtomicBool,
}

impl Subscriber {
    /// Subscriber that starts out subscribed.
    #[must_use]
    pub fn new(registry: Arc<TransactionRegistry>, formatters: Arc<EventFormatterRegistry>) -> Self {
        debug!("Subscribing to instrumentation events");
        Self {
            registry,
            formatters,
            subscribed: AtomicBool::new(true),
        }
    }

    pub fn subscribe(&self) {
        debug!("Subscribing to instrumentation events");
        self.subscribed.store(true, Ordering::SeqCst);
    }

    pub fn unsubscribe(&self) {
        if self.subscribed.swap(false, Ordering::SeqCst) {
            debug!("Unsubscribing from instrumentation events");
        }
    }

    pub fn resubscribe(&self) {
        debug!("Resubscribing to instrumentation events");
        self.unsubscribe();
        self.subscribe();
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    fn recording_transaction(&self, name: &str) -> Option<TransactionHandle> {
        if name.starts_with(IGNORED_PREFIX) || !self.is_subscribed() {
            return None;
        }
        self.registry.current()
    }

    pub fn start(&self, name: &str, _id: &str, _payload: &Payload) {
        let Some(handle) = self.recording_transaction(name) else {
            return;
        };
        let mut transaction = handle.lock().unwrap_or_else(PoisonError::into_inner);
        if transaction.is_paused() {
            return;
        }
        transaction.push_frame();
    }

    pub fn finish(&self, name: &str, _id: &str, payload: Payload) {
        let Some(handle) = self.recording_transaction(name) else {
            return;
        };
        let mut transaction = handle.lock().unwrap_or_else(PoisonError::into_inner);
        if transaction.is_paused() {
            return;
        }
        let Some(frame) = transaction.pop_frame() else {
            debug!("Finished '{}' without a matching start, ignoring", name);
            return;
        };

        let duration = frame.started.elapsed().as_secs_f64() * 1000.0;
        transaction.add_child_duration(duration);

        let mut event = Event::new(name, frame.time, duration, payload)
            .with_child_duration(frame.child_duration);
        if let Some(formatted) = self.formatters.format(name, &event.payload) {
            event = event.with_formatted(formatted);
        }

        if transaction.open_events() == 0 {
            if name.starts_with(PROCESS_ACTION_PREFIX) {
                transaction.set_process_action_event(event.clone());
            } else if name.starts_with(PERFORM_JOB_PREFIX) {
                transaction.set_perform_job_event(event.clone());
            }
        }
        transaction.add_event(event);
    }

    /// Runs `f` as an event named `name`. The event is finished when `f`
    /// returns or unwinds.
    pub fn instrument<T>(&self, name: &str, payload: Payload, f: impl FnOnce() -> T) -> T {
        let _guard = EventGuard::start(self, name, payload);
        f()
    }
}

/// Finishes its event on drop.
pub struct EventGuard<'a> {
    subscriber: &'a Subscriber,
    name: String,
    payload: Option<Payload>,
}

impl<'a> EventGuard<'a> {
    pub fn start(subscriber: &'a Subscriber, name: impl Into<String>, payload: Payload) -> Self {
        let name = name.into();
        subscriber.start(&name, "", &payload);
        Self {
            subscriber,
            name,
            payload: Some(payload),
        }
    }

    /// Adds a payload entry before the event finishes.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        if let Some(payload) = self.payload.as_mut() {
            payload.insert(key.into(), value);
        }
    }
}

impl Drop for EventGuard<'_> {
    fn drop(&mut self) {
        let payload = self.payload.take().unwrap_or_default();
        self.subscriber.finish(&self.name, "", payload);
    }
}
