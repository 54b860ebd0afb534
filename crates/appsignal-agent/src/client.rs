// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client context tying configuration, transactions, instrumentation and the
//! agent together.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use appsignal_agent::client::Appsignal;
//! use appsignal_agent::transaction::event::Payload;
//!
//! let appsignal = Appsignal::start(Path::new("."), None)?;
//! {
//!     let _transaction = appsignal.create_transaction("req-1", Payload::new());
//!     appsignal.instrument("process_action.action_controller", Payload::new(), || {
//!         // handle the request
//!     });
//! }
//! appsignal.shutdown(true, Some("exit"));
//! # Ok::<(), appsignal_agent::error::AgentError>(())
//! ```

use std::path::Path;
use std::sync::{Arc, PoisonError};

use tracing::{debug, info};

use crate::agent::Agent;
use crate::config::{get_config, Config};
use crate::error::AgentError;
use crate::event_formatter::EventFormatterRegistry;
use crate::subscriber::Subscriber;
use crate::transaction::event::Payload;
use crate::transaction::registry::{TransactionHandle, TransactionRegistry};
use crate::transaction::Transaction;
use crate::transmitter::Transmit;
use crate::{log_build_info, logger};

#[derive(Clone)]
pub struct Appsignal {
    config: Arc<Config>,
    registry: Arc<TransactionRegistry>,
    formatters: Arc<EventFormatterRegistry>,
    subscriber: Arc<Subscriber>,
    agent: Arc<Agent>,
}

impl Appsignal {
    /// Loads configuration for `root_path`, installs the logger and starts
    /// the agent.
    pub fn start(root_path: &Path, env: Option<&str>) -> Result<Self, AgentError> {
        let config = get_config(root_path, env);
        if !logger::init(config.log_level) {
            debug!("A global tracing subscriber is already installed, keeping it");
        }
        log_build_info();
        if config.is_active() {
            info!(
                "Starting AppSignal for '{}' in {} ({})",
                config.name, config.env, config.hostname
            );
        }
        Self::new(config)
    }

    pub fn new(config: Config) -> Result<Self, AgentError> {
        let config = Arc::new(config);
        let (registry, formatters, subscriber) = Self::instrumentation(&config);
        let agent = Agent::start(Arc::clone(&config), Arc::clone(&subscriber))?;
        Ok(Self {
            config,
            registry,
            formatters,
            subscriber,
            agent: Arc::new(agent),
        })
    }

    /// Like [`new`](Self::new) with a custom transport for the agent.
    pub fn with_transmitter(
        config: Config,
        transmitter: Arc<dyn Transmit>,
    ) -> Result<Self, AgentError> {
        let config = Arc::new(config);
        let (registry, formatters, subscriber) = Self::instrumentation(&config);
        let agent = Agent::with_transmitter(&config, Arc::clone(&subscriber), transmitter)?;
        Ok(Self {
            config,
            registry,
            formatters,
            subscriber,
            agent: Arc::new(agent),
        })
    }

    fn instrumentation(
        config: &Config,
    ) -> (
        Arc<TransactionRegistry>,
        Arc<EventFormatterRegistry>,
        Arc<Subscriber>,
    ) {
        let registry = Arc::new(TransactionRegistry::new());
        let formatters = Arc::new(EventFormatterRegistry::with_defaults(config));
        let subscriber = Arc::new(Subscriber::new(
            Arc::clone(&registry),
            Arc::clone(&formatters),
        ));
        (registry, formatters, subscriber)
    }

    /// Starts a transaction on the calling thread. It is completed when the
    /// returned guard drops. A transaction still running on this thread, or
    /// one registered under the same id, is completed first.
    pub fn create_transaction(
        &self,
        request_id: impl Into<String>,
        env: Payload,
    ) -> TransactionGuard {
        let transaction = Transaction::new(request_id, env, &self.config);
        let request_id = transaction.request_id().to_string();
        let (handle, displaced) = self.registry.create(transaction);
        for stale in displaced {
            self.complete(stale);
        }
        TransactionGuard {
            client: self.clone(),
            handle: Some(handle),
            request_id,
        }
    }

    #[must_use]
    pub fn current_transaction(&self) -> Option<TransactionHandle> {
        self.registry.current()
    }

    /// Completes the transaction registered under `request_id`. Returns
    /// false when it was already completed.
    pub fn complete_transaction(&self, request_id: &str) -> bool {
        match self.registry.detach(request_id) {
            Some(transaction) => {
                self.complete(transaction);
                true
            }
            None => {
                debug!("Transaction '{}' already completed", request_id);
                false
            }
        }
    }

    fn complete(&self, transaction: Transaction) {
        if !transaction.is_reportable() {
            debug!(
                "Transaction '{}' has no root event or exception, not sending it",
                transaction.request_id()
            );
            return;
        }
        if let Some(action) = transaction.action() {
            if self.config.ignore_actions.iter().any(|ignored| ignored == action) {
                debug!("Ignoring transaction for action '{}'", action);
                return;
            }
        }
        self.agent.enqueue(transaction);
    }

    pub fn instrument<T>(&self, name: &str, payload: Payload, f: impl FnOnce() -> T) -> T {
        self.subscriber.instrument(name, payload, f)
    }

    #[must_use]
    pub fn subscriber(&self) -> &Arc<Subscriber> {
        &self.subscriber
    }

    #[must_use]
    pub fn formatters(&self) -> &Arc<EventFormatterRegistry> {
        &self.formatters
    }

    #[must_use]
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.config.is_active()
    }

    pub fn shutdown(&self, send_remaining: bool, reason: Option<&str>) {
        self.agent.shutdown(send_remaining, reason);
    }
}

/// Completes its transaction on drop.
pub struct TransactionGuard {
    client: Appsignal,
    handle: Option<TransactionHandle>,
    request_id: String,
}

impl TransactionGuard {
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[must_use]
    pub fn handle(&self) -> Option<&TransactionHandle> {
        self.handle.as_ref()
    }

    /// Runs `f` with the transaction locked. Returns `None` once the
    /// transaction was completed by someone else. `f` must not instrument:
    /// the subscriber needs the same lock.
    pub fn with<T>(&self, f: impl FnOnce(&mut Transaction) -> T) -> Option<T> {
        let handle = self.handle.as_ref()?;
        if !self.client.registry.is_registered(&self.request_id, handle) {
            return None;
        }
        let mut transaction = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut transaction))
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.client.registry.detach_handle(&self.request_id, handle) {
            Some(transaction) => self.client.complete(transaction),
            None => debug!("Transaction '{}' already completed", self.request_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::error::TransmitterError;
    use crate::transaction::event::ExceptionInfo;
    use crate::transaction::tests::payload;

    #[derive(Default)]
    struct RecordingTransmitter {
        received: Mutex<VecDeque<Value>>,
    }

    #[async_trait]
    impl Transmit for RecordingTransmitter {
        async fn transmit(&self, payload: &Value) -> Result<u16, TransmitterError> {
            self.received
                .lock()
                .expect("lock")
                .push_back(payload.clone());
            Ok(200)
        }
    }

    fn client(ignore_actions: Vec<String>) -> Appsignal {
        let config = Config {
            active: true,
            push_api_key: "abc".to_string(),
            flush_interval: Duration::from_secs(3600),
            ignore_actions,
            ..Config::default()
        };
        Appsignal::with_transmitter(config, Arc::new(RecordingTransmitter::default()))
            .expect("client")
    }

    fn process_action(appsignal: &Appsignal, controller: &str) {
        appsignal.instrument(
            "process_action.action_controller",
            payload(json!({"controller": controller, "action": "index"})),
            || {},
        );
    }

    #[test]
    fn test_completed_transaction_is_enqueued() {
        let appsignal = client(Vec::new());
        {
            let guard = appsignal.create_transaction("req-1", Payload::new());
            process_action(&appsignal, "PostsController");
            assert_eq!(
                guard.with(|t| t.action().map(str::to_string)),
                Some(Some("PostsController#index".to_string()))
            );
        }
        assert!(appsignal.current_transaction().is_none());
        assert_eq!(appsignal.agent().queued_transactions(), 1);
        appsignal.shutdown(false, None);
    }

    #[test]
    fn test_unreportable_transaction_is_dropped() {
        let appsignal = client(Vec::new());
        drop(appsignal.create_transaction("req-1", Payload::new()));
        assert_eq!(appsignal.agent().queued_transactions(), 0);

        {
            let guard = appsignal.create_transaction("req-2", Payload::new());
            guard.with(|t| t.add_exception(ExceptionInfo::new("RuntimeError", "boom", Vec::new())));
        }
        assert_eq!(appsignal.agent().queued_transactions(), 1);
        appsignal.shutdown(false, None);
    }

    #[test]
    fn test_ignored_action_is_not_enqueued() {
        let appsignal = client(vec!["HealthController#index".to_string()]);
        {
            let _guard = appsignal.create_transaction("req-1", Payload::new());
            process_action(&appsignal, "HealthController");
        }
        assert_eq!(appsignal.agent().queued_transactions(), 0);
        appsignal.shutdown(false, None);
    }

    #[test]
    fn test_stale_transaction_is_completed() {
        let appsignal = client(Vec::new());
        let stale = appsignal.create_transaction("req-1", Payload::new());
        process_action(&appsignal, "PostsController");

        let _fresh = appsignal.create_transaction("req-2", Payload::new());
        assert_eq!(appsignal.agent().queued_transactions(), 1);
        assert!(stale.with(|_| ()).is_none());

        drop(stale);
        assert_eq!(appsignal.agent().queued_transactions(), 1);
        appsignal.shutdown(false, None);
    }

    #[test]
    fn test_stale_guard_leaves_newer_transaction_with_same_id() {
        let appsignal = client(Vec::new());
        let worker = appsignal.clone();
        let stale = thread::spawn(move || {
            let guard = worker.create_transaction("same", Payload::new());
            process_action(&worker, "PostsController");
            guard
        })
        .join()
        .expect("thread");

        let fresh = appsignal.create_transaction("same", Payload::new());
        assert_eq!(appsignal.agent().queued_transactions(), 1);

        drop(stale);
        assert_eq!(appsignal.agent().queued_transactions(), 1);
        let current = appsignal.current_transaction().expect("current");
        assert!(Arc::ptr_eq(&current, fresh.handle().expect("handle")));

        process_action(&appsignal, "CommentsController");
        let recorded = fresh.with(|t| {
            t.add_exception(ExceptionInfo::new("RuntimeError", "boom", Vec::new()));
            t.action().map(str::to_string)
        });
        assert_eq!(recorded, Some(Some("CommentsController#index".to_string())));

        drop(fresh);
        assert!(appsignal.current_transaction().is_none());
        assert_eq!(appsignal.agent().queued_transactions(), 2);
        appsignal.shutdown(false, None);
    }

    #[test]
    fn test_transactions_are_per_thread() {
        let appsignal = client(Vec::new());
        let _main = appsignal.create_transaction("main", Payload::new());

        let worker = appsignal.clone();
        thread::spawn(move || {
            let _guard = worker.create_transaction("worker", Payload::new());
            let current = worker.current_transaction().expect("current");
            assert_eq!(current.lock().expect("lock").request_id(), "worker");
        })
        .join()
        .expect("thread");

        let current = appsignal.current_transaction().expect("current");
        assert_eq!(current.lock().expect("lock").request_id(), "main");
        appsignal.shutdown(false, None);
    }

    #[test]
    fn test_inactive_client() {
        let appsignal =
            Appsignal::with_transmitter(Config::default(), Arc::new(RecordingTransmitter::default()))
                .expect("client");
        assert!(!appsignal.is_active());
        assert!(!appsignal.agent().is_running());
        {
            let _guard = appsignal.create_transaction("req-1", Payload::new());
            process_action(&appsignal, "PostsController");
        }
        assert_eq!(appsignal.agent().queued_transactions(), 0);
    }
}
