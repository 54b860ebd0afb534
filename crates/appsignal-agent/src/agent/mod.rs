// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background agent.
//!
//! Completed transactions are added to an [`Aggregator`]. A worker thread
//! wakes up every `sleep_time`, turns the aggregator into a batch and sends
//! the pending batches to the collector, oldest first. The collector's answer
//! drives the agent: 420 and 413 tune `sleep_time`, 401/402/406/429 stop the
//! agent for the rest of the process, anything else gets one more try on the
//! next cycle before the batch is dropped.

pub mod response;

use std::collections::VecDeque;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::post_processor::PostProcessor;
use crate::aggregator::Aggregator;
use crate::agent::response::{fatal_reason, ResponseAction};
use crate::config::Config;
use crate::error::AgentError;
use crate::subscriber::Subscriber;
use crate::transaction::Transaction;
use crate::transmitter::{Transmit, Transmitter};

pub const ACTION: &str = "log_entries";
/// Pending batches kept while the collector is unreachable.
pub const AGGREGATOR_LIMIT: usize = 5;
pub const WORKER_THREAD_NAME: &str = "appsignal-agent";

const BACKOFF_FACTOR: f64 = 1.5;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct AgentState {
    subscriber: Arc<Subscriber>,
    transmitter: Arc<dyn Transmit>,
    post_processor: PostProcessor,
    aggregator: Mutex<Aggregator>,
    pending: Mutex<VecDeque<Arc<Value>>>,
    sleep_time: Mutex<Duration>,
    retry_request: AtomicBool,
    transmission_successful: AtomicBool,
    flush_on_shutdown: AtomicBool,
    stopped: AtomicBool,
    master_pid: AtomicU32,
    cancel: Mutex<CancellationToken>,
}

impl AgentState {
    fn new(config: &Config, subscriber: Arc<Subscriber>, transmitter: Arc<dyn Transmit>) -> Self {
        Self {
            subscriber,
            transmitter,
            post_processor: PostProcessor::default_chain(config),
            aggregator: Mutex::new(Aggregator::new()),
            pending: Mutex::new(VecDeque::new()),
            sleep_time: Mutex::new(config.flush_interval),
            retry_request: AtomicBool::new(false),
            transmission_successful: AtomicBool::new(true),
            flush_on_shutdown: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            master_pid: AtomicU32::new(process::id()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    fn sleep_time(&self) -> Duration {
        *lock(&self.sleep_time)
    }

    fn has_work(&self) -> bool {
        lock(&self.aggregator).has_transactions() || !lock(&self.pending).is_empty()
    }

    fn push_pending(&self, batch: Value) {
        let mut pending = lock(&self.pending);
        pending.push_back(Arc::new(batch));
        if pending.len() > AGGREGATOR_LIMIT {
            error!("Aggregator queue too large, removing items");
            while pending.len() > AGGREGATOR_LIMIT {
                pending.pop_front();
            }
        }
    }

    fn next_batch(&self) -> Option<Arc<Value>> {
        lock(&self.pending).front().cloned()
    }

    async fn run(&self, token: CancellationToken) {
        info!("Started the AppSignal agent");
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = tokio::time::sleep(self.sleep_time()) => {}
            }
            if self.has_work() {
                self.send_queue().await;
            }
        }

        if self.flush_on_shutdown.load(Ordering::SeqCst)
            && self.transmission_successful.load(Ordering::SeqCst)
        {
            debug!("Sending remaining transactions before exiting");
            self.send_queue().await;
        }
        debug!("Agent worker exited");
    }

    async fn send_queue(&self) {
        debug!("Sending queue");
        let aggregator = std::mem::take(&mut *lock(&self.aggregator));
        if aggregator.has_transactions() {
            let batch = aggregator.post_processed_queue(&self.post_processor);
            self.push_pending(Value::Array(batch));
        }

        while let Some(batch) = self.next_batch() {
            let status = match self.transmitter.transmit(&batch).await {
                Ok(status) => Some(status),
                Err(e) => {
                    error!("Exception while communicating with AppSignal: {}", e);
                    None
                }
            };
            if !self.handle_result(status) {
                break;
            }
        }
    }

    /// Settles the oldest pending batch. Returns whether the next pending
    /// batch may be sent in the same cycle.
    fn handle_result(&self, status: Option<u16>) -> bool {
        debug!("Queue sent, response code: {:?}", status);
        let action = ResponseAction::from_status(status);

        if action == ResponseAction::Unknown {
            error!(
                "Unknown AppSignal response code: '{}'",
                status.map_or_else(|| "none".to_string(), |s| s.to_string())
            );
            self.transmission_successful.store(false, Ordering::SeqCst);
            if self.retry_request.swap(true, Ordering::SeqCst) {
                debug!("Second failure in a row, dropping batch");
                self.retry_request.store(false, Ordering::SeqCst);
                lock(&self.pending).pop_front();
            }
            return false;
        }

        lock(&self.pending).pop_front();
        self.retry_request.store(false, Ordering::SeqCst);

        match action {
            ResponseAction::Backoff => {
                info!("Increasing sleep time since the server told us to");
                let mut sleep_time = lock(&self.sleep_time);
                *sleep_time = sleep_time.mul_f64(BACKOFF_FACTOR);
            }
            ResponseAction::SpeedUp => {
                info!("Decreasing sleep time since our last push was too large");
                let mut sleep_time = lock(&self.sleep_time);
                *sleep_time = sleep_time.div_f64(BACKOFF_FACTOR);
            }
            ResponseAction::Fatal => {
                if let Some(status) = status {
                    error!("{}", fatal_reason(status));
                }
                self.transmission_successful.store(false, Ordering::SeqCst);
                self.stop_logging();
                return false;
            }
            ResponseAction::Sent | ResponseAction::Unknown => {}
        }
        self.transmission_successful.store(true, Ordering::SeqCst);
        true
    }

    fn stop_logging(&self) {
        info!("Disengaging the agent");
        self.subscriber.unsubscribe();
        self.flush_on_shutdown.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        lock(&self.cancel).cancel();
    }

    fn is_forked(&self) -> bool {
        self.master_pid.load(Ordering::SeqCst) != process::id()
    }
}

/// Owns the worker thread and the aggregation state it drains.
pub struct Agent {
    state: Arc<AgentState>,
    active: bool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    /// Starts the agent with a collector transmitter for `log_entries`.
    ///
    /// An inactive configuration yields an agent without a worker thread
    /// whose [`enqueue`](Self::enqueue) does nothing.
    pub fn start(config: Arc<Config>, subscriber: Arc<Subscriber>) -> Result<Self, AgentError> {
        let transmitter = Transmitter::new(ACTION, Arc::clone(&config))?;
        Self::with_transmitter(&config, subscriber, Arc::new(transmitter))
    }

    pub fn with_transmitter(
        config: &Config,
        subscriber: Arc<Subscriber>,
        transmitter: Arc<dyn Transmit>,
    ) -> Result<Self, AgentError> {
        let state = Arc::new(AgentState::new(config, subscriber, transmitter));
        let active = config.is_active();
        let agent = Self {
            state,
            active,
            worker: Mutex::new(None),
        };
        if active {
            agent.spawn_worker()?;
        } else {
            debug!("AppSignal not active, not starting the agent");
        }
        Ok(agent)
    }

    fn spawn_worker(&self) -> Result<(), AgentError> {
        let token = CancellationToken::new();
        *lock(&self.state.cancel) = token.clone();

        let state = Arc::clone(&self.state);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build agent runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(state.run(token));
            })
            .map_err(AgentError::WorkerSpawn)?;

        *lock(&self.worker) = Some(handle);
        Ok(())
    }

    /// Hands a completed transaction to the aggregator. Restarts the agent
    /// first when the process forked since the last call.
    pub fn enqueue(&self, transaction: Transaction) {
        if !self.active || self.state.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut aggregator = lock(&self.state.aggregator);
        if self.state.is_forked() {
            self.forked(&mut aggregator);
        }
        aggregator.add(transaction);
    }

    /// Resets inherited state in a forked child and starts a fresh worker.
    /// The parent's worker thread does not exist here, so it is never joined.
    /// Called with the aggregator locked.
    fn forked(&self, aggregator: &mut Aggregator) {
        info!("Forked process, resubscribing and restarting agent");
        self.state.master_pid.store(process::id(), Ordering::SeqCst);
        self.state.subscriber.resubscribe();
        *aggregator = Aggregator::new();
        lock(&self.state.pending).clear();
        self.state.retry_request.store(false, Ordering::SeqCst);
        lock(&self.state.cancel).cancel();
        drop(lock(&self.worker).take());
        if let Err(e) = self.spawn_worker() {
            error!("Failed to restart agent after fork: {}", e);
        }
    }

    /// Stops the agent. With `send_remaining`, the worker makes one last
    /// send before exiting, provided the previous transmission succeeded.
    /// Blocks until the worker is gone unless called from the worker itself.
    pub fn shutdown(&self, send_remaining: bool, reason: Option<&str>) {
        info!(
            "Shutting down agent ({})",
            reason.unwrap_or("no reason given")
        );
        self.state.subscriber.unsubscribe();
        let send_remaining = send_remaining && !self.state.is_forked();
        self.state
            .flush_on_shutdown
            .store(send_remaining, Ordering::SeqCst);
        self.state.stopped.store(true, Ordering::SeqCst);
        lock(&self.state.cancel).cancel();

        let Some(handle) = lock(&self.worker).take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("Agent worker panicked before shutdown");
        }
    }

    /// True while a worker is alive and the agent has not been stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.state.stopped.load(Ordering::SeqCst)
            && lock(&self.worker)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    #[must_use]
    pub fn sleep_time(&self) -> Duration {
        self.state.sleep_time()
    }

    #[must_use]
    pub fn pending_batches(&self) -> usize {
        lock(&self.state.pending).len()
    }

    #[must_use]
    pub fn queued_transactions(&self) -> usize {
        lock(&self.state.aggregator).len()
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        lock(&self.state.cancel).cancel();
    }
}
