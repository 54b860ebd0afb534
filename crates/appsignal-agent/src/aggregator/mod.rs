// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Aggregator
//!
//! Collects completed transactions between two transmissions. Every
//! transaction is kept, but only the ones worth inspecting keep their detail:
//!
//! - **Regular requests** are truncated right away.
//! - **Exceptions** keep everything, scrubbed through the sanitizers.
//! - **Slow requests** keep their detail only while they are the slowest
//!   transaction seen for their action. A slower one for the same action
//!   takes over and the previous holder is truncated in place.

pub mod post_processor;

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error};

use crate::aggregator::post_processor::PostProcessor;
use crate::transaction::{Transaction, TransactionType};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub regular_request: usize,
    pub slow_request: usize,
    pub exception: usize,
}

impl Counts {
    fn increment(&mut self, transaction_type: TransactionType) {
        match transaction_type {
            TransactionType::RegularRequest => self.regular_request += 1,
            TransactionType::SlowRequest => self.slow_request += 1,
            TransactionType::Exception => self.exception += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.regular_request + self.slow_request + self.exception
    }
}

#[derive(Debug, Default)]
pub struct Aggregator {
    queue: Vec<Transaction>,
    slowness_index: HashMap<String, usize>,
    counts: Counts,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut transaction: Transaction) {
        let transaction_type = transaction.transaction_type();
        match transaction_type {
            TransactionType::RegularRequest => transaction.truncate(),
            TransactionType::SlowRequest => self.pre_process_slowness(&mut transaction),
            TransactionType::Exception => transaction.convert_values_to_primitives(),
        }
        self.counts.increment(transaction_type);
        self.queue.push(transaction);
    }

    /// Decides which transaction keeps its detail. Must run before
    /// `transaction` is appended: the index it records is the next queue slot.
    fn pre_process_slowness(&mut self, transaction: &mut Transaction) {
        let action = transaction.action().unwrap_or_default().to_string();
        let next_index = self.queue.len();

        match self.slowness_index.get(&action).copied() {
            Some(index) if index < self.queue.len() => {
                if transaction.is_slower_than(&self.queue[index]) {
                    self.queue[index].truncate();
                    transaction.convert_values_to_primitives();
                    self.slowness_index.insert(action, next_index);
                } else {
                    transaction.truncate();
                }
            }
            _ => {
                transaction.convert_values_to_primitives();
                self.slowness_index.insert(action, next_index);
            }
        }
    }

    #[must_use]
    pub fn has_transactions(&self) -> bool {
        !self.queue.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn queue(&self) -> &[Transaction] {
        &self.queue
    }

    /// Slowest transaction recorded for `action` in this window.
    #[must_use]
    pub fn slowest(&self, action: &str) -> Option<&Transaction> {
        self.slowness_index
            .get(action)
            .and_then(|index| self.queue.get(*index))
    }

    #[must_use]
    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// Runs the post-processing chain over every transaction and serializes
    /// them. A transaction that fails to serialize is dropped and logged.
    #[must_use]
    pub fn post_processed_queue(self, post_processor: &PostProcessor) -> Vec<Value> {
        let counts = self.counts;
        debug!(
            "Post processing {} transactions (regular: {}, slow: {}, exception: {})",
            counts.total(),
            counts.regular_request,
            counts.slow_request,
            counts.exception
        );

        self.queue
            .into_iter()
            .filter_map(|mut transaction| {
                post_processor.process(&mut transaction);
                match transaction.to_hash() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        error!(
                            "Failed to serialize transaction '{}', dropping it: {}",
                            transaction.request_id(),
                            e
                        );
                        None
                    }
                }
            })
            .collect()
    }
}
