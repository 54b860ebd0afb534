// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-flight transactions, by execution context and by request id.
//!
//! Every thread owns at most one slot. Creating a transaction on a thread
//! whose slot is still occupied displaces the stale transaction; the caller
//! is handed the displaced transactions so they can be completed instead of
//! silently lost.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use tracing::debug;

use crate::transaction::Transaction;

pub type TransactionHandle = Arc<Mutex<Transaction>>;

#[derive(Default)]
struct RegistryState {
    slots: HashMap<ThreadId, String>,
    transactions: HashMap<String, TransactionHandle>,
}

impl RegistryState {
    fn detach(&mut self, request_id: &str) -> Option<TransactionHandle> {
        self.slots.retain(|_, id| id != request_id);
        self.transactions.remove(request_id)
    }

    fn holds(&self, request_id: &str, handle: &TransactionHandle) -> bool {
        self.transactions
            .get(request_id)
            .is_some_and(|registered| Arc::ptr_eq(registered, handle))
    }
}

#[derive(Default)]
pub struct TransactionRegistry {
    state: Mutex<RegistryState>,
}

impl TransactionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `transaction` as the current transaction of the calling
    /// thread. Returns its handle and any transactions it displaced: the
    /// thread's previous one and one registered under the same request id.
    pub fn create(&self, transaction: Transaction) -> (TransactionHandle, Vec<Transaction>) {
        let request_id = transaction.request_id().to_string();
        let thread_id = thread::current().id();
        let handle = Arc::new(Mutex::new(transaction));

        let mut displaced = Vec::new();
        let mut state = self.state();
        if let Some(stale_id) = state.slots.get(&thread_id).cloned() {
            debug!(
                "Transaction '{}' still in flight when '{}' started, completing it",
                stale_id, request_id
            );
            displaced.extend(state.detach(&stale_id));
        }
        if state.transactions.contains_key(&request_id) {
            debug!("Transaction '{}' registered twice, completing the first", request_id);
            displaced.extend(state.detach(&request_id));
        }
        state.slots.insert(thread_id, request_id.clone());
        state.transactions.insert(request_id, Arc::clone(&handle));
        drop(state);

        (handle, displaced.into_iter().map(into_transaction).collect())
    }

    /// Transaction of the calling thread.
    #[must_use]
    pub fn current(&self) -> Option<TransactionHandle> {
        let state = self.state();
        let request_id = state.slots.get(&thread::current().id())?;
        state.transactions.get(request_id).cloned()
    }

    /// Transaction registered under `request_id`, from any thread.
    #[must_use]
    pub fn get(&self, request_id: &str) -> Option<TransactionHandle> {
        self.state().transactions.get(request_id).cloned()
    }

    /// Removes the transaction and every slot pointing at it, handing back
    /// the owned transaction. `None` when it was already removed.
    pub fn detach(&self, request_id: &str) -> Option<Transaction> {
        let handle = self.state().detach(request_id)?;
        Some(into_transaction(handle))
    }

    /// True while `handle` itself is registered under `request_id`. A
    /// newer transaction reusing the id does not count.
    #[must_use]
    pub fn is_registered(&self, request_id: &str, handle: &TransactionHandle) -> bool {
        self.state().holds(request_id, handle)
    }

    /// Detaches `handle` if it is still the transaction registered under
    /// `request_id`. `None` when it was displaced or already completed, in
    /// which case whatever now holds the id is left alone.
    pub fn detach_handle(
        &self,
        request_id: &str,
        handle: TransactionHandle,
    ) -> Option<Transaction> {
        let registered = {
            let mut state = self.state();
            if !state.holds(request_id, &handle) {
                return None;
            }
            state.detach(request_id)
        };
        drop(handle);
        registered.map(into_transaction)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().transactions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn into_transaction(handle: TransactionHandle) -> Transaction {
    match Arc::try_unwrap(handle) {
        Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
        // Someone still holds a handle; they keep a now-detached copy.
        Err(shared) => shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transaction::event::Payload;

    fn transaction(id: &str) -> Transaction {
        Transaction::new(id, Payload::new(), &Config::default())
    }

    fn current_id(registry: &TransactionRegistry) -> Option<String> {
        registry
            .current()
            .map(|handle| handle.lock().expect("lock").request_id().to_string())
    }

    #[test]
    fn test_most_recent_is_current() {
        let registry = TransactionRegistry::new();
        let (_a, displaced) = registry.create(transaction("a"));
        assert!(displaced.is_empty());
        let (_b, displaced) = registry.create(transaction("b"));

        assert_eq!(current_id(&registry).as_deref(), Some("b"));
        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].request_id(), "a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_detach_clears_slot() {
        let registry = TransactionRegistry::new();
        let (handle, _) = registry.create(transaction("a"));
        drop(handle);
        let detached = registry.detach("a").expect("registered");
        assert_eq!(detached.request_id(), "a");
        assert!(registry.current().is_none());
        assert!(registry.detach("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_detach_with_outstanding_handle_copies() {
        let registry = TransactionRegistry::new();
        let (handle, _) = registry.create(transaction("a"));
        handle.lock().expect("lock").set_action("A#b");
        let detached = registry.detach("a").expect("registered");
        assert_eq!(detached.action(), Some("A#b"));
    }

    #[test]
    fn test_slots_are_per_thread() {
        let registry = Arc::new(TransactionRegistry::new());
        registry.create(transaction("main"));

        let other = Arc::clone(&registry);
        let seen = thread::spawn(move || {
            let before = current_id(&other);
            other.create(transaction("worker"));
            (before, current_id(&other))
        })
        .join()
        .expect("thread");

        assert_eq!(seen, (None, Some("worker".to_string())));
        assert_eq!(current_id(&registry).as_deref(), Some("main"));
        assert!(registry.get("worker").is_some());
    }

    #[test]
    fn test_duplicate_request_id_displaces() {
        let registry = Arc::new(TransactionRegistry::new());
        let other = Arc::clone(&registry);
        thread::spawn(move || {
            other.create(transaction("same"));
        })
        .join()
        .expect("thread");

        let (_, displaced) = registry.create(transaction("same"));
        assert_eq!(displaced.len(), 1);
        assert_eq!(current_id(&registry).as_deref(), Some("same"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_detach_handle_ignores_newer_transaction_with_same_id() {
        let registry = TransactionRegistry::new();
        let (stale, _) = registry.create(transaction("same"));
        let (fresh, displaced) = registry.create(transaction("same"));
        assert_eq!(displaced.len(), 1);

        assert!(!registry.is_registered("same", &stale));
        assert!(registry.is_registered("same", &fresh));
        assert!(registry.detach_handle("same", stale).is_none());
        assert!(registry.is_registered("same", &fresh));
        assert_eq!(current_id(&registry).as_deref(), Some("same"));

        let detached = registry.detach_handle("same", fresh).expect("registered");
        assert_eq!(detached.request_id(), "same");
        assert!(registry.is_empty());
        assert!(registry.current().is_none());
    }
}
