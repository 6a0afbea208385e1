//! Optimistic mutations against the resource cache.
//!
//! A mutation:
//! 1. optionally patches every affected key before the action is polled,
//! 2. runs the action (the network call),
//! 3. on success commits the server's answer to each affected key and
//!    revalidates them in the background,
//! 4. on failure removes its patch from each affected key.
//!
//! Patches are layers over each key's base value rather than direct writes.
//! A failed mutation drops only its own layer, so overlapping mutations on a
//! key can settle in any order and the key still ends up holding the base
//! plus the patches of the mutations that are still pending.

mod options;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

pub use options::{MutationOptions, Populate};

use crate::cache::{CacheKey, ResourceCache, Settlement, WriteTicket};
use crate::fetch::FetchCoordinator;
use crate::MutationError;

/// Lifecycle of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    Succeeded,
    Failed,
}

/// A mutation that has started and not yet settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub id: u64,
    pub descriptor: String,
    pub affected_keys: Vec<CacheKey>,
    pub status: MutationStatus,
}

#[derive(Default)]
struct State {
    next_id: u64,
    pending: HashMap<u64, PendingMutation>,
    guards: HashSet<String>,
}

/// Releases the pending record and guard even if the mutation future is dropped.
struct Registration {
    state: Arc<Mutex<State>>,
    id: u64,
    guard: Option<String>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.pending.remove(&self.id);
        if let Some(guard) = &self.guard {
            state.guards.remove(guard);
        }
    }
}

/// Layers one mutation pushed; discarded if the mutation is dropped before
/// it settles.
struct Layers<'a, T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    cache: &'a ResourceCache<T>,
    tickets: Vec<WriteTicket>,
}

impl<T> Layers<'_, T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn settle(&mut self, settlement: Settlement<'_, T>) {
        for ticket in self.tickets.drain(..) {
            if !self.cache.settle_layer(&ticket, settlement) {
                tracing::debug!(key = %ticket.key, "mutation settled after a cache reset");
            }
        }
    }
}

impl<T> Drop for Layers<'_, T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.settle(Settlement::Discard);
    }
}

/// Runs state-changing actions with optimistic cache updates.
///
/// Cheap to clone; clones share pending mutations and guards.
pub struct MutationExecutor<T> {
    coordinator: FetchCoordinator<T>,
    state: Arc<Mutex<State>>,
}

impl<T> Clone for MutationExecutor<T> {
    fn clone(&self) -> Self {
        Self { coordinator: self.coordinator.clone(), state: Arc::clone(&self.state) }
    }
}

impl<T> MutationExecutor<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(coordinator: FetchCoordinator<T>) -> Self {
        Self { coordinator, state: Arc::default() }
    }

    pub fn cache(&self) -> &ResourceCache<T> {
        self.coordinator.cache()
    }

    pub fn coordinator(&self) -> &FetchCoordinator<T> {
        &self.coordinator
    }

    /// Mutations started and not yet settled.
    pub fn pending(&self) -> Vec<PendingMutation> {
        let mut pending: Vec<_> = self.state.lock().pending.values().cloned().collect();
        pending.sort_by_key(|m| m.id);
        pending
    }

    /// Whether a mutation holding `guard` is in flight.
    pub fn is_mutating(&self, guard: &str) -> bool {
        self.state.lock().guards.contains(guard)
    }

    /// Run `action` with the cache effects described by `options`.
    ///
    /// # Errors
    ///
    /// Returns `MutationError::DuplicateSubmission` without running anything
    /// if another mutation holds the same guard; otherwise whatever error the
    /// action produced, after rolling back the optimistic patch.
    pub async fn execute<R, F, Fut>(&self, action: F, options: MutationOptions<T, R>) -> Result<R, MutationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, MutationError>>,
    {
        let registration = self.register(&options)?;
        let cache = self.coordinator.cache();
        let mut layers = Layers {
            cache,
            tickets: options.affected_keys.iter().map(|key| cache.push_layer(key, options.optimistic.clone())).collect(),
        };

        tracing::debug!(
            id = registration.id,
            descriptor = %options.descriptor,
            keys = options.affected_keys.len(),
            optimistic = options.optimistic.is_some(),
            "mutation started"
        );

        let result = action().await;

        let status = match &result {
            Ok(response) => {
                match &options.populate {
                    Some(populate) => layers.settle(Settlement::Replace(&|base: Option<&T>| populate(base, response))),
                    None => layers.settle(Settlement::Keep),
                }
                if options.revalidate {
                    for key in &options.affected_keys {
                        self.coordinator.revalidate_in_background(key);
                    }
                }
                MutationStatus::Succeeded
            }
            Err(err) => {
                layers.settle(Settlement::Discard);
                if options.fail_silently {
                    tracing::debug!(descriptor = %options.descriptor, error = %err, "mutation failed");
                } else {
                    tracing::error!(error = %err, "failed to {}", options.descriptor);
                }
                MutationStatus::Failed
            }
        };

        tracing::debug!(id = registration.id, ?status, "mutation settled");
        result
    }

    fn register<R>(&self, options: &MutationOptions<T, R>) -> Result<Registration, MutationError> {
        let mut state = self.state.lock();
        if let Some(guard) = &options.guard {
            if state.guards.contains(guard) {
                tracing::debug!(guard = %guard, "ignoring duplicate submission");
                return Err(MutationError::DuplicateSubmission(guard.clone()));
            }
            state.guards.insert(guard.clone());
        }

        state.next_id += 1;
        let id = state.next_id;
        state.pending.insert(
            id,
            PendingMutation {
                id,
                descriptor: options.descriptor.clone(),
                affected_keys: options.affected_keys.clone(),
                status: MutationStatus::Pending,
            },
        );

        Ok(Registration { state: Arc::clone(&self.state), id, guard: options.guard.clone() })
    }
}
