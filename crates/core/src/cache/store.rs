//! Keyed resource store with listeners and sequence-checked writes.
//!
//! Every write to a key carries a sequence number taken from a single
//! monotonically increasing counter. A key remembers the highest sequence
//! number committed to it and refuses writes that are older, so a response
//! from a fetch issued earlier can never clobber a newer fetch or mutation.
//! `reset()` raises a floor below which every outstanding ticket is dead.
//!
//! Optimistic mutations do not write values directly. Each pushes a layer
//! onto its key; what the key shows is its base value with the pending
//! layers applied in order. Settling a mutation removes its layer and
//! rebuilds the key from the base, so a failed mutation never leaves its
//! patch behind regardless of how mutations on the key interleave.
//!
//! All operations are synchronous. Locks are never held across listener
//! calls, so listeners may read from or write to the cache.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

use super::{CacheEntry, CacheKey};
use crate::FetchError;

/// Callback invoked with the new entry state, or `None` after a reset.
pub type Listener<T> = Arc<dyn Fn(Option<&CacheEntry<T>>) + Send + Sync>;

/// A pure update from the current value (absent if nothing is cached).
pub type Patch<T> = Arc<dyn Fn(Option<&T>) -> T + Send + Sync>;

/// Right to write one key at one point in the sequence.
#[derive(Debug, Clone)]
pub(crate) struct WriteTicket {
    pub(crate) key: CacheKey,
    pub(crate) seq: u64,
}

/// How a settled mutation changes the value under its layer.
pub(crate) enum Settlement<'a, T> {
    /// The mutation failed; the base is left alone.
    Discard,
    /// The mutation succeeded without a server value; its patch joins the base.
    Keep,
    /// The mutation succeeded; the base becomes a value built from it.
    Replace(&'a dyn Fn(Option<&T>) -> T),
}

impl<T> Clone for Settlement<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Settlement<'_, T> {}

/// One pending mutation's view of a key. `None` changes nothing visible.
struct Layer<T> {
    seq: u64,
    patch: Option<Patch<T>>,
}

/// Pending layers of one key and the value beneath them.
struct Stack<T> {
    /// Meaningful only while `layers` is non-empty.
    base: Option<T>,
    layers: Vec<Layer<T>>,
}

impl<T: Clone> Stack<T> {
    fn new() -> Self {
        Self { base: None, layers: Vec::new() }
    }

    fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The value under the layers, given what the key currently shows.
    fn base<'a>(&'a self, shown: Option<&'a T>) -> Option<&'a T> {
        if self.layers.is_empty() { shown } else { self.base.as_ref() }
    }

    /// Replace the value under the layers. Returns what the key should show.
    fn rebase(&mut self, base: Option<T>) -> Option<T> {
        if self.layers.is_empty() {
            return base;
        }
        self.base = base.clone();
        self.layers.iter().fold(base, |value, layer| match &layer.patch {
            Some(patch) => Some(patch(value.as_ref())),
            None => value,
        })
    }

    fn push(&mut self, seq: u64, patch: Option<Patch<T>>, shown: Option<&T>) -> Option<T> {
        if self.layers.is_empty() {
            self.base = shown.cloned();
        }
        let next = match &patch {
            Some(patch) => Some(patch(shown)),
            None => shown.cloned(),
        };
        self.layers.push(Layer { seq, patch });
        next
    }

    /// Remove the layer pushed at `seq`. Returns what the key should show,
    /// or `None` if there is no such layer.
    fn settle(&mut self, seq: u64, settlement: Settlement<'_, T>) -> Option<Option<T>> {
        let pos = self.layers.iter().position(|layer| layer.seq == seq)?;
        let layer = self.layers.remove(pos);
        let base = self.base.take();
        let base = match settlement {
            Settlement::Discard => base,
            Settlement::Keep => match &layer.patch {
                Some(patch) => Some(patch(base.as_ref())),
                None => base,
            },
            Settlement::Replace(build) => Some(build(base.as_ref())),
        };
        Some(self.rebase(base))
    }

    fn clear(&mut self) {
        self.base = None;
        self.layers.clear();
    }
}

struct Slot<T> {
    entry: Option<CacheEntry<T>>,
    listeners: Vec<(u64, Listener<T>)>,
    last_committed: u64,
    orphaned_at: Option<Instant>,
    stack: Stack<T>,
}

impl<T: Clone> Slot<T> {
    fn new() -> Self {
        Self {
            entry: None,
            listeners: Vec::new(),
            last_committed: 0,
            orphaned_at: Some(Instant::now()),
            stack: Stack::new(),
        }
    }

    fn listeners(&self) -> Vec<Listener<T>> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

struct Inner<T> {
    slots: HashMap<CacheKey, Slot<T>>,
    next_seq: u64,
    reset_floor: u64,
    next_listener_id: u64,
}

impl<T: Clone> Inner<T> {
    fn slot_mut(&mut self, key: &CacheKey) -> &mut Slot<T> {
        self.slots.entry(key.clone()).or_insert_with(Slot::new)
    }

    fn accepts(&self, ticket: &WriteTicket) -> bool {
        ticket.seq > self.reset_floor && self.slots.get(&ticket.key).is_none_or(|s| ticket.seq >= s.last_committed)
    }
}

struct Notify<T> {
    listeners: Vec<Listener<T>>,
    entry: Option<CacheEntry<T>>,
}

impl<T> Notify<T> {
    fn send(self) {
        for listener in &self.listeners {
            listener(self.entry.as_ref());
        }
    }
}

/// Process-wide store of fetched collections.
///
/// Cheap to clone; clones share the same entries. Construct one at start-up
/// and hand it to the fetch coordinator and mutation executor.
pub struct ResourceCache<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for ResourceCache<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for ResourceCache<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResourceCache<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::new(),
                next_seq: 0,
                reset_floor: 0,
                next_listener_id: 0,
            })),
        }
    }

    /// Current entry for a key, if one exists.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.inner.lock().slots.get(key).and_then(|s| s.entry.clone())
    }

    /// Current data for a key.
    pub fn data(&self, key: &CacheKey) -> Option<T> {
        self.inner.lock().slots.get(key).and_then(|s| s.entry.as_ref()?.data.clone())
    }

    /// Replace the data for a key and clear its error.
    ///
    /// Writing the value already cached (with no error pending) changes
    /// nothing and notifies nobody.
    pub fn set(&self, key: &CacheKey, data: T) {
        let ticket = self.begin(key);
        self.commit(&ticket, data);
    }

    /// Apply a pure patch to the current data and store the result.
    ///
    /// While optimistic mutations are pending, the patch applies beneath
    /// their layers.
    ///
    /// Returns the prior data so the caller can `restore` it.
    pub fn patch(&self, key: &CacheKey, patch: impl FnOnce(Option<&T>) -> T) -> Option<T> {
        let ticket = self.begin(key);
        self.commit_patch(&ticket, patch).flatten()
    }

    /// Put back data captured from an earlier `patch`.
    pub fn restore(&self, key: &CacheKey, prior: Option<T>) {
        let ticket = self.begin(key);
        self.rollback(&ticket, prior);
    }

    /// Register a listener for a key. Dropping the returned handle unsubscribes.
    pub fn subscribe(
        &self, key: &CacheKey, listener: impl Fn(Option<&CacheEntry<T>>) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut inner = self.inner.lock();
            inner.next_listener_id += 1;
            let id = inner.next_listener_id;
            let slot = inner.slot_mut(key);
            slot.entry.get_or_insert_with(|| CacheEntry::empty(key.clone()));
            slot.listeners.push((id, Arc::new(listener)));
            slot.orphaned_at = None;
            id
        };

        let weak: Weak<Mutex<Inner<T>>> = Arc::downgrade(&self.inner);
        let key = key.clone();
        Subscription {
            release: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.lock();
                    if let Some(slot) = inner.slots.get_mut(&key) {
                        slot.listeners.retain(|(lid, _)| *lid != id);
                        if slot.listeners.is_empty() {
                            slot.orphaned_at = Some(Instant::now());
                        }
                    }
                }
            })),
        }
    }

    /// Drop every entry and tell every subscriber the data is gone.
    ///
    /// Writes begun before the reset (in-flight fetches, pending mutations)
    /// are refused when they settle, so no data from the previous session
    /// can reappear.
    pub fn reset(&self) {
        let listeners = {
            let mut inner = self.inner.lock();
            inner.reset_floor = inner.next_seq;
            inner.slots.retain(|_, slot| !slot.listeners.is_empty());
            let mut listeners = Vec::new();
            for slot in inner.slots.values_mut() {
                slot.entry = None;
                slot.stack.clear();
                listeners.extend(slot.listeners());
            }
            listeners
        };

        tracing::debug!(subscribers = listeners.len(), "resource cache reset");
        Notify { listeners, entry: None }.send();
    }

    /// Remove entries whose last subscriber left more than `retention` ago.
    pub fn evict_orphaned(&self, retention: Duration) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.slots.len();
        inner.slots.retain(|_, slot| {
            !(slot.listeners.is_empty()
                && slot.stack.is_empty()
                && slot.orphaned_at.is_some_and(|at| at.elapsed() >= retention))
        });
        let evicted = before - inner.slots.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted orphaned cache entries");
        }
        evicted
    }

    /// Keys that currently hold an entry.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|(_, s)| s.entry.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Keys with at least one live subscriber.
    pub fn subscribed_keys(&self) -> Vec<CacheKey> {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|(_, s)| !s.listeners.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.inner.lock().slots.get(key).map_or(0, |s| s.listeners.len())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.values().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn begin(&self, key: &CacheKey) -> WriteTicket {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        WriteTicket { key: key.clone(), seq: inner.next_seq }
    }

    /// Replace the base value under `ticket`; pending layers stay on top.
    pub(crate) fn commit(&self, ticket: &WriteTicket, data: T) -> bool {
        self.write(ticket, |entry, stack| {
            let next = stack.rebase(Some(data));
            if entry.error.is_none() && entry.data == next {
                return false;
            }
            entry.data = next;
            entry.error = None;
            true
        })
    }

    /// Apply `patch` to the base value under `ticket`. Returns `None` if the
    /// ticket was refused, otherwise the base held before the patch.
    pub(crate) fn commit_patch(&self, ticket: &WriteTicket, patch: impl FnOnce(Option<&T>) -> T) -> Option<Option<T>> {
        let mut prior = None;
        let accepted = self.write(ticket, |entry, stack| {
            let base = stack.base(entry.data.as_ref()).cloned();
            let next = stack.rebase(Some(patch(base.as_ref())));
            prior = base;
            if entry.data == next {
                return false;
            }
            entry.data = next;
            true
        });
        accepted.then_some(prior)
    }

    /// Put `prior` back as the base value, leaving any recorded error in place.
    pub(crate) fn rollback(&self, ticket: &WriteTicket, prior: Option<T>) -> bool {
        self.write(ticket, |entry, stack| {
            let next = stack.rebase(prior);
            if entry.data == next {
                return false;
            }
            entry.data = next;
            true
        })
    }

    /// Stack an optimistic layer on `key`. A `None` patch records a pending
    /// mutation without changing what the key shows.
    pub(crate) fn push_layer(&self, key: &CacheKey, patch: Option<Patch<T>>) -> WriteTicket {
        let (ticket, notify) = {
            let mut inner = self.inner.lock();
            inner.next_seq += 1;
            let ticket = WriteTicket { key: key.clone(), seq: inner.next_seq };
            let slot = inner.slot_mut(key);
            slot.last_committed = slot.last_committed.max(ticket.seq);
            let entry = slot.entry.get_or_insert_with(|| CacheEntry::empty(key.clone()));
            let next = slot.stack.push(ticket.seq, patch, entry.data.as_ref());

            let mut notify = None;
            if entry.data != next {
                entry.data = next;
                entry.updated_at = Utc::now();
                let snapshot = entry.clone();
                notify = Some(Notify { listeners: slot.listeners(), entry: Some(snapshot) });
            }
            (ticket, notify)
        };

        if let Some(notify) = notify {
            notify.send();
        }
        ticket
    }

    /// Remove the layer pushed under `ticket` and rebuild its key from the
    /// base and the layers still pending.
    ///
    /// Returns false if the layer is gone, which only happens after a reset.
    pub(crate) fn settle_layer(&self, ticket: &WriteTicket, settlement: Settlement<'_, T>) -> bool {
        let notify = {
            let mut inner = self.inner.lock();
            let Some(slot) = inner.slots.get_mut(&ticket.key) else {
                return false;
            };
            let Some(next) = slot.stack.settle(ticket.seq, settlement) else {
                return false;
            };
            let entry = slot.entry.get_or_insert_with(|| CacheEntry::empty(ticket.key.clone()));
            if entry.data == next {
                return true;
            }
            entry.data = next;
            entry.updated_at = Utc::now();
            let snapshot = entry.clone();
            Notify { listeners: slot.listeners(), entry: Some(snapshot) }
        };
        notify.send();
        true
    }

    /// Record the outcome of a fetch.
    ///
    /// The validating flag is updated even when the result itself is
    /// refused as stale, so the entry never stays stuck "validating".
    pub(crate) fn settle_fetch(&self, ticket: &WriteTicket, result: Result<T, FetchError>, still_validating: bool) -> bool {
        let (accepted, notify) = {
            let mut inner = self.inner.lock();
            let accepted = inner.accepts(ticket);
            let slot = if accepted {
                Some(inner.slot_mut(&ticket.key))
            } else {
                inner.slots.get_mut(&ticket.key)
            };

            let mut notify = None;
            if let Some(slot) = slot {
                if accepted && slot.entry.is_none() {
                    slot.entry = Some(CacheEntry::empty(ticket.key.clone()));
                }

                if let Some(entry) = slot.entry.as_mut() {
                    let mut changed = entry.is_validating != still_validating;
                    entry.is_validating = still_validating;
                    if accepted {
                        match result {
                            Ok(data) => {
                                let next = slot.stack.rebase(Some(data));
                                if entry.error.is_some() || entry.data != next {
                                    entry.data = next;
                                    entry.error = None;
                                    changed = true;
                                }
                            }
                            Err(err) => {
                                entry.error = Some(err);
                                changed = true;
                            }
                        }
                    }
                    if changed {
                        entry.updated_at = Utc::now();
                        let snapshot = entry.clone();
                        notify = Some(Notify { listeners: slot.listeners(), entry: Some(snapshot) });
                    }
                }
                if accepted {
                    slot.last_committed = slot.last_committed.max(ticket.seq);
                }
            }
            (accepted, notify)
        };

        if let Some(notify) = notify {
            notify.send();
        }
        accepted
    }

    pub(crate) fn set_validating(&self, key: &CacheKey, validating: bool) {
        let notify = {
            let mut inner = self.inner.lock();
            let slot = inner.slot_mut(key);
            let entry = slot.entry.get_or_insert_with(|| CacheEntry::empty(key.clone()));
            if entry.is_validating == validating {
                return;
            }
            entry.is_validating = validating;
            let snapshot = entry.clone();
            Notify { listeners: slot.listeners(), entry: Some(snapshot) }
        };
        notify.send();
    }

    /// Run `update` on the entry and its layers under `ticket`; `update`
    /// reports whether it changed anything. Returns whether the ticket was
    /// accepted.
    fn write(&self, ticket: &WriteTicket, update: impl FnOnce(&mut CacheEntry<T>, &mut Stack<T>) -> bool) -> bool {
        let notify = {
            let mut inner = self.inner.lock();
            if !inner.accepts(ticket) {
                tracing::debug!(key = %ticket.key, seq = ticket.seq, "refused stale cache write");
                return false;
            }
            let slot = inner.slot_mut(&ticket.key);
            slot.last_committed = slot.last_committed.max(ticket.seq);
            let entry = slot.entry.get_or_insert_with(|| CacheEntry::empty(ticket.key.clone()));
            if !update(entry, &mut slot.stack) {
                return true;
            }
            entry.updated_at = Utc::now();
            let snapshot = entry.clone();
            Notify { listeners: slot.listeners(), entry: Some(snapshot) }
        };
        notify.send();
        true
    }
}

/// Listener registration; unsubscribes when dropped.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.release.is_some()).finish()
    }
}
