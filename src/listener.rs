//! Event listeners and the per-operation listener tables.
//!
//! Listeners are built with [`EventListener::on_start`], [`EventListener::on_data`]
//! or [`EventListener::on_finish`] and fire only for payloads whose concrete type
//! is exactly the one they watch.

use crate::operation::{Operation, OperationInner};
use crate::registry::TypeKey;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Type-erased listener callback
pub(crate) type Callback = Arc<dyn Fn(&Operation, &dyn Any) + Send + Sync>;

/// The three operation events a listener can watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Data,
    Finish,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Data => "data",
            EventKind::Finish => "finish",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callback bound to one event kind and one payload type.
///
/// Start listeners receive the newly started operation and its arguments, data
/// listeners the emitting operation and the data, finish listeners the
/// finishing operation and its results.
pub struct EventListener {
    kind: EventKind,
    key: TypeKey,
    callback: Callback,
}

impl EventListener {
    /// Listen to descendants starting with arguments of type `A`
    pub fn on_start<A, F>(f: F) -> Self
    where
        A: Any,
        F: Fn(&Operation, &A) + Send + Sync + 'static,
    {
        Self::erase(EventKind::Start, f)
    }

    /// Listen to data of type `D` emitted by the operation or its descendants
    pub fn on_data<D, F>(f: F) -> Self
    where
        D: Any,
        F: Fn(&Operation, &D) + Send + Sync + 'static,
    {
        Self::erase(EventKind::Data, f)
    }

    /// Listen to the operation or its descendants finishing with results of type `R`
    pub fn on_finish<R, F>(f: F) -> Self
    where
        R: Any,
        F: Fn(&Operation, &R) + Send + Sync + 'static,
    {
        Self::erase(EventKind::Finish, f)
    }

    fn erase<T, F>(kind: EventKind, f: F) -> Self
    where
        T: Any,
        F: Fn(&Operation, &T) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(move |op: &Operation, payload: &dyn Any| {
            if let Some(payload) = payload.downcast_ref::<T>() {
                f(op, payload);
            }
        });
        Self {
            kind,
            key: TypeKey::of::<T>(),
            callback,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn watched_type(&self) -> TypeKey {
        self.key
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListener")
            .field("kind", &self.kind)
            .field("watched_type", &self.key.name())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(u64);

/// Callbacks of one event kind, keyed by watched type, in registration order.
#[derive(Default)]
pub(crate) struct ListenerTable {
    entries: HashMap<TypeKey, Vec<(ListenerId, Callback)>>,
}

impl ListenerTable {
    fn add(&mut self, key: TypeKey, id: ListenerId, callback: Callback) {
        self.entries.entry(key).or_default().push((id, callback));
    }

    fn remove(&mut self, key: TypeKey, id: ListenerId) -> bool {
        let Some(callbacks) = self.entries.get_mut(&key) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(entry_id, _)| *entry_id != id);
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            self.entries.remove(&key);
        }
        removed
    }

    pub(crate) fn snapshot(&self, key: TypeKey) -> Vec<Callback> {
        self.entries
            .get(&key)
            .map(|callbacks| callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Listener tables and lifecycle flag of one operation
#[derive(Default)]
pub(crate) struct ListenerState {
    on_start: ListenerTable,
    on_data: ListenerTable,
    on_finish: ListenerTable,
    disabled: bool,
    next_id: u64,
}

impl ListenerState {
    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub(crate) fn table(&self, kind: EventKind) -> &ListenerTable {
        match kind {
            EventKind::Start => &self.on_start,
            EventKind::Data => &self.on_data,
            EventKind::Finish => &self.on_finish,
        }
    }

    fn table_mut(&mut self, kind: EventKind) -> &mut ListenerTable {
        match kind {
            EventKind::Start => &mut self.on_start,
            EventKind::Data => &mut self.on_data,
            EventKind::Finish => &mut self.on_finish,
        }
    }

    /// Add a listener unless disabled; returns the entry needed to remove it.
    pub(crate) fn add(&mut self, listener: EventListener) -> Option<RegisteredEntry> {
        if self.disabled {
            return None;
        }
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.table_mut(listener.kind).add(listener.key, id, listener.callback);
        Some(RegisteredEntry {
            kind: listener.kind,
            key: listener.key,
            id,
        })
    }

    fn remove(&mut self, entry: &RegisteredEntry) -> bool {
        self.table_mut(entry.kind).remove(entry.key, entry.id)
    }

    /// Move to the terminal state, dropping every listener.
    ///
    /// The finish table is handed back so the finishing operation can still
    /// notify its own finish listeners.
    pub(crate) fn disable(&mut self) -> ListenerTable {
        self.disabled = true;
        self.on_start = ListenerTable::default();
        self.on_data = ListenerTable::default();
        std::mem::take(&mut self.on_finish)
    }

    pub(crate) fn len(&self) -> usize {
        self.on_start.len() + self.on_data.len() + self.on_finish.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RegisteredEntry {
    kind: EventKind,
    key: TypeKey,
    id: ListenerId,
}

/// Handle removing the listeners added by one `register` call.
///
/// Calling [`unregister`](Self::unregister) more than once, or after the
/// operation finished or was dropped, does nothing. Dropping the handle keeps
/// the listeners registered.
pub struct Unregister {
    target: Weak<OperationInner>,
    entries: Vec<RegisteredEntry>,
    done: AtomicBool,
}

impl Unregister {
    pub(crate) fn new(target: Weak<OperationInner>, entries: Vec<RegisteredEntry>) -> Self {
        Self {
            target,
            entries,
            done: AtomicBool::new(false),
        }
    }

    pub fn unregister(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.target.upgrade() else {
            return;
        };
        let mut state = inner.listeners.write();
        for entry in &self.entries {
            state.remove(entry);
        }
    }

    /// Number of listeners this handle covers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Unregister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unregister")
            .field("listeners", &self.entries.len())
            .field("done", &self.done.load(Ordering::Acquire))
            .finish()
    }
}
