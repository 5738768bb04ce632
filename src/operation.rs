//! Operations and event bubbling.
//!
//! An [`Operation`] is a node of the operation tree. Starting an operation
//! bubbles a start event through its ancestors, emitting data bubbles a data
//! event from the operation itself up to Root, and finishing bubbles a finish
//! event the same way before disabling the operation for good.
//!
//! Each node guards its own listener tables. A bubbling walk takes one node's
//! lock at a time, copies the matching callbacks and releases the lock before
//! invoking them, so listeners may register or unregister on any operation,
//! including the one being dispatched.
//!
//! Listeners run synchronously on the caller's thread and add directly to the
//! latency of the instrumented code; keep them short and non-blocking.

use crate::error::{fatal, OpbusError, Result};
use crate::journal::DispatchRecord;
use crate::listener::{Callback, EventKind, EventListener, ListenerState, Unregister};
use crate::registry::{Context, TypeKey};
use chrono::Utc;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use uuid::Uuid;

pub(crate) struct OperationInner {
    id: Uuid,
    parent: Option<Weak<OperationInner>>,
    expected_result: Option<TypeKey>,
    context: Arc<Context>,
    pub(crate) listeners: RwLock<ListenerState>,
}

/// Handle to a node of the operation tree.
///
/// Cloning is cheap and every clone refers to the same operation. A child
/// keeps only a weak link to its parent and never extends its lifetime. Once
/// every handle to a parent is dropped, the child's events bubble straight to
/// the registry's Root.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

impl Operation {
    pub(crate) fn new_root(context: Arc<Context>) -> Self {
        let inner = Arc::new(OperationInner {
            id: Uuid::new_v4(),
            parent: None,
            expected_result: None,
            context,
            listeners: RwLock::new(ListenerState::default()),
        });
        inner.context.set_root(Arc::downgrade(&inner));
        Self { inner }
    }

    pub(crate) fn start<A: Any>(context: &Arc<Context>, parent: &Operation, args: A) -> Result<Self> {
        let args_key = TypeKey::of::<A>();
        let expected_result = context.result_type_of(args_key)?;

        let op = Self {
            inner: Arc::new(OperationInner {
                id: Uuid::new_v4(),
                parent: Some(Arc::downgrade(&parent.inner)),
                expected_result: Some(expected_result),
                context: Arc::clone(context),
                listeners: RwLock::new(ListenerState::default()),
            }),
        };
        debug!(
            operation = %op.id(),
            parent = %parent.id(),
            args_type = args_key.name(),
            "operation started"
        );

        for node in op.ancestors() {
            let callbacks = node.callbacks(EventKind::Start, args_key).unwrap_or_default();
            op.invoke(&node, EventKind::Start, args_key, &args, callbacks);
        }
        Ok(op)
    }

    /// Unique identifier, for logs and the dispatch journal
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The enclosing operation; `None` for Root.
    ///
    /// When the parent has been dropped, Root stands in for it.
    pub fn parent(&self) -> Option<Operation> {
        let parent = self.inner.parent.as_ref()?;
        parent
            .upgrade()
            .or_else(|| self.inner.context.root())
            .map(|inner| Operation { inner })
    }

    /// Whether this is the Root of its registry
    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Whether the operation has finished
    pub fn is_disabled(&self) -> bool {
        self.inner.listeners.read().is_disabled()
    }

    /// Result type this operation must finish with; `None` for Root
    pub fn expected_result(&self) -> Option<TypeKey> {
        self.inner.expected_result
    }

    /// Number of listeners currently registered on this operation
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Iterate over the parent, grandparent, ... up to Root
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.parent(),
        }
    }

    /// Emit data observed during the operation.
    ///
    /// Data listeners watching `D` are invoked on this operation, then on each
    /// ancestor up to Root. Does nothing once the operation is finished.
    pub fn emit_data<D: Any>(&self, data: D) {
        let key = TypeKey::of::<D>();
        let Some(own) = self.callbacks(EventKind::Data, key) else {
            trace!(operation = %self.id(), data_type = key.name(), "data emitted on disabled operation ignored");
            return;
        };
        self.invoke(self, EventKind::Data, key, &data, own);
        for node in self.ancestors() {
            let callbacks = node.callbacks(EventKind::Data, key).unwrap_or_default();
            self.invoke(&node, EventKind::Data, key, &data, callbacks);
        }
    }

    /// Finish the operation with its results, then disable it.
    ///
    /// # Panics
    ///
    /// Panics if `R` is not the result type registered for this operation's
    /// arguments, or if called on Root. Finishing an already finished
    /// operation does nothing.
    pub fn finish<R: Any>(&self, results: R) {
        if let Err(err) = self.try_finish(results) {
            fatal(err);
        }
    }

    /// Fallible twin of [`finish`](Self::finish).
    ///
    /// The result type is checked even when the operation is already finished.
    /// On a type mismatch no listener runs and the operation keeps its state.
    pub fn try_finish<R: Any>(&self, results: R) -> Result<()> {
        let key = TypeKey::of::<R>();
        match self.inner.expected_result {
            Some(expected) if expected == key => {}
            Some(expected) => {
                return Err(OpbusError::UnexpectedResult {
                    expected: expected.name(),
                    actual: key.name(),
                })
            }
            None => {
                return Err(OpbusError::UnexpectedResult {
                    expected: "no result (root operation)",
                    actual: key.name(),
                })
            }
        }

        // Checking and disabling happen under one exclusive lock so that
        // finish listeners fire at most once.
        let own = {
            let mut state = self.inner.listeners.write();
            if state.is_disabled() {
                trace!(operation = %self.id(), "finish on disabled operation ignored");
                return Ok(());
            }
            state.disable().snapshot(key)
        };

        debug!(operation = %self.id(), result_type = key.name(), "operation finished");
        self.invoke(self, EventKind::Finish, key, &results, own);
        for node in self.ancestors() {
            let callbacks = node.callbacks(EventKind::Finish, key).unwrap_or_default();
            self.invoke(&node, EventKind::Finish, key, &results, callbacks);
        }
        Ok(())
    }

    /// Register listeners on this operation.
    ///
    /// Listeners registered on a finished operation are dropped and never
    /// fire. The returned handle removes exactly these listeners.
    ///
    /// # Panics
    ///
    /// With `strict_listeners` enabled, panics if a start listener watches an
    /// unregistered argument type or a finish listener an unregistered result
    /// type.
    pub fn register<I>(&self, listeners: I) -> Unregister
    where
        I: IntoIterator<Item = EventListener>,
    {
        self.try_register(listeners).unwrap_or_else(|err| fatal(err))
    }

    /// Fallible twin of [`register`](Self::register); nothing is registered on error.
    pub fn try_register<I>(&self, listeners: I) -> Result<Unregister>
    where
        I: IntoIterator<Item = EventListener>,
    {
        let listeners: Vec<EventListener> = listeners.into_iter().collect();
        if self.is_disabled() {
            trace!(operation = %self.id(), "listeners registered on disabled operation ignored");
            return Ok(Unregister::new(Arc::downgrade(&self.inner), Vec::new()));
        }
        if self.inner.context.config.strict_listeners {
            for listener in &listeners {
                self.inner.context.validate_listener(listener)?;
            }
        }

        let mut state = self.inner.listeners.write();
        let entries = listeners.into_iter().filter_map(|l| state.add(l)).collect();
        Ok(Unregister::new(Arc::downgrade(&self.inner), entries))
    }

    /// Copy the callbacks watching `key`; `None` once disabled.
    fn callbacks(&self, kind: EventKind, key: TypeKey) -> Option<Vec<Callback>> {
        let state = self.inner.listeners.read();
        if state.is_disabled() {
            return None;
        }
        Some(state.table(kind).snapshot(key))
    }

    /// Run `node`'s callbacks with `self` as the event origin.
    fn invoke(
        &self,
        node: &Operation,
        kind: EventKind,
        key: TypeKey,
        payload: &dyn Any,
        callbacks: Vec<Callback>,
    ) {
        if callbacks.is_empty() {
            return;
        }
        trace!(
            event = kind.as_str(),
            origin = %self.id(),
            node = %node.id(),
            payload_type = key.name(),
            listeners = callbacks.len(),
            "dispatching"
        );
        for callback in &callbacks {
            callback(self, payload);
        }
        if let Some(journal) = &self.inner.context.journal {
            journal.record(DispatchRecord {
                kind,
                origin: self.id(),
                node: node.id(),
                payload_type: key.name().to_string(),
                listeners: callbacks.len(),
                recorded_at: Utc::now(),
            });
        }
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Operation {}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("root", &self.is_root())
            .field("expected_result", &self.inner.expected_result.map(|t| t.name()))
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

/// Iterator over an operation's ancestors, innermost first
pub struct Ancestors {
    next: Option<Operation>,
}

impl Iterator for Ancestors {
    type Item = Operation;

    fn next(&mut self) -> Option<Operation> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}
