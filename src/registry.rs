//! Operation kind registry and Root ownership.
//!
//! A [`Registry`] is the context object every instrumented component shares.
//! It declares the valid (argument type -> result type) operation kinds, owns
//! the Root operation of its tree, and starts new operations after checking
//! their kind was declared.
//!
//! # Examples
//!
//! ```
//! use opbus::{EventListener, Registry};
//! use std::sync::atomic::{AtomicU16, Ordering};
//! use std::sync::Arc;
//!
//! struct HttpRequestArgs {
//!     path: String,
//! }
//!
//! struct HttpResponse {
//!     status: u16,
//! }
//!
//! let registry = Registry::new();
//! registry.register_operation::<HttpRequestArgs, HttpResponse>();
//!
//! let seen = Arc::new(AtomicU16::new(0));
//! let seen_in_listener = Arc::clone(&seen);
//! registry.root().register([EventListener::on_finish(
//!     move |_op, res: &HttpResponse| {
//!         seen_in_listener.store(res.status, Ordering::SeqCst);
//!     },
//! )]);
//!
//! let op = registry.start_operation(HttpRequestArgs { path: "/".to_string() });
//! op.finish(HttpResponse { status: 200 });
//! assert_eq!(seen.load(Ordering::SeqCst), 200);
//! ```

use crate::config::Config;
use crate::error::{fatal, OpbusError, Result};
use crate::journal::DispatchJournal;
use crate::listener::{EventKind, EventListener};
use crate::operation::{Operation, OperationInner};
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info};

/// Stable identifier of a payload type.
///
/// Equality and hashing use the [`TypeId`] only; the name is carried for
/// diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Default)]
struct KindTable {
    by_args: HashMap<TypeKey, TypeKey>,
    results: HashSet<TypeKey>,
}

/// State shared by the registry and every operation of its tree.
pub(crate) struct Context {
    kinds: RwLock<KindTable>,
    pub(crate) config: Config,
    pub(crate) journal: Option<DispatchJournal>,
    root: OnceLock<Weak<OperationInner>>,
}

impl Context {
    fn new(config: Config) -> Self {
        let journal = (config.journal_capacity > 0)
            .then(|| DispatchJournal::new(config.journal_capacity));
        Self {
            kinds: RwLock::new(KindTable::default()),
            config,
            journal,
            root: OnceLock::new(),
        }
    }

    pub(crate) fn set_root(&self, root: Weak<OperationInner>) {
        // Only the first root of a context counts.
        let _ = self.root.set(root);
    }

    /// Root of this context, while its registry is alive
    pub(crate) fn root(&self) -> Option<Arc<OperationInner>> {
        self.root.get().and_then(Weak::upgrade)
    }

    pub(crate) fn result_type_of(&self, args: TypeKey) -> Result<TypeKey> {
        self.kinds.read().by_args.get(&args).copied().ok_or(OpbusError::UnknownOperation {
            args_type: args.name(),
        })
    }

    /// Check a listener watches a declared type. Data listeners accept any type.
    pub(crate) fn validate_listener(&self, listener: &EventListener) -> Result<()> {
        let key = listener.watched_type();
        let kinds = self.kinds.read();
        let known = match listener.kind() {
            EventKind::Start => kinds.by_args.contains_key(&key),
            EventKind::Finish => kinds.results.contains(&key),
            EventKind::Data => true,
        };
        if known {
            Ok(())
        } else {
            Err(OpbusError::UnregisteredListener {
                kind: listener.kind().as_str(),
                payload_type: key.name(),
            })
        }
    }
}

/// Operation kind registry and owner of the Root operation
///
/// Create one per process (or per isolated instrumentation domain), declare
/// every operation kind with [`register_operation`](Self::register_operation)
/// during initialization, then share it with the instrumented code.
pub struct Registry {
    context: Arc<Context>,
    root: Operation,
}

impl Registry {
    /// Create a registry with the default configuration
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a registry with a custom configuration
    pub fn with_config(config: Config) -> Self {
        info!(
            strict_listeners = config.strict_listeners,
            journal_capacity = config.journal_capacity,
            "creating operation registry"
        );
        let context = Arc::new(Context::new(config));
        let root = Operation::new_root(Arc::clone(&context));
        Self { context, root }
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Declare that operations started with `A` must finish with `R`.
    ///
    /// # Panics
    ///
    /// Panics if `A` is already registered.
    pub fn register_operation<A: Any, R: Any>(&self) {
        if let Err(err) = self.try_register_operation::<A, R>() {
            fatal(err);
        }
    }

    /// Fallible twin of [`register_operation`](Self::register_operation).
    pub fn try_register_operation<A: Any, R: Any>(&self) -> Result<()> {
        let args = TypeKey::of::<A>();
        let result = TypeKey::of::<R>();

        let mut kinds = self.context.kinds.write();
        if let Some(existing) = kinds.by_args.get(&args) {
            return Err(OpbusError::DuplicateOperation {
                args_type: args.name(),
                result_type: existing.name(),
            });
        }
        kinds.by_args.insert(args, result);
        kinds.results.insert(result);

        debug!(args_type = args.name(), result_type = result.name(), "registered operation kind");
        Ok(())
    }

    /// Whether operations started with `A` have a declared kind
    pub fn is_registered<A: Any>(&self) -> bool {
        self.context.kinds.read().by_args.contains_key(&TypeKey::of::<A>())
    }

    /// Result type declared for operations started with `A`, if any
    pub fn result_type_of<A: Any>(&self) -> Option<TypeKey> {
        self.context.result_type_of(TypeKey::of::<A>()).ok()
    }

    /// The ancestor of every operation started without an explicit parent
    pub fn root(&self) -> &Operation {
        &self.root
    }

    /// Start an operation under Root.
    ///
    /// # Panics
    ///
    /// Panics if the kind of `A` was never registered.
    pub fn start_operation<A: Any>(&self, args: A) -> Operation {
        self.start_operation_with_parent(args, &self.root)
    }

    /// Start an operation under `parent`.
    ///
    /// # Panics
    ///
    /// Panics if the kind of `A` was never registered.
    pub fn start_operation_with_parent<A: Any>(&self, args: A, parent: &Operation) -> Operation {
        self.try_start_operation_with_parent(args, parent).unwrap_or_else(|err| fatal(err))
    }

    /// Fallible twin of [`start_operation`](Self::start_operation).
    pub fn try_start_operation<A: Any>(&self, args: A) -> Result<Operation> {
        self.try_start_operation_with_parent(args, &self.root)
    }

    /// Fallible twin of [`start_operation_with_parent`](Self::start_operation_with_parent).
    pub fn try_start_operation_with_parent<A: Any>(
        &self,
        args: A,
        parent: &Operation,
    ) -> Result<Operation> {
        Operation::start(&self.context, parent, args)
    }

    /// Dispatch journal, present when `journal_capacity` is non-zero
    pub fn journal(&self) -> Option<&DispatchJournal> {
        self.context.journal.as_ref()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.context.config)
            .field("kinds", &self.context.kinds.read().by_args.len())
            .field("root", &self.root.id())
            .finish()
    }
}
