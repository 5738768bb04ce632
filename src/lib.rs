//! In-process operation tree and event bus for runtime instrumentation.
//!
//! Instrumented code starts [`Operation`]s (an HTTP request, a body parse
//! inside it, ...), emits data while they run and finishes them with a result.
//! Observers register [`EventListener`]s on any operation, usually the
//! [`Registry`]'s Root, and react to start, data and finish events bubbling up
//! from descendants without the instrumented code knowing about them.

pub mod config;
pub mod error;
pub mod journal;
pub mod listener;
pub mod operation;
pub mod registry;

pub use config::Config;
pub use error::{OpbusError, Result};
pub use journal::{DispatchJournal, DispatchRecord};
pub use listener::{EventKind, EventListener, Unregister};
pub use operation::{Ancestors, Operation};
pub use registry::{Registry, TypeKey};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{OpbusError, Result};
    pub use crate::listener::{EventKind, EventListener, Unregister};
    pub use crate::operation::Operation;
    pub use crate::registry::Registry;
}
