//! Dispatch
//!
//! The run-time side of generated thunks. A thunk that finds a dispatcher
//! installed hands it the receiver, an [`OperationId`] indexing the subtype's
//! operation table, and the boxed arguments. The [`RoutingDispatcher`] is the
//! standard implementation: it routes to the interpreter through the
//! [`InvocationRouter`], or to the host default through the
//! [`InvocationCache`] while construction is still in progress.

mod cache;
mod router;

pub use cache::{InvocationCache, OriginalAccessor};
pub use router::{InvocationRouter, RoutingDispatcher};

use std::fmt;

use crate::host::{HostResult, ObjectRef, Value};

/// Index into a generated subtype's operation table
///
/// Assigned once at generation time; stable for the lifetime of that subtype
/// but not across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u32);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receiver of intercepted calls
///
/// Installed once per generated subtype. Arguments arrive boxed; the result
/// is converted back to the operation's declared return type by the thunk.
pub trait Dispatcher: Send + Sync {
    /// Handle one intercepted call
    fn dispatch(&self, this: &ObjectRef, operation: OperationId, args: Vec<Value>) -> HostResult<Value>;
}
