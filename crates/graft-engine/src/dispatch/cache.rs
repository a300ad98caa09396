//! Invocation resolution cache
//!
//! Memoizes, per (runtime type, operation), the invoke-original accessor
//! reaching the host default. Resolution walks the runtime type's chain by
//! name, so it is done once per pair and shared afterwards. Two threads
//! missing the same pair may both resolve; the first insert wins and both
//! results are equivalent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::codec;
use crate::host::{HostError, HostResult, HostType, HostTypeId, Method, ObjectRef, SlotKey, Value};

/// Resolved invoke-original accessor of one operation
#[derive(Debug, Clone)]
pub struct OriginalAccessor {
    /// Intercepted operation
    pub operation: Arc<Method>,
    /// Generated accessor calling the host default
    pub accessor: Arc<Method>,
}

impl OriginalAccessor {
    /// Call the host default with generic arguments
    pub fn invoke(&self, this: &ObjectRef, args: Vec<Value>) -> HostResult<Value> {
        let args = codec::coerce_args(&self.accessor.params, args)?;
        self.accessor.invoke_direct(this, &args)
    }
}

/// Concurrent memo of invoke-original accessors
#[derive(Debug, Default)]
pub struct InvocationCache {
    entries: DashMap<(HostTypeId, SlotKey), Arc<OriginalAccessor>>,
    resolutions: AtomicUsize,
}

impl InvocationCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Accessor reaching the host default of `operation` on `real`
    pub fn resolve(&self, real: &HostType, operation: &Arc<Method>) -> HostResult<Arc<OriginalAccessor>> {
        let key = (real.id, operation.slot());
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.value().clone());
        }

        let accessor = find_accessor(real, operation)?;
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        trace!(type_name = %real.name, accessor = %accessor.name, "resolved invoke-original accessor");

        let resolved = Arc::new(OriginalAccessor {
            operation: operation.clone(),
            accessor,
        });
        Ok(self.entries.entry(key).or_insert(resolved).value().clone())
    }

    /// Run the host default of `operation` on `this`
    pub fn call_original(&self, this: &ObjectRef, operation: &Arc<Method>, args: Vec<Value>) -> HostResult<Value> {
        self.resolve(this.class(), operation)?.invoke(this, args)
    }

    /// Number of cached pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check for an empty cache
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of resolutions performed (including racing duplicates)
    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::Relaxed)
    }
}

fn find_accessor(real: &HostType, operation: &Method) -> HostResult<Arc<Method>> {
    let name = codec::original_accessor_name(&operation.name, &operation.returns);
    real.ancestors()
        .flat_map(|t| t.methods.iter())
        .find(|m| *m.name == *name && m.params == operation.params)
        .cloned()
        .ok_or_else(|| HostError::NoSuchMethod(format!("{}.{}", real.name, name)))
}
