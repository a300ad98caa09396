//! Bridge instance lifecycle
//!
//! An [`Instance`] is the interpreter-level object; it owns its generated
//! host object (the bridge), which points back at it through a set-once weak
//! reference. While the base constructor runs, the per-thread marker kept by
//! [`ConstructionTracker`] names the bridge under construction so that the
//! dispatcher sends every intercepted call to the host default instead of
//! the not-yet-bound interpreter object.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::dispatch::InvocationCache;
use crate::error::{ConfigError, ConstructionError, PlatformError, PlatformResult};
use crate::host::{
    ExceptionKind, HostError, HostException, HostObject, HostResult, HostType, Method, ObjectId,
    ObjectRef, Value, ValueType,
};
use crate::script::ScriptType;

// ============================================================================
// Construction marker
// ============================================================================

/// Per-thread record of the bridge whose base constructor is running
#[derive(Debug, Default)]
pub struct ConstructionTracker {
    active: DashMap<ThreadId, ObjectId>,
}

impl ConstructionTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `bridge` as under construction on the current thread until the
    /// returned guard is dropped
    ///
    /// Nested constructions on one thread restore the outer marker on exit.
    pub fn begin(&self, bridge: &ObjectRef) -> ConstructionGuard<'_> {
        let thread = thread::current().id();
        let previous = self.active.insert(thread, bridge.id());
        ConstructionGuard {
            tracker: self,
            thread,
            previous,
        }
    }

    /// Check whether `object` is under construction on the current thread
    pub fn is_constructing(&self, object: &HostObject) -> bool {
        self.active
            .get(&thread::current().id())
            .is_some_and(|id| *id == object.id())
    }

    /// Bridge under construction on the current thread
    pub fn active(&self) -> Option<ObjectId> {
        self.active.get(&thread::current().id()).map(|id| *id)
    }
}

/// Scope of one construction; clears the marker when dropped
pub struct ConstructionGuard<'a> {
    tracker: &'a ConstructionTracker,
    thread: ThreadId,
    previous: Option<ObjectId>,
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        match self.previous {
            Some(outer) => {
                self.tracker.active.insert(self.thread, outer);
            }
            None => {
                self.tracker.active.remove(&self.thread);
            }
        }
    }
}

// ============================================================================
// Instances
// ============================================================================

/// A property of an instance
#[derive(Debug, Clone)]
enum Property {
    /// Interpreter-held value
    Value(Value),
    /// Live view of a field of the bridge
    Field(Arc<str>),
}

/// Interpreter-level object extending a host type
pub struct Instance {
    script_type: Arc<ScriptType>,
    bridge: ObjectRef,
    originals: Arc<InvocationCache>,
    state: Mutex<FxHashMap<Arc<str>, Property>>,
}

impl Instance {
    /// Interpreter-level type
    pub fn script_type(&self) -> &Arc<ScriptType> {
        &self.script_type
    }

    /// Extended host type
    pub fn base(&self) -> &Arc<HostType> {
        &self.script_type.base
    }

    /// Generated host object owned by this instance
    pub fn bridge(&self) -> &ObjectRef {
        &self.bridge
    }

    /// Read a property
    pub fn get_property(&self, name: &str) -> HostResult<Value> {
        let property = self.state.lock().get(name).cloned();
        match property {
            Some(Property::Value(v)) => Ok(v),
            Some(Property::Field(field)) => self.bridge.get_field(&field),
            None => Err(HostError::NoSuchField(format!("{}.{}", self.script_type.name, name))),
        }
    }

    /// Write a property; host fields are written through to the bridge
    pub fn set_property(&self, name: &str, value: Value) -> HostResult<()> {
        let field = match self.state.lock().get(name) {
            Some(Property::Field(field)) => Some(field.clone()),
            _ => None,
        };
        match field {
            Some(field) => self.bridge.set_field(&field, value),
            None => {
                self.state.lock().insert(Arc::from(name), Property::Value(value));
                Ok(())
            }
        }
    }

    /// Check whether a property is defined
    pub fn has_property(&self, name: &str) -> bool {
        self.state.lock().contains_key(name)
    }

    /// Call an operation through the bridge, as host code would
    pub fn call(&self, name: &str, args: &[Value]) -> HostResult<Value> {
        self.bridge.call(name, args)
    }

    /// Call the host default of an intercepted operation, bypassing dispatch
    pub fn call_original(&self, name: &str, args: Vec<Value>) -> HostResult<Value> {
        let operation = self
            .bridge
            .class()
            .proxy_info()
            .and_then(|info| {
                let candidates: Vec<&Arc<Method>> = info
                    .operations
                    .iter()
                    .filter(|m| &*m.name == name && m.params.len() == args.len())
                    .collect();
                candidates
                    .iter()
                    .find(|m| m.accepts_args(&args))
                    .or(candidates.first())
                    .map(|m| Arc::clone(*m))
            })
            .ok_or_else(|| HostError::NoSuchMethod(format!("{}.{}/{}", self.bridge.class().name, name, args.len())))?;
        self.originals.call_original(&self.bridge, &operation, args)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("script_type", &self.script_type.name)
            .field("bridge", &self.bridge.id())
            .finish()
    }
}

/// Everything needed to construct one instance
pub(crate) struct Construction<'a> {
    /// Generated proxy type
    pub proxy: &'a Arc<HostType>,
    /// Interpreter-level type
    pub script_type: &'a Arc<ScriptType>,
    /// Constructor parameter types
    pub arg_types: &'a [ValueType],
    /// Constructor arguments
    pub args: &'a [Value],
    /// Construction marker
    pub tracker: &'a ConstructionTracker,
    /// Invoke-original cache shared with the dispatcher
    pub originals: &'a Arc<InvocationCache>,
}

impl Construction<'_> {
    /// Allocate the bridge, run the base constructor under the construction
    /// marker, then bind the new instance
    pub(crate) fn run(self) -> PlatformResult<Arc<Instance>> {
        let base_name = self.script_type.base.name.to_string();
        if self.arg_types.len() != self.args.len() {
            return Err(ConfigError::ArgumentCountMismatch {
                types: self.arg_types.len(),
                values: self.args.len(),
            }
            .into());
        }
        let ctor = self.proxy.find_constructor(self.arg_types).ok_or_else(|| {
            let params: Vec<String> = self.arg_types.iter().map(|t| t.to_string()).collect();
            ConfigError::NoSuchConstructor {
                type_name: base_name.clone(),
                params: params.join(", "),
            }
        })?;

        let bridge = HostObject::allocate(self.proxy)?;
        let _guard = self.tracker.begin(&bridge);
        debug!(type_name = %base_name, bridge = %bridge.id(), "constructing bridge");
        ctor.invoke(&bridge, self.args)
            .map_err(|e| launder(&base_name, e))?;

        let instance = Arc::new(Instance {
            script_type: self.script_type.clone(),
            bridge: bridge.clone(),
            originals: self.originals.clone(),
            state: Mutex::new(host_properties(self.script_type)),
        });
        if !bridge.bind(&instance) {
            return Err(HostError::Exception(HostException::new(
                ExceptionKind::IllegalState,
                format!("bridge {} is already bound", bridge.id()),
            ))
            .into());
        }
        debug!(type_name = %base_name, bridge = %bridge.id(), "bound instance");
        Ok(instance)
    }
}

/// Fields of the base chain the script does not define, as live properties
fn host_properties(script_type: &ScriptType) -> FxHashMap<Arc<str>, Property> {
    let mut state = FxHashMap::default();
    for ty in script_type.base.ancestors() {
        for field in &ty.fields {
            if field.modifiers.is_static() || script_type.defines(&field.name) {
                continue;
            }
            state
                .entry(field.name.clone())
                .or_insert_with(|| Property::Field(field.name.clone()));
        }
    }
    state
}

/// Unchecked exceptions propagate as they are; checked ones are wrapped
fn launder(type_name: &str, error: HostError) -> PlatformError {
    if error.is_checked() {
        ConstructionError::Failed {
            type_name: type_name.to_string(),
            cause: error,
        }
        .into()
    } else {
        error.into()
    }
}
