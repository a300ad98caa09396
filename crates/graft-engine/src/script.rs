//! Interpreter collaborators
//!
//! The engine does not interpret anything itself. It sees the interpreter
//! through three seams:
//!
//! - [`ScriptType`]: metadata of an interpreter-level type extending a host
//!   type, with its function table
//! - [`FunctionResolver`]: picks the function that answers a call
//! - [`ValueWrapper`]: converts values between the interpreter and the host
//!
//! [`TableResolver`] and [`StandardWrapper`] are the default
//! implementations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::bridge::Instance;
use crate::codec;
use crate::host::{HostError, HostResult, HostType, Method, SlotKey, Value, ValueType};

/// Error raised by an interpreter-level function
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    /// Message
    pub message: String,
}

impl ScriptError {
    /// Create a new script error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<HostError> for ScriptError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Script(inner) => inner,
            other => ScriptError::new(other.to_string()),
        }
    }
}

/// Body of a script function
pub type ScriptFn = Arc<dyn Fn(&Instance, &[Value]) -> Result<Value, ScriptError> + Send + Sync>;

/// A function of a script type
///
/// Either written in the script (it has a body) or imported from the
/// extended host hierarchy (it has a source operation and no body).
#[derive(Clone)]
pub struct ScriptFunction {
    /// Function name
    pub name: Arc<str>,
    /// Number of parameters; `None` accepts any number
    pub arity: Option<usize>,
    /// Host operation this function was imported from
    pub source: Option<Arc<Method>>,
    body: Option<ScriptFn>,
}

impl ScriptFunction {
    /// A function with a script body
    pub fn script<F>(name: &str, arity: Option<usize>, body: F) -> Self
    where
        F: Fn(&Instance, &[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            arity,
            source: None,
            body: Some(Arc::new(body)),
        }
    }

    /// A function standing for a host operation
    pub fn imported(method: &Arc<Method>) -> Self {
        Self {
            name: method.name.clone(),
            arity: Some(method.params.len()),
            source: Some(method.clone()),
            body: None,
        }
    }

    /// Script body, if any
    pub fn body(&self) -> Option<&ScriptFn> {
        self.body.as_ref()
    }

    /// Defined in the script
    pub fn is_script(&self) -> bool {
        self.body.is_some()
    }

    /// Check whether the function takes `argc` arguments
    pub fn accepts(&self, argc: usize) -> bool {
        self.arity.map_or(true, |n| n == argc)
    }

    /// Run the script body
    pub fn call(&self, instance: &Instance, args: &[Value]) -> Result<Value, ScriptError> {
        match &self.body {
            Some(body) => body(instance, args),
            None => Err(ScriptError::new(format!("{} has no script body", self.name))),
        }
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("source", &self.source.as_ref().map(|m| m.to_string()))
            .field("script", &self.body.is_some())
            .finish()
    }
}

// ============================================================================
// Script types
// ============================================================================

/// Global counter for script type IDs
static NEXT_SCRIPT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a script type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptTypeId(pub u64);

/// Interpreter-level type extending a host type
pub struct ScriptType {
    /// Identity
    pub id: ScriptTypeId,
    /// Type name
    pub name: Arc<str>,
    /// Extended host type
    pub base: Arc<HostType>,
    /// Additionally implemented host interfaces
    pub interfaces: Vec<Arc<HostType>>,
    /// Host interfaces whose accessors become backed properties
    pub property_interfaces: Vec<Arc<HostType>>,
    functions: FxHashMap<Arc<str>, Vec<Arc<ScriptFunction>>>,
}

impl ScriptType {
    /// Functions named `name`, script-defined ones first
    pub fn functions(&self, name: &str) -> &[Arc<ScriptFunction>] {
        self.functions.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Check whether the script defines `name` itself
    pub fn defines(&self, name: &str) -> bool {
        self.functions(name).iter().any(|f| f.is_script())
    }
}

impl fmt::Debug for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base", &self.base.name)
            .field("functions", &self.functions.len())
            .finish()
    }
}

/// Builder for a [`ScriptType`]
pub struct ScriptTypeBuilder {
    name: Arc<str>,
    base: Arc<HostType>,
    interfaces: Vec<Arc<HostType>>,
    property_interfaces: Vec<Arc<HostType>>,
    imported: Vec<Arc<Method>>,
    seen: FxHashSet<SlotKey>,
    scripted: Vec<ScriptFunction>,
}

impl ScriptTypeBuilder {
    /// Start a script type extending `base`, importing every virtual
    /// operation of its hierarchy
    pub fn extending(name: &str, base: &Arc<HostType>) -> Self {
        let mut builder = Self {
            name: Arc::from(name),
            base: base.clone(),
            interfaces: Vec::new(),
            property_interfaces: Vec::new(),
            imported: Vec::new(),
            seen: FxHashSet::default(),
            scripted: Vec::new(),
        };
        for ty in base.ancestors() {
            builder.import(&ty.methods);
        }
        for iface in base.all_interfaces() {
            builder.import(&iface.methods);
        }
        builder
    }

    fn import(&mut self, methods: &[Arc<Method>]) {
        for method in methods.iter().filter(|m| m.is_virtual()) {
            if self.seen.insert(method.slot()) {
                self.imported.push(method.clone());
            }
        }
    }

    fn import_interface(&mut self, iface: &Arc<HostType>) {
        self.import(&iface.methods);
        for parent in &iface.interfaces {
            self.import_interface(parent);
        }
    }

    /// Implement an additional host interface
    pub fn implementing(mut self, iface: &Arc<HostType>) -> Self {
        self.import_interface(iface);
        self.interfaces.push(iface.clone());
        self
    }

    /// Back the accessors of `iface` with generated fields
    pub fn property_interface(mut self, iface: &Arc<HostType>) -> Self {
        self.import_interface(iface);
        self.property_interfaces.push(iface.clone());
        self
    }

    /// Define a script function
    pub fn function<F>(mut self, name: &str, arity: Option<usize>, body: F) -> Self
    where
        F: Fn(&Instance, &[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        self.scripted.push(ScriptFunction::script(name, arity, body));
        self
    }

    /// Build the type
    pub fn build(self) -> Arc<ScriptType> {
        let mut functions: FxHashMap<Arc<str>, Vec<Arc<ScriptFunction>>> = FxHashMap::default();
        for f in self.scripted {
            functions.entry(f.name.clone()).or_default().push(Arc::new(f));
        }
        for method in &self.imported {
            functions
                .entry(method.name.clone())
                .or_default()
                .push(Arc::new(ScriptFunction::imported(method)));
        }
        Arc::new(ScriptType {
            id: ScriptTypeId(NEXT_SCRIPT_TYPE_ID.fetch_add(1, Ordering::Relaxed)),
            name: self.name,
            base: self.base,
            interfaces: self.interfaces,
            property_interfaces: self.property_interfaces,
            functions,
        })
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// The interpreter's function resolution
pub trait FunctionResolver: Send + Sync {
    /// Function of `ty` answering a call of `name` with `args`, if any
    fn resolve_override(&self, ty: &ScriptType, name: &str, args: &[Value]) -> Option<Arc<ScriptFunction>>;

    /// Check whether `function` stands for an operation that is abstract on
    /// the host side (so that no default exists)
    fn is_operation_abstract_on_host(&self, function: &ScriptFunction) -> bool;
}

/// Resolution by name and arity over the script type's function table
///
/// Script-defined functions win over imported host operations; among
/// imported operations of equal arity the one whose parameter types accept
/// the arguments is chosen.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableResolver;

impl TableResolver {
    /// Create a new table resolver
    pub fn new() -> Self {
        Self
    }
}

impl FunctionResolver for TableResolver {
    fn resolve_override(&self, ty: &ScriptType, name: &str, args: &[Value]) -> Option<Arc<ScriptFunction>> {
        let candidates = ty.functions(name);
        if let Some(f) = candidates.iter().find(|f| f.is_script() && f.accepts(args.len())) {
            return Some(f.clone());
        }
        let imported = || candidates.iter().filter(|f| !f.is_script() && f.accepts(args.len()));
        imported()
            .find(|f| match &f.source {
                Some(m) => m.accepts_args(args),
                None => false,
            })
            .or_else(|| imported().next())
            .cloned()
    }

    fn is_operation_abstract_on_host(&self, function: &ScriptFunction) -> bool {
        if function.is_script() {
            return false;
        }
        function.source.as_ref().map_or(true, |m| m.is_abstract())
    }
}

// ============================================================================
// Value wrapping
// ============================================================================

/// Conversion between interpreter and host values
pub trait ValueWrapper: Send + Sync {
    /// Convert an interpreter result to the generic form of `ty`: boxed for
    /// primitive types, a reference otherwise
    fn to_host(&self, value: Value, ty: &ValueType) -> HostResult<Value>;

    /// Convert a host argument for the interpreter
    fn from_host(&self, value: Value) -> Value;
}

/// Default conversions
///
/// Numbers widen and narrow between primitive kinds, strings and null pass
/// through, and the interpreter sees primitives unboxed.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardWrapper;

impl StandardWrapper {
    /// Create a new standard wrapper
    pub fn new() -> Self {
        Self
    }
}

impl ValueWrapper for StandardWrapper {
    fn to_host(&self, value: Value, ty: &ValueType) -> HostResult<Value> {
        let mismatch = |got: &Value| HostError::TypeMismatch {
            expected: ty.to_string(),
            got: got.type_name(),
        };
        let target = match ty {
            ValueType::Void => return Ok(Value::Void),
            ValueType::Primitive(k) => Some(*k),
            ValueType::Object(name) => codec::unboxed_kind(name),
            ValueType::Array(_) => None,
        };
        match (target, value) {
            (Some(kind), Value::Prim(p) | Value::Boxed(p)) => {
                p.convert(kind).map(Value::Boxed).ok_or_else(|| mismatch(&Value::Boxed(p)))
            }
            (Some(kind), Value::Null) if ty.primitive().is_some() => Err(HostError::NullPointer(format!(
                "null returned for {}",
                kind.keyword()
            ))),
            (_, value) => {
                let value = codec::box_value(value);
                if ty.accepts(&value) {
                    Ok(value)
                } else {
                    Err(mismatch(&value))
                }
            }
        }
    }

    fn from_host(&self, value: Value) -> Value {
        match value {
            Value::Boxed(p) => Value::Prim(p),
            other => other,
        }
    }
}
