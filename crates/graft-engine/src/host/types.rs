//! Host type descriptors
//!
//! Immutable descriptors for host classes and interfaces, their operations,
//! constructors and fields. Everything here is shared behind `Arc` and never
//! mutated after definition; generated subtypes additionally carry a
//! [`GeneratedInfo`] record with their static dispatcher slot.

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustc_hash::FxHashSet;

use super::loader::Loader;
use super::object::ObjectRef;
use super::value::{ArrayRef, PrimitiveKind, Value};
use super::{HostError, HostResult, OBJECT, STRING};
use crate::codec;
use crate::dispatch::Dispatcher;

/// Global counter for host type IDs
static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a host type within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostTypeId(pub u64);

impl HostTypeId {
    /// Allocate a fresh type ID
    pub fn next() -> Self {
        HostTypeId(NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Value types
// ============================================================================

/// Static type of a parameter, return value or field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// No value (return types only)
    Void,
    /// A primitive kind
    Primitive(PrimitiveKind),
    /// A reference type, by qualified name
    Object(Arc<str>),
    /// An array of the element type
    Array(Box<ValueType>),
}

impl ValueType {
    /// `int`
    pub fn int() -> Self {
        ValueType::Primitive(PrimitiveKind::Int)
    }

    /// `long`
    pub fn long() -> Self {
        ValueType::Primitive(PrimitiveKind::Long)
    }

    /// `boolean`
    pub fn boolean() -> Self {
        ValueType::Primitive(PrimitiveKind::Boolean)
    }

    /// `double`
    pub fn double() -> Self {
        ValueType::Primitive(PrimitiveKind::Double)
    }

    /// `host.lang.String`
    pub fn string() -> Self {
        ValueType::Object(Arc::from(STRING))
    }

    /// `host.lang.Object`
    pub fn object() -> Self {
        ValueType::Object(Arc::from(OBJECT))
    }

    /// A named reference type
    pub fn named(name: &str) -> Self {
        ValueType::Object(Arc::from(name))
    }

    /// Array of `element`
    pub fn array_of(element: ValueType) -> Self {
        ValueType::Array(Box::new(element))
    }

    /// Check for `void`
    pub fn is_void(&self) -> bool {
        matches!(self, ValueType::Void)
    }

    /// Primitive kind, if this is a primitive type
    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            ValueType::Primitive(k) => Some(*k),
            _ => None,
        }
    }

    /// Default value of a slot of this type
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Void => Value::Void,
            ValueType::Primitive(k) => Value::Prim(k.zero()),
            ValueType::Object(_) | ValueType::Array(_) => Value::Null,
        }
    }

    /// Check whether `value` can be stored in a slot of this type as-is
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Void, Value::Void) => true,
            (ValueType::Primitive(k), Value::Prim(p)) => p.kind() == *k,
            (ValueType::Object(_) | ValueType::Array(_), Value::Null) => true,
            (ValueType::Array(_), Value::Array(_)) => true,
            (ValueType::Object(name), v) => reference_accepts(name, v),
            _ => false,
        }
    }

    /// Check whether `value` can be passed as an argument of this type
    ///
    /// Unlike [`ValueType::accepts`], boxing and unboxing of the matching
    /// primitive kind are allowed.
    pub fn accepts_argument(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Primitive(k), Value::Prim(p) | Value::Boxed(p)) => p.kind() == *k,
            _ => self.accepts(&codec::box_value(value.clone())),
        }
    }
}

fn reference_accepts(name: &str, value: &Value) -> bool {
    match value {
        Value::Str(_) => name == STRING || name == OBJECT,
        Value::Boxed(p) => name == codec::boxed_type_name(p.kind()) || name == OBJECT,
        Value::Object(o) => o.class().is_subtype_of(name),
        Value::Array(_) | Value::Throwable(_) | Value::Foreign(_) => name == OBJECT,
        _ => false,
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Void => write!(f, "void"),
            ValueType::Primitive(k) => write!(f, "{}", k.keyword()),
            ValueType::Object(name) => write!(f, "{}", name),
            ValueType::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}

// ============================================================================
// Modifiers
// ============================================================================

/// Modifier set of a type, operation, constructor or field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(u16);

impl Modifiers {
    /// No modifiers (package visibility)
    pub const NONE: Modifiers = Modifiers(0);
    /// `public`
    pub const PUBLIC: Modifiers = Modifiers(0x0001);
    /// `private`
    pub const PRIVATE: Modifiers = Modifiers(0x0002);
    /// `protected`
    pub const PROTECTED: Modifiers = Modifiers(0x0004);
    /// `static`
    pub const STATIC: Modifiers = Modifiers(0x0008);
    /// `final`
    pub const FINAL: Modifiers = Modifiers(0x0010);
    /// `abstract`
    pub const ABSTRACT: Modifiers = Modifiers(0x0400);

    /// Raw bits
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Check that every modifier in `other` is present
    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    /// This set without the modifiers in `other`
    pub fn without(self, other: Modifiers) -> Modifiers {
        Modifiers(self.0 & !other.0)
    }

    /// `public`
    pub fn is_public(self) -> bool {
        self.contains(Self::PUBLIC)
    }

    /// `protected`
    pub fn is_protected(self) -> bool {
        self.contains(Self::PROTECTED)
    }

    /// `private`
    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    /// Package visibility (none of public, protected, private)
    pub fn is_package(self) -> bool {
        self.0 & (Self::PUBLIC.0 | Self::PROTECTED.0 | Self::PRIVATE.0) == 0
    }

    /// `static`
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    /// `final`
    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }

    /// `abstract`
    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }
}

impl BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words = Vec::new();
        if self.is_public() {
            words.push("public");
        }
        if self.is_protected() {
            words.push("protected");
        }
        if self.is_private() {
            words.push("private");
        }
        if self.is_static() {
            words.push("static");
        }
        if self.is_final() {
            words.push("final");
        }
        if self.is_abstract() {
            words.push("abstract");
        }
        write!(f, "{}", words.join(" "))
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Override slot identity: two operations occupy the same slot iff name,
/// return type and parameter types are identical
///
/// The derived ordering (name, then return type, then parameters) is the
/// stable order used for operation tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    /// Operation name
    pub name: Arc<str>,
    /// Return type
    pub returns: ValueType,
    /// Parameter types
    pub params: Vec<ValueType>,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        write!(f, "{} {}({})", self.returns, self.name, params.join(", "))
    }
}

/// Native operation body
pub type NativeMethod = Arc<dyn Fn(&ObjectRef, &[Value]) -> HostResult<Value> + Send + Sync>;

/// Native constructor body, run against an already-allocated object
pub type NativeConstructor = Arc<dyn Fn(&ObjectRef, &[Value]) -> HostResult<()> + Send + Sync>;

/// A body produced by a code emitter back-end
pub trait CompiledBody: Send + Sync {
    /// Execute the body with `this` and the declared arguments
    fn run(&self, this: &ObjectRef, args: &[Value]) -> HostResult<Value>;

    /// Name of the back-end that produced this body
    fn backend(&self) -> &'static str;
}

/// Body of an operation
#[derive(Clone)]
pub enum MethodBody {
    /// No body; invoking raises [`HostError::AbstractMethod`]
    Abstract,
    /// Native host implementation
    Native(NativeMethod),
    /// Generated code
    Compiled(Arc<dyn CompiledBody>),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Abstract => write!(f, "Abstract"),
            MethodBody::Native(_) => write!(f, "Native"),
            MethodBody::Compiled(body) => write!(f, "Compiled({})", body.backend()),
        }
    }
}

/// An operation declared by a host type
#[derive(Debug, Clone)]
pub struct Method {
    /// Operation name
    pub name: Arc<str>,
    /// Parameter types
    pub params: Vec<ValueType>,
    /// Return type
    pub returns: ValueType,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Qualified name of the declaring type
    pub declaring: Arc<str>,
    /// Identity of the declaring type
    pub declaring_id: HostTypeId,
    /// Body
    pub body: MethodBody,
}

impl Method {
    /// Override slot of this operation
    pub fn slot(&self) -> SlotKey {
        SlotKey {
            name: self.name.clone(),
            returns: self.returns.clone(),
            params: self.params.clone(),
        }
    }

    /// Check whether this operation occupies `slot`
    pub fn occupies(&self, slot: &SlotKey) -> bool {
        *self.name == *slot.name && self.returns == slot.returns && self.params == slot.params
    }

    /// Check whether two operations occupy the same override slot
    pub fn same_slot(&self, other: &Method) -> bool {
        self.name == other.name && self.returns == other.returns && self.params == other.params
    }

    /// Binary method descriptor, e.g. `(IJ)Lhost/lang/String;`
    pub fn descriptor(&self) -> String {
        codec::method_descriptor(&self.params, &self.returns)
    }

    /// Check whether `args` fit the parameter list without conversion
    pub fn accepts_args(&self, args: &[Value]) -> bool {
        self.params.len() == args.len() && self.params.iter().zip(args).all(|(p, a)| p.accepts_argument(a))
    }

    /// Abstract (no body)
    pub fn is_abstract(&self) -> bool {
        self.modifiers.is_abstract() || matches!(self.body, MethodBody::Abstract)
    }

    /// Can be reached through virtual dispatch
    pub fn is_virtual(&self) -> bool {
        !self.modifiers.is_static() && !self.modifiers.is_private()
    }

    /// Execute this exact body, bypassing virtual dispatch
    pub fn invoke_direct(&self, this: &ObjectRef, args: &[Value]) -> HostResult<Value> {
        if args.len() != self.params.len() {
            return Err(HostError::ArgumentCount {
                operation: self.to_string(),
                expected: self.params.len(),
                got: args.len(),
            });
        }
        match &self.body {
            MethodBody::Abstract => Err(HostError::AbstractMethod {
                operation: self.to_string(),
            }),
            MethodBody::Native(f) => f(this, args),
            MethodBody::Compiled(body) => body.run(this, args),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.declaring, self.name, self.descriptor())
    }
}

/// Body of a constructor
#[derive(Clone)]
pub enum ConstructorBody {
    /// Native host implementation
    Native(NativeConstructor),
    /// Generated code
    Compiled(Arc<dyn CompiledBody>),
}

/// A constructor declared by a host class
#[derive(Clone)]
pub struct Constructor {
    /// Parameter types
    pub params: Vec<ValueType>,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Qualified name of the declaring type
    pub declaring: Arc<str>,
    /// Body
    pub body: ConstructorBody,
}

impl Constructor {
    /// Run this constructor against an allocated object
    pub fn invoke(&self, this: &ObjectRef, args: &[Value]) -> HostResult<()> {
        if args.len() != self.params.len() {
            return Err(HostError::ArgumentCount {
                operation: self.to_string(),
                expected: self.params.len(),
                got: args.len(),
            });
        }
        match &self.body {
            ConstructorBody::Native(f) => f(this, args),
            ConstructorBody::Compiled(body) => body.run(this, args).map(|_| ()),
        }
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constructor({})", self)
    }
}

impl fmt::Display for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.<init>{}",
            self.declaring,
            codec::method_descriptor(&self.params, &ValueType::Void)
        )
    }
}

/// An instance field declared by a host class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    /// Field name
    pub name: Arc<str>,
    /// Field type
    pub ty: ValueType,
    /// Modifiers
    pub modifiers: Modifiers,
}

// ============================================================================
// Types
// ============================================================================

/// Class or interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// A class (possibly abstract)
    Class,
    /// An interface
    Interface,
}

/// Role of a generated type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Intermediate layer: abstract stubs and property storage
    Bridge,
    /// Dispatching layer: thunks and invoke-original accessors
    Proxy,
}

impl Role {
    /// Suffix used in generated type names
    pub fn suffix(self) -> &'static str {
        match self {
            Role::Bridge => "Bridge",
            Role::Proxy => "Proxy",
        }
    }
}

/// Generation record attached to generated types
pub struct GeneratedInfo {
    /// Role of this layer
    pub role: Role,
    /// Host type being extended
    pub base: Arc<HostType>,
    /// Operation table, indexed by `OperationId` (empty for bridges)
    pub operations: Vec<Arc<Method>>,
    /// Interfaces requested for this layer, excluding the bridge capability
    pub requested_interfaces: Vec<Arc<HostType>>,
    /// Operation table as a host array, loaded by thunks
    pub(crate) operation_table: ArrayRef,
    /// Static dispatcher slot, set at most once
    pub(crate) dispatcher: OnceCell<Arc<dyn Dispatcher>>,
}

impl GeneratedInfo {
    /// Create a generation record
    pub fn new(
        role: Role,
        base: Arc<HostType>,
        operations: Vec<Arc<Method>>,
        requested_interfaces: Vec<Arc<HostType>>,
    ) -> Self {
        let table = (0..operations.len())
            .map(|i| Value::Operation(crate::dispatch::OperationId(i as u32)))
            .collect();
        Self {
            role,
            base,
            operations,
            requested_interfaces,
            operation_table: Arc::new(parking_lot::Mutex::new(table)),
            dispatcher: OnceCell::new(),
        }
    }

    /// Currently installed dispatcher
    pub fn dispatcher(&self) -> Option<&Arc<dyn Dispatcher>> {
        self.dispatcher.get()
    }
}

impl fmt::Debug for GeneratedInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedInfo")
            .field("role", &self.role)
            .field("base", &self.base.name)
            .field("operations", &self.operations.len())
            .field("dispatcher", &self.dispatcher.get().is_some())
            .finish()
    }
}

/// Descriptor of a host class or interface
pub struct HostType {
    /// Identity
    pub id: HostTypeId,
    /// Qualified name (`pkg.sub.Name`)
    pub name: Arc<str>,
    /// Class or interface
    pub kind: TypeKind,
    /// Type modifiers
    pub modifiers: Modifiers,
    /// Superclass (`None` for the root and for interfaces)
    pub superclass: Option<Arc<HostType>>,
    /// Directly implemented (or, for interfaces, extended) interfaces
    pub interfaces: Vec<Arc<HostType>>,
    /// Declared operations
    pub methods: Vec<Arc<Method>>,
    /// Declared constructors
    pub constructors: Vec<Arc<Constructor>>,
    /// Declared instance fields
    pub fields: Vec<FieldDecl>,
    /// Defining loader
    pub loader: Arc<Loader>,
    /// Generation record, for generated types only
    pub generated: Option<Arc<GeneratedInfo>>,
}

impl HostType {
    /// Name without the package prefix
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Interface type
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Abstract class (or interface)
    pub fn is_abstract(&self) -> bool {
        self.is_interface() || self.modifiers.is_abstract()
    }

    /// Final class
    pub fn is_final(&self) -> bool {
        self.modifiers.is_final()
    }

    /// Binary descriptor, e.g. `Ldemo/Panel;`
    pub fn descriptor(&self) -> String {
        codec::descriptor(&ValueType::Object(self.name.clone()))
    }

    /// This type followed by its superclass chain, most-derived first
    pub fn ancestors(&self) -> impl Iterator<Item = &HostType> {
        std::iter::successors(Some(self), |t| t.superclass.as_deref())
    }

    /// Every interface reachable from this type's class chain, including
    /// super-interfaces, in discovery order without duplicates
    pub fn all_interfaces(&self) -> Vec<Arc<HostType>> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for ty in self.ancestors() {
            for iface in &ty.interfaces {
                collect_interface(iface, &mut seen, &mut out);
            }
        }
        out
    }

    /// Check whether this type is, extends or implements `name`
    pub fn is_subtype_of(&self, name: &str) -> bool {
        if name == OBJECT || self.ancestors().any(|t| &*t.name == name) {
            return true;
        }
        self.all_interfaces().iter().any(|i| &*i.name == name)
    }

    /// Resolve the operation occupying `slot` through virtual dispatch
    pub fn find_virtual(&self, slot: &SlotKey) -> Option<Arc<Method>> {
        let in_chain = self
            .ancestors()
            .flat_map(|t| t.methods.iter())
            .find(|m| m.is_virtual() && m.occupies(slot));
        if let Some(m) = in_chain {
            return Some(m.clone());
        }
        self.all_interfaces()
            .iter()
            .flat_map(|i| i.methods.iter())
            .find(|m| m.is_virtual() && m.occupies(slot))
            .cloned()
    }

    /// Resolve the most-derived virtual operation with `name` and `arity`
    pub fn find_method(&self, name: &str, arity: usize) -> Option<Arc<Method>> {
        let matches = |m: &&Arc<Method>| m.is_virtual() && &*m.name == name && m.params.len() == arity;
        if let Some(m) = self.ancestors().flat_map(|t| t.methods.iter()).find(matches) {
            return Some(m.clone());
        }
        self.all_interfaces()
            .iter()
            .flat_map(|i| i.methods.iter())
            .find(matches)
            .cloned()
    }

    /// Resolve the virtual operation a call with `args` should reach
    ///
    /// Among same-name, same-arity overloads the most-derived one whose
    /// parameters accept the arguments wins. When none does, the first
    /// candidate is returned and argument conversion reports the mismatch.
    pub fn find_method_for(&self, name: &str, args: &[Value]) -> Option<Arc<Method>> {
        let interfaces = self.all_interfaces();
        let candidates: Vec<&Arc<Method>> = self
            .ancestors()
            .flat_map(|t| t.methods.iter())
            .chain(interfaces.iter().flat_map(|i| i.methods.iter()))
            .filter(|m| m.is_virtual() && &*m.name == name && m.params.len() == args.len())
            .collect();
        candidates
            .iter()
            .find(|m| m.accepts_args(args))
            .or(candidates.first())
            .map(|m| Arc::clone(*m))
    }

    /// Declared constructor with exactly these parameter types
    pub fn find_constructor(&self, params: &[ValueType]) -> Option<Arc<Constructor>> {
        self.constructors.iter().find(|c| c.params == params).cloned()
    }

    /// Field declared by this type or an ancestor
    pub fn find_field(&self, name: &str) -> Option<&FieldDecl> {
        self.ancestors()
            .flat_map(|t| t.fields.iter())
            .find(|f| &*f.name == name)
    }

    /// Generated type of either role
    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }

    /// The nearest proxy layer in this type's chain
    pub fn proxy_info(&self) -> Option<&GeneratedInfo> {
        self.ancestors()
            .filter_map(|t| t.generated.as_deref())
            .find(|g| g.role == Role::Proxy)
    }
}

fn collect_interface(iface: &Arc<HostType>, seen: &mut FxHashSet<HostTypeId>, out: &mut Vec<Arc<HostType>>) {
    if !seen.insert(iface.id) {
        return;
    }
    out.push(iface.clone());
    for parent in &iface.interfaces {
        collect_interface(parent, seen, out);
    }
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("superclass", &self.superclass.as_ref().map(|s| s.name.clone()))
            .field("methods", &self.methods.len())
            .field("generated", &self.generated)
            .finish()
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TypeKind::Class => write!(f, "class {}", self.name),
            TypeKind::Interface => write!(f, "interface {}", self.name),
        }
    }
}
