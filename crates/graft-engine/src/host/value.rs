//! Host values
//!
//! Tagged values as they flow through host frames, generated thunks and the
//! dispatch boundary. Primitives appear either raw (`Prim`, what a typed host
//! slot holds) or boxed (`Boxed`, what crosses the generic dispatch boundary).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::object::ObjectRef;
use super::HostException;
use crate::dispatch::{Dispatcher, OperationId};

/// The eight primitive kinds of the host model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveKind {
    /// `boolean`
    Boolean,
    /// `byte` (8-bit signed)
    Byte,
    /// `char` (16-bit unsigned code unit)
    Char,
    /// `short` (16-bit signed)
    Short,
    /// `int` (32-bit signed)
    Int,
    /// `long` (64-bit signed)
    Long,
    /// `float` (32-bit IEEE 754)
    Float,
    /// `double` (64-bit IEEE 754)
    Double,
}

impl PrimitiveKind {
    /// All kinds, in declaration order
    pub const ALL: [PrimitiveKind; 8] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Byte,
        PrimitiveKind::Char,
        PrimitiveKind::Short,
        PrimitiveKind::Int,
        PrimitiveKind::Long,
        PrimitiveKind::Float,
        PrimitiveKind::Double,
    ];

    /// Source-level keyword for this kind
    pub fn keyword(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
        }
    }

    /// Zero value of this kind (the default for an unset field)
    pub fn zero(self) -> Primitive {
        match self {
            PrimitiveKind::Boolean => Primitive::Boolean(false),
            PrimitiveKind::Byte => Primitive::Byte(0),
            PrimitiveKind::Char => Primitive::Char(0),
            PrimitiveKind::Short => Primitive::Short(0),
            PrimitiveKind::Int => Primitive::Int(0),
            PrimitiveKind::Long => Primitive::Long(0),
            PrimitiveKind::Float => Primitive::Float(0.0),
            PrimitiveKind::Double => Primitive::Double(0.0),
        }
    }
}

/// A primitive host value
///
/// Equality compares floating point values by bit pattern, so NaN payloads
/// and signed zeros survive comparison exactly.
#[derive(Debug, Clone, Copy)]
pub enum Primitive {
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `char`
    Char(u16),
    /// `short`
    Short(i16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
}

impl Primitive {
    /// Kind of this primitive
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Boolean(_) => PrimitiveKind::Boolean,
            Primitive::Byte(_) => PrimitiveKind::Byte,
            Primitive::Char(_) => PrimitiveKind::Char,
            Primitive::Short(_) => PrimitiveKind::Short,
            Primitive::Int(_) => PrimitiveKind::Int,
            Primitive::Long(_) => PrimitiveKind::Long,
            Primitive::Float(_) => PrimitiveKind::Float,
            Primitive::Double(_) => PrimitiveKind::Double,
        }
    }

    /// Raw bit pattern, zero-extended to 64 bits
    pub fn bits(&self) -> u64 {
        match *self {
            Primitive::Boolean(v) => v as u64,
            Primitive::Byte(v) => v as u8 as u64,
            Primitive::Char(v) => v as u64,
            Primitive::Short(v) => v as u16 as u64,
            Primitive::Int(v) => v as u32 as u64,
            Primitive::Long(v) => v as u64,
            Primitive::Float(v) => v.to_bits() as u64,
            Primitive::Double(v) => v.to_bits(),
        }
    }

    /// Convert to another primitive kind with host conversion rules
    ///
    /// Numeric kinds widen and narrow freely (narrowing truncates, float to
    /// integer saturates). `boolean` only converts to itself.
    pub fn convert(self, kind: PrimitiveKind) -> Option<Primitive> {
        if self.kind() == kind {
            return Some(self);
        }
        match self {
            Primitive::Boolean(_) => None,
            Primitive::Float(v) => Self::from_f64(v as f64, kind),
            Primitive::Double(v) => Self::from_f64(v, kind),
            Primitive::Byte(v) => Self::from_i64(v as i64, kind),
            Primitive::Char(v) => Self::from_i64(v as i64, kind),
            Primitive::Short(v) => Self::from_i64(v as i64, kind),
            Primitive::Int(v) => Self::from_i64(v as i64, kind),
            Primitive::Long(v) => Self::from_i64(v, kind),
        }
    }

    fn from_i64(v: i64, kind: PrimitiveKind) -> Option<Primitive> {
        Some(match kind {
            PrimitiveKind::Boolean => return None,
            PrimitiveKind::Byte => Primitive::Byte(v as i8),
            PrimitiveKind::Char => Primitive::Char(v as u16),
            PrimitiveKind::Short => Primitive::Short(v as i16),
            PrimitiveKind::Int => Primitive::Int(v as i32),
            PrimitiveKind::Long => Primitive::Long(v),
            PrimitiveKind::Float => Primitive::Float(v as f32),
            PrimitiveKind::Double => Primitive::Double(v as f64),
        })
    }

    fn from_f64(v: f64, kind: PrimitiveKind) -> Option<Primitive> {
        Some(match kind {
            PrimitiveKind::Boolean => return None,
            PrimitiveKind::Float => Primitive::Float(v as f32),
            PrimitiveKind::Double => Primitive::Double(v),
            PrimitiveKind::Long => Primitive::Long(v as i64),
            PrimitiveKind::Int => Primitive::Int(v as i32),
            // Saturate to int first, then truncate like the host's d2i
            other => return Self::from_i64(i64::from(v as i32), other),
        })
    }
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.bits() == other.bits()
    }
}

impl Eq for Primitive {}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Boolean(v) => write!(f, "{}", v),
            Primitive::Byte(v) => write!(f, "{}", v),
            Primitive::Char(v) => write!(f, "\\u{:04x}", v),
            Primitive::Short(v) => write!(f, "{}", v),
            Primitive::Int(v) => write!(f, "{}", v),
            Primitive::Long(v) => write!(f, "{}L", v),
            Primitive::Float(v) => write!(f, "{}f", v),
            Primitive::Double(v) => write!(f, "{}d", v),
        }
    }
}

/// Shared, mutable host array
pub type ArrayRef = Arc<Mutex<Vec<Value>>>;

/// A host value
#[derive(Clone)]
pub enum Value {
    /// Result of a `void` operation
    Void,
    /// The null reference
    Null,
    /// Raw primitive, as held by a typed slot
    Prim(Primitive),
    /// Boxed primitive, as passed across the generic dispatch boundary
    Boxed(Primitive),
    /// `host.lang.String`
    Str(Arc<str>),
    /// Object reference
    Object(ObjectRef),
    /// Array reference
    Array(ArrayRef),
    /// Dispatcher handle (only produced by generated code)
    Dispatcher(Arc<dyn Dispatcher>),
    /// Operation table entry (only produced by generated code)
    Operation(OperationId),
    /// A throwable about to be raised (only produced by generated code)
    Throwable(Arc<HostException>),
    /// Opaque embedder handle, returned through the bridge capability channel
    Foreign(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Raw `boolean`
    pub fn boolean(v: bool) -> Self {
        Value::Prim(Primitive::Boolean(v))
    }

    /// Raw `byte`
    pub fn byte(v: i8) -> Self {
        Value::Prim(Primitive::Byte(v))
    }

    /// Raw `char`
    pub fn char(v: u16) -> Self {
        Value::Prim(Primitive::Char(v))
    }

    /// Raw `short`
    pub fn short(v: i16) -> Self {
        Value::Prim(Primitive::Short(v))
    }

    /// Raw `int`
    pub fn int(v: i32) -> Self {
        Value::Prim(Primitive::Int(v))
    }

    /// Raw `long`
    pub fn long(v: i64) -> Self {
        Value::Prim(Primitive::Long(v))
    }

    /// Raw `float`
    pub fn float(v: f32) -> Self {
        Value::Prim(Primitive::Float(v))
    }

    /// Raw `double`
    pub fn double(v: f64) -> Self {
        Value::Prim(Primitive::Double(v))
    }

    /// String value
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// New array holding `items`
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    /// Check for the null reference
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Primitive payload, raw or boxed
    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            Value::Prim(p) | Value::Boxed(p) => Some(*p),
            _ => None,
        }
    }

    /// `int` payload, raw or boxed
    pub fn as_int(&self) -> Option<i32> {
        match self.as_primitive() {
            Some(Primitive::Int(v)) => Some(v),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(&**s),
            _ => None,
        }
    }

    /// Object payload
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Human-readable runtime type, used in error messages
    pub fn type_name(&self) -> String {
        match self {
            Value::Void => "void".to_string(),
            Value::Null => "null".to_string(),
            Value::Prim(p) => p.kind().keyword().to_string(),
            Value::Boxed(p) => crate::codec::boxed_type_name(p.kind()).to_string(),
            Value::Str(_) => super::STRING.to_string(),
            Value::Object(o) => o.class().name.to_string(),
            Value::Array(_) => "array".to_string(),
            Value::Dispatcher(_) => "dispatcher".to_string(),
            Value::Operation(_) => "operation".to_string(),
            Value::Throwable(e) => e.class_name().to_string(),
            Value::Foreign(_) => "foreign".to_string(),
        }
    }
}

fn same_allocation<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) | (Value::Null, Value::Null) => true,
            (Value::Prim(a), Value::Prim(b)) | (Value::Boxed(a), Value::Boxed(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Dispatcher(a), Value::Dispatcher(b)) => same_allocation(a, b),
            (Value::Operation(a), Value::Operation(b)) => a == b,
            (Value::Throwable(a), Value::Throwable(b)) => Arc::ptr_eq(a, b),
            (Value::Foreign(a), Value::Foreign(b)) => same_allocation(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "Void"),
            Value::Null => write!(f, "Null"),
            Value::Prim(p) => write!(f, "Prim({:?})", p),
            Value::Boxed(p) => write!(f, "Boxed({:?})", p),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Object(o) => write!(f, "Object({}#{})", o.class().name, o.id()),
            Value::Array(a) => write!(f, "Array(len={})", a.lock().len()),
            Value::Dispatcher(_) => write!(f, "Dispatcher"),
            Value::Operation(op) => write!(f, "Operation({})", op.0),
            Value::Throwable(e) => write!(f, "Throwable({})", e),
            Value::Foreign(_) => write!(f, "Foreign"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::boolean(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(Primitive::Double(f64::NAN), Primitive::Double(f64::NAN));
        assert_ne!(Primitive::Double(0.0), Primitive::Double(-0.0));
        assert_ne!(Primitive::Int(1), Primitive::Long(1));
    }

    #[test]
    fn test_convert_widens_and_narrows() {
        assert_eq!(Primitive::Int(7).convert(PrimitiveKind::Long), Some(Primitive::Long(7)));
        assert_eq!(Primitive::Int(300).convert(PrimitiveKind::Byte), Some(Primitive::Byte(44)));
        assert_eq!(Primitive::Double(2.9).convert(PrimitiveKind::Int), Some(Primitive::Int(2)));
        assert_eq!(Primitive::Boolean(true).convert(PrimitiveKind::Int), None);
        assert_eq!(Primitive::Int(1).convert(PrimitiveKind::Boolean), None);
    }

    #[test]
    fn test_raw_and_boxed_are_distinct() {
        assert_ne!(Value::int(1), Value::Boxed(Primitive::Int(1)));
        assert_eq!(Value::int(1).as_int(), Value::Boxed(Primitive::Int(1)).as_int());
    }

    #[test]
    fn test_string_value() {
        let v = Value::from("hi");
        assert_eq!(v.as_str(), Some("hi"));
        assert_eq!(v.type_name(), "host.lang.String");
    }
}
