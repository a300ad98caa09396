//! Signature codec
//!
//! Maps host value types to binary descriptors, supplies the box/unbox
//! conversions used at the generic dispatch boundary, and derives the
//! deterministic names of generated types and invoke-original accessors.
//!
//! ## Descriptor grammar
//!
//! | Type            | Descriptor            |
//! |-----------------|-----------------------|
//! | `void`          | `V`                   |
//! | `boolean`       | `Z`                   |
//! | `byte`          | `B`                   |
//! | `char`          | `C`                   |
//! | `short`         | `S`                   |
//! | `int`           | `I`                   |
//! | `long`          | `J`                   |
//! | `float`         | `F`                   |
//! | `double`        | `D`                   |
//! | `a.b.C`         | `La/b/C;`             |
//! | `T[]`           | `[` + descriptor of T |

use sha2::{Digest, Sha256};

use crate::host::{HostError, HostResult, HostType, PrimitiveKind, Role, Value, ValueType};

/// Prefix of invoke-original accessor names
pub const ORIGINAL_PREFIX: &str = "super$";

/// Number of digest bytes kept in generated type names
const DIGEST_BYTES: usize = 16;

/// Binary descriptor of a value type
pub fn descriptor(ty: &ValueType) -> String {
    let mut out = String::new();
    write_descriptor(ty, &mut out);
    out
}

fn write_descriptor(ty: &ValueType, out: &mut String) {
    match ty {
        ValueType::Void => out.push('V'),
        ValueType::Primitive(kind) => out.push(primitive_descriptor(*kind)),
        ValueType::Object(name) => {
            out.push('L');
            out.push_str(&name.replace('.', "/"));
            out.push(';');
        }
        ValueType::Array(elem) => {
            out.push('[');
            write_descriptor(elem, out);
        }
    }
}

/// Single-character descriptor of a primitive kind
pub fn primitive_descriptor(kind: PrimitiveKind) -> char {
    match kind {
        PrimitiveKind::Boolean => 'Z',
        PrimitiveKind::Byte => 'B',
        PrimitiveKind::Char => 'C',
        PrimitiveKind::Short => 'S',
        PrimitiveKind::Int => 'I',
        PrimitiveKind::Long => 'J',
        PrimitiveKind::Float => 'F',
        PrimitiveKind::Double => 'D',
    }
}

/// Binary descriptor of an operation signature, e.g. `(ILhost/lang/String;)V`
pub fn method_descriptor(params: &[ValueType], returns: &ValueType) -> String {
    let mut out = String::from("(");
    for p in params {
        write_descriptor(p, &mut out);
    }
    out.push(')');
    write_descriptor(returns, &mut out);
    out
}

/// Qualified name of the reference type boxing `kind`
pub fn boxed_type_name(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Boolean => "host.lang.Boolean",
        PrimitiveKind::Byte => "host.lang.Byte",
        PrimitiveKind::Char => "host.lang.Character",
        PrimitiveKind::Short => "host.lang.Short",
        PrimitiveKind::Int => "host.lang.Integer",
        PrimitiveKind::Long => "host.lang.Long",
        PrimitiveKind::Float => "host.lang.Float",
        PrimitiveKind::Double => "host.lang.Double",
    }
}

/// Primitive kind boxed by the reference type `name`
pub fn unboxed_kind(name: &str) -> Option<PrimitiveKind> {
    PrimitiveKind::ALL
        .iter()
        .copied()
        .find(|k| boxed_type_name(*k) == name)
}

/// Box a raw primitive; every other value passes through unchanged
pub fn box_value(value: Value) -> Value {
    match value {
        Value::Prim(p) => Value::Boxed(p),
        other => other,
    }
}

/// Unbox to a raw primitive of exactly `kind`
///
/// Mirrors a checked cast to the box type followed by its value accessor:
/// null raises a null-pointer error, any other kind is a type mismatch.
pub fn unbox_value(value: Value, kind: PrimitiveKind) -> HostResult<Value> {
    match value {
        Value::Boxed(p) | Value::Prim(p) if p.kind() == kind => Ok(Value::Prim(p)),
        Value::Null => Err(HostError::NullPointer(format!(
            "cannot unbox null to {}",
            kind.keyword()
        ))),
        other => Err(HostError::TypeMismatch {
            expected: boxed_type_name(kind).to_string(),
            got: other.type_name(),
        }),
    }
}

/// Checked cast to a reference type
pub fn check_cast(value: Value, ty: &ValueType) -> HostResult<Value> {
    let value = box_value(value);
    if ty.accepts(&value) {
        Ok(value)
    } else {
        Err(HostError::TypeMismatch {
            expected: ty.to_string(),
            got: value.type_name(),
        })
    }
}

/// Convert a generic (boxed) value to the representation of `ty`
///
/// Used on the return path of thunks and on the argument path into
/// invoke-original accessors.
pub fn unbox_or_cast(value: Value, ty: &ValueType) -> HostResult<Value> {
    match ty {
        ValueType::Void => Ok(Value::Void),
        ValueType::Primitive(kind) => unbox_value(value, *kind),
        _ => check_cast(value, ty),
    }
}

/// Convert generic arguments to the declared parameter types
pub fn coerce_args(params: &[ValueType], args: Vec<Value>) -> HostResult<Vec<Value>> {
    if params.len() != args.len() {
        return Err(HostError::ArgumentCount {
            operation: method_descriptor(params, &ValueType::Void),
            expected: params.len(),
            got: args.len(),
        });
    }
    params
        .iter()
        .zip(args)
        .map(|(ty, arg)| unbox_or_cast(arg, ty))
        .collect()
}

/// Source-level type name with separators replaced, for use inside names
fn sanitized_type_name(ty: &ValueType) -> String {
    ty.to_string().replace(['.', '[', ']', ';'], "_")
}

/// Name of the invoke-original accessor for an operation
///
/// The return type is part of the name so that covariant-return overloads
/// of the same operation do not collide.
pub fn original_accessor_name(name: &str, returns: &ValueType) -> String {
    format!("{}{}${}", ORIGINAL_PREFIX, name, sanitized_type_name(returns))
}

/// Qualified name of a generated type
///
/// `<package>.<Simple>_<Role>_<digest>`, the digest being the leading bytes
/// of the SHA-256 of the base type's descriptor, so that equal simple names in
/// different packages never collide.
pub fn generated_type_name(base: &HostType, role: Role) -> String {
    let digest = Sha256::digest(base.descriptor().as_bytes());
    let suffix = hex::encode(&digest[..DIGEST_BYTES]);
    let simple = format!("{}_{}_{}", base.simple_name(), role.suffix(), suffix);
    match base.name.rsplit_once('.') {
        Some((package, _)) => format!("{}.{}", package, simple),
        None => simple,
    }
}
