//! Host object model
//!
//! The pre-compiled type system that script types extend: classes,
//! interfaces, operations, constructors, fields, loaders and live objects.
//! Host descriptors are immutable once built. Generated subtypes are ordinary
//! host types whose bodies come from a [`CodeEmitter`](crate::emit::CodeEmitter).

mod builder;
mod loader;
mod object;
mod types;
mod value;

pub use builder::HostTypeBuilder;
pub use loader::{Loader, LoaderId};
pub use object::{HostObject, ObjectId, ObjectRef};
pub use types::{
    CompiledBody, Constructor, ConstructorBody, FieldDecl, GeneratedInfo, HostType, HostTypeId,
    Method, MethodBody, Modifiers, NativeConstructor, NativeMethod, Role, SlotKey, TypeKind,
    ValueType,
};
pub use value::{ArrayRef, Primitive, PrimitiveKind, Value};

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::script::ScriptError;

/// Root reference type
pub const OBJECT: &str = "host.lang.Object";

/// String type
pub const STRING: &str = "host.lang.String";

/// Capability interface implemented by every generated proxy
pub const BRIDGE: &str = "host.lang.Bridge";

static OBJECT_TYPE: Lazy<Arc<HostType>> = Lazy::new(|| {
    HostTypeBuilder::class(OBJECT).loader(&Loader::system()).build()
});

static BRIDGE_CAPABILITY: Lazy<Arc<HostType>> = Lazy::new(|| {
    HostTypeBuilder::interface(BRIDGE)
        .loader(&Loader::system())
        .abstract_method("instance", vec![], ValueType::object())
        .build()
});

/// The root class `host.lang.Object`
///
/// Used as the superclass when an interface is extended directly.
pub fn object_type() -> Arc<HostType> {
    OBJECT_TYPE.clone()
}

/// The `host.lang.Bridge` capability interface
///
/// Its single operation `instance()` is answered by the router with the bound
/// script instance instead of being routed to the interpreter.
pub fn bridge_capability() -> Arc<HostType> {
    BRIDGE_CAPABILITY.clone()
}

// ============================================================================
// Exceptions and errors
// ============================================================================

/// Class of a host exception
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionKind {
    /// `host.lang.UnsupportedOperationException`
    UnsupportedOperation,
    /// `host.lang.IllegalStateException`
    IllegalState,
    /// `host.lang.IllegalArgumentException`
    IllegalArgument,
    /// Any other exception class
    Custom {
        /// Qualified exception class name
        class: Arc<str>,
        /// Whether callers must declare it
        checked: bool,
    },
}

/// A host exception instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostException {
    /// Exception class
    pub kind: ExceptionKind,
    /// Detail message
    pub message: String,
}

impl HostException {
    /// Create a new exception
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Unchecked exception of a custom class
    pub fn unchecked(class: &str, message: impl Into<String>) -> Self {
        Self::new(
            ExceptionKind::Custom {
                class: Arc::from(class),
                checked: false,
            },
            message,
        )
    }

    /// Checked exception of a custom class
    pub fn checked(class: &str, message: impl Into<String>) -> Self {
        Self::new(
            ExceptionKind::Custom {
                class: Arc::from(class),
                checked: true,
            },
            message,
        )
    }

    /// Qualified class name
    pub fn class_name(&self) -> &str {
        match &self.kind {
            ExceptionKind::UnsupportedOperation => "host.lang.UnsupportedOperationException",
            ExceptionKind::IllegalState => "host.lang.IllegalStateException",
            ExceptionKind::IllegalArgument => "host.lang.IllegalArgumentException",
            ExceptionKind::Custom { class, .. } => class,
        }
    }

    /// Checked exceptions must be declared by callers
    pub fn is_checked(&self) -> bool {
        matches!(self.kind, ExceptionKind::Custom { checked: true, .. })
    }

    /// Convert into the error raised when this exception is thrown
    pub fn into_error(self) -> HostError {
        match self.kind {
            ExceptionKind::UnsupportedOperation => HostError::Unsupported {
                operation: self.message,
            },
            _ => HostError::Exception(self),
        }
    }
}

impl fmt::Display for HostException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name(), self.message)
    }
}

/// Errors raised while executing host frames
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    /// A host exception was thrown
    #[error("{0}")]
    Exception(HostException),

    /// An abstract stub was invoked
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// Operation that has no implementation
        operation: String,
    },

    /// An abstract body was invoked directly
    #[error("Abstract method invoked: {operation}")]
    AbstractMethod {
        /// Abstract operation
        operation: String,
    },

    /// Dispatch found no interpreter implementation for an abstract operation
    #[error("No implementation of {operation} found for {type_name}")]
    UnimplementedAbstract {
        /// Operation being dispatched
        operation: String,
        /// Interpreter-level type name
        type_name: String,
    },

    /// No operation matched
    #[error("No such method: {0}")]
    NoSuchMethod(String),

    /// No field matched
    #[error("No such field: {0}")]
    NoSuchField(String),

    /// Null dereference
    #[error("Null pointer: {0}")]
    NullPointer(String),

    /// Value of the wrong type
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual runtime type
        got: String,
    },

    /// Array access outside bounds
    #[error("Array index {index} out of bounds for length {length}")]
    IndexOutOfBounds {
        /// Requested index
        index: i64,
        /// Array length
        length: usize,
    },

    /// Abstract type or interface allocated
    #[error("Cannot instantiate {0}")]
    Instantiation(String),

    /// Wrong number of arguments
    #[error("{operation} expects {expected} arguments, got {got}")]
    ArgumentCount {
        /// Operation or constructor
        operation: String,
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        got: usize,
    },

    /// Generated code failed a runtime check
    #[error("Invalid generated code: {0}")]
    InvalidCode(String),

    /// An interpreter-level function raised
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Result type for host frames
pub type HostResult<T> = Result<T, HostError>;

impl HostError {
    /// Checked exceptions cannot propagate through undeclared signatures
    pub fn is_checked(&self) -> bool {
        matches!(self, HostError::Exception(e) if e.is_checked())
    }
}

impl From<HostException> for HostError {
    fn from(e: HostException) -> Self {
        e.into_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_capability_is_shared() {
        let a = bridge_capability();
        let b = bridge_capability();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_interface());
        assert_eq!(a.methods.len(), 1);
        assert_eq!(&*a.methods[0].name, "instance");
    }

    #[test]
    fn test_exception_conversion() {
        let e = HostException::new(ExceptionKind::UnsupportedOperation, "run()V");
        assert!(matches!(e.into_error(), HostError::Unsupported { .. }));

        let checked = HostException::checked("demo.IOException", "disk");
        assert!(checked.is_checked());
        let err: HostError = checked.into();
        assert!(err.is_checked());
        assert_eq!(err.to_string(), "demo.IOException: disk");
    }
}
