//! Graft Engine
//!
//! Lets interpreter-level script types extend pre-compiled host types. For
//! every (base type, interface set) pair the engine generates, at run time, a
//! two-layer subtype:
//! - **Bridge**: extends the base, stubs abstract operations and backs
//!   property accessors with fields (`emit` module)
//! - **Proxy**: extends the bridge and routes every overridable operation
//!   through a thunk to the installed dispatcher (`emit`, `dispatch` modules)
//!
//! Generated types are cached per key (`registry` module); calls that reach
//! the dispatcher go to a script function or back to the host default
//! (`dispatch` module); instances are constructed under a per-thread marker
//! so that host constructors never reach the interpreter (`bridge` module).
//!
//! # Example
//!
//! ```rust,ignore
//! use graft_engine::{HostTypeBuilder, Platform, ScriptTypeBuilder, Value, ValueType};
//!
//! let greeter = HostTypeBuilder::class("demo.Greeter")
//!     .native_method("greet", vec![], ValueType::string(), Modifiers::PUBLIC, |_, _| {
//!         Ok(Value::from("hello"))
//!     })
//!     .build();
//!
//! let script = ScriptTypeBuilder::extending("Polite", &greeter)
//!     .function("greet", Some(0), |_, _| Ok(Value::from("good day")))
//!     .build();
//!
//! let platform = Platform::default();
//! let instance = platform.extend(&script, &[], &[])?;
//! assert_eq!(instance.call("greet", &[])?, Value::from("good day"));
//! assert_eq!(instance.call_original("greet", vec![])?, Value::from("hello"));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

// ============================================================================
// Core Modules
// ============================================================================

/// Host object model: types, operations, loaders and live objects
pub mod host;

/// Signature codec: descriptors, boxing and generated names
pub mod codec;

/// Method-set harvesting and property pairing
pub mod harvest;

/// Code emission back-ends and the subtype emitter
pub mod emit;

/// Dispatcher seam, invocation router and invoke-original cache
pub mod dispatch;

/// Bridge instance lifecycle
pub mod bridge;

/// Interpreter collaborators: script types, function resolution, value wrapping
pub mod script;

/// Generated subtype cache
pub mod registry;

/// Platform options
pub mod config;

/// Error types
pub mod error;

/// Public entry point
pub mod platform;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{ConstructionTracker, Instance};
pub use config::{BackendKind, PlatformOptions, BACKEND_ENV};
pub use dispatch::{Dispatcher, InvocationCache, OperationId};
pub use emit::{AssemblyEmitter, CodeEmitter, EmitError, WeaveEmitter};
pub use error::{
    ConfigError, ConstructionError, GenerationCause, GenerationError, PlatformError, PlatformResult,
};
pub use harvest::HarvestError;
pub use host::{
    bridge_capability, object_type, HostError, HostException, HostObject, HostResult, HostType,
    HostTypeBuilder, Loader, Method, Modifiers, ObjectRef, Primitive, PrimitiveKind, Value,
    ValueType,
};
pub use platform::{ExtensionRequest, Platform};
pub use registry::{CacheKey, GeneratedSubtype, TypeRegistry};
pub use script::{
    FunctionResolver, ScriptError, ScriptFunction, ScriptType, ScriptTypeBuilder, StandardWrapper,
    TableResolver, ValueWrapper,
};
