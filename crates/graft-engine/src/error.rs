//! Error types for the public API
//!
//! Each failure class is surfaced synchronously to the call that triggered it
//! and never retried:
//!
//! - [`ConfigError`]: the request itself is wrong
//! - [`GenerationError`]: emitting the subtype failed
//! - [`ConstructionError`]: a base constructor raised a checked exception
//! - [`HostError`]: everything raised while running host frames, including
//!   unimplemented abstract members and interpreter exceptions

use thiserror::Error;

use crate::emit::EmitError;
use crate::harvest::HarvestError;
use crate::host::HostError;

/// Invalid requests, reported before anything is generated
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `build()` was called without a dispatcher
    #[error("No dispatcher set for extension of {0}")]
    MissingDispatcher(String),

    /// The static dispatcher slot was already filled
    #[error("Dispatcher already installed on {type_name}")]
    DispatcherAlreadySet {
        /// Generated type
        type_name: String,
    },

    /// Constructor argument types and values differ in length
    #[error("Got {types} constructor argument types but {values} values")]
    ArgumentCountMismatch {
        /// Number of types
        types: usize,
        /// Number of values
        values: usize,
    },

    /// A class was passed where an interface is required
    #[error("{0} is not an interface")]
    NotAnInterface(String),

    /// No generated constructor takes the requested types
    #[error("No constructor of {type_name} takes ({params})")]
    NoSuchConstructor {
        /// Base type
        type_name: String,
        /// Requested parameter types
        params: String,
    },

    /// The type was not produced by this engine
    #[error("{0} is not a generated type")]
    NotGenerated(String),

    /// Options could not be parsed
    #[error("Failed to parse options: {0}")]
    Parse(#[from] toml::de::Error),

    /// Options are invalid
    #[error("Invalid options: {0}")]
    Invalid(String),
}

/// Why a generation failed
#[derive(Debug, Error)]
pub enum GenerationCause {
    /// The back-end rejected a definition
    #[error(transparent)]
    Emit(#[from] EmitError),

    /// Property accessors could not be paired
    #[error(transparent)]
    Property(#[from] HarvestError),
}

/// Code generation failed for a base type
#[derive(Debug, Error)]
#[error("Could not generate extension for type {type_name}")]
pub struct GenerationError {
    /// Base type
    pub type_name: String,
    /// Underlying cause
    #[source]
    pub cause: GenerationCause,
}

impl GenerationError {
    /// Wrap a cause for `type_name`
    pub fn new(type_name: impl Into<String>, cause: impl Into<GenerationCause>) -> Self {
        Self {
            type_name: type_name.into(),
            cause: cause.into(),
        }
    }
}

/// A base constructor failed with an exception that cannot propagate as-is
#[derive(Debug, Error)]
pub enum ConstructionError {
    /// Checked exception raised by the base constructor
    #[error("Construction of {type_name} failed")]
    Failed {
        /// Base type
        type_name: String,
        /// The exception
        #[source]
        cause: HostError,
    },
}

/// Errors of the public API
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Invalid request
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generation failed
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Construction failed with a checked exception
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// A host frame raised
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Result type for the public API
pub type PlatformResult<T> = Result<T, PlatformError>;
