//! Platform options
//!
//! Parsed from TOML:
//!
//! ```toml
//! backend = "weave"        # "assembly" | "weave" | "auto"
//! verify_code = true
//! trace_dispatch = false
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding the back-end
pub const BACKEND_ENV: &str = "GRAFT_BACKEND";

/// Code emission back-end selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Pick by target platform
    #[default]
    Auto,
    /// Byte-code assembly
    Assembly,
    /// Direct instruction weaving
    Weave,
}

impl BackendKind {
    /// Resolve `Auto` for the current target: assembly on Android, weaving
    /// elsewhere
    pub fn resolve(self) -> BackendKind {
        match self {
            BackendKind::Auto if cfg!(target_os = "android") => BackendKind::Assembly,
            BackendKind::Auto => BackendKind::Weave,
            other => other,
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "assembly" => Ok(BackendKind::Assembly),
            "weave" => Ok(BackendKind::Weave),
            other => Err(ConfigError::Invalid(format!(
                "Unknown backend '{}'. Expected assembly, weave or auto",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Auto => write!(f, "auto"),
            BackendKind::Assembly => write!(f, "assembly"),
            BackendKind::Weave => write!(f, "weave"),
        }
    }
}

/// Options of a [`Platform`](crate::Platform)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformOptions {
    /// Code emission back-end
    #[serde(default)]
    pub backend: BackendKind,

    /// Verify generated code before installing it
    #[serde(default = "default_verify_code")]
    pub verify_code: bool,

    /// Emit a trace event per routed call
    #[serde(default)]
    pub trace_dispatch: bool,
}

fn default_verify_code() -> bool {
    true
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            verify_code: default_verify_code(),
            trace_dispatch: false,
        }
    }
}

impl PlatformOptions {
    /// Parse options from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let options: PlatformOptions = toml::from_str(content)?;
        Ok(options)
    }

    /// Parse options from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Defaults, with the back-end taken from `GRAFT_BACKEND` when set
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut options = Self::default();
        if let Ok(value) = std::env::var(BACKEND_ENV) {
            options.backend = value.parse()?;
        }
        Ok(options)
    }

    /// Select the back-end
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Enable or disable code verification
    pub fn with_verify_code(mut self, verify: bool) -> Self {
        self.verify_code = verify;
        self
    }

    /// Enable or disable per-call tracing
    pub fn with_trace_dispatch(mut self, trace: bool) -> Self {
        self.trace_dispatch = trace;
        self
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let options = PlatformOptions::from_toml(
            r#"
            backend = "assembly"
            verify_code = false
            trace_dispatch = true
            "#,
        )
        .unwrap();
        assert_eq!(options.backend, BackendKind::Assembly);
        assert!(!options.verify_code);
        assert!(options.trace_dispatch);
    }

    #[test]
    fn test_defaults() {
        let options = PlatformOptions::from_toml("").unwrap();
        assert_eq!(options, PlatformOptions::default());
        assert!(options.verify_code);
        assert_eq!(options.backend, BackendKind::Auto);
    }

    #[test]
    fn test_unknown_backend() {
        let err = PlatformOptions::from_toml(r#"backend = "jit""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!("jit".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_unknown_key() {
        assert!(PlatformOptions::from_toml("verify = true").is_err());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(" Weave ".parse::<BackendKind>().unwrap(), BackendKind::Weave);
        assert_eq!("ASSEMBLY".parse::<BackendKind>().unwrap(), BackendKind::Assembly);
    }

    #[test]
    fn test_auto_resolves_to_concrete_backend() {
        assert_ne!(BackendKind::Auto.resolve(), BackendKind::Auto);
        assert_eq!(BackendKind::Weave.resolve(), BackendKind::Weave);
    }

    #[test]
    fn test_toml_round_trip() {
        let options = PlatformOptions::default().with_backend(BackendKind::Weave);
        let text = options.to_toml().unwrap();
        assert_eq!(PlatformOptions::from_toml(&text).unwrap(), options);
    }
}
