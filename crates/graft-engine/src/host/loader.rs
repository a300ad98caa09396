//! Type loaders
//!
//! A loader is an identity with a parent lineage. Every generation defines
//! its types in a fresh child of the requested parent loader, which is how
//! the type cache verifies lineage on a hit.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global counter for loader IDs
static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

static SYSTEM: Lazy<Arc<Loader>> = Lazy::new(|| Loader::root("system"));

/// Unique identity of a loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(pub u64);

/// A type loader
pub struct Loader {
    /// Identity
    pub id: LoaderId,
    /// Diagnostic name
    pub name: Arc<str>,
    /// Parent loader (`None` for roots)
    pub parent: Option<Arc<Loader>>,
}

impl Loader {
    /// The process-wide system loader
    pub fn system() -> Arc<Loader> {
        SYSTEM.clone()
    }

    /// Create a new root loader
    pub fn root(name: &str) -> Arc<Loader> {
        Arc::new(Loader {
            id: LoaderId(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed)),
            name: Arc::from(name),
            parent: None,
        })
    }

    /// Create a new child of `parent`
    pub fn child(parent: &Arc<Loader>, name: &str) -> Arc<Loader> {
        Arc::new(Loader {
            id: LoaderId(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed)),
            name: Arc::from(name),
            parent: Some(parent.clone()),
        })
    }

    /// Check whether `ancestor` is this loader or one of its parents
    pub fn descends_from(&self, ancestor: &Loader) -> bool {
        std::iter::successors(Some(self), |l| l.parent.as_deref()).any(|l| l.id == ancestor.id)
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loader({}#{})", self.name, self.id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lineage() {
        let system = Loader::system();
        let app = Loader::child(&system, "app");
        let nested = Loader::child(&app, "nested");
        assert!(nested.descends_from(&system));
        assert!(nested.descends_from(&nested));
        assert!(!app.descends_from(&nested));
        assert_eq!(nested.parent.as_ref().map(|p| p.id), Some(app.id));
    }

    #[test]
    fn test_system_is_singleton() {
        assert_eq!(Loader::system().id, Loader::system().id);
    }
}
