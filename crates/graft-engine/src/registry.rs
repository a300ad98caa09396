//! Type registry
//!
//! Process-lifetime cache from (base type, interface set, property
//! interfaces, loader) to the generated subtype. Each key owns a
//! [`OnceCell`], so concurrent requests for one key run at most one
//! successful generation and all observe the same type, while different keys
//! proceed independently. A failed generation leaves its cell empty for the
//! next caller.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::error::ConfigError;
use crate::host::{GeneratedInfo, HostType, HostTypeId, Loader, LoaderId, Method, Role};

/// Registry key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Extended type
    pub base: HostTypeId,
    /// Requested interfaces, sorted and deduplicated
    pub interfaces: Vec<HostTypeId>,
    /// Property interfaces, sorted and deduplicated
    pub properties: Vec<HostTypeId>,
    /// Parent loader of the generated types
    pub loader: LoaderId,
}

fn sorted_ids(types: &[Arc<HostType>]) -> Vec<HostTypeId> {
    let mut ids: Vec<HostTypeId> = types.iter().map(|t| t.id).collect();
    ids.sort();
    ids.dedup();
    ids
}

impl CacheKey {
    /// Build a key; interface order and duplicates do not matter
    pub fn new(
        base: &HostType,
        interfaces: &[Arc<HostType>],
        properties: &[Arc<HostType>],
        loader: &Loader,
    ) -> Self {
        Self {
            base: base.id,
            interfaces: sorted_ids(interfaces),
            properties: sorted_ids(properties),
            loader: loader.id,
        }
    }
}

/// A generated extension: the proxy layer and, through it, the bridge
#[derive(Clone)]
pub struct GeneratedSubtype {
    ty: Arc<HostType>,
    info: Arc<GeneratedInfo>,
}

impl GeneratedSubtype {
    /// Wrap a generated proxy type; `None` for any other type
    pub fn new(ty: Arc<HostType>) -> Option<Self> {
        let info = ty.generated.clone().filter(|info| info.role == Role::Proxy)?;
        Some(Self { ty, info })
    }

    fn info(&self) -> &GeneratedInfo {
        &self.info
    }

    /// The proxy type instances are allocated from
    pub fn host_type(&self) -> &Arc<HostType> {
        &self.ty
    }

    /// Qualified name
    pub fn name(&self) -> &str {
        &self.ty.name
    }

    /// Extended host type
    pub fn base(&self) -> &Arc<HostType> {
        &self.info().base
    }

    /// The bridge layer between base and proxy
    pub fn bridge(&self) -> Option<&Arc<HostType>> {
        self.ty.superclass.as_ref()
    }

    /// Operation table, indexed by `OperationId`
    pub fn operations(&self) -> &[Arc<Method>] {
        &self.info().operations
    }

    /// Interfaces requested for this extension
    pub fn requested_interfaces(&self) -> &[Arc<HostType>] {
        &self.info().requested_interfaces
    }

    /// Defining loader
    pub fn loader(&self) -> &Arc<Loader> {
        &self.ty.loader
    }

    /// Installed dispatcher
    pub fn dispatcher(&self) -> Option<Arc<dyn Dispatcher>> {
        self.info().dispatcher().cloned()
    }

    /// Fill the static dispatcher slot; it can be set only once
    pub fn install_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>) -> Result<(), ConfigError> {
        self.info()
            .dispatcher
            .set(dispatcher)
            .map_err(|_| ConfigError::DispatcherAlreadySet {
                type_name: self.ty.name.to_string(),
            })
    }

    /// Check that the type still provides what `key` asks for: the same
    /// interface set and a loader below the requested parent
    fn satisfies(&self, key: &CacheKey) -> bool {
        let same_interfaces = sorted_ids(self.requested_interfaces()) == key.interfaces;
        let same_lineage = self
            .loader()
            .parent
            .as_ref()
            .is_some_and(|parent| parent.id == key.loader);
        same_interfaces && same_lineage
    }
}

impl PartialEq for GeneratedSubtype {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ty, &other.ty)
    }
}

impl Eq for GeneratedSubtype {}

impl fmt::Debug for GeneratedSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedSubtype")
            .field("name", &self.ty.name)
            .field("operations", &self.operations().len())
            .finish()
    }
}

/// Cache of generated subtypes
#[derive(Default)]
pub struct TypeRegistry {
    entries: DashMap<CacheKey, Arc<OnceCell<GeneratedSubtype>>>,
    generations: AtomicUsize,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached subtype for `key`, generating it with `create` on a miss
    ///
    /// A cached type that no longer satisfies the key is dropped and
    /// regenerated once.
    pub fn get_or_create<E, F>(&self, key: &CacheKey, create: F) -> Result<GeneratedSubtype, E>
    where
        F: Fn() -> Result<GeneratedSubtype, E>,
    {
        loop {
            // Clone the cell out so the shard lock is not held while generating
            let cell = self.entries.entry(key.clone()).or_default().value().clone();
            let mut fresh = false;
            let subtype = cell
                .get_or_try_init(|| {
                    fresh = true;
                    let subtype = create()?;
                    self.generations.fetch_add(1, Ordering::Relaxed);
                    Ok(subtype)
                })?
                .clone();

            if fresh {
                debug!(type_name = %subtype.name(), "generated subtype");
                return Ok(subtype);
            }
            if subtype.satisfies(key) {
                debug!(type_name = %subtype.name(), "subtype cache hit");
                return Ok(subtype);
            }

            warn!(
                type_name = %subtype.name(),
                "cached subtype does not match requested interfaces or loader, regenerating"
            );
            self.entries.remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        }
    }

    /// Cached subtype for `key`, if generated
    pub fn get(&self, key: &CacheKey) -> Option<GeneratedSubtype> {
        self.entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Check whether `ty` is a subtype held by this registry
    pub fn contains(&self, ty: &Arc<HostType>) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.value().get().is_some_and(|s| Arc::ptr_eq(s.host_type(), ty)))
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check for an empty registry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of successful generations
    pub fn generation_count(&self) -> usize {
        self.generations.load(Ordering::Relaxed)
    }
}
