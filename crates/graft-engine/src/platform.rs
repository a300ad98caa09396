//! Platform
//!
//! The public entry point. A [`Platform`] owns one code-emission back-end,
//! the type registry, the invocation cache and the construction tracker, and
//! installs its [`RoutingDispatcher`] into every subtype it generates.
//!
//! # Example
//!
//! ```ignore
//! let platform = Platform::default();
//! let script = ScriptTypeBuilder::extending("Polite", &greeter)
//!     .function("greet", Some(0), |_, _| Ok(Value::from("hi")))
//!     .build();
//! let instance = platform.extend(&script, &[], &[])?;
//! assert_eq!(instance.call("greet", &[])?, Value::from("hi"));
//! ```

use std::sync::Arc;

use tracing::{debug, debug_span};

use crate::bridge::{Construction, ConstructionTracker, Instance};
use crate::config::PlatformOptions;
use crate::dispatch::{Dispatcher, InvocationCache, InvocationRouter, RoutingDispatcher};
use crate::emit::{emitter_for, SubtypeEmitter};
use crate::error::{ConfigError, GenerationCause, GenerationError, PlatformError, PlatformResult};
use crate::harvest::{harvest, harvest_abstract, harvest_properties};
use crate::host::{
    bridge_capability, HostObject, HostType, Loader, Method, ObjectRef, Value, ValueType,
};
use crate::registry::{CacheKey, GeneratedSubtype, TypeRegistry};
use crate::script::{FunctionResolver, ScriptType, StandardWrapper, TableResolver, ValueWrapper};

/// Subtype generation and dispatch for script-extended host types
pub struct Platform {
    options: PlatformOptions,
    emitter: SubtypeEmitter,
    registry: TypeRegistry,
    unmanaged: TypeRegistry,
    originals: Arc<InvocationCache>,
    router: Arc<InvocationRouter>,
    tracker: Arc<ConstructionTracker>,
    dispatcher: Arc<dyn Dispatcher>,
    loader: Arc<Loader>,
}

impl Platform {
    /// Create a platform with default options
    pub fn new(resolver: Arc<dyn FunctionResolver>, wrapper: Arc<dyn ValueWrapper>) -> Self {
        Self::with_options(PlatformOptions::default(), resolver, wrapper)
    }

    /// Create a platform with explicit options
    pub fn with_options(
        options: PlatformOptions,
        resolver: Arc<dyn FunctionResolver>,
        wrapper: Arc<dyn ValueWrapper>,
    ) -> Self {
        let originals = Arc::new(InvocationCache::new());
        let tracker = Arc::new(ConstructionTracker::new());
        let router = Arc::new(
            InvocationRouter::new(resolver, wrapper, originals.clone()).with_trace(options.trace_dispatch),
        );
        let dispatcher: Arc<dyn Dispatcher> =
            Arc::new(RoutingDispatcher::new(router.clone(), originals.clone(), tracker.clone()));
        let emitter = SubtypeEmitter::new(emitter_for(options.backend, options.verify_code));
        debug!(backend = emitter.backend(), "platform created");

        Self {
            options,
            emitter,
            registry: TypeRegistry::new(),
            unmanaged: TypeRegistry::new(),
            originals,
            router,
            tracker,
            dispatcher,
            loader: Loader::system(),
        }
    }

    /// Options in effect
    pub fn options(&self) -> &PlatformOptions {
        &self.options
    }

    /// Name of the active code-emission back-end
    pub fn backend_name(&self) -> &'static str {
        self.emitter.backend()
    }

    /// Registry of subtypes generated for this platform's dispatcher
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Router behind the installed dispatcher
    pub fn router(&self) -> &Arc<InvocationRouter> {
        &self.router
    }

    /// Invoke-original accessor cache
    pub fn invocation_cache(&self) -> &Arc<InvocationCache> {
        &self.originals
    }

    /// Per-thread record of bridges under construction
    pub fn tracker(&self) -> &Arc<ConstructionTracker> {
        &self.tracker
    }

    // ===== Generation =====

    /// Generated subtype of `base` implementing `interfaces`, with the
    /// accessors of `properties` backed by fields
    ///
    /// Repeated requests with equal arguments return the same subtype.
    pub fn create_extension_type(
        &self,
        base: &Arc<HostType>,
        interfaces: &[Arc<HostType>],
        properties: &[Arc<HostType>],
    ) -> PlatformResult<GeneratedSubtype> {
        self.create_extension_type_in(base, interfaces, properties, &self.loader)
    }

    /// As [`create_extension_type`](Self::create_extension_type), defining
    /// the subtype below `parent`
    pub fn create_extension_type_in(
        &self,
        base: &Arc<HostType>,
        interfaces: &[Arc<HostType>],
        properties: &[Arc<HostType>],
        parent: &Arc<Loader>,
    ) -> PlatformResult<GeneratedSubtype> {
        require_interfaces(interfaces)?;
        require_interfaces(properties)?;
        let key = CacheKey::new(base, interfaces, properties, parent);
        self.registry.get_or_create(&key, || {
            self.generate(base, interfaces, properties, parent, Some(&self.dispatcher))
        })
    }

    fn generate(
        &self,
        base: &Arc<HostType>,
        interfaces: &[Arc<HostType>],
        properties: &[Arc<HostType>],
        parent: &Arc<Loader>,
        dispatcher: Option<&Arc<dyn Dispatcher>>,
    ) -> PlatformResult<GeneratedSubtype> {
        let _span = debug_span!("generate", base = %base.name, backend = self.emitter.backend()).entered();
        let failed = |cause: GenerationCause| GenerationError::new(base.name.to_string(), cause);

        let pairs = harvest_properties(properties).map_err(|e| failed(e.into()))?;
        let abstracts = harvest_abstract(base, properties);
        let loader = Loader::child(parent, &format!("graft:{}", base.simple_name()));

        let bridge = self
            .emitter
            .emit_bridge(base, &abstracts, &pairs, properties, &loader)
            .map_err(|e| failed(e.into()))?;

        let requested = dedup(interfaces);
        let mut extra = requested.clone();
        extra.push(bridge_capability());
        let operations = harvest(&bridge, &extra);
        debug!(
            operations = operations.len(),
            stubs = abstracts.len(),
            properties = pairs.len(),
            "harvested"
        );

        let proxy = self
            .emitter
            .emit_proxy(&bridge, base, operations, &requested, &loader)
            .map_err(|e| failed(e.into()))?;
        let subtype = GeneratedSubtype::new(proxy).ok_or_else(|| ConfigError::NotGenerated(base.name.to_string()))?;
        if let Some(dispatcher) = dispatcher {
            subtype.install_dispatcher(dispatcher.clone())?;
        }
        Ok(subtype)
    }

    // ===== Instances =====

    /// Construct an instance of `subtype` for `script_type`, running the base
    /// constructor that takes exactly `arg_types`
    pub fn create_instance(
        &self,
        subtype: &GeneratedSubtype,
        script_type: &Arc<ScriptType>,
        arg_types: &[ValueType],
        args: &[Value],
    ) -> PlatformResult<Arc<Instance>> {
        Construction {
            proxy: subtype.host_type(),
            script_type,
            arg_types,
            args,
            tracker: &self.tracker,
            originals: &self.originals,
        }
        .run()
    }

    /// Generate (or reuse) the subtype for `script_type` and construct an
    /// instance of it
    pub fn extend(
        &self,
        script_type: &Arc<ScriptType>,
        arg_types: &[ValueType],
        args: &[Value],
    ) -> PlatformResult<Arc<Instance>> {
        let subtype = self.create_extension_type(
            &script_type.base,
            &script_type.interfaces,
            &script_type.property_interfaces,
        )?;
        self.create_instance(&subtype, script_type, arg_types, args)
    }

    // ===== Dispatch =====

    /// Dispatcher installed on `subtype`
    pub fn get_dispatcher(&self, subtype: &GeneratedSubtype) -> Option<Arc<dyn Dispatcher>> {
        subtype.dispatcher()
    }

    /// Install `dispatcher` on `subtype`; fails if one is already installed
    pub fn set_dispatcher(&self, subtype: &GeneratedSubtype, dispatcher: Arc<dyn Dispatcher>) -> PlatformResult<()> {
        subtype.install_dispatcher(dispatcher)?;
        Ok(())
    }

    /// Check whether `ty` was generated by a code-emission back-end
    pub fn is_generated(&self, ty: &HostType) -> bool {
        ty.is_generated()
    }

    /// Run the host default of `operation` on `instance`, bypassing dispatch
    pub fn call_original(&self, instance: &Instance, operation: &Arc<Method>, args: Vec<Value>) -> PlatformResult<Value> {
        Ok(self.originals.call_original(instance.bridge(), operation, args)?)
    }

    /// Script instance owning `object`, through the bridge capability
    pub fn instance_of(&self, object: &ObjectRef) -> Option<Arc<Instance>> {
        let capability = bridge_capability();
        let slot = capability.methods.first()?.slot();
        if !object.class().is_subtype_of(&capability.name) {
            return None;
        }
        match object.invoke(&slot, &[]) {
            Ok(Value::Foreign(any)) => any.downcast::<Instance>().ok(),
            _ => object.bound_instance(),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(Arc::new(TableResolver::new()), Arc::new(StandardWrapper::new()))
    }
}

fn require_interfaces(types: &[Arc<HostType>]) -> Result<(), ConfigError> {
    match types.iter().find(|t| !t.is_interface()) {
        Some(t) => Err(ConfigError::NotAnInterface(t.name.to_string())),
        None => Ok(()),
    }
}

fn dedup(types: &[Arc<HostType>]) -> Vec<Arc<HostType>> {
    let mut out: Vec<Arc<HostType>> = Vec::with_capacity(types.len());
    for ty in types {
        if !out.iter().any(|t| t.id == ty.id) {
            out.push(ty.clone());
        }
    }
    out
}

// ============================================================================
// Extension requests
// ============================================================================

/// Lower-level request for a generated subtype with a caller-supplied
/// dispatcher
///
/// Types built this way are cached separately from the platform's own and
/// carry the request's dispatcher instead of the routing one. Problems with
/// the request are reported by [`build_type`](Self::build_type) and
/// [`build`](Self::build) before anything is generated.
pub struct ExtensionRequest {
    base: Arc<HostType>,
    interfaces: Vec<Arc<HostType>>,
    properties: Vec<Arc<HostType>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    arg_types: Vec<ValueType>,
    args: Vec<Value>,
    parent_loader: Option<Arc<Loader>>,
    not_an_interface: Option<String>,
}

impl ExtensionRequest {
    /// Start a request extending `base`
    pub fn for_type(base: &Arc<HostType>) -> Self {
        Self {
            base: base.clone(),
            interfaces: Vec::new(),
            properties: Vec::new(),
            dispatcher: None,
            arg_types: Vec::new(),
            args: Vec::new(),
            parent_loader: None,
            not_an_interface: None,
        }
    }

    fn check_interface(&mut self, ty: &Arc<HostType>) -> bool {
        if ty.is_interface() {
            return true;
        }
        if self.not_an_interface.is_none() {
            self.not_an_interface = Some(ty.name.to_string());
        }
        false
    }

    /// Also implement `interfaces`
    pub fn implementing(mut self, interfaces: &[Arc<HostType>]) -> Self {
        for iface in interfaces {
            if self.check_interface(iface) {
                self.interfaces.push(iface.clone());
            }
        }
        self
    }

    /// Back the accessors of `interfaces` with fields
    pub fn properties(mut self, interfaces: &[Arc<HostType>]) -> Self {
        for iface in interfaces {
            if self.check_interface(iface) {
                self.properties.push(iface.clone());
            }
        }
        self
    }

    /// Dispatcher receiving intercepted calls
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Constructor to run and its arguments
    pub fn constructor_args(mut self, types: Vec<ValueType>, values: Vec<Value>) -> Self {
        self.arg_types = types;
        self.args = values;
        self
    }

    /// Define the subtype below `loader` instead of the system loader
    pub fn parent_loader(mut self, loader: &Arc<Loader>) -> Self {
        self.parent_loader = Some(loader.clone());
        self
    }

    /// Generate (or reuse) the subtype without installing a dispatcher
    pub fn build_type(&self, platform: &Platform) -> PlatformResult<GeneratedSubtype> {
        if let Some(name) = &self.not_an_interface {
            return Err(ConfigError::NotAnInterface(name.clone()).into());
        }
        let parent = self.parent_loader.clone().unwrap_or_else(Loader::system);
        let key = CacheKey::new(&self.base, &self.interfaces, &self.properties, &parent);
        platform.unmanaged.get_or_create(&key, || {
            platform.generate(&self.base, &self.interfaces, &self.properties, &parent, None)
        })
    }

    /// Generate the subtype, install the dispatcher and construct an object
    ///
    /// The dispatcher slot of a subtype is filled once; a later request for
    /// the same subtype must pass the same dispatcher.
    pub fn build(self, platform: &Platform) -> PlatformResult<ObjectRef> {
        let dispatcher = self
            .dispatcher
            .clone()
            .ok_or_else(|| ConfigError::MissingDispatcher(self.base.name.to_string()))?;
        if self.arg_types.len() != self.args.len() {
            return Err(ConfigError::ArgumentCountMismatch {
                types: self.arg_types.len(),
                values: self.args.len(),
            }
            .into());
        }

        let subtype = self.build_type(platform)?;
        match subtype.dispatcher() {
            Some(current) if same_dispatcher(&current, &dispatcher) => {}
            Some(_) => {
                return Err(ConfigError::DispatcherAlreadySet {
                    type_name: subtype.name().to_string(),
                }
                .into())
            }
            None => {
                if let Err(err) = subtype.install_dispatcher(dispatcher.clone()) {
                    // Lost a race; fine if the winner installed the same one
                    if !subtype.dispatcher().is_some_and(|d| same_dispatcher(&d, &dispatcher)) {
                        return Err(err.into());
                    }
                }
            }
        }

        let proxy = subtype.host_type();
        if proxy.find_constructor(&self.arg_types).is_none() {
            let params: Vec<String> = self.arg_types.iter().map(|t| t.to_string()).collect();
            return Err(ConfigError::NoSuchConstructor {
                type_name: self.base.name.to_string(),
                params: params.join(", "),
            }
            .into());
        }
        HostObject::construct(proxy, &self.arg_types, &self.args).map_err(PlatformError::from)
    }
}

fn same_dispatcher(a: &Arc<dyn Dispatcher>, b: &Arc<dyn Dispatcher>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
