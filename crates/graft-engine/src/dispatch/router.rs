//! Invocation router
//!
//! Decides, per intercepted call, whether interpreter-level behavior or the
//! host default runs.

use std::sync::Arc;

use tracing::trace;

use super::{Dispatcher, InvocationCache, OperationId};
use crate::bridge::{ConstructionTracker, Instance};
use crate::codec;
use crate::host::{HostError, HostResult, Method, ObjectRef, Value, BRIDGE};
use crate::script::{FunctionResolver, ValueWrapper};

/// Routes calls arriving through thunks to the interpreter or the host
/// default
pub struct InvocationRouter {
    resolver: Arc<dyn FunctionResolver>,
    wrapper: Arc<dyn ValueWrapper>,
    originals: Arc<InvocationCache>,
    trace: bool,
}

impl InvocationRouter {
    /// Create a new router
    pub fn new(
        resolver: Arc<dyn FunctionResolver>,
        wrapper: Arc<dyn ValueWrapper>,
        originals: Arc<InvocationCache>,
    ) -> Self {
        Self {
            resolver,
            wrapper,
            originals,
            trace: false,
        }
    }

    /// Emit a trace event per routed call
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Route one call of `operation` on `instance`
    ///
    /// `args` are in generic (boxed) form. The result is in the generic form
    /// of the operation's return type.
    pub fn route(&self, instance: &Arc<Instance>, operation: &Arc<Method>, args: Vec<Value>) -> HostResult<Value> {
        // Capability channel, never visible to the interpreter
        if &*operation.declaring == BRIDGE {
            return Ok(Value::Foreign(instance.clone()));
        }

        let script_type = instance.script_type();
        let script_args: Vec<Value> = args.iter().cloned().map(|a| self.wrapper.from_host(a)).collect();
        let function = match self.resolver.resolve_override(script_type, &operation.name, &script_args) {
            Some(f) if !self.resolver.is_operation_abstract_on_host(&f) => f,
            _ => {
                return Err(HostError::UnimplementedAbstract {
                    operation: operation.to_string(),
                    type_name: script_type.name.to_string(),
                })
            }
        };

        if function.is_script() {
            if self.trace {
                trace!(operation = %operation, script_type = %script_type.name, "routing to script");
            }
            let result = function.call(instance, &script_args)?;
            if operation.returns.is_void() {
                return Ok(Value::Void);
            }
            return self.wrapper.to_host(result, &operation.returns);
        }

        let bridge = instance.bridge();
        match &function.source {
            Some(source) if !source.same_slot(operation) => {
                if self.trace {
                    trace!(operation = %operation, overload = %source, "routing to host overload");
                }
                self.call_overload(bridge, source, args)
            }
            _ => {
                if self.trace {
                    trace!(operation = %operation, "routing to host default");
                }
                self.originals.call_original(bridge, operation, args)
            }
        }
    }

    /// A different host operation of the same name answers the call
    fn call_overload(&self, bridge: &ObjectRef, source: &Arc<Method>, args: Vec<Value>) -> HostResult<Value> {
        match self.originals.resolve(bridge.class(), source) {
            Ok(accessor) => accessor.invoke(bridge, args),
            // Not intercepted, so the virtual call cannot re-enter dispatch
            Err(_) => {
                let args = codec::coerce_args(&source.params, args)?;
                bridge.invoke(&source.slot(), &args)
            }
        }
    }
}

/// The dispatcher installed by a [`Platform`](crate::Platform)
///
/// Calls on bridges that are still under construction, or that were never
/// bound, go to the host default; everything else goes through the router.
pub struct RoutingDispatcher {
    router: Arc<InvocationRouter>,
    originals: Arc<InvocationCache>,
    tracker: Arc<ConstructionTracker>,
}

impl RoutingDispatcher {
    /// Create a new routing dispatcher
    pub fn new(router: Arc<InvocationRouter>, originals: Arc<InvocationCache>, tracker: Arc<ConstructionTracker>) -> Self {
        Self {
            router,
            originals,
            tracker,
        }
    }
}

impl Dispatcher for RoutingDispatcher {
    fn dispatch(&self, this: &ObjectRef, operation: OperationId, args: Vec<Value>) -> HostResult<Value> {
        let op = this
            .class()
            .proxy_info()
            .and_then(|info| info.operations.get(operation.0 as usize))
            .cloned()
            .ok_or_else(|| HostError::NoSuchMethod(format!("{} operation {}", this.class().name, operation)))?;

        let result = if self.tracker.is_constructing(this) {
            self.originals.call_original(this, &op, args)
        } else {
            match this.bound_instance() {
                Some(instance) => self.router.route(&instance, &op, args),
                None => self.originals.call_original(this, &op, args),
            }
        };
        result.map(codec::box_value)
    }
}
