//! Subtype emitter
//!
//! Builds the two generated layers of an extension and hands them to the
//! active [`CodeEmitter`]:
//!
//! - the **bridge** extends the base type; it forwards every reachable base
//!   constructor, gives every abstract operation a stub that raises an
//!   unsupported-operation exception, and backs each property pair with a
//!   private field and two direct accessors
//! - the **proxy** extends the bridge; it forwards the bridge constructors,
//!   gives every intercepted operation a thunk and an invoke-original
//!   accessor, and implements the requested interfaces plus the bridge
//!   capability
//!
//! # Thunk layout
//!
//! ```text
//!     getstatic dispatcher; dup; ifnull super
//!     load this; getstatic operations; const idx; aload
//!     const n; newarray; { dup; const i; load i+1; box?; astore }*
//!     invokedispatch; unbox/checkcast; return
//! super:
//!     pop; load this, params; invokesuper base.op; return
//! ```

use std::sync::Arc;

use super::code::{Code, CodeBuilder, StaticSlot};
use super::{ClassDef, CodeEmitter, CtorDef, EmitError, MethodDef};
use crate::codec;
use crate::harvest::{InterceptSet, PropertyPair};
use crate::host::{
    bridge_capability, object_type, Constructor, ExceptionKind, FieldDecl, GeneratedInfo, HostException, HostType,
    Loader, Method, Modifiers, Role, SlotKey, ValueType,
};

/// Emits bridge and proxy layers through a [`CodeEmitter`] back-end
#[derive(Clone)]
pub struct SubtypeEmitter {
    emitter: Arc<dyn CodeEmitter>,
}

impl SubtypeEmitter {
    /// Create a subtype emitter on top of a back-end
    pub fn new(emitter: Arc<dyn CodeEmitter>) -> Self {
        Self { emitter }
    }

    /// Name of the active back-end
    pub fn backend(&self) -> &'static str {
        self.emitter.name()
    }

    /// Emit the bridge layer of `base`
    ///
    /// `abstract_ops` receive throwing stubs unless a property accessor
    /// occupies the same slot.
    pub fn emit_bridge(
        &self,
        base: &Arc<HostType>,
        abstract_ops: &[Arc<Method>],
        properties: &[PropertyPair],
        property_interfaces: &[Arc<HostType>],
        loader: &Arc<Loader>,
    ) -> Result<Arc<HostType>, EmitError> {
        let name = codec::generated_type_name(base, Role::Bridge);
        let mut methods = Vec::with_capacity(abstract_ops.len() + properties.len() * 2);
        let mut fields = Vec::with_capacity(properties.len());

        for prop in properties {
            let field = prop.field_name();
            fields.push(FieldDecl {
                name: Arc::from(field.as_str()),
                ty: prop.ty.clone(),
                modifiers: Modifiers::PRIVATE,
            });
            methods.push(property_getter(&name, prop, &field)?);
            methods.push(property_setter(&name, prop, &field)?);
        }

        let claimed: Vec<SlotKey> = properties
            .iter()
            .flat_map(|p| [p.getter.slot(), p.setter.slot()])
            .collect();
        for op in abstract_ops {
            if claimed.iter().any(|slot| op.occupies(slot)) {
                continue;
            }
            methods.push(abstract_stub(&name, op)?);
        }

        // An interface is extended through the root class
        let mut interfaces = property_interfaces.to_vec();
        let superclass = if base.is_interface() {
            interfaces.insert(0, base.clone());
            object_type()
        } else {
            base.clone()
        };

        let def = ClassDef {
            constructors: forwarding_constructors(&name, &superclass)?,
            name,
            modifiers: Modifiers::PUBLIC,
            superclass,
            interfaces,
            fields,
            methods,
            generated: Some(GeneratedInfo::new(Role::Bridge, base.clone(), Vec::new(), Vec::new())),
        };
        self.emitter.define(def, loader)
    }

    /// Emit the proxy layer on top of `bridge`
    ///
    /// `operations` must have been harvested from the bridge so that their
    /// table order is the one the thunks index.
    pub fn emit_proxy(
        &self,
        bridge: &Arc<HostType>,
        base: &Arc<HostType>,
        operations: InterceptSet,
        requested_interfaces: &[Arc<HostType>],
        loader: &Arc<Loader>,
    ) -> Result<Arc<HostType>, EmitError> {
        let name = codec::generated_type_name(base, Role::Proxy);
        let operations = operations.into_operations();
        let mut methods = Vec::with_capacity(operations.len() * 2);

        for (index, op) in operations.iter().enumerate() {
            let target = super_target(bridge, op);
            methods.push(thunk(&name, index, op, target.as_ref())?);
            methods.push(original_accessor(&name, op, target.as_ref())?);
        }

        let mut interfaces = requested_interfaces.to_vec();
        interfaces.push(bridge_capability());

        let def = ClassDef {
            constructors: forwarding_constructors(&name, bridge)?,
            name,
            modifiers: Modifiers::PUBLIC,
            superclass: bridge.clone(),
            interfaces,
            fields: Vec::new(),
            methods,
            generated: Some(GeneratedInfo::new(
                Role::Proxy,
                base.clone(),
                operations,
                requested_interfaces.to_vec(),
            )),
        };
        self.emitter.define(def, loader)
    }
}

/// Concrete implementation a super call from a subtype of `superclass` reaches
fn super_target(superclass: &HostType, op: &Method) -> Option<Arc<Method>> {
    superclass
        .find_virtual(&op.slot())
        .filter(|m| !m.is_abstract())
}

fn body_name(owner: &str, name: &str, params: &[ValueType], returns: &ValueType) -> String {
    format!("{}.{}{}", owner, name, codec::method_descriptor(params, returns))
}

fn unsupported(op: &Method) -> HostException {
    HostException::new(ExceptionKind::UnsupportedOperation, op.to_string())
}

/// Modifiers of a generated override: the operation's visibility, never
/// abstract
fn override_modifiers(op: &Method) -> Modifiers {
    op.modifiers.without(Modifiers::ABSTRACT)
}

/// One forwarding constructor per reachable constructor of `superclass`
fn forwarding_constructors(owner: &str, superclass: &HostType) -> Result<Vec<CtorDef>, EmitError> {
    superclass
        .constructors
        .iter()
        .filter(|c| !c.modifiers.is_final() && !c.modifiers.is_private())
        .map(|ctor| forwarding_constructor(owner, ctor))
        .collect()
}

fn forwarding_constructor(owner: &str, ctor: &Arc<Constructor>) -> Result<CtorDef, EmitError> {
    let n = ctor.params.len();
    let mut b = CodeBuilder::new(body_name(owner, "<init>", &ctor.params, &ValueType::Void), n);
    b.load_receiver_and_params(n).invoke_super_ctor(ctor).ret_void();
    Ok(CtorDef {
        params: ctor.params.clone(),
        modifiers: ctor.modifiers,
        body: b.finish()?,
    })
}

fn method_def(op: &Method, name: String, modifiers: Modifiers, body: Code) -> MethodDef {
    MethodDef {
        name,
        params: op.params.clone(),
        returns: op.returns.clone(),
        modifiers,
        body,
    }
}

/// Push `this` and the parameters, call `target` non-virtually, return
fn emit_super_call(b: &mut CodeBuilder, op: &Method, target: Option<&Arc<Method>>) {
    match target {
        Some(target) => {
            b.load_receiver_and_params(op.params.len()).invoke_super(target);
            if op.returns.is_void() {
                b.ret_void();
            } else {
                b.ret();
            }
        }
        None => {
            b.new_throwable(unsupported(op)).throw();
        }
    }
}

fn thunk(owner: &str, index: usize, op: &Method, target: Option<&Arc<Method>>) -> Result<MethodDef, EmitError> {
    let n = op.params.len();
    let mut b = CodeBuilder::new(body_name(owner, &op.name, &op.params, &op.returns), n);
    let super_path = b.define_label();

    b.get_static(StaticSlot::Dispatcher).dup().if_null(super_path);

    // dispatcher.dispatch(this, operations[index], [args...])
    b.load(0)
        .get_static(StaticSlot::Operations)
        .push_int(index as i32)
        .array_load()
        .push_int(n as i32)
        .new_array();
    for (i, param) in op.params.iter().enumerate() {
        let local = b.param(i);
        b.dup().push_int(i as i32).load(local);
        if let Some(kind) = param.primitive() {
            b.box_primitive(kind);
        }
        b.array_store();
    }
    b.invoke_dispatch();
    if op.returns.is_void() {
        b.pop().ret_void();
    } else {
        b.ret_as(&op.returns);
    }

    // No dispatcher yet: the instance is still under construction
    b.mark_label(super_path).pop();
    emit_super_call(&mut b, op, target);

    Ok(method_def(op, op.name.to_string(), override_modifiers(op), b.finish()?))
}

fn original_accessor(owner: &str, op: &Method, target: Option<&Arc<Method>>) -> Result<MethodDef, EmitError> {
    let name = codec::original_accessor_name(&op.name, &op.returns);
    let mut b = CodeBuilder::new(body_name(owner, &name, &op.params, &op.returns), op.params.len());
    emit_super_call(&mut b, op, target);
    Ok(method_def(op, name, Modifiers::PUBLIC | Modifiers::FINAL, b.finish()?))
}

fn abstract_stub(owner: &str, op: &Method) -> Result<MethodDef, EmitError> {
    let mut b = CodeBuilder::new(body_name(owner, &op.name, &op.params, &op.returns), op.params.len());
    b.new_throwable(unsupported(op)).throw();
    Ok(method_def(op, op.name.to_string(), override_modifiers(op), b.finish()?))
}

fn property_getter(owner: &str, prop: &PropertyPair, field: &str) -> Result<MethodDef, EmitError> {
    let getter = &prop.getter;
    let mut b = CodeBuilder::new(body_name(owner, &getter.name, &getter.params, &getter.returns), 0);
    b.load(0).get_field(field).ret();
    Ok(method_def(getter, getter.name.to_string(), Modifiers::PUBLIC | Modifiers::FINAL, b.finish()?))
}

fn property_setter(owner: &str, prop: &PropertyPair, field: &str) -> Result<MethodDef, EmitError> {
    let setter = &prop.setter;
    let mut b = CodeBuilder::new(body_name(owner, &setter.name, &setter.params, &setter.returns), 1);
    b.load(0).load(1).put_field(field).ret_void();
    Ok(method_def(setter, setter.name.to_string(), Modifiers::PUBLIC | Modifiers::FINAL, b.finish()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{AssemblyEmitter, WeaveEmitter};
    use crate::harvest::{harvest, harvest_abstract, harvest_properties};
    use crate::host::{HostError, HostObject, HostTypeBuilder, Value};

    fn shape() -> Arc<HostType> {
        HostTypeBuilder::class("demo.Shape")
            .modifiers(Modifiers::PUBLIC | Modifiers::ABSTRACT)
            .abstract_method("area", vec![], ValueType::double())
            .native_method("sides", vec![], ValueType::int(), Modifiers::PUBLIC, |_, _| Ok(Value::int(0)))
            .build()
    }

    fn emitters() -> Vec<SubtypeEmitter> {
        vec![
            SubtypeEmitter::new(Arc::new(AssemblyEmitter::default())),
            SubtypeEmitter::new(Arc::new(WeaveEmitter::default())),
        ]
    }

    fn layers(emitter: &SubtypeEmitter, base: &Arc<HostType>) -> Arc<HostType> {
        let loader = Loader::child(&Loader::system(), "test");
        let bridge = emitter
            .emit_bridge(base, &harvest_abstract(base, &[]), &[], &[], &loader)
            .unwrap();
        let ops = harvest(&bridge, &[bridge_capability()]);
        emitter.emit_proxy(&bridge, base, ops, &[], &loader).unwrap()
    }

    #[test]
    fn test_names_carry_role_and_digest() {
        let proxy = layers(&emitters()[1], &shape());
        assert!(proxy.name.starts_with("demo.Shape_Proxy_"));
        let bridge = proxy.superclass.clone().unwrap();
        assert!(bridge.name.starts_with("demo.Shape_Bridge_"));
        assert!(proxy.is_subtype_of("host.lang.Bridge"));
    }

    #[test]
    fn test_undispatched_calls_reach_base() {
        for emitter in emitters() {
            let proxy = layers(&emitter, &shape());
            let obj = HostObject::construct(&proxy, &[], &[]).unwrap();

            assert_eq!(obj.call("sides", &[]).unwrap(), Value::int(0));
            assert!(matches!(obj.call("area", &[]), Err(HostError::Unsupported { .. })));
            assert_eq!(obj.call("super$sides$int", &[]).unwrap(), Value::int(0));
        }
    }

    #[test]
    fn test_operation_table_matches_thunks() {
        let proxy = layers(&emitters()[0], &shape());
        let info = proxy.proxy_info().unwrap();
        let names: Vec<_> = info.operations.iter().map(|m| m.name.to_string()).collect();
        assert_eq!(names, vec!["area", "instance", "sides"]);
        assert_eq!(info.operation_table.lock().len(), 3);
    }

    #[test]
    fn test_property_accessors() {
        let named = HostTypeBuilder::interface("demo.Named")
            .abstract_method("getName", vec![], ValueType::string())
            .abstract_method("setName", vec![ValueType::string()], ValueType::Void)
            .build();
        let base = HostTypeBuilder::class("demo.Plain").build();
        let props = harvest_properties(&[named.clone()]).unwrap();
        let abstracts = harvest_abstract(&base, &[named.clone()]);

        for emitter in emitters() {
            let bridge = emitter
                .emit_bridge(&base, &abstracts, &props, &[named.clone()], &Loader::system())
                .unwrap();
            let obj = HostObject::construct(&bridge, &[], &[]).unwrap();
            obj.call("setName", &[Value::from("x")]).unwrap();
            assert_eq!(obj.call("getName", &[]).unwrap(), Value::from("x"));
            assert_eq!(obj.get_field("$__name").unwrap(), Value::from("x"));
        }
    }

    #[test]
    fn test_final_and_private_constructors_are_not_forwarded() {
        let base = HostTypeBuilder::class("demo.Guarded")
            .native_constructor(vec![], Modifiers::PUBLIC, |_, _| Ok(()))
            .native_constructor(vec![ValueType::int()], Modifiers::PRIVATE, |_, _| Ok(()))
            .native_constructor(vec![ValueType::long()], Modifiers::PUBLIC | Modifiers::FINAL, |_, _| Ok(()))
            .build();
        let ctors = forwarding_constructors("demo.X", &base).unwrap();
        assert_eq!(ctors.len(), 1);
        assert!(ctors[0].params.is_empty());
    }
}
