//! Host type builder
//!
//! Fluent declaration of host classes and interfaces with native bodies.
//! Embedders describe their pre-compiled types with it; generated types are
//! defined by the code emitter instead.

use std::sync::Arc;

use super::loader::Loader;
use super::object::ObjectRef;
use super::types::{
    Constructor, ConstructorBody, FieldDecl, HostType, HostTypeId, Method, MethodBody, Modifiers,
    TypeKind, ValueType,
};
use super::value::Value;
use super::HostResult;

/// Builder for a host class or interface
pub struct HostTypeBuilder {
    id: HostTypeId,
    name: Arc<str>,
    kind: TypeKind,
    modifiers: Modifiers,
    superclass: Option<Arc<HostType>>,
    interfaces: Vec<Arc<HostType>>,
    methods: Vec<Arc<Method>>,
    constructors: Vec<Arc<Constructor>>,
    fields: Vec<FieldDecl>,
    loader: Arc<Loader>,
}

impl HostTypeBuilder {
    /// Start a public class
    pub fn class(name: &str) -> Self {
        Self::new(name, TypeKind::Class, Modifiers::PUBLIC)
    }

    /// Start a public interface
    pub fn interface(name: &str) -> Self {
        Self::new(name, TypeKind::Interface, Modifiers::PUBLIC | Modifiers::ABSTRACT)
    }

    fn new(name: &str, kind: TypeKind, modifiers: Modifiers) -> Self {
        Self {
            id: HostTypeId::next(),
            name: Arc::from(name),
            kind,
            modifiers,
            superclass: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            fields: Vec::new(),
            loader: Loader::system(),
        }
    }

    /// Replace the type modifiers
    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Set the superclass
    pub fn extends(mut self, superclass: &Arc<HostType>) -> Self {
        self.superclass = Some(superclass.clone());
        self
    }

    /// Add an implemented (or, for interfaces, extended) interface
    pub fn implements(mut self, interface: &Arc<HostType>) -> Self {
        self.interfaces.push(interface.clone());
        self
    }

    /// Set the defining loader
    pub fn loader(mut self, loader: &Arc<Loader>) -> Self {
        self.loader = loader.clone();
        self
    }

    /// Declare an instance field
    pub fn field(mut self, name: &str, ty: ValueType, modifiers: Modifiers) -> Self {
        self.fields.push(FieldDecl {
            name: Arc::from(name),
            ty,
            modifiers,
        });
        self
    }

    /// Declare an operation with a native body
    pub fn native_method<F>(
        mut self,
        name: &str,
        params: Vec<ValueType>,
        returns: ValueType,
        modifiers: Modifiers,
        body: F,
    ) -> Self
    where
        F: Fn(&ObjectRef, &[Value]) -> HostResult<Value> + Send + Sync + 'static,
    {
        let body = MethodBody::Native(Arc::new(body));
        self.push_method(name, params, returns, modifiers, body);
        self
    }

    /// Declare a public abstract operation
    pub fn abstract_method(mut self, name: &str, params: Vec<ValueType>, returns: ValueType) -> Self {
        let modifiers = Modifiers::PUBLIC | Modifiers::ABSTRACT;
        self.push_method(name, params, returns, modifiers, MethodBody::Abstract);
        self
    }

    fn push_method(
        &mut self,
        name: &str,
        params: Vec<ValueType>,
        returns: ValueType,
        modifiers: Modifiers,
        body: MethodBody,
    ) {
        self.methods.push(Arc::new(Method {
            name: Arc::from(name),
            params,
            returns,
            modifiers,
            declaring: self.name.clone(),
            declaring_id: self.id,
            body,
        }));
    }

    /// Declare a constructor with a native body
    pub fn native_constructor<F>(mut self, params: Vec<ValueType>, modifiers: Modifiers, body: F) -> Self
    where
        F: Fn(&ObjectRef, &[Value]) -> HostResult<()> + Send + Sync + 'static,
    {
        self.constructors.push(Arc::new(Constructor {
            params,
            modifiers,
            declaring: self.name.clone(),
            body: ConstructorBody::Native(Arc::new(body)),
        }));
        self
    }

    /// Build the type
    ///
    /// A class that declares no constructor receives an implicit public
    /// no-argument one that runs the superclass's no-argument constructor.
    pub fn build(mut self) -> Arc<HostType> {
        if self.kind == TypeKind::Class && self.constructors.is_empty() {
            let parent = self.superclass.as_ref().and_then(|s| s.find_constructor(&[]));
            self = self.native_constructor(vec![], Modifiers::PUBLIC, move |this, _| match &parent {
                Some(ctor) => ctor.invoke(this, &[]),
                None => Ok(()),
            });
        }
        Arc::new(HostType {
            id: self.id,
            name: self.name,
            kind: self.kind,
            modifiers: self.modifiers,
            superclass: self.superclass,
            interfaces: self.interfaces,
            methods: self.methods,
            constructors: self.constructors,
            fields: self.fields,
            loader: self.loader,
            generated: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostObject;

    #[test]
    fn test_declaring_identity() {
        let ty = HostTypeBuilder::class("demo.Widget")
            .abstract_method("draw", vec![], ValueType::Void)
            .modifiers(Modifiers::PUBLIC | Modifiers::ABSTRACT)
            .build();
        assert_eq!(ty.methods[0].declaring_id, ty.id);
        assert_eq!(&*ty.methods[0].declaring, "demo.Widget");
        assert!(ty.methods[0].is_abstract());
    }

    #[test]
    fn test_implicit_constructor_chains_to_parent() {
        let base = HostTypeBuilder::class("demo.Base")
            .field("ready", ValueType::boolean(), Modifiers::PROTECTED)
            .native_constructor(vec![], Modifiers::PUBLIC, |this, _| {
                this.set_field("ready", Value::boolean(true))
            })
            .build();
        let derived = HostTypeBuilder::class("demo.Derived").extends(&base).build();
        assert_eq!(derived.constructors.len(), 1);

        let obj = HostObject::construct(&derived, &[], &[]).unwrap();
        assert_eq!(obj.get_field("ready").unwrap(), Value::boolean(true));
    }

    #[test]
    fn test_interfaces_have_no_constructors() {
        let iface = HostTypeBuilder::interface("demo.Named")
            .abstract_method("name", vec![], ValueType::string())
            .build();
        assert!(iface.constructors.is_empty());
        assert!(iface.is_abstract());
    }
}
