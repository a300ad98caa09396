//! Host objects
//!
//! Allocated instances of host classes. A generated instance additionally
//! carries a set-once, non-owning back-reference to the script [`Instance`]
//! that owns it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::types::{HostType, SlotKey, ValueType};
use super::value::Value;
use super::{HostError, HostResult};
use crate::bridge::Instance;

/// Global counter for object IDs
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of an allocated object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared reference to a host object
pub type ObjectRef = Arc<HostObject>;

/// An allocated host object
pub struct HostObject {
    id: ObjectId,
    class: Arc<HostType>,
    fields: Mutex<FxHashMap<Arc<str>, Value>>,
    binding: OnceCell<Weak<Instance>>,
}

impl HostObject {
    /// Allocate an uninitialised object of `class`
    ///
    /// Every declared field of the class chain starts at its type's default.
    pub fn allocate(class: &Arc<HostType>) -> HostResult<ObjectRef> {
        if class.is_abstract() {
            return Err(HostError::Instantiation(class.to_string()));
        }
        let mut fields = FxHashMap::default();
        for ty in class.ancestors() {
            for field in &ty.fields {
                fields
                    .entry(field.name.clone())
                    .or_insert_with(|| field.ty.default_value());
            }
        }
        Ok(Arc::new(HostObject {
            id: ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)),
            class: class.clone(),
            fields: Mutex::new(fields),
            binding: OnceCell::new(),
        }))
    }

    /// Allocate and run the constructor matching `params`
    pub fn construct(class: &Arc<HostType>, params: &[ValueType], args: &[Value]) -> HostResult<ObjectRef> {
        let ctor = class.find_constructor(params).ok_or_else(|| {
            let names: Vec<String> = params.iter().map(|p| p.to_string()).collect();
            HostError::NoSuchMethod(format!("{}.<init>({})", class.name, names.join(", ")))
        })?;
        let object = Self::allocate(class)?;
        ctor.invoke(&object, args)?;
        Ok(object)
    }

    /// Object identity
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Runtime class
    pub fn class(&self) -> &Arc<HostType> {
        &self.class
    }

    /// Read an instance field
    pub fn get_field(&self, name: &str) -> HostResult<Value> {
        self.fields
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NoSuchField(format!("{}.{}", self.class.name, name)))
    }

    /// Write an instance field, checking its declared type
    pub fn set_field(&self, name: &str, value: Value) -> HostResult<()> {
        let decl = self
            .class
            .find_field(name)
            .ok_or_else(|| HostError::NoSuchField(format!("{}.{}", self.class.name, name)))?;
        if !decl.ty.accepts(&value) {
            return Err(HostError::TypeMismatch {
                expected: decl.ty.to_string(),
                got: value.type_name(),
            });
        }
        self.fields.lock().insert(decl.name.clone(), value);
        Ok(())
    }

    /// Virtual invocation of the operation occupying `slot`
    pub fn invoke(self: &Arc<Self>, slot: &SlotKey, args: &[Value]) -> HostResult<Value> {
        let method = self
            .class
            .find_virtual(slot)
            .ok_or_else(|| HostError::NoSuchMethod(format!("{}.{}", self.class.name, slot)))?;
        method.invoke_direct(self, args)
    }

    /// Virtual invocation by name, choosing the overload that fits `args`
    pub fn call(self: &Arc<Self>, name: &str, args: &[Value]) -> HostResult<Value> {
        let method = self
            .class
            .find_method_for(name, args)
            .ok_or_else(|| HostError::NoSuchMethod(format!("{}.{}/{}", self.class.name, name, args.len())))?;
        method.invoke_direct(self, args)
    }

    /// Set the back-reference to the owning script instance
    ///
    /// Returns `false` if a binding was already present.
    pub fn bind(&self, instance: &Arc<Instance>) -> bool {
        self.binding.set(Arc::downgrade(instance)).is_ok()
    }

    /// Owning script instance, if bound and still alive
    pub fn bound_instance(&self) -> Option<Arc<Instance>> {
        self.binding.get().and_then(Weak::upgrade)
    }

    /// Check whether a binding was ever set
    pub fn is_bound(&self) -> bool {
        self.binding.get().is_some()
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("id", &self.id)
            .field("class", &self.class.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostTypeBuilder, Modifiers};

    fn counter_type() -> Arc<HostType> {
        HostTypeBuilder::class("demo.Counter")
            .field("count", ValueType::int(), Modifiers::PROTECTED)
            .native_constructor(vec![ValueType::int()], Modifiers::PUBLIC, |this, args| {
                this.set_field("count", args[0].clone())
            })
            .native_method("count", vec![], ValueType::int(), Modifiers::PUBLIC, |this, _| {
                this.get_field("count")
            })
            .build()
    }

    #[test]
    fn test_construct_and_call() {
        let ty = counter_type();
        let obj = HostObject::construct(&ty, &[ValueType::int()], &[Value::int(5)]).unwrap();
        assert_eq!(obj.call("count", &[]).unwrap(), Value::int(5));
    }

    #[test]
    fn test_fields_default_and_type_check() {
        let ty = counter_type();
        let obj = HostObject::allocate(&ty).unwrap();
        assert_eq!(obj.get_field("count").unwrap(), Value::int(0));
        assert!(matches!(
            obj.set_field("count", Value::from("x")),
            Err(HostError::TypeMismatch { .. })
        ));
        assert!(matches!(obj.get_field("missing"), Err(HostError::NoSuchField(_))));
    }

    #[test]
    fn test_abstract_class_cannot_be_allocated() {
        let ty = HostTypeBuilder::class("demo.Shape")
            .modifiers(Modifiers::PUBLIC | Modifiers::ABSTRACT)
            .build();
        assert!(matches!(HostObject::allocate(&ty), Err(HostError::Instantiation(_))));
    }

    #[test]
    fn test_missing_constructor() {
        let ty = counter_type();
        let err = HostObject::construct(&ty, &[], &[]).unwrap_err();
        assert!(matches!(err, HostError::NoSuchMethod(_)));
    }
}
