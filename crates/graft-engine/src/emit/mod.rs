//! Code emission
//!
//! The capability that turns a [`ClassDef`] (fields, constructors and method
//! bodies expressed as [`Code`]) into a loadable [`HostType`]. Two
//! interchangeable back-ends implement [`CodeEmitter`]:
//!
//! - [`AssemblyEmitter`]: encodes each body into a compact byte stream and
//!   runs it by decoding
//! - [`WeaveEmitter`]: runs the verified instruction sequence directly
//!
//! Both share the frame semantics in `exec`, so the rest of the engine never
//! needs to know which one is active. [`SubtypeEmitter`] builds the class
//! definitions for generated bridges and proxies on top of either.

mod assembly;
mod code;
mod exec;
mod subtype;
mod weave;

pub use assembly::AssemblyEmitter;
pub use code::{Code, CodeBuilder, Constant, Instr, Label, StaticSlot};
pub use subtype::SubtypeEmitter;
pub use weave::WeaveEmitter;

use std::sync::{Arc, Weak};

use rustc_hash::FxHashSet;

use crate::config::BackendKind;
use crate::host::{
    CompiledBody, Constructor, ConstructorBody, FieldDecl, GeneratedInfo, HostType, HostTypeId,
    Loader, Method, MethodBody, Modifiers, SlotKey, TypeKind, ValueType,
};

/// Code emission errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmitError {
    /// A branch targets a label that was never marked
    #[error("Label {label} used but never marked in {code}")]
    UnmarkedLabel {
        /// Body name
        code: String,
        /// Label ID
        label: u32,
    },

    /// Verification failed
    #[error("Invalid code in {code} at {pc}: {reason}")]
    InvalidCode {
        /// Body name
        code: String,
        /// Instruction index
        pc: usize,
        /// What is wrong
        reason: String,
    },

    /// Too many constants for 16-bit operands
    #[error("Constant pool overflow in {0}")]
    ConstantPoolOverflow(String),

    /// The superclass cannot be extended
    #[error("Cannot extend {type_name}: {reason}")]
    InvalidSuperclass {
        /// Superclass name
        type_name: String,
        /// Why not
        reason: &'static str,
    },

    /// A class definition lists a non-interface as interface
    #[error("{0} is not an interface")]
    NotAnInterface(String),

    /// Two method definitions occupy the same slot
    #[error("Duplicate method {0}")]
    DuplicateMethod(String),

    /// An encoded body could not be decoded
    #[error("Malformed byte code in {code} at offset {offset}")]
    Malformed {
        /// Body name
        code: String,
        /// Byte offset
        offset: usize,
    },
}

/// A code-emission back-end
pub trait CodeEmitter: Send + Sync {
    /// Back-end name for diagnostics
    fn name(&self) -> &'static str;

    /// Define a new type in `loader`
    fn define(&self, def: ClassDef, loader: &Arc<Loader>) -> Result<Arc<HostType>, EmitError>;
}

/// Create the back-end for `kind` (after resolving `Auto`)
pub fn emitter_for(kind: BackendKind, verify: bool) -> Arc<dyn CodeEmitter> {
    match kind.resolve() {
        BackendKind::Assembly => Arc::new(AssemblyEmitter::new(verify)),
        _ => Arc::new(WeaveEmitter::new(verify)),
    }
}

// ============================================================================
// Class definitions
// ============================================================================

/// A method to define, with a body of type `B`
#[derive(Debug, Clone)]
pub struct MethodDef<B = Code> {
    /// Operation name
    pub name: String,
    /// Parameter types
    pub params: Vec<ValueType>,
    /// Return type
    pub returns: ValueType,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Body
    pub body: B,
}

/// A constructor to define, with a body of type `B`
#[derive(Debug, Clone)]
pub struct CtorDef<B = Code> {
    /// Parameter types
    pub params: Vec<ValueType>,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Body
    pub body: B,
}

/// A class to define
///
/// Back-ends first map every [`Code`] body to their prepared form, then link
/// the prepared bodies against the new type.
pub struct ClassDef<B = Code> {
    /// Qualified name
    pub name: String,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Superclass
    pub superclass: Arc<HostType>,
    /// Implemented interfaces
    pub interfaces: Vec<Arc<HostType>>,
    /// Declared fields
    pub fields: Vec<FieldDecl>,
    /// Constructors
    pub constructors: Vec<CtorDef<B>>,
    /// Methods
    pub methods: Vec<MethodDef<B>>,
    /// Generation record
    pub generated: Option<GeneratedInfo>,
}

impl ClassDef {
    /// Check the structural rules every back-end enforces
    pub fn validate(&self) -> Result<(), EmitError> {
        let superclass = &self.superclass;
        if superclass.is_interface() {
            return Err(EmitError::InvalidSuperclass {
                type_name: superclass.name.to_string(),
                reason: "it is an interface",
            });
        }
        if superclass.is_final() {
            return Err(EmitError::InvalidSuperclass {
                type_name: superclass.name.to_string(),
                reason: "it is final",
            });
        }
        if !superclass.modifiers.is_public() {
            return Err(EmitError::InvalidSuperclass {
                type_name: superclass.name.to_string(),
                reason: "it is not public",
            });
        }
        if let Some(iface) = self.interfaces.iter().find(|i| !i.is_interface()) {
            return Err(EmitError::NotAnInterface(iface.name.to_string()));
        }
        let mut slots = FxHashSet::default();
        for m in &self.methods {
            let slot = SlotKey {
                name: Arc::from(m.name.as_str()),
                returns: m.returns.clone(),
                params: m.params.clone(),
            };
            if !slots.insert(slot) {
                return Err(EmitError::DuplicateMethod(format!("{}.{}", self.name, m.name)));
            }
        }
        Ok(())
    }

    /// Verify every body
    pub fn verify(&self) -> Result<(), EmitError> {
        for ctor in &self.constructors {
            ctor.body.verify()?;
        }
        for method in &self.methods {
            method.body.verify()?;
        }
        Ok(())
    }
}

impl<B> ClassDef<B> {
    /// Map every body, failing on the first error
    pub fn try_map<P, E>(self, mut f: impl FnMut(B) -> Result<P, E>) -> Result<ClassDef<P>, E> {
        let constructors = self
            .constructors
            .into_iter()
            .map(|c| {
                Ok(CtorDef {
                    params: c.params,
                    modifiers: c.modifiers,
                    body: f(c.body)?,
                })
            })
            .collect::<Result<Vec<_>, E>>()?;
        let methods = self
            .methods
            .into_iter()
            .map(|m| {
                Ok(MethodDef {
                    name: m.name,
                    params: m.params,
                    returns: m.returns,
                    modifiers: m.modifiers,
                    body: f(m.body)?,
                })
            })
            .collect::<Result<Vec<_>, E>>()?;
        Ok(ClassDef {
            name: self.name,
            modifiers: self.modifiers,
            superclass: self.superclass,
            interfaces: self.interfaces,
            fields: self.fields,
            constructors,
            methods,
            generated: self.generated,
        })
    }

    /// Create the type, binding each prepared body to it
    pub fn link(
        self,
        loader: &Arc<Loader>,
        bind: impl Fn(B, Weak<HostType>) -> Arc<dyn CompiledBody>,
    ) -> Arc<HostType> {
        let id = HostTypeId::next();
        let name: Arc<str> = Arc::from(self.name.as_str());
        let ClassDef {
            modifiers,
            superclass,
            interfaces,
            fields,
            constructors,
            methods,
            generated,
            ..
        } = self;

        Arc::new_cyclic(|owner| {
            let methods = methods
                .into_iter()
                .map(|m| {
                    Arc::new(Method {
                        name: Arc::from(m.name.as_str()),
                        params: m.params,
                        returns: m.returns,
                        modifiers: m.modifiers,
                        declaring: name.clone(),
                        declaring_id: id,
                        body: MethodBody::Compiled(bind(m.body, owner.clone())),
                    })
                })
                .collect();
            let constructors = constructors
                .into_iter()
                .map(|c| {
                    Arc::new(Constructor {
                        params: c.params,
                        modifiers: c.modifiers,
                        declaring: name.clone(),
                        body: ConstructorBody::Compiled(bind(c.body, owner.clone())),
                    })
                })
                .collect();
            HostType {
                id,
                name: name.clone(),
                kind: TypeKind::Class,
                modifiers,
                superclass: Some(superclass),
                interfaces,
                methods,
                constructors,
                fields,
                loader: loader.clone(),
                generated: generated.map(Arc::new),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostObject, HostTypeBuilder, Value};

    fn base() -> Arc<HostType> {
        HostTypeBuilder::class("demo.Base")
            .native_method("twice", vec![ValueType::int()], ValueType::int(), Modifiers::PUBLIC, |_, args| {
                Ok(Value::int(args[0].as_int().unwrap_or(0) * 2))
            })
            .build()
    }

    /// `int quad(int)` calling `twice` twice through super
    fn quad_def(superclass: &Arc<HostType>) -> ClassDef {
        let twice = superclass.methods[0].clone();
        let mut b = CodeBuilder::new("demo.Quad.quad(I)I", 1);
        b.load(0).load(0).load(1).invoke_super(&twice).invoke_super(&twice).ret();
        let ctor = superclass.constructors[0].clone();
        let mut c = CodeBuilder::new("demo.Quad.<init>()V", 0);
        c.load(0).invoke_super_ctor(&ctor).ret_void();
        ClassDef {
            name: "demo.Quad".to_string(),
            modifiers: Modifiers::PUBLIC,
            superclass: superclass.clone(),
            interfaces: vec![],
            fields: vec![],
            constructors: vec![CtorDef {
                params: vec![],
                modifiers: Modifiers::PUBLIC,
                body: c.finish().unwrap(),
            }],
            methods: vec![MethodDef {
                name: "quad".to_string(),
                params: vec![ValueType::int()],
                returns: ValueType::int(),
                modifiers: Modifiers::PUBLIC,
                body: b.finish().unwrap(),
            }],
            generated: None,
        }
    }

    #[test]
    fn test_backends_agree() {
        let base = base();
        for kind in [BackendKind::Assembly, BackendKind::Weave] {
            let emitter = emitter_for(kind, true);
            let ty = emitter.define(quad_def(&base), &Loader::system()).unwrap();
            let obj = HostObject::construct(&ty, &[], &[]).unwrap();
            assert_eq!(obj.call("quad", &[Value::int(3)]).unwrap(), Value::int(12), "{}", emitter.name());
            assert_eq!(obj.call("twice", &[Value::int(3)]).unwrap(), Value::int(6));
        }
    }

    #[test]
    fn test_final_superclass_rejected() {
        let sealed = HostTypeBuilder::class("demo.Sealed")
            .modifiers(Modifiers::PUBLIC | Modifiers::FINAL)
            .build();
        let mut def = quad_def(&base());
        def.superclass = sealed;
        assert!(matches!(def.validate(), Err(EmitError::InvalidSuperclass { .. })));
    }

    #[test]
    fn test_duplicate_methods_rejected() {
        let mut def = quad_def(&base());
        let dup = def.methods[0].clone();
        def.methods.push(dup);
        assert!(matches!(def.validate(), Err(EmitError::DuplicateMethod(_))));
    }
}
