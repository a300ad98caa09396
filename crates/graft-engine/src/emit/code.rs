//! Generated code
//!
//! The instruction set understood by both back-ends, the [`CodeBuilder`] used
//! to emit it (locals, labels with forward-reference patching, constant pool),
//! and the static verifier run before a body is installed.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::EmitError;
use crate::host::{Constructor, HostException, Method, PrimitiveKind, ValueType};

/// Static slots of a generated type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticSlot {
    /// The installed dispatcher, or null
    Dispatcher,
    /// The operation table array
    Operations,
}

/// One instruction
///
/// Branch targets are instruction indices once a [`Code`] is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// Push local `n` (local 0 is `this`, then the parameters)
    Load(u16),
    /// Pop into local `n`
    Store(u16),
    /// Push an `Int` or `Str` constant
    Const(u16),
    /// Push null
    Null,
    /// Push a static slot of the defining type
    GetStatic(StaticSlot),
    /// Pop an object, push the field named by a `Field` constant
    GetField(u16),
    /// Pop a value and an object, store the field named by a `Field` constant
    PutField(u16),
    /// Pop a length, push a new array of nulls
    NewArray,
    /// Pop an index and an array, push the element
    ArrayLoad,
    /// Pop a value, an index and an array, store the element
    ArrayStore,
    /// Box the raw primitive on top of the stack
    Box(PrimitiveKind),
    /// Unbox the top of the stack to a raw primitive of exactly this kind
    Unbox(PrimitiveKind),
    /// Checked cast to a `Type` constant
    CheckCast(u16),
    /// Pop; branch if null
    IfNull(u32),
    /// Pop; branch if not null
    IfNonNull(u32),
    /// Unconditional branch
    Jump(u32),
    /// Pop arguments and receiver, run a `Method` constant non-virtually
    InvokeSuper(u16),
    /// Pop arguments and receiver, run a `Constructor` constant
    InvokeSuperCtor(u16),
    /// Pop arguments array, operation, receiver and dispatcher; push the result
    InvokeDispatch,
    /// Push a new throwable from a `Throwable` constant
    NewThrowable(u16),
    /// Pop a throwable and raise it
    Throw,
    /// Pop and return the top of the stack
    Return,
    /// Return nothing
    ReturnVoid,
    /// Duplicate the top of the stack
    Dup,
    /// Discard the top of the stack
    Pop,
}

impl Instr {
    /// Ends the current basic block without falling through
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::Return | Instr::ReturnVoid | Instr::Throw | Instr::Jump(_)
        )
    }
}

/// Constant pool entry
#[derive(Debug, Clone)]
pub enum Constant {
    /// `int` literal
    Int(i32),
    /// String literal
    Str(Arc<str>),
    /// Field name
    Field(Arc<str>),
    /// Cast target
    Type(ValueType),
    /// Super-call target
    Method(Arc<Method>),
    /// Super-constructor target
    Constructor(Arc<Constructor>),
    /// Throwable template
    Throwable(Arc<HostException>),
}

/// A finished instruction sequence
#[derive(Debug, Clone)]
pub struct Code {
    /// Diagnostic name (`Type.name(desc)`)
    pub name: String,
    /// Number of incoming locals, `this` included
    pub arity: u16,
    /// Total number of locals
    pub locals: u16,
    /// Instructions
    pub instrs: Vec<Instr>,
    /// Constant pool
    pub constants: Vec<Constant>,
}

/// A label for branch targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    /// Unique label ID within the builder
    pub id: u32,
}

/// Branch that needs label patching
#[derive(Debug, Clone)]
struct UnresolvedJump {
    /// Instruction index of the branch
    at: usize,
    /// Target label
    target: Label,
}

/// Builder for a [`Code`] body
#[derive(Debug)]
pub struct CodeBuilder {
    name: String,
    arity: u16,
    locals: u16,
    instrs: Vec<Instr>,
    next_label: u32,
    label_positions: FxHashMap<u32, u32>,
    unresolved: Vec<UnresolvedJump>,
    constants: Vec<Constant>,
}

impl CodeBuilder {
    /// Create a builder for a body taking `params` declared parameters
    /// (plus the implicit `this`)
    pub fn new(name: impl Into<String>, params: usize) -> Self {
        let arity = (params + 1) as u16;
        Self {
            name: name.into(),
            arity,
            locals: arity,
            instrs: Vec::with_capacity(32),
            next_label: 0,
            label_positions: FxHashMap::default(),
            unresolved: Vec::new(),
            constants: Vec::new(),
        }
    }

    /// Local index of declared parameter `i`
    pub fn param(&self, i: usize) -> u16 {
        (i + 1) as u16
    }

    /// Allocate a scratch local
    pub fn declare_local(&mut self) -> u16 {
        let index = self.locals;
        self.locals += 1;
        index
    }

    fn constant(&mut self, constant: Constant) -> u16 {
        let index = self.constants.len() as u16;
        self.constants.push(constant);
        index
    }

    fn emit(&mut self, instr: Instr) -> &mut Self {
        self.instrs.push(instr);
        self
    }

    fn emit_branch(&mut self, make: fn(u32) -> Instr, label: Label) -> &mut Self {
        self.unresolved.push(UnresolvedJump {
            at: self.instrs.len(),
            target: label,
        });
        // Placeholder, patched in finish()
        self.emit(make(u32::MAX))
    }

    // ===== Stack and locals =====

    /// Push local `index`
    pub fn load(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::Load(index))
    }

    /// Pop into local `index`
    pub fn store(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::Store(index))
    }

    /// Push `this` followed by every declared parameter
    pub fn load_receiver_and_params(&mut self, params: usize) -> &mut Self {
        for i in 0..=params {
            self.load(i as u16);
        }
        self
    }

    /// Push an `int` literal
    pub fn push_int(&mut self, value: i32) -> &mut Self {
        let index = self.constant(Constant::Int(value));
        self.emit(Instr::Const(index))
    }

    /// Push a string literal
    pub fn push_str(&mut self, value: &str) -> &mut Self {
        let index = self.constant(Constant::Str(Arc::from(value)));
        self.emit(Instr::Const(index))
    }

    /// Push null
    pub fn push_null(&mut self) -> &mut Self {
        self.emit(Instr::Null)
    }

    /// Duplicate the top of the stack
    pub fn dup(&mut self) -> &mut Self {
        self.emit(Instr::Dup)
    }

    /// Discard the top of the stack
    pub fn pop(&mut self) -> &mut Self {
        self.emit(Instr::Pop)
    }

    // ===== Fields and statics =====

    /// Push a static slot
    pub fn get_static(&mut self, slot: StaticSlot) -> &mut Self {
        self.emit(Instr::GetStatic(slot))
    }

    /// Read a field of the object on the stack
    pub fn get_field(&mut self, name: &str) -> &mut Self {
        let index = self.constant(Constant::Field(Arc::from(name)));
        self.emit(Instr::GetField(index))
    }

    /// Write a field of the object below the value on the stack
    pub fn put_field(&mut self, name: &str) -> &mut Self {
        let index = self.constant(Constant::Field(Arc::from(name)));
        self.emit(Instr::PutField(index))
    }

    // ===== Arrays =====

    /// Allocate an array of the popped length
    pub fn new_array(&mut self) -> &mut Self {
        self.emit(Instr::NewArray)
    }

    /// Load an array element
    pub fn array_load(&mut self) -> &mut Self {
        self.emit(Instr::ArrayLoad)
    }

    /// Store an array element
    pub fn array_store(&mut self) -> &mut Self {
        self.emit(Instr::ArrayStore)
    }

    // ===== Conversions =====

    /// Box a raw primitive
    pub fn box_primitive(&mut self, kind: PrimitiveKind) -> &mut Self {
        self.emit(Instr::Box(kind))
    }

    /// Unbox to a raw primitive
    pub fn unbox(&mut self, kind: PrimitiveKind) -> &mut Self {
        self.emit(Instr::Unbox(kind))
    }

    /// Checked cast
    pub fn check_cast(&mut self, ty: &ValueType) -> &mut Self {
        let index = self.constant(Constant::Type(ty.clone()));
        self.emit(Instr::CheckCast(index))
    }

    // ===== Labels and control flow =====

    /// Define a new label
    pub fn define_label(&mut self) -> Label {
        let label = Label { id: self.next_label };
        self.next_label += 1;
        label
    }

    /// Mark the current position with a label
    pub fn mark_label(&mut self, label: Label) -> &mut Self {
        self.label_positions.insert(label.id, self.instrs.len() as u32);
        self
    }

    /// Branch if the popped value is null
    pub fn if_null(&mut self, label: Label) -> &mut Self {
        self.emit_branch(Instr::IfNull, label)
    }

    /// Branch if the popped value is not null
    pub fn if_non_null(&mut self, label: Label) -> &mut Self {
        self.emit_branch(Instr::IfNonNull, label)
    }

    /// Unconditional branch
    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.emit_branch(Instr::Jump, label)
    }

    // ===== Calls =====

    /// Non-virtual call of `method`
    pub fn invoke_super(&mut self, method: &Arc<Method>) -> &mut Self {
        let index = self.constant(Constant::Method(method.clone()));
        self.emit(Instr::InvokeSuper(index))
    }

    /// Call of a superclass constructor
    pub fn invoke_super_ctor(&mut self, ctor: &Arc<Constructor>) -> &mut Self {
        let index = self.constant(Constant::Constructor(ctor.clone()));
        self.emit(Instr::InvokeSuperCtor(index))
    }

    /// Interface call on the dispatcher
    pub fn invoke_dispatch(&mut self) -> &mut Self {
        self.emit(Instr::InvokeDispatch)
    }

    // ===== Exits =====

    /// Push a new throwable
    pub fn new_throwable(&mut self, exception: HostException) -> &mut Self {
        let index = self.constant(Constant::Throwable(Arc::new(exception)));
        self.emit(Instr::NewThrowable(index))
    }

    /// Raise the throwable on the stack
    pub fn throw(&mut self) -> &mut Self {
        self.emit(Instr::Throw)
    }

    /// Return the top of the stack
    pub fn ret(&mut self) -> &mut Self {
        self.emit(Instr::Return)
    }

    /// Return nothing
    pub fn ret_void(&mut self) -> &mut Self {
        self.emit(Instr::ReturnVoid)
    }

    /// Return the top of the stack converted to `ty`, or nothing for `void`
    pub fn ret_as(&mut self, ty: &ValueType) -> &mut Self {
        match ty {
            ValueType::Void => self.ret_void(),
            ValueType::Primitive(kind) => self.unbox(*kind).ret(),
            other => self.check_cast(other).ret(),
        }
    }

    /// Patch branches and produce the finished body
    pub fn finish(self) -> Result<Code, EmitError> {
        let mut instrs = self.instrs;
        for jump in &self.unresolved {
            let target = *self
                .label_positions
                .get(&jump.target.id)
                .ok_or_else(|| EmitError::UnmarkedLabel {
                    code: self.name.clone(),
                    label: jump.target.id,
                })?;
            instrs[jump.at] = match instrs[jump.at] {
                Instr::IfNull(_) => Instr::IfNull(target),
                Instr::IfNonNull(_) => Instr::IfNonNull(target),
                _ => Instr::Jump(target),
            };
        }
        if self.constants.len() > u16::MAX as usize {
            return Err(EmitError::ConstantPoolOverflow(self.name));
        }
        Ok(Code {
            name: self.name,
            arity: self.arity,
            locals: self.locals,
            instrs,
            constants: self.constants,
        })
    }
}

// ============================================================================
// Verification
// ============================================================================

impl Code {
    fn invalid(&self, pc: usize, reason: impl Into<String>) -> EmitError {
        EmitError::InvalidCode {
            code: self.name.clone(),
            pc,
            reason: reason.into(),
        }
    }

    fn constant_at(&self, pc: usize, index: u16) -> Result<&Constant, EmitError> {
        self.constants
            .get(index as usize)
            .ok_or_else(|| self.invalid(pc, format!("constant #{} out of range", index)))
    }

    /// (pops, pushes) of the instruction at `pc`
    fn stack_effect(&self, pc: usize, instr: Instr) -> Result<(usize, usize), EmitError> {
        let wrong = |what: &str| self.invalid(pc, format!("constant is not a {}", what));
        Ok(match instr {
            Instr::Load(i) | Instr::Store(i) if i >= self.locals => {
                return Err(self.invalid(pc, format!("local {} out of range", i)))
            }
            Instr::Load(_) => (0, 1),
            Instr::Store(_) => (1, 0),
            Instr::Const(c) => match self.constant_at(pc, c)? {
                Constant::Int(_) | Constant::Str(_) => (0, 1),
                _ => return Err(wrong("literal")),
            },
            Instr::Null | Instr::GetStatic(_) => (0, 1),
            Instr::GetField(c) | Instr::PutField(c) => match self.constant_at(pc, c)? {
                Constant::Field(_) if matches!(instr, Instr::GetField(_)) => (1, 1),
                Constant::Field(_) => (2, 0),
                _ => return Err(wrong("field")),
            },
            Instr::NewArray => (1, 1),
            Instr::ArrayLoad => (2, 1),
            Instr::ArrayStore => (3, 0),
            Instr::Box(_) | Instr::Unbox(_) => (1, 1),
            Instr::CheckCast(c) => match self.constant_at(pc, c)? {
                Constant::Type(_) => (1, 1),
                _ => return Err(wrong("type")),
            },
            Instr::IfNull(_) | Instr::IfNonNull(_) => (1, 0),
            Instr::Jump(_) => (0, 0),
            Instr::InvokeSuper(c) => match self.constant_at(pc, c)? {
                Constant::Method(m) => (m.params.len() + 1, usize::from(!m.returns.is_void())),
                _ => return Err(wrong("method")),
            },
            Instr::InvokeSuperCtor(c) => match self.constant_at(pc, c)? {
                Constant::Constructor(ctor) => (ctor.params.len() + 1, 0),
                _ => return Err(wrong("constructor")),
            },
            Instr::InvokeDispatch => (4, 1),
            Instr::NewThrowable(c) => match self.constant_at(pc, c)? {
                Constant::Throwable(_) => (0, 1),
                _ => return Err(wrong("throwable")),
            },
            Instr::Throw | Instr::Return => (1, 0),
            Instr::ReturnVoid => (0, 0),
            Instr::Dup => (1, 2),
            Instr::Pop => (1, 0),
        })
    }

    /// Verify the body
    ///
    /// Checks branch targets, local indices and constant kinds, that the
    /// stack never underflows and has one depth at every join point, and that
    /// no path falls off the end. Returns the maximum stack depth.
    pub fn verify(&self) -> Result<usize, EmitError> {
        if self.instrs.is_empty() {
            return Err(self.invalid(0, "empty body"));
        }
        let len = self.instrs.len();
        let mut depths: Vec<Option<usize>> = vec![None; len];
        let mut worklist = vec![(0usize, 0usize)];
        let mut max_depth = 0;

        while let Some((pc, depth)) = worklist.pop() {
            if pc >= len {
                return Err(self.invalid(pc, "control falls off the end"));
            }
            match depths[pc] {
                Some(known) if known == depth => continue,
                Some(known) => {
                    return Err(self.invalid(
                        pc,
                        format!("inconsistent stack depth {} vs {}", known, depth),
                    ))
                }
                None => depths[pc] = Some(depth),
            }

            let instr = self.instrs[pc];
            let (pops, pushes) = self.stack_effect(pc, instr)?;
            if pops > depth {
                return Err(self.invalid(pc, "stack underflow"));
            }
            let next = depth - pops + pushes;
            max_depth = max_depth.max(next);

            match instr {
                Instr::IfNull(t) | Instr::IfNonNull(t) | Instr::Jump(t) if t as usize >= len => {
                    return Err(self.invalid(pc, format!("branch target {} out of range", t)))
                }
                Instr::Jump(t) => worklist.push((t as usize, next)),
                Instr::IfNull(t) | Instr::IfNonNull(t) => {
                    worklist.push((t as usize, next));
                    worklist.push((pc + 1, next));
                }
                i if i.is_terminator() => {}
                _ => worklist.push((pc + 1, next)),
            }
        }
        Ok(max_depth)
    }
}
