//! Instruction semantics
//!
//! One frame implementation shared by both back-ends so that they stay
//! observably identical. A back-end only decides how the next instruction is
//! fetched and what a branch target addresses.

use std::sync::{Arc, Weak};

use super::code::{Constant, Instr, StaticSlot};
use crate::codec;
use crate::host::{ArrayRef, HostError, HostResult, HostType, ObjectRef, Value};

/// What the fetch loop does after an instruction
pub(crate) enum Flow {
    /// Continue with the next instruction
    Next,
    /// Continue at a branch target
    Jump(u32),
    /// Leave the body with a value (`Void` for `ReturnVoid`)
    Return(Value),
}

/// Upgrade the defining type of a running body
pub(crate) fn defining_type(owner: &Weak<HostType>, code: &str) -> HostResult<Arc<HostType>> {
    owner
        .upgrade()
        .ok_or_else(|| HostError::InvalidCode(format!("{}: defining type was dropped", code)))
}

/// Execution state of one body invocation
pub(crate) struct Frame<'a> {
    name: &'a str,
    owner: &'a HostType,
    constants: &'a [Constant],
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        name: &'a str,
        owner: &'a HostType,
        constants: &'a [Constant],
        locals: u16,
        this: &ObjectRef,
        args: &[Value],
    ) -> Self {
        let mut slots = Vec::with_capacity(locals as usize);
        slots.push(Value::Object(this.clone()));
        slots.extend(args.iter().cloned());
        slots.resize(slots.len().max(locals as usize), Value::Null);
        Self {
            name,
            owner,
            constants,
            locals: slots,
            stack: Vec::with_capacity(8),
        }
    }

    fn fault(&self, reason: impl std::fmt::Display) -> HostError {
        HostError::InvalidCode(format!("{}: {}", self.name, reason))
    }

    fn pop(&mut self) -> HostResult<Value> {
        match self.stack.pop() {
            Some(v) => Ok(v),
            None => Err(self.fault("stack underflow")),
        }
    }

    fn pop_n(&mut self, n: usize) -> HostResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(self.fault("stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_object(&mut self) -> HostResult<ObjectRef> {
        match self.pop()? {
            Value::Object(o) => Ok(o),
            Value::Null => Err(HostError::NullPointer(format!("{}: null receiver", self.name))),
            other => Err(self.fault(format!("expected object, found {}", other.type_name()))),
        }
    }

    fn pop_index(&mut self) -> HostResult<i64> {
        match self.pop()?.as_int() {
            Some(i) => Ok(i as i64),
            None => Err(self.fault("expected int")),
        }
    }

    fn constant(&self, index: u16) -> HostResult<&'a Constant> {
        let constants: &'a [Constant] = self.constants;
        constants
            .get(index as usize)
            .ok_or_else(|| self.fault(format!("constant #{} out of range", index)))
    }

    fn field_name(&self, index: u16) -> HostResult<&'a str> {
        match self.constant(index)? {
            Constant::Field(name) => Ok(&**name),
            _ => Err(self.fault("constant is not a field")),
        }
    }

    fn local(&self, index: u16) -> HostResult<&Value> {
        self.locals
            .get(index as usize)
            .ok_or_else(|| self.fault(format!("local {} out of range", index)))
    }

    /// Execute one instruction
    pub(crate) fn step(&mut self, instr: Instr) -> HostResult<Flow> {
        match instr {
            Instr::Load(i) => {
                let v = self.local(i)?.clone();
                self.stack.push(v);
            }
            Instr::Store(i) => {
                let v = self.pop()?;
                match self.locals.get_mut(i as usize) {
                    Some(slot) => *slot = v,
                    None => return Err(self.fault(format!("local {} out of range", i))),
                }
            }
            Instr::Const(c) => {
                let v = match self.constant(c)? {
                    Constant::Int(i) => Value::int(*i),
                    Constant::Str(s) => Value::Str(s.clone()),
                    _ => return Err(self.fault("constant is not a literal")),
                };
                self.stack.push(v);
            }
            Instr::Null => self.stack.push(Value::Null),
            Instr::GetStatic(slot) => {
                let info = self
                    .owner
                    .proxy_info()
                    .ok_or_else(|| self.fault("static slot on a non-generated type"))?;
                let v = match slot {
                    StaticSlot::Dispatcher => match info.dispatcher() {
                        Some(d) => Value::Dispatcher(d.clone()),
                        None => Value::Null,
                    },
                    StaticSlot::Operations => Value::Array(info.operation_table.clone()),
                };
                self.stack.push(v);
            }
            Instr::GetField(c) => {
                let name = self.field_name(c)?;
                let object = self.pop_object()?;
                self.stack.push(object.get_field(name)?);
            }
            Instr::PutField(c) => {
                let name = self.field_name(c)?;
                let value = self.pop()?;
                let object = self.pop_object()?;
                object.set_field(name, value)?;
            }
            Instr::NewArray => {
                let len = self.pop_index()?;
                if len < 0 {
                    return Err(HostError::IndexOutOfBounds { index: len, length: 0 });
                }
                self.stack.push(Value::array(vec![Value::Null; len as usize]));
            }
            Instr::ArrayLoad => {
                let index = self.pop_index()?;
                let array = self.pop_array()?;
                let items = array.lock();
                let v = items
                    .get(index as usize)
                    .filter(|_| index >= 0)
                    .cloned()
                    .ok_or(HostError::IndexOutOfBounds {
                        index,
                        length: items.len(),
                    })?;
                drop(items);
                self.stack.push(v);
            }
            Instr::ArrayStore => {
                let value = self.pop()?;
                let index = self.pop_index()?;
                let array = self.pop_array()?;
                let mut items = array.lock();
                let length = items.len();
                match items.get_mut(index as usize).filter(|_| index >= 0) {
                    Some(slot) => *slot = value,
                    None => return Err(HostError::IndexOutOfBounds { index, length }),
                }
            }
            Instr::Box(kind) => match self.pop()? {
                Value::Prim(p) if p.kind() == kind => self.stack.push(Value::Boxed(p)),
                other => {
                    return Err(HostError::TypeMismatch {
                        expected: kind.keyword().to_string(),
                        got: other.type_name(),
                    })
                }
            },
            Instr::Unbox(kind) => {
                let v = self.pop()?;
                self.stack.push(codec::unbox_value(v, kind)?);
            }
            Instr::CheckCast(c) => {
                let ty = match self.constant(c)? {
                    Constant::Type(ty) => ty,
                    _ => return Err(self.fault("constant is not a type")),
                };
                let v = self.pop()?;
                self.stack.push(codec::check_cast(v, ty)?);
            }
            Instr::IfNull(target) => {
                if self.pop()?.is_null() {
                    return Ok(Flow::Jump(target));
                }
            }
            Instr::IfNonNull(target) => {
                if !self.pop()?.is_null() {
                    return Ok(Flow::Jump(target));
                }
            }
            Instr::Jump(target) => return Ok(Flow::Jump(target)),
            Instr::InvokeSuper(c) => {
                let method = match self.constant(c)? {
                    Constant::Method(m) => m,
                    _ => return Err(self.fault("constant is not a method")),
                };
                let args = self.pop_n(method.params.len())?;
                let this = self.pop_object()?;
                let result = method.invoke_direct(&this, &args)?;
                if !method.returns.is_void() {
                    self.stack.push(result);
                }
            }
            Instr::InvokeSuperCtor(c) => {
                let ctor = match self.constant(c)? {
                    Constant::Constructor(ctor) => ctor,
                    _ => return Err(self.fault("constant is not a constructor")),
                };
                let args = self.pop_n(ctor.params.len())?;
                let this = self.pop_object()?;
                ctor.invoke(&this, &args)?;
            }
            Instr::InvokeDispatch => {
                let args = self.pop_array()?.lock().clone();
                let operation = match self.pop()? {
                    Value::Operation(op) => op,
                    other => return Err(self.fault(format!("expected operation, found {}", other.type_name()))),
                };
                let this = self.pop_object()?;
                let dispatcher = match self.pop()? {
                    Value::Dispatcher(d) => d,
                    other => return Err(self.fault(format!("expected dispatcher, found {}", other.type_name()))),
                };
                let result = dispatcher.dispatch(&this, operation, args)?;
                self.stack.push(result);
            }
            Instr::NewThrowable(c) => match self.constant(c)? {
                Constant::Throwable(e) => self.stack.push(Value::Throwable(Arc::new((**e).clone()))),
                _ => return Err(self.fault("constant is not a throwable")),
            },
            Instr::Throw => {
                return match self.pop()? {
                    Value::Throwable(e) => Err(Arc::unwrap_or_clone(e).into_error()),
                    Value::Null => Err(HostError::NullPointer(format!("{}: throw null", self.name))),
                    other => Err(self.fault(format!("cannot throw {}", other.type_name()))),
                };
            }
            Instr::Return => return Ok(Flow::Return(self.pop()?)),
            Instr::ReturnVoid => return Ok(Flow::Return(Value::Void)),
            Instr::Dup => {
                let top = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or_else(|| self.fault("stack underflow"))?;
                self.stack.push(top);
            }
            Instr::Pop => {
                self.pop()?;
            }
        }
        Ok(Flow::Next)
    }

    fn pop_array(&mut self) -> HostResult<ArrayRef> {
        match self.pop()? {
            Value::Array(a) => Ok(a),
            Value::Null => Err(HostError::NullPointer(format!("{}: null array", self.name))),
            other => Err(self.fault(format!("expected array, found {}", other.type_name()))),
        }
    }
}
