//! Assembly back-end
//!
//! Encodes each body into a byte stream (one opcode byte followed by
//! little-endian operands, branch targets resolved to byte offsets at
//! finalization) and executes it by decoding in place.

use std::sync::{Arc, Weak};

use super::code::{Code, Constant, Instr, StaticSlot};
use super::exec::{defining_type, Flow, Frame};
use super::{ClassDef, CodeEmitter, EmitError};
use crate::host::{
    CompiledBody, HostError, HostResult, HostType, Loader, ObjectRef, PrimitiveKind, Value,
};

/// Opcode constants
pub mod opcode {
    // Stack manipulation
    pub const POP: u8 = 0x01;
    pub const DUP: u8 = 0x02;
    pub const CONST_NULL: u8 = 0x04;
    pub const LOAD_CONST: u8 = 0x0A;

    // Local variables
    pub const LOAD_LOCAL: u8 = 0x10;
    pub const STORE_LOCAL: u8 = 0x11;

    // Statics
    pub const GET_STATIC: u8 = 0x20;

    // Control flow
    pub const JMP: u8 = 0x90;
    pub const JMP_IF_NULL: u8 = 0x93;
    pub const JMP_IF_NOT_NULL: u8 = 0x94;

    // Calls
    pub const RETURN: u8 = 0xA2;
    pub const RETURN_VOID: u8 = 0xA3;
    pub const INVOKE_SUPER: u8 = 0xA4;
    pub const INVOKE_SUPER_CTOR: u8 = 0xA5;
    pub const INVOKE_DISPATCH: u8 = 0xA6;

    // Object operations
    pub const LOAD_FIELD: u8 = 0xB1;
    pub const STORE_FIELD: u8 = 0xB2;

    // Array operations
    pub const NEW_ARRAY: u8 = 0xC0;
    pub const ARRAY_LOAD: u8 = 0xC1;
    pub const ARRAY_STORE: u8 = 0xC2;

    // Conversions
    pub const BOX: u8 = 0xD0;
    pub const UNBOX: u8 = 0xD1;
    pub const CHECK_CAST: u8 = 0xD2;

    // Exceptions
    pub const NEW_THROWABLE: u8 = 0xE0;
    pub const THROW: u8 = 0xE1;
}

/// Back-end that assembles bodies into byte code
#[derive(Debug, Clone)]
pub struct AssemblyEmitter {
    verify: bool,
}

impl AssemblyEmitter {
    /// Create a new assembly back-end
    pub fn new(verify: bool) -> Self {
        Self { verify }
    }
}

impl Default for AssemblyEmitter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CodeEmitter for AssemblyEmitter {
    fn name(&self) -> &'static str {
        "assembly"
    }

    fn define(&self, def: ClassDef, loader: &Arc<Loader>) -> Result<Arc<HostType>, EmitError> {
        def.validate()?;
        if self.verify {
            def.verify()?;
        }
        let verify = self.verify;
        let prepared = def.try_map(|code| {
            let bytes = encode(&code)?;
            if verify {
                check_stream(&code.name, &bytes)?;
            }
            Ok::<_, EmitError>(Assembled {
                name: code.name,
                locals: code.locals,
                constants: code.constants,
                bytes,
            })
        })?;
        Ok(prepared.link(loader, |assembled, owner| {
            Arc::new(AssembledBody {
                owner,
                assembled: Arc::new(assembled),
            }) as Arc<dyn CompiledBody>
        }))
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn encoded_len(instr: &Instr) -> usize {
    match instr {
        Instr::Null
        | Instr::NewArray
        | Instr::ArrayLoad
        | Instr::ArrayStore
        | Instr::InvokeDispatch
        | Instr::Throw
        | Instr::Return
        | Instr::ReturnVoid
        | Instr::Dup
        | Instr::Pop => 1,
        Instr::GetStatic(_) | Instr::Box(_) | Instr::Unbox(_) => 2,
        Instr::Load(_)
        | Instr::Store(_)
        | Instr::Const(_)
        | Instr::GetField(_)
        | Instr::PutField(_)
        | Instr::CheckCast(_)
        | Instr::InvokeSuper(_)
        | Instr::InvokeSuperCtor(_)
        | Instr::NewThrowable(_) => 3,
        Instr::IfNull(_) | Instr::IfNonNull(_) | Instr::Jump(_) => 5,
    }
}

fn kind_byte(kind: PrimitiveKind) -> u8 {
    PrimitiveKind::ALL.iter().position(|k| *k == kind).unwrap_or(0) as u8
}

/// Encode a body, resolving instruction-index targets to byte offsets
pub fn encode(code: &Code) -> Result<Vec<u8>, EmitError> {
    let mut offsets = Vec::with_capacity(code.instrs.len() + 1);
    let mut total = 0usize;
    for instr in &code.instrs {
        offsets.push(total as u32);
        total += encoded_len(instr);
    }
    offsets.push(total as u32);

    let target = |pc: usize, t: u32| {
        offsets.get(t as usize).copied().ok_or_else(|| EmitError::InvalidCode {
            code: code.name.clone(),
            pc,
            reason: format!("branch target {} out of range", t),
        })
    };

    let mut out = Vec::with_capacity(total);
    for (pc, instr) in code.instrs.iter().enumerate() {
        match *instr {
            Instr::Load(i) => emit_u16(&mut out, opcode::LOAD_LOCAL, i),
            Instr::Store(i) => emit_u16(&mut out, opcode::STORE_LOCAL, i),
            Instr::Const(c) => emit_u16(&mut out, opcode::LOAD_CONST, c),
            Instr::Null => out.push(opcode::CONST_NULL),
            Instr::GetStatic(slot) => {
                out.push(opcode::GET_STATIC);
                out.push(match slot {
                    StaticSlot::Dispatcher => 0,
                    StaticSlot::Operations => 1,
                });
            }
            Instr::GetField(c) => emit_u16(&mut out, opcode::LOAD_FIELD, c),
            Instr::PutField(c) => emit_u16(&mut out, opcode::STORE_FIELD, c),
            Instr::NewArray => out.push(opcode::NEW_ARRAY),
            Instr::ArrayLoad => out.push(opcode::ARRAY_LOAD),
            Instr::ArrayStore => out.push(opcode::ARRAY_STORE),
            Instr::Box(kind) => out.extend_from_slice(&[opcode::BOX, kind_byte(kind)]),
            Instr::Unbox(kind) => out.extend_from_slice(&[opcode::UNBOX, kind_byte(kind)]),
            Instr::CheckCast(c) => emit_u16(&mut out, opcode::CHECK_CAST, c),
            Instr::IfNull(t) => emit_u32(&mut out, opcode::JMP_IF_NULL, target(pc, t)?),
            Instr::IfNonNull(t) => emit_u32(&mut out, opcode::JMP_IF_NOT_NULL, target(pc, t)?),
            Instr::Jump(t) => emit_u32(&mut out, opcode::JMP, target(pc, t)?),
            Instr::InvokeSuper(c) => emit_u16(&mut out, opcode::INVOKE_SUPER, c),
            Instr::InvokeSuperCtor(c) => emit_u16(&mut out, opcode::INVOKE_SUPER_CTOR, c),
            Instr::InvokeDispatch => out.push(opcode::INVOKE_DISPATCH),
            Instr::NewThrowable(c) => emit_u16(&mut out, opcode::NEW_THROWABLE, c),
            Instr::Throw => out.push(opcode::THROW),
            Instr::Return => out.push(opcode::RETURN),
            Instr::ReturnVoid => out.push(opcode::RETURN_VOID),
            Instr::Dup => out.push(opcode::DUP),
            Instr::Pop => out.push(opcode::POP),
        }
    }
    Ok(out)
}

fn emit_u16(out: &mut Vec<u8>, op: u8, operand: u16) {
    out.push(op);
    out.extend_from_slice(&operand.to_le_bytes());
}

fn emit_u32(out: &mut Vec<u8>, op: u8, operand: u32) {
    out.push(op);
    out.extend_from_slice(&operand.to_le_bytes());
}

// ============================================================================
// Decoding
// ============================================================================

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let raw = bytes.get(at..at + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Decode the instruction at byte offset `pc`; returns it and the next offset
///
/// Branch targets in the result are byte offsets.
pub fn decode(bytes: &[u8], pc: usize) -> Option<(Instr, usize)> {
    let op = *bytes.get(pc)?;
    let u16_at = || read_u16(bytes, pc + 1);
    let u32_at = || read_u32(bytes, pc + 1);
    let kind_at = || PrimitiveKind::ALL.get(*bytes.get(pc + 1)? as usize).copied();
    let instr = match op {
        opcode::POP => Instr::Pop,
        opcode::DUP => Instr::Dup,
        opcode::CONST_NULL => Instr::Null,
        opcode::LOAD_CONST => Instr::Const(u16_at()?),
        opcode::LOAD_LOCAL => Instr::Load(u16_at()?),
        opcode::STORE_LOCAL => Instr::Store(u16_at()?),
        opcode::GET_STATIC => match bytes.get(pc + 1)? {
            0 => Instr::GetStatic(StaticSlot::Dispatcher),
            1 => Instr::GetStatic(StaticSlot::Operations),
            _ => return None,
        },
        opcode::JMP => Instr::Jump(u32_at()?),
        opcode::JMP_IF_NULL => Instr::IfNull(u32_at()?),
        opcode::JMP_IF_NOT_NULL => Instr::IfNonNull(u32_at()?),
        opcode::RETURN => Instr::Return,
        opcode::RETURN_VOID => Instr::ReturnVoid,
        opcode::INVOKE_SUPER => Instr::InvokeSuper(u16_at()?),
        opcode::INVOKE_SUPER_CTOR => Instr::InvokeSuperCtor(u16_at()?),
        opcode::INVOKE_DISPATCH => Instr::InvokeDispatch,
        opcode::LOAD_FIELD => Instr::GetField(u16_at()?),
        opcode::STORE_FIELD => Instr::PutField(u16_at()?),
        opcode::NEW_ARRAY => Instr::NewArray,
        opcode::ARRAY_LOAD => Instr::ArrayLoad,
        opcode::ARRAY_STORE => Instr::ArrayStore,
        opcode::BOX => Instr::Box(kind_at()?),
        opcode::UNBOX => Instr::Unbox(kind_at()?),
        opcode::CHECK_CAST => Instr::CheckCast(u16_at()?),
        opcode::NEW_THROWABLE => Instr::NewThrowable(u16_at()?),
        opcode::THROW => Instr::Throw,
        _ => return None,
    };
    Some((instr, pc + encoded_len(&instr)))
}

/// Check that `bytes` decodes instruction by instruction up to its end
fn check_stream(name: &str, bytes: &[u8]) -> Result<(), EmitError> {
    let mut pc = 0;
    while pc < bytes.len() {
        match decode(bytes, pc) {
            Some((_, next)) => pc = next,
            None => {
                return Err(EmitError::Malformed {
                    code: name.to_string(),
                    offset: pc,
                })
            }
        }
    }
    Ok(())
}

struct Assembled {
    name: String,
    locals: u16,
    constants: Vec<Constant>,
    bytes: Vec<u8>,
}

struct AssembledBody {
    owner: Weak<HostType>,
    assembled: Arc<Assembled>,
}

impl CompiledBody for AssembledBody {
    fn run(&self, this: &ObjectRef, args: &[Value]) -> HostResult<Value> {
        let asm = &*self.assembled;
        let owner = defining_type(&self.owner, &asm.name)?;
        let mut frame = Frame::new(&asm.name, &owner, &asm.constants, asm.locals, this, args);
        let mut pc = 0usize;
        loop {
            let (instr, next) = decode(&asm.bytes, pc).ok_or_else(|| {
                HostError::InvalidCode(format!("{}: malformed byte code at offset {}", asm.name, pc))
            })?;
            match frame.step(instr)? {
                Flow::Next => pc = next,
                Flow::Jump(target) => pc = target as usize,
                Flow::Return(value) => return Ok(value),
            }
        }
    }

    fn backend(&self) -> &'static str {
        "assembly"
    }
}
