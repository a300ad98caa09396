//! Weaving back-end
//!
//! Installs verified instruction sequences as they are and walks them by
//! instruction index.

use std::sync::{Arc, Weak};

use super::code::Code;
use super::exec::{defining_type, Flow, Frame};
use super::{ClassDef, CodeEmitter, EmitError};
use crate::host::{CompiledBody, HostError, HostResult, HostType, Loader, ObjectRef, Value};

/// Back-end that executes instruction sequences directly
#[derive(Debug, Clone)]
pub struct WeaveEmitter {
    verify: bool,
}

impl WeaveEmitter {
    /// Create a new weaving back-end
    pub fn new(verify: bool) -> Self {
        Self { verify }
    }
}

impl Default for WeaveEmitter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CodeEmitter for WeaveEmitter {
    fn name(&self) -> &'static str {
        "weave"
    }

    fn define(&self, def: ClassDef, loader: &Arc<Loader>) -> Result<Arc<HostType>, EmitError> {
        def.validate()?;
        if self.verify {
            def.verify()?;
        }
        let prepared = def.try_map(|code| Ok::<_, EmitError>(Arc::new(code)))?;
        Ok(prepared.link(loader, |code, owner| {
            Arc::new(WovenBody { owner, code }) as Arc<dyn CompiledBody>
        }))
    }
}

struct WovenBody {
    owner: Weak<HostType>,
    code: Arc<Code>,
}

impl CompiledBody for WovenBody {
    fn run(&self, this: &ObjectRef, args: &[Value]) -> HostResult<Value> {
        let owner = defining_type(&self.owner, &self.code.name)?;
        let code = &*self.code;
        let mut frame = Frame::new(&code.name, &owner, &code.constants, code.locals, this, args);
        let mut pc = 0usize;
        loop {
            let instr = *code.instrs.get(pc).ok_or_else(|| {
                HostError::InvalidCode(format!("{}: control fell off the end", code.name))
            })?;
            match frame.step(instr)? {
                Flow::Next => pc += 1,
                Flow::Jump(target) => pc = target as usize,
                Flow::Return(value) => return Ok(value),
            }
        }
    }

    fn backend(&self) -> &'static str {
        "weave"
    }
}
