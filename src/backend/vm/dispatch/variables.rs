use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::{ErrorKind, VMError};
use crate::common::object::UpvalueLoc;

impl VirtualMachine {
    pub(crate) fn handle_get_local(&mut self, slot: u8) -> Result<(), VMError> {
        let base = self.current_frame().base;
        let value = self.stack.get(base + slot as usize);
        self.push(value)
    }

    pub(crate) fn handle_set_local(&mut self, slot: u8) -> Result<(), VMError> {
        let base = self.current_frame().base;
        let value = self.stack.peek(0);
        self.stack.set(base + slot as usize, value);
        Ok(())
    }

    pub(crate) fn handle_get_global(&mut self, idx: u8) -> Result<(), VMError> {
        let name = self.constant_str(idx);
        match self.globals.get(&name).copied() {
            Some(value) => self.push(value),
            None => Err(self.runtime_error(ErrorKind::UndefinedVariable(unsafe {
                (*name).data.chars.clone()
            }))),
        }
    }

    pub(crate) fn handle_define_global(&mut self, idx: u8) -> Result<(), VMError> {
        let name = self.constant_str(idx);
        let value = self.stack.pop();
        self.globals.insert(name, value);
        Ok(())
    }

    pub(crate) fn handle_set_global(&mut self, idx: u8) -> Result<(), VMError> {
        let name = self.constant_str(idx);
        let value = self.stack.peek(0);
        if self.globals.contains_key(&name) {
            self.globals.insert(name, value);
            Ok(())
        } else {
            Err(self.runtime_error(ErrorKind::UndefinedVariable(unsafe {
                (*name).data.chars.clone()
            })))
        }
    }

    pub(crate) fn handle_get_upvalue(&mut self, idx: u8) -> Result<(), VMError> {
        let up = unsafe { (*self.current_frame().closure).data.upvalues[idx as usize] };
        let value = unsafe {
            match (*up).data.loc {
                UpvalueLoc::Stack(slot) => self.stack.get(slot),
                UpvalueLoc::Closed => (*up).data.closed,
            }
        };
        self.push(value)
    }

    pub(crate) fn handle_set_upvalue(&mut self, idx: u8) -> Result<(), VMError> {
        let up = unsafe { (*self.current_frame().closure).data.upvalues[idx as usize] };
        let value = self.stack.peek(0);
        unsafe {
            match (*up).data.loc {
                UpvalueLoc::Stack(slot) => self.stack.set(slot, value),
                UpvalueLoc::Closed => (*up).data.closed = value,
            }
        }
        Ok(())
    }
}
