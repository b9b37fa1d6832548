use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::{ErrorKind, VMError};
use crate::common::value::Value;
use std::io::Write;

impl VirtualMachine {
    pub(crate) fn handle_constant(&mut self, idx: u8) -> Result<(), VMError> {
        let value = self.constant(idx);
        self.push(value)
    }

    pub(crate) fn handle_nil(&mut self) -> Result<(), VMError> {
        self.push(Value::Nil)
    }

    pub(crate) fn handle_bool(&mut self, value: bool) -> Result<(), VMError> {
        self.push(Value::Bool(value))
    }

    pub(crate) fn handle_pop(&mut self) -> Result<(), VMError> {
        self.stack.pop();
        Ok(())
    }

    pub(crate) fn handle_print(&mut self) -> Result<(), VMError> {
        let value = self.stack.pop();
        let _ = writeln!(self.output, "{}", value);
        Ok(())
    }

    pub(crate) fn handle_close_upvalue(&mut self) -> Result<(), VMError> {
        let top = self.stack.top();
        self.close_upvalues(top - 1);
        self.stack.pop();
        Ok(())
    }

    pub(crate) fn push(&mut self, value: Value) -> Result<(), VMError> {
        self.stack.push(value).map_err(|_| self.runtime_error(ErrorKind::StackOverflow))
    }
}
