use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::{ErrorKind, VMError};
use crate::common::opcode::UpvalueCapture;
use crate::common::value::Value;

impl VirtualMachine {
    pub(crate) fn handle_jump(&mut self, offset: i32) -> Result<(), VMError> {
        let frame = self.frames.last_mut().unwrap();
        frame.ip = (frame.ip as i32 + offset) as usize;
        Ok(())
    }

    pub(crate) fn handle_jump_if_false(&mut self, offset: i32) -> Result<(), VMError> {
        if self.stack.peek(0).is_falsey() {
            let frame = self.frames.last_mut().unwrap();
            frame.ip = (frame.ip as i32 + offset) as usize;
        }
        Ok(())
    }

    pub(crate) fn handle_loop(&mut self, offset: i32) -> Result<(), VMError> {
        let frame = self.frames.last_mut().unwrap();
        frame.ip = (frame.ip as i32 + offset) as usize;
        Ok(())
    }

    pub(crate) fn handle_call(&mut self, arg_count: u8) -> Result<(), VMError> {
        let callee = self.stack.peek(arg_count as usize);
        self.call_value(callee, arg_count)
    }

    pub(crate) fn handle_invoke(&mut self, name_idx: u8, arg_count: u8) -> Result<(), VMError> {
        let name = self.constant_str(name_idx);
        self.invoke(name, arg_count)
    }

    pub(crate) fn handle_super_invoke(&mut self, name_idx: u8, arg_count: u8) -> Result<(), VMError> {
        let name = self.constant_str(name_idx);
        let superclass_val = self.stack.pop();
        let superclass = match superclass_val {
            Value::Class(c) => c,
            _ => {
                return Err(self.runtime_error(ErrorKind::InternalError(
                    "super target resolved to a non-class value".into(),
                )));
            }
        };
        self.invoke_from_class(superclass, name, arg_count)
    }

    pub(crate) fn handle_closure(&mut self, const_idx: u8, captures: &[UpvalueCapture]) -> Result<(), VMError> {
        let function = match self.constant(const_idx) {
            Value::Function(f) => f,
            _ => {
                return Err(self.runtime_error(ErrorKind::InternalError(
                    "closure constant is not a function".into(),
                )));
            }
        };
        let closure = self.make_closure(function, captures);
        self.push(closure)
    }

    pub(crate) fn handle_return(&mut self) -> Result<(), VMError> {
        let result = self.stack.pop();
        let frame = self.frames.pop().unwrap();
        self.close_upvalues(frame.base);

        if self.frames.is_empty() {
            self.stack.truncate(0);
            return Ok(());
        }

        self.stack.truncate(frame.base);
        self.push(result)
    }
}
