use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::{ErrorKind, VMError};
use crate::common::object::ObjClass;
use crate::common::value::Value;

impl VirtualMachine {
    pub(crate) fn handle_get_property(&mut self, name_idx: u8) -> Result<(), VMError> {
        let receiver = self.stack.peek(0);
        let instance = match receiver {
            Value::Instance(i) => i,
            _ => {
                return Err(self.runtime_error(ErrorKind::InvalidCall(
                    "Only instances have properties.".into(),
                )));
            }
        };
        let name = self.constant_str(name_idx);

        if let Some(&value) = unsafe { (*instance).data.fields.get(&name) } {
            self.stack.pop();
            return self.push(value);
        }

        let class = unsafe { (*instance).data.class };
        self.bind_method(class, name)
    }

    pub(crate) fn handle_set_property(&mut self, name_idx: u8) -> Result<(), VMError> {
        let receiver = self.stack.peek(1);
        let instance = match receiver {
            Value::Instance(i) => i,
            _ => {
                return Err(self.runtime_error(ErrorKind::InvalidCall(
                    "Only instances have fields.".into(),
                )));
            }
        };
        let name = self.constant_str(name_idx);
        let value = self.stack.peek(0);
        unsafe {
            (*instance).data.fields.insert(name, value);
        }

        let value = self.stack.pop();
        self.stack.pop();
        self.push(value)
    }

    pub(crate) fn handle_get_super(&mut self, name_idx: u8) -> Result<(), VMError> {
        let name = self.constant_str(name_idx);
        let superclass = match self.stack.pop() {
            Value::Class(c) => c,
            _ => {
                return Err(self.runtime_error(ErrorKind::InternalError(
                    "super target resolved to a non-class value".into(),
                )));
            }
        };
        self.bind_method(superclass, name)
    }

    pub(crate) fn handle_class(&mut self, name_idx: u8) -> Result<(), VMError> {
        let name = self.constant_str(name_idx);
        let class = self.heap.alloc_class(ObjClass::new(name));
        self.push(Value::Class(class))
    }

    /// OP_INHERIT copies the superclass's method table into the subclass
    /// by value at declaration time; later edits to the superclass (there
    /// is no such surface in this language, but were one added) would not
    /// retroactively reach already-declared subclasses.
    pub(crate) fn handle_inherit(&mut self) -> Result<(), VMError> {
        let superclass = match self.stack.peek(1) {
            Value::Class(c) => c,
            _ => {
                return Err(self.runtime_error(ErrorKind::TypeError(
                    "Superclass must be a class.".into(),
                )));
            }
        };
        let subclass = match self.stack.peek(0) {
            Value::Class(c) => c,
            _ => {
                return Err(self.runtime_error(ErrorKind::InternalError(
                    "inherit target is not a class".into(),
                )));
            }
        };
        let methods = unsafe { (*superclass).data.methods.clone() };
        unsafe {
            (*subclass).data.methods.extend(methods);
        }
        self.stack.pop();
        Ok(())
    }

    pub(crate) fn handle_method(&mut self, name_idx: u8) -> Result<(), VMError> {
        let name = self.constant_str(name_idx);
        let method = match self.stack.pop() {
            Value::Closure(c) => c,
            _ => {
                return Err(self.runtime_error(ErrorKind::InternalError(
                    "method body did not compile to a closure".into(),
                )));
            }
        };
        let class = match self.stack.peek(0) {
            Value::Class(c) => c,
            _ => {
                return Err(self.runtime_error(ErrorKind::InternalError(
                    "method target is not a class".into(),
                )));
            }
        };
        unsafe {
            (*class).data.methods.insert(name, method);
        }
        Ok(())
    }
}
