use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::{ErrorKind, VMError};
use crate::common::value::{values_equal, Value};

impl VirtualMachine {
    /// ADD is overloaded: Number+Number does arithmetic, Str+Str
    /// concatenates into a freshly interned string. Any other operand pair
    /// is a type error.
    pub(crate) fn handle_add(&mut self) -> Result<(), VMError> {
        let b = self.stack.peek(0);
        let a = self.stack.peek(1);
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                self.stack.pop();
                self.stack.pop();
                self.push(Value::Number(x + y))
            }
            (Value::Str(_), Value::Str(_)) => self.concatenate(),
            _ => Err(self.runtime_error(ErrorKind::TypeError(
                "Operands must be two numbers or two strings.".into(),
            ))),
        }
    }

    fn concatenate(&mut self) -> Result<(), VMError> {
        let b = self.stack.peek(0);
        let a = self.stack.peek(1);
        let (a_ptr, b_ptr) = match (a, b) {
            (Value::Str(x), Value::Str(y)) => (x, y),
            _ => unreachable!("concatenate called with non-string operands"),
        };
        let mut joined = unsafe { (*a_ptr).data.chars.clone() };
        joined.push_str(unsafe { &(*b_ptr).data.chars });

        // Root both operands across the allocation: interning can trigger a
        // collection, and neither string is reachable from anywhere but
        // this stack slot pair until the push below lands.
        self.heap.push_root(a);
        self.heap.push_root(b);
        let result = self.heap.intern_string(&joined);
        self.heap.pop_root();
        self.heap.pop_root();

        self.stack.pop();
        self.stack.pop();
        self.push(Value::Str(result))
    }

    pub(crate) fn handle_subtract(&mut self) -> Result<(), VMError> {
        self.numeric_binary_op(|x, y| x - y)
    }

    pub(crate) fn handle_multiply(&mut self) -> Result<(), VMError> {
        self.numeric_binary_op(|x, y| x * y)
    }

    pub(crate) fn handle_divide(&mut self) -> Result<(), VMError> {
        self.numeric_binary_op(|x, y| x / y)
    }

    fn numeric_binary_op(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), VMError> {
        let b = self.stack.peek(0);
        let a = self.stack.peek(1);
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.pop();
                self.stack.pop();
                self.push(Value::Number(op(x, y)))
            }
            _ => Err(self.runtime_error(ErrorKind::TypeError("Operands must be numbers.".into()))),
        }
    }

    pub(crate) fn handle_negate(&mut self) -> Result<(), VMError> {
        match self.stack.peek(0).as_number() {
            Some(n) => {
                self.stack.pop();
                self.push(Value::Number(-n))
            }
            None => Err(self.runtime_error(ErrorKind::TypeError("Operand must be a number.".into()))),
        }
    }

    pub(crate) fn handle_not(&mut self) -> Result<(), VMError> {
        let value = self.stack.pop();
        self.push(Value::Bool(value.is_falsey()))
    }

    pub(crate) fn handle_equal(&mut self) -> Result<(), VMError> {
        let b = self.stack.pop();
        let a = self.stack.pop();
        self.push(Value::Bool(values_equal(a, b)))
    }

    pub(crate) fn handle_greater(&mut self) -> Result<(), VMError> {
        self.numeric_comparison(|x, y| x > y)
    }

    pub(crate) fn handle_less(&mut self) -> Result<(), VMError> {
        self.numeric_comparison(|x, y| x < y)
    }

    fn numeric_comparison(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), VMError> {
        let b = self.stack.peek(0);
        let a = self.stack.peek(1);
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.pop();
                self.stack.pop();
                self.push(Value::Bool(op(x, y)))
            }
            _ => Err(self.runtime_error(ErrorKind::TypeError("Operands must be numbers.".into()))),
        }
    }
}
