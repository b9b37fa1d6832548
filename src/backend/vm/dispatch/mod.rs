mod arithmetic;
mod classes;
mod control;
mod stack_ops;
mod variables;

use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::VMError;
use crate::common::opcode::OpCode;

impl VirtualMachine {
    pub(crate) fn execute(&mut self, instr: OpCode) -> Result<(), VMError> {
        match instr {
            OpCode::Constant(idx) => self.handle_constant(idx),
            OpCode::Nil => self.handle_nil(),
            OpCode::True => self.handle_bool(true),
            OpCode::False => self.handle_bool(false),
            OpCode::Pop => self.handle_pop(),
            OpCode::Print => self.handle_print(),
            OpCode::CloseUpvalue => self.handle_close_upvalue(),

            OpCode::GetLocal(slot) => self.handle_get_local(slot),
            OpCode::SetLocal(slot) => self.handle_set_local(slot),
            OpCode::GetGlobal(idx) => self.handle_get_global(idx),
            OpCode::DefineGlobal(idx) => self.handle_define_global(idx),
            OpCode::SetGlobal(idx) => self.handle_set_global(idx),
            OpCode::GetUpvalue(idx) => self.handle_get_upvalue(idx),
            OpCode::SetUpvalue(idx) => self.handle_set_upvalue(idx),

            OpCode::Equal => self.handle_equal(),
            OpCode::Greater => self.handle_greater(),
            OpCode::Less => self.handle_less(),
            OpCode::Add => self.handle_add(),
            OpCode::Subtract => self.handle_subtract(),
            OpCode::Multiply => self.handle_multiply(),
            OpCode::Divide => self.handle_divide(),
            OpCode::Not => self.handle_not(),
            OpCode::Negate => self.handle_negate(),

            OpCode::Jump(offset) => self.handle_jump(offset),
            OpCode::JumpIfFalse(offset) => self.handle_jump_if_false(offset),
            OpCode::Loop(offset) => self.handle_loop(offset),

            OpCode::Call(argc) => self.handle_call(argc),
            OpCode::Invoke(name_idx, argc) => self.handle_invoke(name_idx, argc),
            OpCode::SuperInvoke(name_idx, argc) => self.handle_super_invoke(name_idx, argc),
            OpCode::Closure(const_idx, captures) => self.handle_closure(const_idx, &captures),
            OpCode::Return => self.handle_return(),

            OpCode::GetProperty(name_idx) => self.handle_get_property(name_idx),
            OpCode::SetProperty(name_idx) => self.handle_set_property(name_idx),
            OpCode::GetSuper(name_idx) => self.handle_get_super(name_idx),
            OpCode::Class(name_idx) => self.handle_class(name_idx),
            OpCode::Inherit => self.handle_inherit(),
            OpCode::Method(name_idx) => self.handle_method(name_idx),
        }
    }
}
