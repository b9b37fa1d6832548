// wisp compiler
// Changelog:
//      Initial version: single-pass Pratt parser emitting bytecode
//      directly into a Chunk owned by a freshly allocated ObjFunction, one
//      FunctionState per nested function/method/initializer, upvalue
//      resolution by walking the enclosing chain, a class-compiler stack
//      for `this`/`super` validation.

use crate::backend::vm::heap::Heap;
use crate::common::chunk::Chunk;
use crate::common::object::{ObjFunction, StrRef};
use crate::common::opcode::{OpCode, UpvalueCapture};
use crate::common::token::{Token, TokenType};
use crate::common::value::Value;
use crate::frontend::scanner::Scanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < <= > >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

fn precedence_of(kind: TokenType) -> Precedence {
    use TokenType::*;
    match kind {
        Or => Precedence::Or,
        And => Precedence::And,
        BangEqual | EqualEqual => Precedence::Equality,
        Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
        Plus | Minus => Precedence::Term,
        Star | Slash => Precedence::Factor,
        LeftParen | Dot => Precedence::Call,
        _ => Precedence::None,
    }
}

struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

struct FunctionState<'src> {
    fn_type: FunctionType,
    name: Option<StrRef>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueCapture>,
    scope_depth: i32,
}

impl<'src> FunctionState<'src> {
    fn new(fn_type: FunctionType, name: Option<StrRef>) -> Self {
        // Slot 0 is reserved: `this` for methods/initializers, otherwise
        // an unnamed throwaway the user can never reference.
        let slot_zero_name = if matches!(fn_type, FunctionType::Method | FunctionType::Initializer)
        {
            "this"
        } else {
            ""
        };
        Self {
            fn_type,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local { name: slot_zero_name, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

pub struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    heap: &'h mut Heap,
    functions: Vec<FunctionState<'src>>,
    classes: Vec<ClassState>,
    /// Upvalue capture descriptors for the function `end_compiler` most
    /// recently popped, consumed by the enclosing `function()` call to
    /// build the matching `OpCode::Closure` operand.
    last_popped_upvalues: Option<Vec<UpvalueCapture>>,
}

pub fn compile(source: &str, heap: &mut Heap) -> Option<crate::common::object::FunctionRef> {
    let mut compiler = Compiler::new(source, heap);
    compiler.advance();
    while !compiler.match_token(TokenType::Eof) {
        compiler.declaration();
    }
    let function = compiler.end_compiler();
    if compiler.had_error { None } else { Some(function) }
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        let eof = Token { kind: TokenType::Eof, text: "", line: 0 };
        Self {
            scanner: Scanner::new(source),
            previous: eof,
            current: eof,
            had_error: false,
            panic_mode: false,
            heap,
            functions: vec![FunctionState::new(FunctionType::Script, None)],
            classes: Vec::new(),
            last_popped_upvalues: None,
        }
    }

    // ---- token stream plumbing -------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenType::Error {
                break;
            }
            self.error_at_current(self.current.text);
        }
    }

    fn consume(&mut self, kind: TokenType, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenType) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenType) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        eprint!("[line {}] Error", token.line);
        if token.kind == TokenType::Eof {
            eprint!(" at end");
        } else if token.kind != TokenType::Error {
            eprint!(" at '{}'", token.text);
        }
        eprintln!(": {}", message);
        self.had_error = true;
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenType::Eof {
            if self.previous.kind == TokenType::Semicolon {
                return;
            }
            match self.current.kind {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- emission -----------------------------------------------------

    fn current_fn_mut(&mut self) -> &mut FunctionState<'src> {
        self.functions.last_mut().unwrap()
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.current_fn_mut().chunk
    }

    fn emit(&mut self, op: OpCode) -> usize {
        let line = self.previous.line;
        self.current_chunk().write(op, line)
    }

    fn emit_return(&mut self) {
        if self.functions.last().unwrap().fn_type == FunctionType::Initializer {
            self.emit(OpCode::GetLocal(0));
        } else {
            self.emit(OpCode::Nil);
        }
        self.emit(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        self.heap.push_root(value);
        let result = self.current_chunk().add_constant(value);
        self.heap.pop_root();
        match result {
            Ok(idx) => idx,
            Err(msg) => {
                self.error(msg);
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit(OpCode::Constant(idx));
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let s = self.heap.intern_string(name);
        // `s` is reachable from nowhere durable yet (not in any chunk's
        // constant pool, not on `heap.roots`) until `make_constant` below
        // wires it in, so the GC check in between must see it as a root.
        self.heap.push_root(Value::Str(s));
        self.maybe_collect();
        let idx = self.make_constant(Value::Str(s));
        self.heap.pop_root();
        idx
    }

    fn emit_jump(&mut self, make: impl Fn(i32) -> OpCode) -> usize {
        self.emit(make(0))
    }

    fn patch_jump(&mut self, idx: usize) {
        let chunk = self.current_chunk();
        let after = idx as i32 + 1;
        let target = chunk.code.len() as i32;
        let offset = target - after;
        if offset > i32::from(u16::MAX) {
            self.error("Too much code to jump over.");
        }
        match &mut chunk.code[idx] {
            OpCode::Jump(o) | OpCode::JumpIfFalse(o) => *o = offset,
            _ => unreachable!("patch_jump target is not a jump instruction"),
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let idx = self.current_chunk().code.len();
        let after = idx as i32 + 1;
        let offset = loop_start as i32 - after;
        if offset.abs() > i32::from(u16::MAX) {
            self.error("Loop body too large.");
        }
        self.emit(OpCode::Loop(offset));
    }

    /// Mirrors spec §4.5's compile-time rooting: marks every in-progress
    /// function's already-emitted constants plus the scratch root stack,
    /// then sweeps. Allocation during compilation can otherwise race a
    /// fresh, not-yet-rooted object against collection.
    fn maybe_collect(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let roots: Vec<Value> = self.heap.roots.clone();
        for v in roots {
            self.heap.mark_value(v);
        }
        for fs in &self.functions {
            if let Some(name) = fs.name {
                self.heap.mark_value(Value::Str(name));
            }
            let constants = fs.chunk.constants.clone();
            for c in constants {
                self.heap.mark_value(c);
            }
        }
        self.heap.sweep();
        self.heap.after_collect();
    }

    // ---- scopes and locals ---------------------------------------------

    fn begin_scope(&mut self) {
        self.current_fn_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let func = self.current_fn_mut();
        func.scope_depth -= 1;
        let depth = func.scope_depth;
        while let Some(local) = func.locals.last() {
            if local.depth <= depth {
                break;
            }
            if func.locals.last().unwrap().is_captured {
                self.emit(OpCode::CloseUpvalue);
            } else {
                self.emit(OpCode::Pop);
            }
            self.current_fn_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.current_fn_mut().locals.len() >= 256 {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_fn_mut().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.current_fn_mut().scope_depth == 0 {
            return;
        }
        let name = self.previous.text;
        let depth = self.current_fn_mut().scope_depth;
        for local in self.current_fn_mut().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                self.error("Already a variable with this name in this scope.");
                return;
            }
        }
        self.add_local(name);
    }

    /// `Ok(None)` means "no local with this name"; `Err(())` means "found
    /// one, but it's mid-initialization" (`var a = a;`), which is a compile
    /// error the caller reports with its own source-text context.
    fn resolve_local(&self, func_idx: usize, name: &str) -> Result<Option<u8>, ()> {
        let func = &self.functions[func_idx];
        for (i, local) in func.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err(());
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn resolve_upvalue(&mut self, func_idx: usize, name: &'src str) -> Result<Option<u8>, ()> {
        if func_idx == 0 {
            return Ok(None);
        }
        let enclosing = func_idx - 1;
        if let Some(local_idx) = self.resolve_local(enclosing, name)? {
            self.functions[enclosing].locals[local_idx as usize].is_captured = true;
            return Ok(Some(self.add_upvalue(func_idx, local_idx, true)));
        }
        if let Some(up_idx) = self.resolve_upvalue(enclosing, name)? {
            return Ok(Some(self.add_upvalue(func_idx, up_idx, false)));
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, func_idx: usize, index: u8, is_local: bool) -> u8 {
        let func = &mut self.functions[func_idx];
        for (i, up) in func.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if func.upvalues.len() >= 256 {
            self.error("Too many closure variables in function.");
            return 0;
        }
        func.upvalues.push(UpvalueCapture { is_local, index });
        (func.upvalues.len() - 1) as u8
    }

    fn mark_initialized(&mut self) {
        let func = self.current_fn_mut();
        if func.scope_depth == 0 {
            return;
        }
        let depth = func.scope_depth;
        func.locals.last_mut().unwrap().depth = depth;
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenType::Identifier, message);
        self.declare_variable();
        if self.current_fn_mut().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.text;
        self.identifier_constant(name)
    }

    fn define_variable(&mut self, global_idx: u8) {
        if self.current_fn_mut().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit(OpCode::DefineGlobal(global_idx));
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u16 = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    // ---- statements -----------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenType::Class) {
            self.class_declaration();
        } else if self.match_token(TokenType::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenType::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::Print) {
            self.print_statement();
        } else if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::Return) {
            self.return_statement();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::For) {
            self.for_statement();
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit(OpCode::Pop);

        if self.match_token(TokenType::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenType::Semicolon) {
            // no initializer
        } else if self.match_token(TokenType::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit(OpCode::Pop);
        }

        if !self.match_token(TokenType::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit(OpCode::Pop);
            self.consume(TokenType::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.functions.last().unwrap().fn_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenType::Semicolon) {
            self.emit_return();
        } else {
            if self.functions.last().unwrap().fn_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit(OpCode::Return);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit(OpCode::Nil);
        }
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect class name.");
        let class_name = self.previous.text;
        let name_const = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit(OpCode::Class(name_const));
        self.define_variable(name_const);

        self.classes.push(ClassState { has_superclass: false });

        if self.match_token(TokenType::Less) {
            self.consume(TokenType::Identifier, "Expect superclass name.");
            self.variable(false);
            if self.previous.text == class_name {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();

            self.named_variable_text(class_name, false);
            self.emit(OpCode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable_text(class_name, false);
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.method();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after class body.");
        self.emit(OpCode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenType::Identifier, "Expect method name.");
        let name = self.previous.text;
        let name_const = self.identifier_constant(name);

        let fn_type = if name == "init" { FunctionType::Initializer } else { FunctionType::Method };
        self.function(fn_type);
        self.emit(OpCode::Method(name_const));
    }

    fn function(&mut self, fn_type: FunctionType) {
        let name = if fn_type == FunctionType::Script {
            None
        } else {
            Some(self.heap.intern_string(self.previous.text))
        };
        self.functions.push(FunctionState::new(fn_type, name));
        self.begin_scope();

        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                let func = self.current_fn_mut();
                func.arity += 1;
                if func.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block();

        let function_ref = self.end_compiler();
        let const_idx = self.make_constant(Value::Function(function_ref));
        let captures = self.last_popped_upvalues.take().unwrap_or_default();
        self.emit(OpCode::Closure(const_idx, captures));
    }

    fn end_compiler(&mut self) -> crate::common::object::FunctionRef {
        self.emit_return();
        let state = self.functions.pop().unwrap();
        let mut function = ObjFunction::new(state.name);
        function.arity = state.arity;
        function.upvalue_count = state.upvalues.len() as u8;
        function.chunk = state.chunk;
        self.last_popped_upvalues = Some(state.upvalues);
        let func_ref = self.heap.alloc_function(function);
        // `state` (and its chunk/constants) was already popped off
        // `self.functions` above, so the `maybe_collect` mark loop over
        // in-progress functions no longer sees it; root it explicitly
        // until the caller's `make_constant` call wires it into the
        // enclosing function's constant pool.
        self.heap.push_root(Value::Function(func_ref));
        self.maybe_collect();
        self.heap.pop_root();
        func_ref
    }

    // ---- expressions ----------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix_rule(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= precedence_of(self.current.kind) {
            self.advance();
            self.infix_rule(self.previous.kind, can_assign);
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn prefix_rule(&mut self, kind: TokenType, can_assign: bool) -> bool {
        use TokenType::*;
        match kind {
            LeftParen => self.grouping(),
            Minus | Bang => self.unary(),
            Number => self.number(),
            String => self.string(),
            False | True | Nil => self.literal(),
            Identifier => self.variable(can_assign),
            This => self.this_(),
            Super => self.super_(),
            _ => return false,
        }
        true
    }

    fn infix_rule(&mut self, kind: TokenType, can_assign: bool) {
        use TokenType::*;
        match kind {
            Minus | Plus | Slash | Star | BangEqual | EqualEqual | Greater | GreaterEqual | Less
            | LessEqual => self.binary(),
            And => self.and_(),
            Or => self.or_(),
            LeftParen => self.call(),
            Dot => self.dot(can_assign),
            _ => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        let value: f64 = self.previous.text.parse().unwrap_or(f64::NAN);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let text = self.previous.text;
        let content = &text[1..text.len() - 1];
        let s = self.heap.intern_string(content);
        self.heap.push_root(Value::Str(s));
        self.maybe_collect();
        self.heap.pop_root();
        self.emit_constant(Value::Str(s));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenType::False => {
                self.emit(OpCode::False);
            }
            TokenType::True => {
                self.emit(OpCode::True);
            }
            TokenType::Nil => {
                self.emit(OpCode::Nil);
            }
            _ => unreachable!(),
        }
    }

    fn unary(&mut self) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenType::Minus => {
                self.emit(OpCode::Negate);
            }
            TokenType::Bang => {
                self.emit(OpCode::Not);
            }
            _ => unreachable!(),
        }
    }

    fn binary(&mut self) {
        let op_kind = self.previous.kind;
        let prec = precedence_of(op_kind);
        self.parse_precedence(prec.next());
        match op_kind {
            TokenType::Plus => {
                self.emit(OpCode::Add);
            }
            TokenType::Minus => {
                self.emit(OpCode::Subtract);
            }
            TokenType::Star => {
                self.emit(OpCode::Multiply);
            }
            TokenType::Slash => {
                self.emit(OpCode::Divide);
            }
            TokenType::BangEqual => {
                self.emit(OpCode::Equal);
                self.emit(OpCode::Not);
            }
            TokenType::EqualEqual => {
                self.emit(OpCode::Equal);
            }
            TokenType::Greater => {
                self.emit(OpCode::Greater);
            }
            TokenType::GreaterEqual => {
                self.emit(OpCode::Less);
                self.emit(OpCode::Not);
            }
            TokenType::Less => {
                self.emit(OpCode::Less);
            }
            TokenType::LessEqual => {
                self.emit(OpCode::Greater);
                self.emit(OpCode::Not);
            }
            _ => unreachable!(),
        }
    }

    fn and_(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let arg_count = self.argument_list();
        self.emit(OpCode::Call(arg_count));
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenType::Identifier, "Expect property name after '.'.");
        let name = self.previous.text;
        let name_const = self.identifier_constant(name);

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit(OpCode::SetProperty(name_const));
        } else if self.match_token(TokenType::LeftParen) {
            let arg_count = self.argument_list();
            self.emit(OpCode::Invoke(name_const, arg_count));
        } else {
            self.emit(OpCode::GetProperty(name_const));
        }
    }

    fn this_(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenType::Dot, "Expect '.' after 'super'.");
        self.consume(TokenType::Identifier, "Expect superclass method name.");
        let method_const = self.identifier_constant(self.previous.text);

        self.named_variable_text("this", false);
        if self.match_token(TokenType::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable_text("super", false);
            self.emit(OpCode::SuperInvoke(method_const, arg_count));
        } else {
            self.named_variable_text("super", false);
            self.emit(OpCode::GetSuper(method_const));
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.text;
        self.named_variable_text(name, can_assign);
    }

    /// Resolves `name` against locals, then upvalues, then falls back to a
    /// global, emitting the matching get/set opcode.
    fn named_variable_text(&mut self, name: &'src str, can_assign: bool) {
        let func_idx = self.functions.len() - 1;
        let mut get_op;
        let mut set_op;
        match self.resolve_local(func_idx, name) {
            Ok(Some(slot)) => {
                get_op = OpCode::GetLocal(slot);
                set_op = OpCode::SetLocal(slot);
            }
            Err(()) => {
                self.error("Can't read local variable in its own initializer.");
                get_op = OpCode::Nil;
                set_op = OpCode::Nil;
            }
            Ok(None) => match self.resolve_upvalue(func_idx, name) {
                Ok(Some(slot)) => {
                    get_op = OpCode::GetUpvalue(slot);
                    set_op = OpCode::SetUpvalue(slot);
                }
                Err(()) => {
                    self.error("Can't read local variable in its own initializer.");
                    get_op = OpCode::Nil;
                    set_op = OpCode::Nil;
                }
                Ok(None) => {
                    let idx = self.identifier_constant(name);
                    get_op = OpCode::GetGlobal(idx);
                    set_op = OpCode::SetGlobal(idx);
                }
            },
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            std::mem::swap(&mut get_op, &mut set_op);
            self.emit(get_op);
        } else {
            self.emit(get_op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(source: &str) -> crate::common::object::FunctionRef {
        let mut heap = Heap::new();
        compile(source, &mut heap).expect("expected source to compile")
    }

    fn compile_err(source: &str) {
        let mut heap = Heap::new();
        assert!(compile(source, &mut heap).is_none(), "expected a compile error");
    }

    #[test]
    fn emits_define_global_for_top_level_var() {
        let func = compile_ok("var a = 1;");
        let code = unsafe { &(*func).data.chunk.code };
        assert!(code.iter().any(|op| matches!(op, OpCode::DefineGlobal(_))));
    }

    #[test]
    fn if_else_patches_both_jump_targets() {
        let func = compile_ok("if (true) { print 1; } else { print 2; }");
        let code = unsafe { &(*func).data.chunk.code };
        let then_jump = code.iter().find_map(|op| match op {
            OpCode::JumpIfFalse(o) => Some(*o),
            _ => None,
        });
        let else_jump = code.iter().find_map(|op| match op {
            OpCode::Jump(o) => Some(*o),
            _ => None,
        });
        assert!(then_jump.unwrap() > 0);
        assert!(else_jump.unwrap() > 0);
    }

    #[test]
    fn while_loop_emits_backward_loop_instruction() {
        let func = compile_ok("while (true) { print 1; }");
        let code = unsafe { &(*func).data.chunk.code };
        let loop_offset = code.iter().find_map(|op| match op {
            OpCode::Loop(o) => Some(*o),
            _ => None,
        });
        assert!(loop_offset.unwrap() < 0, "backward jump must be negative");
    }

    #[test]
    fn redeclaring_a_local_in_the_same_scope_is_an_error() {
        compile_err("{ var a = 1; var a = 2; }");
    }

    #[test]
    fn using_this_outside_a_class_is_an_error() {
        compile_err("print this;");
    }

    #[test]
    fn using_super_without_a_superclass_is_an_error() {
        compile_err("class A { m() { super.m(); } }");
    }

    #[test]
    fn returning_a_value_from_an_initializer_is_an_error() {
        compile_err("class A { init() { return 1; } }");
    }

    #[test]
    fn closures_over_nested_locals_emit_upvalue_captures() {
        let func = compile_ok("fun outer() { var x = 1; fun inner() { return x; } return inner; }");
        let code = unsafe { &(*func).data.chunk.code };
        let has_closure_with_capture = code.iter().any(|op| match op {
            OpCode::Closure(_, captures) => !captures.is_empty(),
            _ => false,
        });
        assert!(has_closure_with_capture);
    }
}
