// wisp runtime error model
// Changelog:
//      Initial version: hand-rolled ErrorKind/VMError, exception-style
//      messages, no thiserror — same texture as the register-machine
//      predecessor's error.rs, extended with a full call-frame backtrace
//      (one line per frame: "[line N] in <script|name>()").

#[derive(Debug, Clone)]
pub enum ErrorKind {
    TypeError(String),
    UndefinedVariable(String),
    UndefinedProperty(String),
    InvalidCall(String),
    ArithmeticError(String),
    StackOverflow,
    OutOfMemory,
    InternalError(String),
}

#[derive(Debug, Clone)]
pub struct StackTraceEntry {
    pub func_name: String,
    pub line: i64,
}

#[derive(Debug, Clone)]
pub struct VMError {
    pub kind: ErrorKind,
    /// Innermost frame first.
    pub frames: Vec<StackTraceEntry>,
}

impl std::fmt::Display for VMError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.get_message())?;
        for entry in &self.frames {
            writeln!(f, "[line {}] in {}()", entry.line, entry.func_name)?;
        }
        Ok(())
    }
}

impl VMError {
    pub fn get_message(&self) -> String {
        match &self.kind {
            ErrorKind::TypeError(m) => self.format_with_fallback("TypeMismatchException", m),
            ErrorKind::InvalidCall(m) => {
                self.format_with_fallback("IllegalInvocationException", m)
            }
            ErrorKind::ArithmeticError(m) => self.format_with_fallback("ArithmeticException", m),
            ErrorKind::InternalError(m) => {
                self.format_with_fallback("InternalExecutionException", m)
            }
            ErrorKind::UndefinedVariable(v) => {
                format!("Undefined variable '{}'.", v)
            }
            ErrorKind::UndefinedProperty(v) => {
                format!("Undefined property '{}'.", v)
            }
            ErrorKind::StackOverflow => "Stack overflow.".to_string(),
            ErrorKind::OutOfMemory => "OutOfMemoryError: heap exhaustion during allocation".into(),
        }
    }

    fn format_with_fallback(&self, exception_name: &str, message: &str) -> String {
        if message.starts_with(exception_name) {
            message.to_string()
        } else {
            format!("{}: {}", exception_name, message)
        }
    }
}
