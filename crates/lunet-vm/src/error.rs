//! Runtime error types.

use lunet_compiler::ast::SourceSpan;
use lunet_core::string::StringInterner;
use lunet_core::value::{NativeError, Value};
use std::fmt;

/// What went wrong.
#[derive(Clone, Debug)]
pub enum ErrorKind {
    /// General runtime error with message.
    Runtime(String),
    /// `error()` raised with an arbitrary value.
    Value(Value),
    /// Too many nested non-tail calls.
    StackOverflow,
}

/// A runtime fault, tagged with the span of the unit that raised it.
#[derive(Clone, Debug)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub span: SourceSpan,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, span: SourceSpan) -> Self {
        RuntimeError { kind, span }
    }

    pub fn runtime(message: impl Into<String>, span: SourceSpan) -> Self {
        RuntimeError::new(ErrorKind::Runtime(message.into()), span)
    }

    pub fn stack_overflow() -> Self {
        RuntimeError::new(ErrorKind::StackOverflow, SourceSpan::UNAVAILABLE)
    }

    /// Fill in `span` if the error does not carry one yet.
    pub fn or_span(mut self, span: SourceSpan) -> Self {
        if !self.span.is_available() {
            self.span = span;
        }
        self
    }

    /// Message text with string payloads resolved through the interner.
    pub fn message(&self, strings: &StringInterner) -> String {
        match &self.kind {
            ErrorKind::Runtime(msg) => msg.clone(),
            ErrorKind::StackOverflow => "stack overflow".to_string(),
            ErrorKind::Value(Value::String(id)) => strings.display(*id),
            ErrorKind::Value(Value::Integer(i)) => i.to_string(),
            ErrorKind::Value(Value::Float(f)) => crate::coerce::format_float(*f),
            ErrorKind::Value(v) => format!("(error object is a {} value)", v.type_name()),
        }
    }

    /// The error as a Lua value, as `pcall` would see it.
    pub fn to_value(&self, strings: &mut StringInterner) -> Value {
        match &self.kind {
            ErrorKind::Value(v) => v.clone(),
            _ => {
                let text = self.message(strings);
                Value::String(strings.intern(text.as_bytes()))
            }
        }
    }
}

impl From<NativeError> for RuntimeError {
    fn from(e: NativeError) -> Self {
        let kind = match e {
            NativeError::Message(msg) => ErrorKind::Runtime(msg),
            NativeError::Value(v) => ErrorKind::Value(v),
        };
        RuntimeError::new(kind, SourceSpan::UNAVAILABLE)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Runtime(msg) => write!(f, "{msg}"),
            ErrorKind::StackOverflow => write!(f, "stack overflow"),
            ErrorKind::Value(Value::String(id)) => write!(f, "error object {id}"),
            ErrorKind::Value(v) => write!(f, "error object is a {} value", v.type_name()),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.span.is_available() {
            write!(f, "{}: {}", self.span, self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl std::error::Error for RuntimeError {}
