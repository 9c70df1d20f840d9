/// Assembled function prototype: bytecode, unit table and debug info.
use crate::ast::SourceSpan;
use crate::unit::UnitDescriptor;
use lunet_core::string::StringId;
use lunet_core::value::Value;
use std::fmt;
use std::sync::Arc;

/// A compile-time constant.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(StringId),
}

impl Constant {
    pub fn is_falsy(&self) -> bool {
        matches!(self, Constant::Nil | Constant::Boolean(false))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Constant::Nil => Value::Nil,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Integer(i) => Value::Integer(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::String(s) => Value::String(*s),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => write!(f, "nil"),
            Constant::Boolean(b) => write!(f, "{b}"),
            Constant::Integer(i) => write!(f, "{i}"),
            Constant::Float(x) => write!(f, "{x:?}"),
            Constant::String(s) => write!(f, "{s}"),
        }
    }
}

/// Debug description of an upvalue.
#[derive(Clone, Debug, PartialEq)]
pub struct UpvalueDesc {
    pub name: StringId,
}

/// A compiled function. Immutable once assembled and shared across
/// invocations through `Arc`.
#[derive(Clone, Debug)]
pub struct FunctionProto {
    pub name: String,
    pub code: Vec<u8>,
    /// One descriptor per EXEC site.
    pub units: Vec<UnitDescriptor>,
    pub branch_profiles: u16,
    pub loop_profiles: u16,
    pub num_params: u16,
    pub is_vararg: bool,
    /// Number of value slots a frame needs.
    pub frame_size: u16,
    /// Number of heap cells for captured locals.
    pub num_cells: u16,
    pub upvalues: Vec<UpvalueDesc>,
    pub protos: Vec<Arc<FunctionProto>>,
    /// (byte offset, span), ascending by offset.
    pub spans: Vec<(u16, SourceSpan)>,
    pub span: SourceSpan,
}

impl FunctionProto {
    /// Span of the instruction starting at or covering `offset`.
    pub fn span_at(&self, offset: usize) -> SourceSpan {
        match self.spans.binary_search_by_key(&offset, |(o, _)| *o as usize) {
            Ok(i) => self.spans[i].1,
            Err(0) => SourceSpan::UNAVAILABLE,
            Err(i) => self.spans[i - 1].1,
        }
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }
}
