/// Dynamic values shared by the compiler (constants) and the VM (frames, tables).
///
/// Tables, closures and upvalue cells are reference counted. There is no
/// collector, so cycles leak; that is acceptable for the workloads this
/// runtime targets.
use crate::string::{StringId, StringInterner};
use crate::table::Table;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A heap cell holding a captured variable. Shared between the declaring
/// frame and every closure that captures it.
pub type Cell = Rc<RefCell<Value>>;

pub fn new_cell(value: Value) -> Cell {
    Rc::new(RefCell::new(value))
}

/// Index of a loaded function prototype in the VM's registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ProtoId(pub u32);

/// A Lua function instance: prototype plus captured cells.
#[derive(Debug)]
pub struct LuaClosure {
    pub proto: ProtoId,
    pub upvalues: Vec<Cell>,
}

/// Services available to host functions.
pub struct NativeContext<'a> {
    pub strings: &'a mut StringInterner,
}

/// Error raised by a host function.
#[derive(Clone, Debug)]
pub enum NativeError {
    Message(String),
    /// Raised with an arbitrary value, like `error(v)`.
    Value(Value),
}

impl From<String> for NativeError {
    fn from(message: String) -> Self {
        NativeError::Message(message)
    }
}

impl From<&str> for NativeError {
    fn from(message: &str) -> Self {
        NativeError::Message(message.to_string())
    }
}

pub type NativeFn = fn(&mut NativeContext<'_>, &[Value]) -> Result<Vec<Value>, NativeError>;

/// A host function callable from Lua code.
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native:{}", self.name)
    }
}

#[derive(Clone, Debug)]
pub enum Function {
    Lua(Rc<LuaClosure>),
    Native(Rc<NativeFunction>),
}

impl Function {
    pub fn native(name: &'static str, func: NativeFn) -> Self {
        Function::Native(Rc::new(NativeFunction { name, func }))
    }

    fn addr(&self) -> *const () {
        match self {
            Function::Lua(c) => Rc::as_ptr(c) as *const (),
            Function::Native(n) => Rc::as_ptr(n) as *const (),
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(StringId),
    Table(Rc<RefCell<Table>>),
    Function(Function),
}

impl Value {
    pub fn new_table() -> Self {
        Value::Table(Rc::new(RefCell::new(Table::new())))
    }

    pub fn from_table(table: Table) -> Self {
        Value::Table(Rc::new(RefCell::new(table)))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Nil | Value::Boolean(false))
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_string_id(&self) -> Option<StringId> {
        match self {
            Value::String(id) => Some(*id),
            _ => None,
        }
    }

    /// Lua `type()` name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
        }
    }
}

/// Raw equality: numbers compare by mathematical value, strings by id
/// (all strings are interned), tables and functions by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(i), Value::Float(f)) | (Value::Float(f), Value::Integer(i)) => {
                int_float_eq(*i, *f)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

fn int_float_eq(i: i64, f: f64) -> bool {
    // Every i64 rounds into f64 range, so compare via an exact conversion back.
    float_to_integer(f) == Some(i)
}

/// Exact float to integer conversion; `None` for fractions, NaN or out of range.
pub fn float_to_integer(f: f64) -> Option<i64> {
    // 2^63 is exactly representable, i64::MAX is not.
    if f.fract() == 0.0 && f >= -9_223_372_036_854_775_808.0 && f < 9_223_372_036_854_775_808.0 {
        Some(f as i64)
    } else {
        None
    }
}
