//! Hybrid array+hash table.

use crate::string::StringId;
use crate::value::{float_to_integer, Function, Value};
use indexmap::IndexMap;
use std::rc::Rc;

/// Hashable projection of a key value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    Integer(i64),
    String(StringId),
    /// Non-integral float, stored as raw bits.
    Float(u64),
    Boolean(bool),
    /// Table or function, by address.
    Object(usize),
}

impl TableKey {
    /// Project `key`; floats with an integral value normalize to `Integer`.
    /// Returns `None` for nil and NaN.
    pub fn from_value(key: &Value) -> Option<TableKey> {
        Some(match key {
            Value::Nil => return None,
            Value::Boolean(b) => TableKey::Boolean(*b),
            Value::Integer(i) => TableKey::Integer(*i),
            Value::Float(f) if f.is_nan() => return None,
            Value::Float(f) => match float_to_integer(*f) {
                Some(i) => TableKey::Integer(i),
                None => TableKey::Float(f.to_bits()),
            },
            Value::String(s) => TableKey::String(*s),
            Value::Table(t) => TableKey::Object(Rc::as_ptr(t) as *const () as usize),
            Value::Function(Function::Lua(c)) => TableKey::Object(Rc::as_ptr(c) as *const () as usize),
            Value::Function(Function::Native(n)) => {
                TableKey::Object(Rc::as_ptr(n) as *const () as usize)
            }
        })
    }
}

/// Error raised by a raw table store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableError {
    NilIndex,
    NanIndex,
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::NilIndex => write!(f, "table index is nil"),
            TableError::NanIndex => write!(f, "table index is NaN"),
        }
    }
}

impl std::error::Error for TableError {}

/// A table: dense array part for keys `1..=n` plus an insertion-ordered hash part.
#[derive(Default)]
pub struct Table {
    /// array[0] holds key 1
    array: Vec<Value>,
    /// Original key kept alongside the value so iteration can hand it back.
    hash: IndexMap<TableKey, (Value, Value)>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(array_hint: usize, hash_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            hash: IndexMap::with_capacity(hash_hint),
        }
    }

    pub fn get(&self, key: &Value) -> Value {
        match TableKey::from_value(key) {
            Some(TableKey::Integer(i)) => self.get_int(i),
            Some(tk) => self.hash.get(&tk).map(|(_, v)| v.clone()).unwrap_or_default(),
            None => Value::Nil,
        }
    }

    pub fn get_int(&self, key: i64) -> Value {
        if key >= 1 && (key as usize) <= self.array.len() {
            self.array[(key - 1) as usize].clone()
        } else {
            self.hash
                .get(&TableKey::Integer(key))
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        }
    }

    pub fn get_str(&self, key: StringId) -> Value {
        self.hash
            .get(&TableKey::String(key))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    pub fn set(&mut self, key: Value, value: Value) -> Result<(), TableError> {
        let tk = match TableKey::from_value(&key) {
            Some(tk) => tk,
            None if key.is_nil() => return Err(TableError::NilIndex),
            None => return Err(TableError::NanIndex),
        };
        match tk {
            TableKey::Integer(i) => self.set_int(i, value),
            // Normalized float keys are stored under their projection.
            _ => self.set_hashed(tk, key, value),
        }
        Ok(())
    }

    pub fn set_int(&mut self, key: i64, value: Value) {
        if key >= 1 {
            let idx = (key - 1) as usize;
            if idx < self.array.len() {
                self.array[idx] = value;
                if idx + 1 == self.array.len() {
                    self.trim_array();
                }
                return;
            }
            if idx == self.array.len() && !value.is_nil() {
                self.array.push(value);
                self.migrate_from_hash();
                return;
            }
        }
        self.set_hashed(TableKey::Integer(key), Value::Integer(key), value);
    }

    pub fn set_str(&mut self, key: StringId, value: Value) {
        self.set_hashed(TableKey::String(key), Value::String(key), value);
    }

    fn set_hashed(&mut self, tk: TableKey, key: Value, value: Value) {
        if value.is_nil() {
            // Keep a tombstone so an in-progress `next` still finds its position.
            if let Some(slot) = self.hash.get_mut(&tk) {
                slot.1 = Value::Nil;
            }
        } else {
            self.hash.insert(tk, (key, value));
        }
    }

    /// Border: some n with t[n] non-nil and t[n+1] nil (0 if t[1] is nil).
    pub fn len(&self) -> i64 {
        if !self.array.is_empty() {
            return self.array.len() as i64;
        }
        let mut n = 0;
        while !self.get_int(n + 1).is_nil() {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.values().all(|(_, v)| v.is_nil())
    }

    /// Iteration step: the pair after `key`, or the first pair for nil.
    /// `Err` when `key` is not present in the table.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, TableError> {
        let hash_from = |start: usize| {
            self.hash
                .values()
                .skip(start)
                .find(|(_, v)| !v.is_nil())
                .map(|(k, v)| (k.clone(), v.clone()))
        };
        let array_from = |start: usize| {
            self.array[start..]
                .iter()
                .position(|v| !v.is_nil())
                .map(|off| (Value::Integer((start + off + 1) as i64), self.array[start + off].clone()))
        };
        if key.is_nil() {
            return Ok(array_from(0).or_else(|| hash_from(0)));
        }
        let tk = TableKey::from_value(key).ok_or(TableError::NanIndex)?;
        if let TableKey::Integer(i) = tk {
            if i >= 1 && (i as usize) <= self.array.len() {
                return Ok(array_from(i as usize).or_else(|| hash_from(0)));
            }
        }
        match self.hash.get_index_of(&tk) {
            Some(pos) => Ok(hash_from(pos + 1)),
            None => Err(TableError::NilIndex),
        }
    }

    fn trim_array(&mut self) {
        while self.array.last().is_some_and(|v| v.is_nil()) {
            self.array.pop();
        }
    }

    /// Move consecutive integer entries from hash into array.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = self.array.len() as i64 + 1;
            match self.hash.shift_remove(&TableKey::Integer(next)) {
                Some((_, v)) if !v.is_nil() => self.array.push(v),
                _ => break,
            }
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "table(array={}, hash={})", self.array.len(), self.hash.len())
    }
}
