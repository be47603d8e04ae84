//! Hash table with prototype-chain dispatch.

use crate::gc::GcIdx;
use crate::string::StringId;
use crate::value::Value;
use indexmap::IndexMap;

/// A key in a table. Derived from a `Value`; nil and NaN are rejected
/// before a key is ever built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    /// Number key, stored as raw bits. `-0.0` is normalized to `0.0` so
    /// IEEE-equal keys coincide.
    Num(u64),
    /// Interned string key. Id equality is content equality.
    Str(StringId),
    Bool(bool),
    /// Any other object key, by identity bits.
    Obj(u64),
}

/// Why a value could not be used as a table key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyError {
    NilKey,
    NanKey,
}

/// Build a `TableKey` from a value, enforcing the key rules.
pub fn key_of(val: Value) -> Result<TableKey, KeyError> {
    if val.is_nil() || val.is_undefined() {
        return Err(KeyError::NilKey);
    }
    if let Some(n) = val.as_num() {
        if n.is_nan() {
            return Err(KeyError::NanKey);
        }
        let n = if n == 0.0 { 0.0 } else { n };
        return Ok(TableKey::Num(n.to_bits()));
    }
    if let Some(b) = val.as_bool() {
        return Ok(TableKey::Bool(b));
    }
    if let Some(id) = val.as_string() {
        return Ok(TableKey::Str(id));
    }
    Ok(TableKey::Obj(val.raw_bits()))
}

/// A tarn table: hash map from value to value, plus an optional
/// prototype table that lookups fall back to.
pub struct Table {
    entries: IndexMap<TableKey, Value>,
    /// Prototype for object-style dispatch, installed by `setproto`.
    pub proto: Option<GcIdx<Table>>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            entries: IndexMap::new(),
            proto: None,
        }
    }

    /// Look up a key in this table only (no proto walk).
    /// Absent keys read as nil.
    pub fn get(&self, key: Value) -> Result<Value, KeyError> {
        let k = key_of(key)?;
        Ok(self.entries.get(&k).copied().unwrap_or(Value::nil()))
    }

    /// Store a value. Storing nil removes the entry, so a table never
    /// holds a nil value.
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), KeyError> {
        let k = key_of(key)?;
        if value.is_nil() {
            self.entries.swap_remove(&k);
        } else {
            self.entries.insert(k, value);
        }
        Ok(())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries, used by the GC trace and by `print` formatting.
    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &Value)> {
        self.entries.iter()
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}
