use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A caller-owned record that a fill cycle writes into.
///
/// `Target` is a shared handle: cloning it is cheap and every clone sees
/// the same fields. The caller keeps one clone and reads it back after the
/// fill; the engine keeps its clones only until the owning subscription's
/// fetch has finished.
#[derive(Clone, Default)]
pub struct Target(Arc<Mutex<Map<String, Value>>>);

impl Target {
    /// Wraps a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(Arc::new(Mutex::new(fields)))
    }

    /// Wraps a JSON value, which must be an object.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self::new(fields)),
            other => Err(crate::Error::NotAnObject(crate::json_type_name(&other))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of a top-level field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.lock().get(field).cloned()
    }

    /// Sets a top-level field, returning the previous value.
    pub fn set(&self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.lock().insert(field.into(), value)
    }

    /// Shallow-merges `fields` into the target. Existing fields with the
    /// same name are overwritten.
    pub fn merge(&self, fields: &Map<String, Value>) {
        let mut own = self.lock();
        for (field, value) in fields {
            own.insert(field.clone(), value.clone());
        }
    }

    /// Appends `value` to the array stored in `field`.
    ///
    /// The array is created on first append. A non-array value already in
    /// the field is replaced by a fresh array.
    pub fn push(&self, field: &str, value: Value) {
        let mut fields = self.lock();
        match fields.get_mut(field) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                fields.insert(field.to_string(), Value::Array(vec![value]));
            }
        }
    }

    /// Runs `f` with shared access to the fields.
    pub fn with<R>(&self, f: impl FnOnce(&Map<String, Value>) -> R) -> R {
        f(&self.lock())
    }

    /// Runs `f` with exclusive access to the fields.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Copies the current fields out as a JSON object.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.lock().clone())
    }

    /// Whether two handles point at the same target.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Map<String, Value>> for Target {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Target").field(&*self.lock()).finish()
    }
}
