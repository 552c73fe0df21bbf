//! Validators backed by a Rust type.

use std::marker::PhantomData;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::Validator;

/// Validates a field by deserializing it into `T` and serializing it back,
/// so stored values always have `T`'s canonical shape.
pub struct TypedValidator<T> {
    default: Option<Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedValidator<T>
where
    T: Serialize + DeserializeOwned + JsonSchema,
{
    pub fn new() -> Self {
        Self {
            default: None,
            _marker: PhantomData,
        }
    }

    /// Use `value` when the field is absent.
    pub fn with_default(mut self, value: T) -> Self {
        self.default = serde_json::to_value(value).ok();
        self
    }

    /// JSON schema of `T`, as schemars derives it.
    pub fn json_schema() -> Value {
        serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }
}

impl<T> TypedValidator<T>
where
    T: Serialize + DeserializeOwned + JsonSchema + Default,
{
    /// Use `T::default()` when the field is absent.
    pub fn defaulted() -> Self {
        Self::new().with_default(T::default())
    }
}

impl<T> Default for TypedValidator<T>
where
    T: Serialize + DeserializeOwned + JsonSchema,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Validator for TypedValidator<T>
where
    T: Serialize + DeserializeOwned + JsonSchema,
{
    fn validate(&self, value: &Value) -> Result<Value, String> {
        let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        serde_json::to_value(typed).map_err(|e| e.to_string())
    }

    fn default_value(&self) -> Option<Value> {
        self.default.clone()
    }
}
