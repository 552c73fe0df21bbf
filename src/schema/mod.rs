//! State and context schemas.
//!
//! Each middleware (and the agent itself) may declare a [`StateSchema`]: an
//! ordered set of named fields, each backed by a [`Validator`] that knows how
//! to check a value and what its default is. [`MergedSchema`] combines all
//! declarations into the single record shape of one agent.

mod json;
mod merge;
mod typed;

pub use json::JsonSchemaValidator;
pub use merge::MergedSchema;
pub use typed::TypedValidator;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Structural validation interface for one state or context field.
pub trait Validator: Send + Sync {
    /// Check `value`, returning the (possibly normalized) value or a reason.
    fn validate(&self, value: &Value) -> Result<Value, String>;

    /// Value used when the field is absent from the input.
    fn default_value(&self) -> Option<Value> {
        None
    }
}

/// Ordered field declarations of one middleware or agent.
#[derive(Clone, Default)]
pub struct StateSchema {
    fields: Vec<(String, Arc<dyn Validator>)>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, validator: impl Validator + 'static) -> Self {
        self.fields.push((name.into(), Arc::new(validator)));
        self
    }

    pub fn field_arc(mut self, name: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        self.fields.push((name.into(), validator));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Arc<dyn Validator>)> {
        self.fields.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

impl fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|(name, _)| name))
            .finish()
    }
}
