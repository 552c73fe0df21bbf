use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::{StateSchema, Validator};
use crate::types::{MESSAGES_KEY, StatePatch};
use crate::{Error, Result};

struct FieldEntry {
    name: String,
    owner: String,
    validator: Arc<dyn Validator>,
}

/// Union of every field declared by an agent and its middleware.
#[derive(Default)]
pub struct MergedSchema {
    fields: Vec<FieldEntry>,
    index: HashMap<String, usize>,
}

impl MergedSchema {
    /// Merge `(owner, schema)` pairs in order. A later declaration of the
    /// same field replaces the earlier one.
    pub fn merge<'a, I>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a StateSchema)>,
    {
        let mut merged = MergedSchema::default();
        for (owner, schema) in sources {
            for (name, validator) in schema.fields() {
                if name == MESSAGES_KEY {
                    return Err(Error::config(format!(
                        "State field '{MESSAGES_KEY}' is built in and cannot be declared by '{owner}'"
                    )));
                }
                let entry = FieldEntry {
                    name: name.to_string(),
                    owner: owner.to_string(),
                    validator: validator.clone(),
                };
                match merged.index.get(name) {
                    Some(&idx) => {
                        debug!(
                            field = name,
                            previous = %merged.fields[idx].owner,
                            owner,
                            "state field redeclared, later declaration wins"
                        );
                        merged.fields[idx] = entry;
                    }
                    None => {
                        merged.index.insert(name.to_string(), merged.fields.len());
                        merged.fields.push(entry);
                    }
                }
            }
        }
        Ok(merged)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.index.contains_key(field)
    }

    pub fn owner(&self, field: &str) -> Option<&str> {
        self.index.get(field).map(|&i| self.fields[i].owner.as_str())
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fill absent fields from their defaults, then validate every declared
    /// field that is present. Undeclared keys pass through untouched.
    pub fn prepare(&self, values: &mut Map<String, Value>) -> Result<()> {
        for field in &self.fields {
            if !values.contains_key(&field.name)
                && let Some(default) = field.validator.default_value()
            {
                values.insert(field.name.clone(), default);
            }
        }
        self.validate_values(values)
    }

    pub fn validate_values(&self, values: &mut Map<String, Value>) -> Result<()> {
        for (key, value) in values.iter_mut() {
            if let Some(&idx) = self.index.get(key) {
                *value = self.fields[idx]
                    .validator
                    .validate(value)
                    .map_err(|message| Error::StateValidation {
                        field: key.clone(),
                        message,
                    })?;
            }
        }
        Ok(())
    }

    /// Validate the value half of a patch before it is applied.
    pub fn validate_patch(&self, patch: &mut StatePatch) -> Result<()> {
        if patch.values.contains_key(MESSAGES_KEY) {
            return Err(Error::StateValidation {
                field: MESSAGES_KEY.to_string(),
                message: "messages must be updated through the patch's messages update".into(),
            });
        }
        self.validate_values(&mut patch.values)
    }
}

impl std::fmt::Debug for MergedSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.fields.iter().map(|e| (&e.name, &e.owner)))
            .finish()
    }
}
