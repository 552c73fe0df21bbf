//! Validation against a JSON Schema document.
//!
//! The schema is compiled once with the `jsonschema` crate. Local `$ref`
//! chains that loop back on themselves without descending into the
//! instance are rejected up front, since they can never terminate.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::Validator;

#[derive(Clone)]
pub struct JsonSchemaValidator {
    schema: Value,
    default: Option<Value>,
    compiled: std::result::Result<Arc<jsonschema::Validator>, String>,
}

impl JsonSchemaValidator {
    pub fn new(schema: Value) -> Self {
        let default = schema.get("default").cloned();
        let compiled = compile(&schema);
        Self {
            schema,
            default,
            compiled,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Check `value`, joining every violation into one message.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let validator = self.compiled.as_ref().map_err(Clone::clone)?;
        if validator.is_valid(value) {
            return Ok(());
        }
        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        Err(errors.join("; "))
    }
}

impl fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaValidator")
            .field("schema", &self.schema)
            .field("default", &self.default)
            .field("compiled", &self.compiled.is_ok())
            .finish()
    }
}

impl Validator for JsonSchemaValidator {
    fn validate(&self, value: &Value) -> Result<Value, String> {
        self.check(value)?;
        Ok(value.clone())
    }

    fn default_value(&self) -> Option<Value> {
        self.default.clone()
    }
}

fn compile(schema: &Value) -> std::result::Result<Arc<jsonschema::Validator>, String> {
    if let Some(reference) = circular_ref(schema) {
        return Err(format!("invalid schema: circular $ref '{reference}'"));
    }
    jsonschema::Validator::new(schema)
        .map(Arc::new)
        .map_err(|e| format!("invalid schema: {e}"))
}

/// Keywords whose subschemas apply to the same instance as their parent.
const IN_PLACE: [&str; 7] = ["allOf", "anyOf", "oneOf", "not", "if", "then", "else"];

/// Local refs reachable from `node` without moving into a child instance.
fn in_place_refs<'a>(node: &'a Value, out: &mut Vec<&'a str>) {
    let Value::Object(obj) = node else {
        return;
    };
    if let Some(Value::String(reference)) = obj.get("$ref")
        && reference.starts_with('#')
    {
        out.push(reference);
    }
    for key in IN_PLACE {
        match obj.get(key) {
            Some(Value::Array(subs)) => subs.iter().for_each(|s| in_place_refs(s, out)),
            Some(sub @ Value::Object(_)) => in_place_refs(sub, out),
            _ => {}
        }
    }
}

/// First local `$ref` that can reach itself while staying on one instance.
fn circular_ref(root: &Value) -> Option<String> {
    fn visit<'a>(
        root: &'a Value,
        reference: &'a str,
        stack: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<String> {
        if stack.contains(&reference) {
            return Some(reference.to_string());
        }
        if !done.insert(reference) {
            return None;
        }
        let target = root.pointer(&reference[1..])?;
        let mut next = Vec::new();
        in_place_refs(target, &mut next);
        stack.push(reference);
        let found = next.into_iter().find_map(|r| visit(root, r, stack, done));
        stack.pop();
        found
    }

    let mut starts = Vec::new();
    in_place_refs(root, &mut starts);
    let mut done = HashSet::new();
    starts
        .into_iter()
        .find_map(|r| visit(root, r, &mut Vec::new(), &mut done))
}
