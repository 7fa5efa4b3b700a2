//! Argument validation against a tool's parameter schema.
//!
//! Schemas are compiled once per registry snapshot. A schema that does not
//! compile is logged and treated as permissive; the server stays the final
//! judge of its own arguments.

use jsonschema::Validator;
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// A compiled `inputSchema`.
pub struct ArgumentSchema {
    validator: Option<Validator>,
}

impl ArgumentSchema {
    /// Compile `schema` for `tool`.
    pub fn compile(tool: &str, schema: &Value) -> Self {
        match jsonschema::validator_for(schema) {
            Ok(validator) => Self {
                validator: Some(validator),
            },
            Err(e) => {
                warn!(tool = %tool, error = %e, "Tool schema does not compile, arguments will not be checked");
                Self { validator: None }
            }
        }
    }

    /// Check `arguments`, describing the first violation on failure.
    pub fn check(&self, arguments: &Value) -> Result<(), String> {
        match &self.validator {
            Some(validator) => validator.validate(arguments).map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }

    /// False when the schema was rejected and every argument is accepted.
    pub fn is_enforced(&self) -> bool {
        self.validator.is_some()
    }
}

impl fmt::Debug for ArgumentSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentSchema")
            .field("enforced", &self.is_enforced())
            .finish()
    }
}
