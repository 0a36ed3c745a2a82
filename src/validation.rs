use std::fmt;

use itertools::Itertools;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Path of the offending field, e.g. `polls[0].questions[2].depends_on`.
    pub field: String,
    pub message: String,
}

/// All problems found while validating one config object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> ValidationErrors {
        ValidationErrors::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Adds the errors of a nested object with their fields prefixed by `prefix`.
    pub fn extend_nested(&mut self, prefix: &str, nested: ValidationErrors) {
        for error in nested.errors {
            let field = if error.field.is_empty() {
                prefix.to_owned()
            } else {
                format!("{}.{}", prefix, error.field)
            };
            self.errors.push(ValidationError {
                field,
                message: error.message,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|error| error.field == field)
    }

    /// `Ok(value)` if nothing was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.errors
                .iter()
                .map(|error| format!("{}: {}", error.field, error.message))
                .join("; ")
        )
    }
}

impl std::error::Error for ValidationErrors {}

/// Failure to turn a json document into a validated config object.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationErrors),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Json(_) => "CONFIG_MALFORMED",
            ConfigError::Invalid(_) => "CONFIG_INVALID",
        }
    }

    /// Machine readable details for error responses.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            ConfigError::Json(err) => serde_json::json!([{ "field": "", "message": err.to_string() }]),
            ConfigError::Invalid(errors) => {
                serde_json::to_value(errors).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}
