use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::duration;
use super::question_type::QuestionType;
use crate::validation::ValidationErrors;

/// Longest pause a `delay_on` answer may ask for.
pub const MAX_DELAY_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Question {
    /// Unique within a poll.
    pub code: String,
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    /// Drives branching within a run but is never written to the log.
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(
        default,
        with = "duration::delay_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub delay_time: Option<Duration>,
    /// Serialized values that pause the run for `delay_time` instead of being recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_on: Option<Vec<String>>,
}

impl Question {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.code)
    }

    /// Checks that do not need the rest of the poll.
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if self.code.trim().is_empty() {
            errors.add("code", "must not be empty");
        }

        if self.depends_on.is_some() && !self.question_type.is_dependent() {
            errors.add(
                "depends_on",
                format!(
                    "question <{}> depends on <{}> but is not of a type that can be dependant",
                    self.display_name(),
                    self.depends_on.as_deref().unwrap_or_default()
                ),
            );
        }
        if self.depends_on.is_none() && self.question_type.is_dependent() {
            errors.add(
                "depends_on",
                format!(
                    "question <{}> has a dependent type and must depend on another question",
                    self.display_name()
                ),
            );
        }

        if let Some(delay_time) = self.delay_time {
            if delay_time <= Duration::zero() {
                errors.add("delay_time", "must be positive");
            } else if delay_time > Duration::days(MAX_DELAY_DAYS) {
                errors.add(
                    "delay_time",
                    format!("must not exceed {} days", MAX_DELAY_DAYS),
                );
            }
        }

        if let Some(delay_on) = &self.delay_on {
            if self.delay_time.is_none() {
                errors.add("delay_on", "requires delay_time to be set");
            }
            for value in delay_on {
                if !self.question_type.accepts_serialized(value) {
                    errors.add(
                        "delay_on",
                        format!("'{}' is not a possible value of this question", value),
                    );
                }
            }
        }

        errors
    }
}
