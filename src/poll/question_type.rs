use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::duration::parse_relative_duration;
use crate::primitive::ValueLabel;

/// Type names that may be used instead of an object definition.
pub const NAMED_TYPES: &[&str] = &["timestamp", "auto_timestamp", "relative_timestamp"];

const RELATIVE_TIMESTAMP_HINT: &str = "Examples: 2 means 2 hours ago; 3 days, 2:12 means 3 days 2 hours 12 minutes ago. Full format: [D days, ][HH[:MM[:SS]]]";

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerValue {
    Text(String),
    Timestamp(DateTime<FixedOffset>),
}

impl AnswerValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(text) => Some(text),
            AnswerValue::Timestamp(_) => None,
        }
    }

    pub fn serialize(&self) -> String {
        match self {
            AnswerValue::Text(text) => text.clone(),
            AnswerValue::Timestamp(timestamp) => timestamp.to_rfc3339(),
        }
    }
}

pub type Answer = ValueLabel<AnswerValue>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuestionTypeError {
    #[error("unsupported answer '{0}'")]
    UnsupportedAnswer(String),
    #[error("question depends on an answer that is missing")]
    MissingDependency,
    #[error("dependency value '{0}' has no options")]
    UnknownDependency(String),
    #[error("question does not accept manual answers")]
    NotManual,
    #[error("question does not compute its own value")]
    NotAuto,
    #[error("malformed stored value '{0}'")]
    MalformedValue(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuestionTypeDefinition", into = "QuestionTypeDefinition")]
pub enum QuestionType {
    Select {
        select: Vec<ValueLabel>,
        value_hint: Option<String>,
    },
    /// Options depend on the serialized answer of another question.
    DependantSelect {
        select: BTreeMap<String, Vec<ValueLabel>>,
        value_hint: Option<String>,
    },
    /// Filled in automatically with the current time.
    Timestamp,
    /// A time given as a duration before now.
    RelativeTimestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum QuestionTypeDefinition {
    Named(String),
    Select {
        select: Vec<ValueLabel>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_hint: Option<String>,
    },
    DependantSelect {
        select: BTreeMap<String, Vec<ValueLabel>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_hint: Option<String>,
    },
}

impl TryFrom<QuestionTypeDefinition> for QuestionType {
    type Error = String;

    fn try_from(definition: QuestionTypeDefinition) -> Result<Self, Self::Error> {
        match definition {
            QuestionTypeDefinition::Named(name) => match name.as_str() {
                "timestamp" | "auto_timestamp" => Ok(QuestionType::Timestamp),
                "relative_timestamp" => Ok(QuestionType::RelativeTimestamp),
                _ => Err(format!(
                    "unsupported question type '{}', expected one of: {}",
                    name,
                    NAMED_TYPES.join(", ")
                )),
            },
            QuestionTypeDefinition::Select { select, value_hint } => {
                if select.is_empty() {
                    return Err("select must not be empty".to_owned());
                }
                Ok(QuestionType::Select { select, value_hint })
            }
            QuestionTypeDefinition::DependantSelect { select, value_hint } => {
                if select.is_empty() {
                    return Err("select must not be empty".to_owned());
                }
                if let Some((key, _)) = select.iter().find(|(_, options)| options.is_empty()) {
                    return Err(format!("select for '{}' must not be empty", key));
                }
                Ok(QuestionType::DependantSelect { select, value_hint })
            }
        }
    }
}

impl From<QuestionType> for QuestionTypeDefinition {
    fn from(question_type: QuestionType) -> Self {
        match question_type {
            QuestionType::Select { select, value_hint } => {
                QuestionTypeDefinition::Select { select, value_hint }
            }
            QuestionType::DependantSelect { select, value_hint } => {
                QuestionTypeDefinition::DependantSelect { select, value_hint }
            }
            QuestionType::Timestamp => QuestionTypeDefinition::Named("timestamp".to_owned()),
            QuestionType::RelativeTimestamp => {
                QuestionTypeDefinition::Named("relative_timestamp".to_owned())
            }
        }
    }
}

fn timestamp_answer(timestamp: DateTime<FixedOffset>) -> Answer {
    let label = format!("⏰ {}", timestamp.format("%m/%d/%Y %H:%M:%S"));
    ValueLabel::new(AnswerValue::Timestamp(timestamp), label)
}

fn text_answer(option: &ValueLabel) -> Answer {
    option.clone().map(AnswerValue::Text)
}

fn find_option<'a>(options: &'a [ValueLabel], value: &str) -> Option<&'a ValueLabel> {
    options.iter().find(|option| option.value == value)
}

impl QuestionType {
    pub fn is_auto(&self) -> bool {
        matches!(self, QuestionType::Timestamp)
    }

    pub fn is_dependent(&self) -> bool {
        matches!(self, QuestionType::DependantSelect { .. })
    }

    /// Whether free-form input beyond the offered options is accepted.
    pub fn allows_manual(&self) -> bool {
        matches!(self, QuestionType::RelativeTimestamp)
    }

    pub fn value_hint(&self) -> Option<&str> {
        match self {
            QuestionType::Select { value_hint, .. }
            | QuestionType::DependantSelect { value_hint, .. } => value_hint.as_deref(),
            QuestionType::Timestamp => None,
            QuestionType::RelativeTimestamp => Some(RELATIVE_TIMESTAMP_HINT),
        }
    }

    /// Every value this type can produce, `None` if the domain is not enumerable.
    pub fn possible_values(&self) -> Option<Vec<&ValueLabel>> {
        match self {
            QuestionType::Select { select, .. } => Some(select.iter().collect()),
            QuestionType::DependantSelect { select, .. } => Some(select.values().flatten().collect()),
            QuestionType::Timestamp | QuestionType::RelativeTimestamp => None,
        }
    }

    fn dependent_options<'a>(
        select: &'a BTreeMap<String, Vec<ValueLabel>>,
        dep_value: Option<&Answer>,
    ) -> Result<&'a [ValueLabel], QuestionTypeError> {
        let dep_value = dep_value.ok_or(QuestionTypeError::MissingDependency)?;
        let key = dep_value
            .value
            .as_text()
            .ok_or_else(|| QuestionTypeError::UnknownDependency(dep_value.value.serialize()))?;
        select
            .get(key)
            .map(|options| options.as_slice())
            .ok_or_else(|| QuestionTypeError::UnknownDependency(key.to_owned()))
    }

    /// The options to offer for the current answer.
    pub fn answer_options(
        &self,
        dep_value: Option<&Answer>,
    ) -> Result<Vec<ValueLabel>, QuestionTypeError> {
        match self {
            QuestionType::Select { select, .. } => Ok(select.clone()),
            QuestionType::DependantSelect { select, .. } => {
                Ok(Self::dependent_options(select, dep_value)?.to_vec())
            }
            QuestionType::Timestamp => Err(QuestionTypeError::NotManual),
            QuestionType::RelativeTimestamp => Ok(vec![
                ValueLabel::new("0".to_owned(), "Just now"),
                ValueLabel::new("1".to_owned(), "An hour ago"),
            ]),
        }
    }

    /// Parses a user's answer. `now` is the current time in the user's timezone.
    pub fn value_from_answer(
        &self,
        answer: &str,
        dep_value: Option<&Answer>,
        now: DateTime<FixedOffset>,
    ) -> Result<Answer, QuestionTypeError> {
        let unsupported = || QuestionTypeError::UnsupportedAnswer(answer.to_owned());
        match self {
            QuestionType::Select { select, .. } => {
                find_option(select, answer).map(text_answer).ok_or_else(unsupported)
            }
            QuestionType::DependantSelect { select, .. } => {
                let options = Self::dependent_options(select, dep_value)?;
                find_option(options, answer).map(text_answer).ok_or_else(unsupported)
            }
            QuestionType::Timestamp => Err(QuestionTypeError::NotManual),
            QuestionType::RelativeTimestamp => {
                let ago = parse_relative_duration(answer).ok_or_else(unsupported)?;
                now.checked_sub_signed(ago)
                    .map(timestamp_answer)
                    .ok_or_else(unsupported)
            }
        }
    }

    pub fn auto_value(
        &self,
        _dep_value: Option<&Answer>,
        now: DateTime<FixedOffset>,
    ) -> Result<Answer, QuestionTypeError> {
        match self {
            QuestionType::Timestamp => Ok(timestamp_answer(now)),
            _ => Err(QuestionTypeError::NotAuto),
        }
    }

    pub fn serialize_value(&self, value: &Answer) -> String {
        value.value.serialize()
    }

    /// Restores an answer from its serialized value, picking the label from the options
    /// when the value is still among them.
    pub fn deserialize_value(
        &self,
        serialized: &str,
        dep_value: Option<&Answer>,
    ) -> Result<Answer, QuestionTypeError> {
        match self {
            QuestionType::Select { select, .. } => Ok(find_option(select, serialized)
                .map(text_answer)
                .unwrap_or_else(|| text_answer(&ValueLabel::from_label(serialized)))),
            QuestionType::DependantSelect { select, .. } => {
                let option = match Self::dependent_options(select, dep_value) {
                    Ok(options) => find_option(options, serialized),
                    Err(_) => select
                        .values()
                        .find_map(|options| find_option(options, serialized)),
                };
                Ok(option
                    .map(text_answer)
                    .unwrap_or_else(|| text_answer(&ValueLabel::from_label(serialized))))
            }
            QuestionType::Timestamp | QuestionType::RelativeTimestamp => {
                DateTime::parse_from_rfc3339(serialized)
                    .map(timestamp_answer)
                    .map_err(|_| QuestionTypeError::MalformedValue(serialized.to_owned()))
            }
        }
    }

    /// Whether `serialized` is a value this type can produce.
    pub fn accepts_serialized(&self, serialized: &str) -> bool {
        match self.possible_values() {
            Some(values) => values.iter().any(|option| option.value == serialized),
            None => DateTime::parse_from_rfc3339(serialized).is_ok(),
        }
    }

    /// Whether this type may depend on a question of type `other`. Only dependent selects
    /// can, and only if every value of `other` has its own option list.
    pub fn check_dependency_type(&self, other: &QuestionType) -> bool {
        let select = match self {
            QuestionType::DependantSelect { select, .. } => select,
            _ => return false,
        };
        match other.possible_values() {
            Some(values) => values.iter().all(|option| select.contains_key(&option.value)),
            None => false,
        }
    }
}
