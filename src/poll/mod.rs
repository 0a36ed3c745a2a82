pub mod duration;
pub mod question;
pub mod question_type;
pub mod workflow;

use std::collections::HashMap;

use chrono::NaiveTime;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use self::question::Question;
pub use self::question_type::{Answer, AnswerValue, QuestionType, QuestionTypeError};
pub use self::workflow::{AddAnswerResult, PollWorkflow, WorkflowError};

use crate::validation::ValidationErrors;

lazy_static! {
    static ref COMMAND: Regex = Regex::new(r"^[\da-z_]{1,32}$").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

const MAX_POLL_NAME_LEN: usize = 30;
const MAX_DESCRIPTION_LEN: usize = 100;
const DEFAULT_HOURS_OVER_MIDNIGHT: u32 = 3;
const MAX_HOURS_OVER_MIDNIGHT: u32 = 7;

fn default_once_per_day() -> bool {
    true
}

/// A poll as written in a user's config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollDefinition {
    pub poll_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        with = "reminder_time_format",
        skip_serializing_if = "Option::is_none"
    )]
    pub reminder_time: Option<NaiveTime>,
    #[serde(default = "default_once_per_day")]
    pub once_per_day: bool,
    #[serde(
        default,
        alias = "hours_over_midgnight",
        skip_serializing_if = "Option::is_none"
    )]
    pub hours_over_midnight: Option<u32>,
    pub questions: Vec<Question>,
}

/// A validated poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PollDefinition", into = "PollDefinition")]
pub struct Poll {
    poll_name: String,
    command: Option<String>,
    description: Option<String>,
    reminder_time: Option<NaiveTime>,
    once_per_day: bool,
    hours_over_midnight: Option<u32>,
    questions: Vec<Question>,
    question_index: HashMap<String, usize>,
}

impl TryFrom<PollDefinition> for Poll {
    type Error = ValidationErrors;

    fn try_from(definition: PollDefinition) -> Result<Self, Self::Error> {
        let mut errors = ValidationErrors::new();

        let poll_name = definition.poll_name.trim().to_owned();
        if poll_name.is_empty() {
            errors.add("poll_name", "must not be empty");
        }
        if poll_name.chars().count() > MAX_POLL_NAME_LEN {
            errors.add(
                "poll_name",
                format!("must be at most {} characters", MAX_POLL_NAME_LEN),
            );
        }

        let command = match definition.command {
            Some(command) => {
                let command = command.trim().to_owned();
                if !COMMAND.is_match(&command) {
                    errors.add(
                        "command",
                        "must be 1 to 32 lowercase letters, digits or underscores",
                    );
                }
                Some(command)
            }
            None => {
                let derived = WHITESPACE
                    .replace_all(&poll_name.to_lowercase(), "_")
                    .into_owned();
                COMMAND.is_match(&derived).then_some(derived)
            }
        };

        if let Some(description) = &definition.description {
            if description.chars().count() > MAX_DESCRIPTION_LEN {
                errors.add(
                    "description",
                    format!("must be at most {} characters", MAX_DESCRIPTION_LEN),
                );
            }
        }

        let hours_over_midnight = match (definition.once_per_day, definition.hours_over_midnight) {
            (true, None) => Some(DEFAULT_HOURS_OVER_MIDNIGHT),
            (true, Some(hours)) if hours > MAX_HOURS_OVER_MIDNIGHT => {
                errors.add(
                    "hours_over_midnight",
                    format!("must be between 0 and {}", MAX_HOURS_OVER_MIDNIGHT),
                );
                None
            }
            (true, Some(hours)) => Some(hours),
            (false, None) | (false, Some(0)) => None,
            (false, Some(_)) => {
                errors.add(
                    "hours_over_midnight",
                    "can only be set for once_per_day polls",
                );
                None
            }
        };

        if definition.questions.is_empty() {
            errors.add("questions", "a poll needs at least one question");
        }

        let mut question_index = HashMap::new();
        for (index, question) in definition.questions.iter().enumerate() {
            let field = format!("questions[{}]", index);
            errors.extend_nested(&field, question.validate());

            if let Some(depends_on) = &question.depends_on {
                match question_index.get(depends_on) {
                    None => errors.add(
                        format!("{}.depends_on", field),
                        format!(
                            "question <{}> depends on <{}> which is either not defined, or goes after this question",
                            question.code, depends_on
                        ),
                    ),
                    Some(&dependency) => {
                        let dependency: &Question = &definition.questions[dependency];
                        if !question
                            .question_type
                            .check_dependency_type(&dependency.question_type)
                        {
                            errors.add(
                                format!("{}.depends_on", field),
                                format!(
                                    "question <{}> is of type that can't depend on question <{}>",
                                    question.code, depends_on
                                ),
                            );
                        }
                    }
                }
            }

            if question_index.insert(question.code.clone(), index).is_some() {
                errors.add(
                    format!("{}.code", field),
                    format!("question code <{}> is not unique", question.code),
                );
            }
        }

        errors.into_result(Poll {
            poll_name,
            command,
            description: definition.description,
            reminder_time: definition.reminder_time,
            once_per_day: definition.once_per_day,
            hours_over_midnight,
            questions: definition.questions,
            question_index,
        })
    }
}

impl From<Poll> for PollDefinition {
    fn from(poll: Poll) -> Self {
        PollDefinition {
            poll_name: poll.poll_name,
            command: poll.command,
            description: poll.description,
            reminder_time: poll.reminder_time,
            once_per_day: poll.once_per_day,
            hours_over_midnight: poll.hours_over_midnight,
            questions: poll.questions,
        }
    }
}

impl Poll {
    pub fn poll_name(&self) -> &str {
        &self.poll_name
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Local time of day in the owning user's timezone.
    pub fn reminder_time(&self) -> Option<NaiveTime> {
        self.reminder_time
    }

    pub fn once_per_day(&self) -> bool {
        self.once_per_day
    }

    pub fn hours_over_midnight(&self) -> Option<u32> {
        self.hours_over_midnight
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn question_index(&self, code: &str) -> Option<usize> {
        self.question_index.get(code).copied()
    }

    pub fn question(&self, code: &str) -> Option<&Question> {
        self.question_index(code).map(|index| &self.questions[index])
    }

    /// Position of the question that `questions[index]` depends on.
    pub fn dependency_index(&self, index: usize) -> Option<usize> {
        let depends_on = self.questions.get(index)?.depends_on.as_deref()?;
        self.question_index(depends_on)
    }
}

mod reminder_time_format {
    use chrono::NaiveTime;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.serialize_str(&time.format("%H:%M:%S").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveTime>, D::Error> {
        let text = match Option::<String>::deserialize(deserializer)? {
            Some(text) => text,
            None => return Ok(None),
        };
        NaiveTime::parse_from_str(&text, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&text, "%H:%M"))
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid reminder time '{}', expected HH:MM[:SS]", text)))
    }
}
