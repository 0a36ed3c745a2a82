use chrono::{DateTime, Duration, FixedOffset, Local, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::poll::{Poll, PollDefinition};
use crate::time_frame::{now_in, resolve_local, to_user_time};
use crate::validation::{ConfigError, ValidationErrors};

lazy_static! {
    static ref USER_ID: Regex = Regex::new(r"^\w{1,64}$").unwrap();
}

fn default_lang_code() -> String {
    "en".to_owned()
}

/// A user's configuration as stored and exchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default = "default_lang_code")]
    pub lang_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polls: Option<Vec<PollDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UserDefinition", into = "UserDefinition")]
pub struct User {
    id: String,
    username: Option<String>,
    lang_code: String,
    timezone: Option<Tz>,
    polls: Option<Vec<Poll>>,
    reports: Option<Vec<Value>>,
}

impl TryFrom<UserDefinition> for User {
    type Error = ValidationErrors;

    fn try_from(definition: UserDefinition) -> Result<Self, Self::Error> {
        let mut errors = ValidationErrors::new();

        if !USER_ID.is_match(&definition.id) {
            errors.add("id", "must be 1 to 64 word characters");
        }
        if definition.lang_code.chars().count() != 2 {
            errors.add("lang_code", "must be a 2 letter language code");
        }

        let timezone = match &definition.timezone {
            Some(name) => match name.parse::<Tz>() {
                Ok(timezone) => Some(timezone),
                Err(_) => {
                    errors.add("timezone", format!("unknown timezone '{}'", name));
                    None
                }
            },
            None => None,
        };

        let polls = definition.polls.map(|definitions| {
            let mut polls: Vec<Poll> = vec![];
            for (index, definition) in definitions.into_iter().enumerate() {
                let field = format!("polls[{}]", index);
                match Poll::try_from(definition) {
                    Ok(poll) => {
                        if polls.iter().any(|other| other.poll_name() == poll.poll_name()) {
                            errors.add(
                                format!("{}.poll_name", field),
                                format!("poll name '{}' is not unique", poll.poll_name()),
                            );
                        }
                        polls.push(poll);
                    }
                    Err(poll_errors) => errors.extend_nested(&field, poll_errors),
                }
            }
            polls
        });

        errors.into_result(User {
            id: definition.id,
            username: definition.username,
            lang_code: definition.lang_code,
            timezone,
            polls,
            reports: definition.reports,
        })
    }
}

impl From<User> for UserDefinition {
    fn from(user: User) -> Self {
        UserDefinition {
            id: user.id,
            username: user.username,
            lang_code: user.lang_code,
            timezone: user.timezone.map(|timezone| timezone.name().to_owned()),
            polls: user
                .polls
                .map(|polls| polls.into_iter().map(PollDefinition::from).collect()),
            reports: user.reports,
        }
    }
}

impl User {
    pub fn from_json(json: &str) -> Result<User, ConfigError> {
        let definition: UserDefinition = serde_json::from_str(json)?;
        Ok(User::try_from(definition)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn lang_code(&self) -> &str {
        &self.lang_code
    }

    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    pub fn polls(&self) -> &[Poll] {
        self.polls.as_deref().unwrap_or_default()
    }

    pub fn poll(&self, poll_name: &str) -> Option<&Poll> {
        self.polls().iter().find(|poll| poll.poll_name() == poll_name)
    }

    pub fn reports(&self) -> &[Value] {
        self.reports.as_deref().unwrap_or_default()
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        now_in(self.timezone)
    }

    pub fn local_time(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        to_user_time(instant, self.timezone)
    }

    /// First reminder of the poll strictly after `after`. Reminder times are wall clock
    /// times in the user's timezone.
    pub fn next_reminder(&self, poll_name: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let reminder_time = self.poll(poll_name)?.reminder_time()?;
        let today = self.local_time(after).date_naive();
        (0..=2)
            .filter_map(|days| {
                let naive = (today + Duration::days(days)).and_time(reminder_time);
                match self.timezone {
                    Some(timezone) => resolve_local(&timezone, naive),
                    None => resolve_local(&Local, naive),
                }
            })
            .find(|instant| *instant > after)
    }
}
