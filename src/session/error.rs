use serde_json::Value;
use uuid::Uuid;

use super::status::UserSessionStatus;
use crate::data::DataError;
use crate::poll::WorkflowError;
use crate::validation::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Data corruption: error parsing stored user config: {0}")]
    DataParse(String),
    #[error("Incorrect session status {actual}, at least {expected} is required")]
    IncorrectStatus {
        expected: UserSessionStatus,
        actual: UserSessionStatus,
    },
    #[error("Poll '{0}' wasn't found")]
    PollNotFound(String),
    #[error("Poll run {0} wasn't found")]
    PollRunNotFound(Uuid),
    #[error("Poll '{0}' is already active")]
    PollAlreadyActive(String),
    #[error("Unsupported value for a poll answer was provided")]
    UnsupportedAnswer,
    #[error("Config belongs to user '{config_user}', not to '{user_id}'")]
    ConfigUserMismatch { user_id: String, config_user: String },
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("Internal session error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::DataParse(_) => "SESSION_DATA_PARSE_ERROR",
            SessionError::IncorrectStatus { .. } => "SESSION_INCORRECT_STATUS",
            SessionError::PollNotFound(_) => "POLL_NOT_FOUND",
            SessionError::PollRunNotFound(_) => "POLL_RUN_NOT_FOUND",
            SessionError::PollAlreadyActive(_) => "POLL_ALREADY_ACTIVE",
            SessionError::UnsupportedAnswer => "POLL_ANSWER_UNSUPPORTED_VALUE",
            SessionError::ConfigUserMismatch { .. } => "CONFIG_USER_MISMATCH",
            SessionError::Data(err) => err.code(),
            SessionError::Config(err) => err.code(),
            SessionError::Workflow(err) => err.code(),
            SessionError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Extra machine readable details, if the error carries any.
    pub fn payload(&self) -> Option<Value> {
        match self {
            SessionError::Config(err) => Some(err.payload()),
            SessionError::Workflow(WorkflowError::DeserializeFailed { payload, .. }) => {
                Some(payload.clone())
            }
            _ => None,
        }
    }
}
