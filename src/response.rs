use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::poll::duration::format_duration;
use crate::poll::{Poll, PollWorkflow};
use crate::primitive::ValueLabel;
use crate::session::{SessionError, UserSessionSchema};

#[derive(Debug, Serialize)]
#[serde(tag = "response", content = "data", rename_all = "snake_case")]
pub enum Response {
    Session(UserSessionSchema),
    Polls(Vec<PollSummary>),
    PollWorkflow(PollWorkflowState),
    PollClosed {
        poll_run_id: Uuid,
        log_id: Option<i64>,
    },
    PollLog(Vec<PollLogEntry>),
    Reply(String),
    SendHelp,
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl From<SessionError> for Response {
    fn from(err: SessionError) -> Self {
        Response::Error {
            code: err.code(),
            message: err.to_string(),
            payload: err.payload(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PollSummary {
    pub poll_name: String,
    pub command: Option<String>,
    pub description: Option<String>,
    pub once_per_day: bool,
}

impl From<&Poll> for PollSummary {
    fn from(poll: &Poll) -> Self {
        PollSummary {
            poll_name: poll.poll_name().to_owned(),
            command: poll.command().map(str::to_owned),
            description: poll.description().map(str::to_owned),
            once_per_day: poll.once_per_day(),
        }
    }
}

/// What a client needs to render a run and ask its next question.
#[derive(Debug, Serialize)]
pub struct PollWorkflowState {
    pub poll_run_id: Uuid,
    pub completed: bool,
    pub delayed: bool,
    pub delayed_for: Option<String>,
    pub current_question: Option<String>,
    pub current_question_index: usize,
    pub current_question_description: Option<String>,
    pub current_question_value_hint: Option<String>,
    pub current_question_allow_manual_answer: bool,
    pub current_question_select_list: Option<Vec<ValueLabel>>,
    pub questions: Vec<String>,
    pub answers: Vec<String>,
}

impl From<&PollWorkflow> for PollWorkflowState {
    fn from(workflow: &PollWorkflow) -> Self {
        let question = workflow.current_question();
        PollWorkflowState {
            poll_run_id: workflow.poll_run_id(),
            completed: workflow.completed(),
            delayed: workflow.delayed(),
            delayed_for: workflow.delayed_for().map(format_duration),
            current_question: question.map(|q| q.display_name().to_owned()),
            current_question_index: workflow.current_question_index(),
            current_question_description: question.and_then(|q| q.description.clone()),
            current_question_value_hint: question
                .and_then(|q| q.question_type.value_hint())
                .map(str::to_owned),
            current_question_allow_manual_answer: question
                .map(|q| q.question_type.allows_manual())
                .unwrap_or(false),
            current_question_select_list: workflow.current_question_select_list(),
            questions: workflow
                .questions()
                .iter()
                .filter(|q| !q.ephemeral)
                .map(|q| q.display_name().to_owned())
                .collect(),
            answers: workflow
                .answers()
                .into_iter()
                .map(|answer| answer.label.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PollLogEntry {
    pub log_id: Option<i64>,
    pub poll_ts: DateTime<FixedOffset>,
    pub answers: Vec<String>,
}

impl From<&PollWorkflow> for PollLogEntry {
    fn from(workflow: &PollWorkflow) -> Self {
        PollLogEntry {
            log_id: workflow.log_id(),
            poll_ts: workflow.poll_ts(),
            answers: workflow
                .answers()
                .into_iter()
                .map(|answer| answer.label.clone())
                .collect(),
        }
    }
}
