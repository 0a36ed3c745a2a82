//! One run of a poll: walks the questions, fills in auto questions, pauses on delay
//! answers, and converts to a log row or a resumable snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike, Utc};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::question_type::{Answer, QuestionTypeError};
use super::{Poll, Question};
use crate::primitive::ValueLabel;
use crate::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddAnswerResult {
    Added,
    Completed,
    Delay,
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("failed to deserialize poll workflow: {message}")]
    DeserializeFailed { message: String, payload: Value },
    #[error("failed to serialize poll workflow: {0}")]
    SerializeFailed(String),
    #[error("malformed poll log row: {0}")]
    MalformedLog(String),
    #[error(transparent)]
    QuestionType(#[from] QuestionTypeError),
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::DeserializeFailed { .. } => "WORKFLOW_FAILED_DESERIALIZE",
            WorkflowError::SerializeFailed(_) => "WORKFLOW_FAILED_SERIALIZE",
            WorkflowError::MalformedLog(_) => "WORKFLOW_MALFORMED_LOG",
            WorkflowError::QuestionType(_) => "WORKFLOW_QUESTION_ERROR",
        }
    }

    fn deserialize_failed(message: impl ToString, payload: Value) -> WorkflowError {
        WorkflowError::DeserializeFailed {
            message: message.to_string(),
            payload,
        }
    }
}

/// Full state of a run. Carries its own copy of the poll and the user so a run can be
/// resumed regardless of later config changes.
#[derive(Debug, Serialize, Deserialize)]
struct WorkflowSnapshot {
    poll: Poll,
    user: User,
    poll_run_id: Uuid,
    log_id: Option<i64>,
    answers_raw: BTreeMap<usize, ValueLabel>,
    current_question_index: usize,
    poll_ts: DateTime<FixedOffset>,
    delayed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PollWorkflow {
    poll_run_id: Uuid,
    log_id: Option<i64>,
    poll: Poll,
    user: User,
    answers_raw: BTreeMap<usize, Answer>,
    current_question_index: usize,
    poll_ts: DateTime<FixedOffset>,
    delayed_until: Option<DateTime<Utc>>,
}

/// The logical day of a run. Before `hours_over_midnight` in the morning a run still
/// counts for the previous day and is pinned to 23:59:59 of it.
fn poll_timestamp(poll: &Poll, local_now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let hours = match poll.hours_over_midnight() {
        Some(hours) if hours > 0 => hours,
        _ => return local_now,
    };
    if local_now.hour() >= hours {
        return local_now;
    }
    let previous_day = local_now.date_naive() - Duration::days(1);
    previous_day
        .and_hms_opt(23, 59, 59)
        .and_then(|naive| local_now.offset().from_local_datetime(&naive).single())
        .unwrap_or(local_now)
}

impl PollWorkflow {
    pub fn new(poll: &Poll, user: &User) -> PollWorkflow {
        PollWorkflow::new_at(poll, user, Utc::now())
    }

    pub fn new_at(poll: &Poll, user: &User, now: DateTime<Utc>) -> PollWorkflow {
        let local_now = user.local_time(now);
        let mut workflow = PollWorkflow {
            poll_run_id: Uuid::new_v4(),
            log_id: None,
            poll: poll.clone(),
            user: user.clone(),
            answers_raw: BTreeMap::new(),
            current_question_index: 0,
            poll_ts: poll_timestamp(poll, local_now),
            delayed_until: None,
        };
        workflow.skip_auto_questions(local_now);
        workflow
    }

    pub fn poll_run_id(&self) -> Uuid {
        self.poll_run_id
    }

    pub fn log_id(&self) -> Option<i64> {
        self.log_id
    }

    pub fn set_log_id(&mut self, log_id: i64) {
        self.log_id = Some(log_id);
    }

    pub fn poll(&self) -> &Poll {
        &self.poll
    }

    pub fn poll_name(&self) -> &str {
        self.poll.poll_name()
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn poll_ts(&self) -> DateTime<FixedOffset> {
        self.poll_ts
    }

    pub fn questions(&self) -> &[Question] {
        self.poll.questions()
    }

    pub fn completed(&self) -> bool {
        self.current_question_index >= self.poll.questions().len()
    }

    pub fn delayed(&self) -> bool {
        self.delayed_until.is_some()
    }

    pub fn delayed_until(&self) -> Option<DateTime<Utc>> {
        self.delayed_until
    }

    /// The configured delay of the question the run is paused on.
    pub fn delayed_for(&self) -> Option<Duration> {
        self.delayed_until?;
        self.current_question()?.delay_time
    }

    pub fn current_question_index(&self) -> usize {
        self.current_question_index
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.poll.questions().get(self.current_question_index)
    }

    pub fn current_question_select_list(&self) -> Option<Vec<ValueLabel>> {
        let question = self.current_question()?;
        let dep_value = self.dependency_value(self.current_question_index);
        match question.question_type.answer_options(dep_value) {
            Ok(options) => Some(options),
            Err(err) => {
                debug!(
                    "No options for question {} of run {}: {}",
                    question.code, self.poll_run_id, err
                );
                None
            }
        }
    }

    pub fn answer(&self, question_index: usize) -> Option<&Answer> {
        self.answers_raw.get(&question_index)
    }

    /// Answers of non-ephemeral questions in question order.
    pub fn answers(&self) -> Vec<&Answer> {
        self.answers_raw
            .iter()
            .filter(|(index, _)| !self.poll.questions()[**index].ephemeral)
            .map(|(_, answer)| answer)
            .collect()
    }

    fn dependency_value(&self, question_index: usize) -> Option<&Answer> {
        self.poll
            .dependency_index(question_index)
            .and_then(|index| self.answers_raw.get(&index))
    }

    fn skip_auto_questions(&mut self, local_now: DateTime<FixedOffset>) {
        while let Some(question) = self.poll.questions().get(self.current_question_index) {
            if !question.question_type.is_auto() {
                break;
            }
            let dep_value = self.dependency_value(self.current_question_index);
            match question.question_type.auto_value(dep_value, local_now) {
                Ok(value) => {
                    self.answers_raw
                        .entry(self.current_question_index)
                        .or_insert(value);
                }
                Err(err) => debug!("Auto question {} left empty: {}", question.code, err),
            }
            self.current_question_index += 1;
        }
    }

    pub fn add_answer(&mut self, answer: &str) -> AddAnswerResult {
        self.add_answer_at(answer, Utc::now())
    }

    /// Like [`PollWorkflow::add_answer`] with an explicit current time.
    pub fn add_answer_at(&mut self, answer: &str, now: DateTime<Utc>) -> AddAnswerResult {
        if self.completed() {
            return AddAnswerResult::Error;
        }

        let resumed = match self.delayed_until {
            Some(until) if now < until => return AddAnswerResult::Delay,
            Some(_) => {
                self.delayed_until = None;
                true
            }
            None => false,
        };

        let local_now = self.user.local_time(now);
        let index = self.current_question_index;
        let question = &self.poll.questions()[index];
        let dep_value = self.dependency_value(index);
        let value = match question
            .question_type
            .value_from_answer(answer, dep_value, local_now)
        {
            Ok(value) => value,
            Err(err) => {
                debug!("Answer to {} rejected: {}", question.code, err);
                return AddAnswerResult::Error;
            }
        };

        if !resumed {
            if let (Some(delay_on), Some(delay_time)) = (&question.delay_on, question.delay_time) {
                if delay_on.contains(&question.question_type.serialize_value(&value)) {
                    let Some(delayed_until) = now.checked_add_signed(delay_time) else {
                        warn!("Delay of {} for {} is out of range", delay_time, question.code);
                        return AddAnswerResult::Error;
                    };
                    self.delayed_until = Some(delayed_until);
                    return AddAnswerResult::Delay;
                }
            }
        }

        self.answers_raw.insert(index, value);
        self.current_question_index += 1;
        self.skip_auto_questions(local_now);

        if self.completed() {
            AddAnswerResult::Completed
        } else {
            AddAnswerResult::Added
        }
    }

    /// The log row of this run: the poll timestamp followed by every non-ephemeral
    /// answer in question order, blank where unanswered.
    pub fn get_save_data(&self) -> Result<(DateTime<FixedOffset>, String), WorkflowError> {
        let mut row = vec![self.poll_ts.to_rfc3339()];
        for (index, question) in self.poll.questions().iter().enumerate() {
            if question.ephemeral {
                continue;
            }
            row.push(
                self.answers_raw
                    .get(&index)
                    .map(|answer| question.question_type.serialize_value(answer))
                    .unwrap_or_default(),
            );
        }

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Always)
            .from_writer(vec![]);
        writer
            .write_record(&row)
            .map_err(|err| WorkflowError::SerializeFailed(err.to_string()))?;
        let data = writer
            .into_inner()
            .map_err(|err| WorkflowError::SerializeFailed(err.to_string()))?;
        let line = String::from_utf8(data)
            .map_err(|err| WorkflowError::SerializeFailed(err.to_string()))?;

        Ok((self.poll_ts, line.trim_end_matches(['\r', '\n']).to_owned()))
    }

    /// Rebuilds a completed run from a log row, e.g. to show or amend an earlier entry.
    pub fn from_store_data(
        poll: &Poll,
        user: &User,
        log_id: i64,
        poll_ts: DateTime<FixedOffset>,
        log: &str,
    ) -> Result<PollWorkflow, WorkflowError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(log.as_bytes());
        let record = match reader.records().next() {
            Some(record) => record.map_err(|err| WorkflowError::MalformedLog(err.to_string()))?,
            None => StringRecord::new(),
        };

        let mut answers_raw: BTreeMap<usize, Answer> = BTreeMap::new();
        let mut cells = record.iter().skip(1);
        for (index, question) in poll.questions().iter().enumerate() {
            if question.ephemeral {
                continue;
            }
            let cell = cells.next().unwrap_or_default();
            if cell.is_empty() {
                continue;
            }
            let dep_value = poll
                .dependency_index(index)
                .and_then(|dependency| answers_raw.get(&dependency));
            let value = question.question_type.deserialize_value(cell, dep_value)?;
            answers_raw.insert(index, value);
        }

        Ok(PollWorkflow {
            poll_run_id: Uuid::new_v4(),
            log_id: Some(log_id),
            poll: poll.clone(),
            user: user.clone(),
            answers_raw,
            current_question_index: poll.questions().len(),
            poll_ts,
            delayed_until: None,
        })
    }

    /// Turns a run rebuilt from the log back into one that asks every question again.
    /// Stored answers are kept until they are answered anew, so saving early keeps them.
    pub fn reopen_at(mut self, now: DateTime<Utc>) -> PollWorkflow {
        self.current_question_index = 0;
        self.delayed_until = None;
        let local_now = self.user.local_time(now);
        self.skip_auto_questions(local_now);
        self
    }

    pub fn to_value(&self) -> Result<Value, WorkflowError> {
        let snapshot = WorkflowSnapshot {
            poll: self.poll.clone(),
            user: self.user.clone(),
            poll_run_id: self.poll_run_id,
            log_id: self.log_id,
            answers_raw: self
                .answers_raw
                .iter()
                .map(|(index, answer)| {
                    (
                        *index,
                        ValueLabel::new(answer.value.serialize(), answer.label.clone()),
                    )
                })
                .collect(),
            current_question_index: self.current_question_index,
            poll_ts: self.poll_ts,
            delayed_until: self.delayed_until,
        };
        serde_json::to_value(snapshot).map_err(|err| WorkflowError::SerializeFailed(err.to_string()))
    }

    /// Restores a run from [`PollWorkflow::to_value`]. Any failure carries the snapshot.
    pub fn from_value(value: Value) -> Result<PollWorkflow, WorkflowError> {
        let snapshot: WorkflowSnapshot = match serde_json::from_value(value.clone()) {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(WorkflowError::deserialize_failed(err, value)),
        };

        let questions = snapshot.poll.questions();
        if snapshot.current_question_index > questions.len() {
            return Err(WorkflowError::deserialize_failed(
                format!(
                    "current question index {} is out of range",
                    snapshot.current_question_index
                ),
                value,
            ));
        }

        let mut answers_raw: BTreeMap<usize, Answer> = BTreeMap::new();
        for (index, stored) in snapshot.answers_raw {
            let question = match questions.get(index) {
                Some(question) => question,
                None => {
                    return Err(WorkflowError::deserialize_failed(
                        format!("answer for unknown question {}", index),
                        value,
                    ))
                }
            };
            let dep_value = snapshot
                .poll
                .dependency_index(index)
                .and_then(|dependency| answers_raw.get(&dependency));
            let mut answer = match question.question_type.deserialize_value(&stored.value, dep_value) {
                Ok(answer) => answer,
                Err(err) => return Err(WorkflowError::deserialize_failed(err, value)),
            };
            answer.label = stored.label;
            answers_raw.insert(index, answer);
        }

        Ok(PollWorkflow {
            poll_run_id: snapshot.poll_run_id,
            log_id: snapshot.log_id,
            poll: snapshot.poll,
            user: snapshot.user,
            answers_raw,
            current_question_index: snapshot.current_question_index,
            poll_ts: snapshot.poll_ts,
            delayed_until: snapshot.delayed_until,
        })
    }
}
