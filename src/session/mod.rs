//! Per-user sessions: unlocking the user's encrypted data, holding their config and
//! the poll runs in flight, and persisting both when the session closes.

pub mod error;
pub mod notification;
pub mod scheduler;
pub mod spawner;
pub mod status;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::crypto::PasswordOrKey;
use crate::data::{DataCategory, DataConnection, DataProvider, LogRecord};
use crate::poll::{AddAnswerResult, Poll, PollWorkflow, WorkflowError};
use crate::time_frame::TimeFrame;
use crate::user::User;

pub use self::error::SessionError;
pub use self::notification::{
    Notification, NotificationType, Notifier, PollDelaySchema, UserSessionSchema,
};
pub use self::scheduler::{DelayedJob, Scheduler, TokioScheduler};
pub use self::spawner::SessionSpawner;
pub use self::status::UserSessionStatus;

/// What every session of the process shares.
#[derive(Clone)]
pub struct SessionContext {
    pub data_provider: Arc<dyn DataProvider>,
    pub notifier: Notifier,
    pub scheduler: Arc<dyn Scheduler>,
}

impl SessionContext {
    pub fn new(data_provider: Arc<dyn DataProvider>, notifier: Notifier) -> SessionContext {
        let scheduler = Arc::new(TokioScheduler::new(notifier.clone()));
        SessionContext {
            data_provider,
            notifier,
            scheduler,
        }
    }
}

pub struct UserSession {
    context: SessionContext,
    user_id: String,
    status: UserSessionStatus,
    user_config: Option<User>,
    data_connection: Option<Box<dyn DataConnection>>,
    active_polls: HashMap<Uuid, PollWorkflow>,
}

impl UserSession {
    pub fn new(context: SessionContext, user_id: &str, status: UserSessionStatus) -> UserSession {
        UserSession {
            context,
            user_id: user_id.to_owned(),
            status,
            user_config: None,
            data_connection: None,
            active_polls: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> UserSessionStatus {
        self.status
    }

    pub fn user_config(&self) -> Option<&User> {
        self.user_config.as_ref()
    }

    pub fn active_poll(&self, poll_run_id: Uuid) -> Option<&PollWorkflow> {
        self.active_polls.get(&poll_run_id)
    }

    pub fn active_polls(&self) -> impl Iterator<Item = &PollWorkflow> {
        self.active_polls.values()
    }

    /// The public view of this session. The key is only known while unlocked.
    pub fn schema(&self) -> UserSessionSchema {
        UserSessionSchema {
            user_id: self.user_id.clone(),
            user_status: self.status,
            key: self
                .data_connection
                .as_ref()
                .map(|connection| connection.key().encode()),
        }
    }

    fn set_status(&mut self, status: UserSessionStatus) {
        if self.status == status {
            return;
        }
        info!(
            "Session of user {} changed status {} -> {}",
            self.user_id, self.status, status
        );
        self.status = status;
        self.context
            .notifier
            .notify(Notification::SessionUpdate(self.schema()));
    }

    fn require_status(&self, expected: UserSessionStatus) -> Result<(), SessionError> {
        if self.status < expected {
            return Err(SessionError::IncorrectStatus {
                expected,
                actual: self.status,
            });
        }
        Ok(())
    }

    fn connection(&self) -> Result<&dyn DataConnection, SessionError> {
        self.data_connection
            .as_deref()
            .ok_or_else(|| SessionError::Internal(format!("user {} has no data connection", self.user_id)))
    }

    fn configured_user(&self) -> Result<&User, SessionError> {
        self.require_status(UserSessionStatus::Configured)?;
        self.user_config
            .as_ref()
            .ok_or_else(|| SessionError::Internal(format!("user {} has no config", self.user_id)))
    }

    /// Opens the user's data with a password or key. A new user gets a lock created
    /// from the password. Stored config and poll runs are loaded.
    ///
    /// If the stored config fails to parse the session stays unlocked, so a fresh
    /// config can be set, and [`SessionError::DataParse`] is returned.
    pub async fn unlock(&mut self, password_or_key: PasswordOrKey) -> Result<(), SessionError> {
        if self.status > UserSessionStatus::Locked {
            return Ok(());
        }
        if self.data_connection.is_some() {
            error!("User {} already has a data connection while locked", self.user_id);
            return Err(SessionError::Internal(
                "data connection already existed when trying to unlock".to_owned(),
            ));
        }

        let provider = self.context.data_provider.clone();
        let user_id = self.user_id.clone();
        let connection =
            tokio::task::spawn_blocking(move || provider.get_connection(&user_id, password_or_key))
                .await
                .map_err(|err| SessionError::Internal(format!("unlock task failed: {}", err)))??;

        let config = connection.get_user_data(DataCategory::Config)?;
        self.active_polls = self.restore_active_polls(connection.as_ref(), Utc::now());
        self.data_connection = Some(connection);

        let config = match config {
            Some(config) => config,
            None => {
                self.set_status(UserSessionStatus::Unlocked);
                return Ok(());
            }
        };
        match User::from_json(&config) {
            Ok(user) => {
                self.user_config = Some(user);
                self.set_status(UserSessionStatus::Configured);
                Ok(())
            }
            Err(err) => {
                error!("Stored config of user {} failed to parse: {}", self.user_id, err);
                self.set_status(UserSessionStatus::Unlocked);
                Err(SessionError::DataParse(err.to_string()))
            }
        }
    }

    /// Unreadable or unparsable runs are dropped so the user can still get in.
    fn restore_active_polls(
        &self,
        connection: &dyn DataConnection,
        now: DateTime<Utc>,
    ) -> HashMap<Uuid, PollWorkflow> {
        let mut active_polls = HashMap::new();
        let stored = match connection.get_user_data(DataCategory::ActivePoll) {
            Ok(Some(stored)) => stored,
            Ok(None) => return active_polls,
            Err(err) => {
                error!("Active polls of user {} are unreadable, dropping them: {}", self.user_id, err);
                return active_polls;
            }
        };
        let snapshots: HashMap<String, Value> = match serde_json::from_str(&stored) {
            Ok(snapshots) => snapshots,
            Err(err) => {
                error!("Active polls of user {} failed to parse, dropping them: {}", self.user_id, err);
                return active_polls;
            }
        };

        for (run_id, snapshot) in snapshots {
            let workflow = match PollWorkflow::from_value(snapshot) {
                Ok(workflow) => workflow,
                Err(err) => {
                    error!("Failed to restore poll run {} of user {}: {}", run_id, self.user_id, err);
                    if let WorkflowError::DeserializeFailed { payload, .. } = &err {
                        debug!("Unrestorable snapshot of run {}: {}", run_id, payload);
                    }
                    continue;
                }
            };
            if let Some(until) = workflow.delayed_until() {
                if until > now {
                    self.context.scheduler.schedule_once(
                        until,
                        DelayedJob {
                            user_id: self.user_id.clone(),
                            poll_run_id: workflow.poll_run_id(),
                        },
                    );
                }
            }
            active_polls.insert(workflow.poll_run_id(), workflow);
        }
        debug!("Restored {} active polls of user {}", active_polls.len(), self.user_id);
        active_polls
    }

    pub fn get_polls(&self) -> Result<&[Poll], SessionError> {
        Ok(self.configured_user()?.polls())
    }

    pub fn start_poll(&mut self, poll_name: &str) -> Result<&PollWorkflow, SessionError> {
        self.start_poll_at(poll_name, Utc::now())
    }

    /// Starts a run of the poll. A once per day poll runs at most once at a time. Started
    /// again on a day that already has a log row, it picks up that row's answers and
    /// amends the row when saved.
    pub fn start_poll_at(
        &mut self,
        poll_name: &str,
        now: DateTime<Utc>,
    ) -> Result<&PollWorkflow, SessionError> {
        let user = self.configured_user()?;
        let poll = user
            .poll(poll_name)
            .ok_or_else(|| SessionError::PollNotFound(poll_name.to_owned()))?;
        let mut workflow = PollWorkflow::new_at(poll, user, now);

        if poll.once_per_day() {
            if self.active_polls.values().any(|active| active.poll_name() == poll_name) {
                return Err(SessionError::PollAlreadyActive(poll_name.to_owned()));
            }
            if let Some(record) = self.same_day_log(&workflow)? {
                let poll_ts = user.local_time(record.poll_ts);
                match PollWorkflow::from_store_data(poll, user, record.id, poll_ts, &record.log) {
                    Ok(stored) => {
                        info!("Poll '{}' of user {} reopens log {}", poll_name, self.user_id, record.id);
                        workflow = stored.reopen_at(now);
                    }
                    Err(err) => warn!(
                        "Log {} of poll '{}' can't be reopened, starting a new row: {}",
                        record.id, poll_name, err
                    ),
                }
            }
        }

        let run_id = workflow.poll_run_id();
        info!("User {} started poll '{}' as run {}", self.user_id, poll_name, run_id);
        Ok(&*self.active_polls.entry(run_id).or_insert(workflow))
    }

    fn same_day_log(&self, workflow: &PollWorkflow) -> Result<Option<LogRecord>, SessionError> {
        let day = workflow.poll_ts().date_naive();
        let frame = match TimeFrame::for_day(day, workflow.user().timezone()) {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let logs = self.connection()?.get_poll_logs(
            workflow.poll_name(),
            Some(frame.start),
            Some(frame.end),
            Some(1),
        )?;
        Ok(logs.into_iter().next())
    }

    pub fn add_poll_answer(
        &mut self,
        poll_run_id: Uuid,
        answer: &str,
    ) -> Result<&PollWorkflow, SessionError> {
        self.add_poll_answer_at(poll_run_id, answer, Utc::now())
    }

    pub fn add_poll_answer_at(
        &mut self,
        poll_run_id: Uuid,
        answer: &str,
        now: DateTime<Utc>,
    ) -> Result<&PollWorkflow, SessionError> {
        let workflow = self
            .active_polls
            .get_mut(&poll_run_id)
            .ok_or(SessionError::PollRunNotFound(poll_run_id))?;
        let delayed_before = workflow.delayed_until();

        match workflow.add_answer_at(answer, now) {
            AddAnswerResult::Error => return Err(SessionError::UnsupportedAnswer),
            AddAnswerResult::Delay => match workflow.delayed_until() {
                Some(until) if delayed_before != Some(until) => {
                    debug!("Poll run {} of user {} delayed until {}", poll_run_id, self.user_id, until);
                    self.context.scheduler.schedule_once(
                        until,
                        DelayedJob {
                            user_id: self.user_id.clone(),
                            poll_run_id,
                        },
                    );
                }
                _ => {}
            },
            AddAnswerResult::Completed => {
                debug!("Poll run {} of user {} completed", poll_run_id, self.user_id)
            }
            AddAnswerResult::Added => {}
        }
        Ok(&*workflow)
    }

    fn save_workflow(&self, workflow: &PollWorkflow) -> Result<i64, SessionError> {
        let connection = self.connection()?;
        let (poll_ts, log) = workflow.get_save_data()?;
        let poll_ts = poll_ts.with_timezone(&Utc);

        if let Some(log_id) = workflow.log_id() {
            if connection.update_log(log_id, Some(poll_ts), Some(&log))? {
                return Ok(log_id);
            }
            warn!(
                "Log {} of poll run {} is gone, appending a new row",
                log_id,
                workflow.poll_run_id()
            );
        }
        Ok(connection.append_log(workflow.poll_name(), poll_ts, &log)?)
    }

    /// Ends a run. When saving, returns the id of the log row written.
    pub fn close_poll(&mut self, poll_run_id: Uuid, save: bool) -> Result<Option<i64>, SessionError> {
        let workflow = self
            .active_polls
            .get(&poll_run_id)
            .ok_or(SessionError::PollRunNotFound(poll_run_id))?;
        let log_id = if save {
            Some(self.save_workflow(workflow)?)
        } else {
            None
        };
        self.active_polls.remove(&poll_run_id);
        debug!("Closed poll run {} of user {}", poll_run_id, self.user_id);
        Ok(log_id)
    }

    pub fn close_all_polls(&mut self, save: bool) -> Result<Vec<i64>, SessionError> {
        let run_ids: Vec<Uuid> = self.active_polls.keys().copied().collect();
        let mut log_ids = vec![];
        for run_id in run_ids {
            log_ids.extend(self.close_poll(run_id, save)?);
        }
        Ok(log_ids)
    }

    /// Replaces the user's config and stores it right away.
    pub fn set_config(&mut self, config: &str) -> Result<(), SessionError> {
        self.require_status(UserSessionStatus::Unlocked)?;
        let user = User::from_json(config)?;
        if user.id() != self.user_id {
            return Err(SessionError::ConfigUserMismatch {
                user_id: self.user_id.clone(),
                config_user: user.id().to_owned(),
            });
        }
        let json = user
            .to_json()
            .map_err(|err| SessionError::Internal(err.to_string()))?;
        self.connection()?.store_user_data(&json, DataCategory::Config)?;
        self.user_config = Some(user);
        self.set_status(UserSessionStatus::Configured);
        Ok(())
    }

    /// Saved runs of a poll, most recent first. Rows that no longer fit the poll are skipped.
    pub fn get_poll_log(
        &self,
        poll_name: &str,
        max_rows: Option<usize>,
    ) -> Result<Vec<PollWorkflow>, SessionError> {
        let user = self.configured_user()?;
        let poll = user
            .poll(poll_name)
            .ok_or_else(|| SessionError::PollNotFound(poll_name.to_owned()))?;
        let logs = self
            .connection()?
            .get_poll_logs(poll_name, None, None, max_rows)?;

        Ok(logs
            .into_iter()
            .filter_map(|record| {
                let poll_ts = user.local_time(record.poll_ts);
                match PollWorkflow::from_store_data(poll, user, record.id, poll_ts, &record.log) {
                    Ok(workflow) => Some(workflow),
                    Err(err) => {
                        warn!("Skipping log {} of poll '{}': {}", record.id, poll_name, err);
                        None
                    }
                }
            })
            .collect())
    }

    /// Persists config and poll runs and locks the session. Completed runs go to the
    /// log, unfinished ones are kept for the next unlock.
    pub fn close(&mut self) -> Result<(), SessionError> {
        if self.data_connection.is_none() {
            return Ok(());
        }
        debug!("Closing session of user {}", self.user_id);

        if let Some(user) = &self.user_config {
            let json = user
                .to_json()
                .map_err(|err| SessionError::Internal(err.to_string()))?;
            self.connection()?.store_user_data(&json, DataCategory::Config)?;
        }

        let mut snapshots = Map::new();
        for workflow in self.active_polls.values() {
            if workflow.completed() {
                self.save_workflow(workflow)?;
            } else {
                snapshots.insert(workflow.poll_run_id().to_string(), workflow.to_value()?);
            }
        }
        self.connection()?
            .store_user_data(&Value::Object(snapshots).to_string(), DataCategory::ActivePoll)?;

        self.active_polls.clear();
        self.user_config = None;
        self.data_connection = None;
        self.set_status(UserSessionStatus::Locked);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rusqlite::Connection;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::scheduler::tests::RecordingScheduler;
    use super::{Notification, Notifier, SessionContext, UserSession, UserSessionStatus};
    use crate::crypto::{EncryptionKey, PasswordOrKey};
    use crate::data::sqlite::{SqliteProvider, SqliteProviderParams};
    use crate::user::tests::user_json;

    pub(crate) struct TestContext {
        pub(crate) dir: TempDir,
        pub(crate) context: SessionContext,
        pub(crate) notifications: UnboundedReceiver<Notification>,
        pub(crate) scheduler: Arc<RecordingScheduler>,
    }

    pub(crate) fn test_context() -> TestContext {
        let dir = TempDir::new().unwrap();
        let provider = SqliteProvider::new(SqliteProviderParams {
            base_path: dir.path().to_path_buf(),
            iterations: Some(1_000),
        });
        let (notifier, notifications) = Notifier::channel();
        let scheduler = Arc::new(RecordingScheduler::default());
        let context = SessionContext {
            data_provider: Arc::new(provider),
            notifier,
            scheduler: scheduler.clone(),
        };
        TestContext {
            dir,
            context,
            notifications,
            scheduler,
        }
    }

    const WALK_USER: &str = r#"{
        "id": "123",
        "timezone": "Europe/Moscow",
        "polls": [{
            "poll_name": "Walk",
            "once_per_day": false,
            "questions": [
                {"code": "went", "type": {"select": [{"yes": "Yes"}, {"no": "No"}]},
                 "delay_on": ["no"], "delay_time": "01:00:00"},
                {"code": "mood", "type": {"select": [{"good": "Good"}, {"bad": "Bad"}]}}
            ]
        }]
    }"#;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 10, 9, 0, 0).unwrap()
    }

    async fn configured_session(test: &TestContext, config: &str) -> UserSession {
        let mut session = UserSession::new(test.context.clone(), "123", UserSessionStatus::New);
        session.unlock(PasswordOrKey::from("secret")).await.unwrap();
        session.set_config(config).unwrap();
        session
    }

    fn last_key(notifications: &mut UnboundedReceiver<Notification>) -> Option<String> {
        let mut key = None;
        while let Ok(notification) = notifications.try_recv() {
            if let Notification::SessionUpdate(schema) = notification {
                key = schema.key;
            }
        }
        key
    }

    #[tokio::test]
    async fn unlock_and_configure() {
        let mut test = test_context();
        let mut session = UserSession::new(test.context.clone(), "123", UserSessionStatus::New);
        assert_eq!(
            session.get_polls().unwrap_err().code(),
            "SESSION_INCORRECT_STATUS"
        );
        assert_eq!(
            session.set_config(&user_json("123")).unwrap_err().code(),
            "SESSION_INCORRECT_STATUS"
        );

        session.unlock(PasswordOrKey::from("secret")).await.unwrap();
        assert_eq!(session.status(), UserSessionStatus::Unlocked);
        match test.notifications.try_recv().unwrap() {
            Notification::SessionUpdate(schema) => {
                assert_eq!(schema.user_status, UserSessionStatus::Unlocked);
                assert!(schema.key.is_some());
            }
            other => panic!("unexpected notification {:?}", other),
        }

        // Unlocking again is a no-op.
        session.unlock(PasswordOrKey::from("other")).await.unwrap();
        assert!(test.notifications.try_recv().is_err());

        let err = session.set_config(&user_json("456")).unwrap_err();
        assert_eq!(err.code(), "CONFIG_USER_MISMATCH");
        let err = session.set_config(r#"{"id": "123", "lang_code": "eng"}"#).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
        assert!(err.payload().is_some());
        assert_eq!(session.status(), UserSessionStatus::Unlocked);

        session.set_config(&user_json("123")).unwrap();
        assert_eq!(session.status(), UserSessionStatus::Configured);
        assert_eq!(session.get_polls().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reopen_with_password_or_key() {
        let mut test = test_context();
        let mut session = configured_session(&test, &user_json("123")).await;
        let key = last_key(&mut test.notifications).unwrap();
        session.close().unwrap();
        assert_eq!(session.status(), UserSessionStatus::Locked);
        assert!(session.schema().key.is_none());

        let mut session = UserSession::new(test.context.clone(), "123", UserSessionStatus::Locked);
        let err = session.unlock(PasswordOrKey::from("wrong")).await.unwrap_err();
        assert_eq!(err.code(), "INCORRECT_PASSWORD_OR_KEY");
        assert_eq!(session.status(), UserSessionStatus::Locked);

        let key: EncryptionKey = key.parse().unwrap();
        session.unlock(PasswordOrKey::from(key)).await.unwrap();
        assert_eq!(session.status(), UserSessionStatus::Configured);
        assert!(session.user_config().unwrap().poll("Headache").is_some());
    }

    #[tokio::test]
    async fn unparsable_config_leaves_session_unlocked() {
        let test = test_context();
        let mut session = UserSession::new(test.context.clone(), "123", UserSessionStatus::New);
        session.unlock(PasswordOrKey::from("secret")).await.unwrap();
        session
            .connection()
            .unwrap()
            .store_user_data("{broken", crate::data::DataCategory::Config)
            .unwrap();
        session.close().unwrap();

        let mut session = UserSession::new(test.context.clone(), "123", UserSessionStatus::Locked);
        let err = session.unlock(PasswordOrKey::from("secret")).await.unwrap_err();
        assert_eq!(err.code(), "SESSION_DATA_PARSE_ERROR");
        assert_eq!(session.status(), UserSessionStatus::Unlocked);
        session.set_config(&user_json("123")).unwrap();
        assert_eq!(session.status(), UserSessionStatus::Configured);
    }

    #[tokio::test]
    async fn poll_run_with_delay() {
        let test = test_context();
        let mut session = configured_session(&test, &user_json("123")).await;

        assert_eq!(
            session.start_poll_at("Missing", noon()).unwrap_err().code(),
            "POLL_NOT_FOUND"
        );
        let run_id = session.start_poll_at("Headache", noon()).unwrap().poll_run_id();
        assert_eq!(
            session.start_poll_at("Headache", noon()).unwrap_err().code(),
            "POLL_ALREADY_ACTIVE"
        );

        session.add_poll_answer_at(run_id, "1", noon()).unwrap();
        let workflow = session.add_poll_answer_at(run_id, "No", noon()).unwrap();
        assert!(workflow.delayed());
        assert_eq!(test.scheduler.jobs.lock().unwrap().len(), 1);

        // Still delayed, no second wake-up.
        let later = noon() + Duration::seconds(1);
        session.add_poll_answer_at(run_id, "No", later).unwrap();
        assert_eq!(test.scheduler.jobs.lock().unwrap().len(), 1);
        {
            let jobs = test.scheduler.jobs.lock().unwrap();
            assert_eq!(jobs[0].0, noon() + Duration::seconds(2));
            assert_eq!(jobs[0].1.poll_run_id, run_id);
            assert_eq!(jobs[0].1.user_id, "123");
        }

        let elapsed = noon() + Duration::seconds(2);
        for answer in ["No", "migraine", "ibuprofen"] {
            session.add_poll_answer_at(run_id, answer, elapsed).unwrap();
        }
        assert_eq!(
            session.add_poll_answer_at(run_id, "2", elapsed).unwrap_err().code(),
            "POLL_ANSWER_UNSUPPORTED_VALUE"
        );
        let workflow = session.add_poll_answer_at(run_id, "400", elapsed).unwrap();
        assert!(workflow.completed());

        let log_id = session.close_poll(run_id, true).unwrap();
        assert!(log_id.is_some());
        assert!(session.active_poll(run_id).is_none());
        assert_eq!(
            session.add_poll_answer_at(run_id, "400", elapsed).unwrap_err().code(),
            "POLL_RUN_NOT_FOUND"
        );

        let history = session.get_poll_log("Headache", None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].log_id(), log_id);
        assert_eq!(history[0].answers().len(), 4);
    }

    #[tokio::test]
    async fn once_per_day_poll_amends_same_day_row() {
        let test = test_context();
        let mut session = configured_session(&test, &user_json("123")).await;

        let run_id = session.start_poll_at("Headache", noon()).unwrap().poll_run_id();
        for answer in ["3", "Yes", "migraine", "ibuprofen", "400"] {
            session.add_poll_answer_at(run_id, answer, noon()).unwrap();
        }
        let first = session.close_poll(run_id, true).unwrap().unwrap();

        // Reopened without answering anything, saving keeps the day's answers.
        let evening = noon() + Duration::hours(8);
        let workflow = session.start_poll_at("Headache", evening).unwrap();
        assert_eq!(workflow.log_id(), Some(first));
        assert_eq!(workflow.current_question_index(), 0);
        assert_eq!(workflow.answers().len(), 4);
        let run_id = workflow.poll_run_id();
        assert_eq!(session.close_poll(run_id, true).unwrap(), Some(first));
        let history = session.get_poll_log("Headache", None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].answers().len(), 4);

        // Answering again replaces only what was answered.
        let run_id = session.start_poll_at("Headache", evening).unwrap().poll_run_id();
        session.add_poll_answer_at(run_id, "1", evening).unwrap();
        assert_eq!(session.close_poll(run_id, true).unwrap(), Some(first));
        let history = session.get_poll_log("Headache", None).unwrap();
        assert_eq!(history.len(), 1);
        let answers: Vec<String> = history[0]
            .answers()
            .iter()
            .map(|answer| answer.value.serialize())
            .collect();
        assert_eq!(
            answers,
            vec!["2022-01-10T19:00:00+03:00", "migraine", "ibuprofen", "400"]
        );

        let next_day = noon() + Duration::days(1);
        let workflow = session.start_poll_at("Headache", next_day).unwrap();
        assert_eq!(workflow.log_id(), None);
        assert!(workflow.answers().is_empty());
        let run_id = workflow.poll_run_id();
        assert_ne!(session.close_poll(run_id, true).unwrap(), Some(first));
        assert_eq!(session.get_poll_log("Headache", Some(5)).unwrap().len(), 2);

        assert!(session.close_all_polls(true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_active_polls_are_dropped() {
        let test = test_context();
        let mut session = configured_session(&test, WALK_USER).await;
        let run_id = session.start_poll_at("Walk", Utc::now()).unwrap().poll_run_id();
        session.close().unwrap();

        let db = Connection::open(test.dir.path().join("123").join("data.db")).unwrap();
        db.execute(
            "UPDATE user_data SET data = x'00' WHERE category = 'ACTIVE_POLL'",
            [],
        )
        .unwrap();

        let mut session = UserSession::new(test.context.clone(), "123", UserSessionStatus::Locked);
        session.unlock(PasswordOrKey::from("secret")).await.unwrap();
        assert_eq!(session.status(), UserSessionStatus::Configured);
        assert!(session.active_poll(run_id).is_none());

        session.close().unwrap();
        assert!(session.schema().key.is_none());
        session.unlock(PasswordOrKey::from("secret")).await.unwrap();
        assert_eq!(session.status(), UserSessionStatus::Configured);
    }

    #[tokio::test]
    async fn close_keeps_unfinished_runs() {
        let mut test = test_context();
        let mut session = configured_session(&test, WALK_USER).await;
        let now = Utc::now();

        let unfinished = session.start_poll_at("Walk", now).unwrap().poll_run_id();
        let result = session.add_poll_answer_at(unfinished, "no", now).unwrap();
        assert!(result.delayed());

        let finished = session.start_poll_at("Walk", now).unwrap().poll_run_id();
        session.add_poll_answer_at(finished, "yes", now).unwrap();
        session.add_poll_answer_at(finished, "good", now).unwrap();

        let dropped = session.start_poll_at("Walk", now).unwrap().poll_run_id();
        session.close_poll(dropped, false).unwrap();

        let key = last_key(&mut test.notifications).unwrap();
        session.close().unwrap();
        test.scheduler.jobs.lock().unwrap().clear();

        let mut session = UserSession::new(test.context.clone(), "123", UserSessionStatus::Locked);
        session
            .unlock(PasswordOrKey::from(key.parse::<EncryptionKey>().unwrap()))
            .await
            .unwrap();
        assert_eq!(session.active_polls().count(), 1);
        let restored = session.active_poll(unfinished).unwrap();
        assert_eq!(restored.delayed_until(), Some(now + Duration::hours(1)));

        let jobs = test.scheduler.jobs.lock().unwrap().clone();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].1.poll_run_id, unfinished);

        assert_eq!(session.get_poll_log("Walk", None).unwrap().len(), 1);
        assert_eq!(
            session.add_poll_answer_at(unfinished, "no", now).unwrap().current_question_index(),
            0
        );
        let resumed = session
            .add_poll_answer_at(unfinished, "no", now + Duration::hours(1))
            .unwrap();
        assert_eq!(resumed.current_question_index(), 1);
        assert!(test.dir.path().join("123").join("lock").exists());
    }
}
