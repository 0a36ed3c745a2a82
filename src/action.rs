use uuid::Uuid;

use crate::crypto::PasswordOrKey;

/// A request against a user's session.
#[derive(Debug)]
pub enum Action {
    GetSession(String),
    UnlockSession {
        user_id: String,
        password_or_key: PasswordOrKey,
    },
    LockSession(String),
    SetConfig {
        user_id: String,
        config: String,
    },
    GetPolls(String),
    StartPoll {
        user_id: String,
        poll_name: String,
    },
    AddPollAnswer {
        user_id: String,
        poll_run_id: Uuid,
        answer: String,
    },
    ClosePoll {
        user_id: String,
        poll_run_id: Uuid,
        save: bool,
    },
    GetPollLog {
        user_id: String,
        poll_name: String,
        max_rows: Option<usize>,
    },
    SendHelp,
    ErrorMessage(String),
}
