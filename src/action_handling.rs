use log::warn;
use uuid::Uuid;

use crate::{
    action::Action,
    crypto::PasswordOrKey,
    response::{PollLogEntry, PollSummary, PollWorkflowState, Response},
    session::{SessionError, SessionSpawner},
};

pub async fn perform_action(spawner: &SessionSpawner, action: &Action) -> Response {
    let mb_response = match action {
        Action::GetSession(user_id) => get_session(spawner, user_id).await,
        Action::UnlockSession {
            user_id,
            password_or_key,
        } => unlock_session(spawner, user_id, password_or_key).await,
        Action::LockSession(user_id) => lock_session(spawner, user_id).await,
        Action::SetConfig { user_id, config } => set_config(spawner, user_id, config).await,
        Action::GetPolls(user_id) => get_polls(spawner, user_id).await,
        Action::StartPoll { user_id, poll_name } => start_poll(spawner, user_id, poll_name).await,
        Action::AddPollAnswer {
            user_id,
            poll_run_id,
            answer,
        } => add_poll_answer(spawner, user_id, *poll_run_id, answer).await,
        Action::ClosePoll {
            user_id,
            poll_run_id,
            save,
        } => close_poll(spawner, user_id, *poll_run_id, *save).await,
        Action::GetPollLog {
            user_id,
            poll_name,
            max_rows,
        } => get_poll_log(spawner, user_id, poll_name, *max_rows).await,
        Action::SendHelp => Ok(Response::SendHelp),
        Action::ErrorMessage(message_text) => Ok(Response::Reply(message_text.clone())),
    };
    mb_response.unwrap_or_else(|err| {
        warn!("Action failed: {}", err);
        Response::from(err)
    })
}

async fn get_session(spawner: &SessionSpawner, user_id: &str) -> Result<Response, SessionError> {
    let session = spawner.get(user_id).await?;
    let session = session.lock().await;
    Ok(Response::Session(session.schema()))
}

async fn unlock_session(
    spawner: &SessionSpawner,
    user_id: &str,
    password_or_key: &PasswordOrKey,
) -> Result<Response, SessionError> {
    let session = spawner.get(user_id).await?;
    let mut session = session.lock().await;
    session.unlock(password_or_key.clone()).await?;
    Ok(Response::Session(session.schema()))
}

async fn lock_session(spawner: &SessionSpawner, user_id: &str) -> Result<Response, SessionError> {
    let session = spawner.get(user_id).await?;
    let mut session = session.lock().await;
    session.close()?;
    Ok(Response::Session(session.schema()))
}

async fn set_config(
    spawner: &SessionSpawner,
    user_id: &str,
    config: &str,
) -> Result<Response, SessionError> {
    let session = spawner.get(user_id).await?;
    let mut session = session.lock().await;
    session.set_config(config)?;
    Ok(Response::Session(session.schema()))
}

async fn get_polls(spawner: &SessionSpawner, user_id: &str) -> Result<Response, SessionError> {
    let session = spawner.get(user_id).await?;
    let session = session.lock().await;
    let polls = session.get_polls()?.iter().map(PollSummary::from).collect();
    Ok(Response::Polls(polls))
}

async fn start_poll(
    spawner: &SessionSpawner,
    user_id: &str,
    poll_name: &str,
) -> Result<Response, SessionError> {
    let session = spawner.get(user_id).await?;
    let mut session = session.lock().await;
    let workflow = session.start_poll(poll_name)?;
    Ok(Response::PollWorkflow(PollWorkflowState::from(workflow)))
}

async fn add_poll_answer(
    spawner: &SessionSpawner,
    user_id: &str,
    poll_run_id: Uuid,
    answer: &str,
) -> Result<Response, SessionError> {
    let session = spawner.get(user_id).await?;
    let mut session = session.lock().await;
    let workflow = session.add_poll_answer(poll_run_id, answer)?;
    Ok(Response::PollWorkflow(PollWorkflowState::from(workflow)))
}

async fn close_poll(
    spawner: &SessionSpawner,
    user_id: &str,
    poll_run_id: Uuid,
    save: bool,
) -> Result<Response, SessionError> {
    let session = spawner.get(user_id).await?;
    let mut session = session.lock().await;
    let log_id = session.close_poll(poll_run_id, save)?;
    Ok(Response::PollClosed {
        poll_run_id,
        log_id,
    })
}

async fn get_poll_log(
    spawner: &SessionSpawner,
    user_id: &str,
    poll_name: &str,
    max_rows: Option<usize>,
) -> Result<Response, SessionError> {
    let session = spawner.get(user_id).await?;
    let session = session.lock().await;
    let log = session.get_poll_log(poll_name, max_rows)?;
    Ok(Response::PollLog(log.iter().map(PollLogEntry::from).collect()))
}
