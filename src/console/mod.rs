//! A line based front end: one command per line on stdin, replies on stdout.

pub mod command;
pub mod response_handling;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use self::command::Command;
use self::response_handling::render_response;
use crate::action::Action;
use crate::action_handling::perform_action;
use crate::config::AppConfig;
use crate::crypto::PasswordOrKey;
use crate::data::ProviderRegistry;
use crate::session::{Notification, Notifier, SessionContext, SessionSpawner};

#[tokio::main]
pub async fn run_console() -> Result<()> {
    pretty_env_logger::init();
    info!("Starting polldiary...");

    let config = AppConfig::from_env()?;
    config.prepare()?;
    let registry = ProviderRegistry::default();
    let data_provider = registry
        .get_data_provider(&config.data_provider, config.provider_params())
        .with_context(|| format!("While opening data provider {}", config.data_provider))?;

    let (notifier, notifications) = Notifier::channel();
    let spawner = Arc::new(SessionSpawner::new(SessionContext::new(
        data_provider,
        notifier,
    )));
    spawner
        .init_sessions()
        .await
        .context("While loading sessions")?;
    tokio::spawn(log_notifications(notifications));

    tokio::select! {
        result = read_commands(&spawner) => result?,
        result = tokio::signal::ctrl_c() => {
            result.context("While waiting for ctrl-c")?;
            info!("Interrupted");
        }
    }

    spawner.close().await;
    info!("Sessions closed, bye");
    Ok(())
}

async fn log_notifications(mut notifications: UnboundedReceiver<Notification>) {
    while let Some(notification) = notifications.recv().await {
        info!("Notification: {}", notification.to_json());
    }
}

async fn read_commands(spawner: &SessionSpawner) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("While reading a command")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        println!("{}", handle_command(spawner, line).await);
    }
    Ok(())
}

async fn handle_command(spawner: &SessionSpawner, line: &str) -> String {
    let action = line
        .parse::<Command>()
        .map(convert_command_to_action)
        .unwrap_or_else(|err| {
            warn!("Unparsable command: {}", err);
            Action::ErrorMessage(format!("Error: {}", err))
        });
    let response = perform_action(spawner, &action).await;
    render_response(&response)
}

fn convert_command_to_action(command: Command) -> Action {
    match command {
        Command::Help => Action::SendHelp,
        Command::Session { user_id } => Action::GetSession(user_id),
        Command::Unlock { user_id, password } => Action::UnlockSession {
            user_id,
            password_or_key: PasswordOrKey::from(password),
        },
        Command::UnlockKey { user_id, key } => Action::UnlockSession {
            user_id,
            password_or_key: PasswordOrKey::from(key),
        },
        Command::Lock { user_id } => Action::LockSession(user_id),
        Command::Config { user_id, config } => Action::SetConfig { user_id, config },
        Command::Polls { user_id } => Action::GetPolls(user_id),
        Command::Start { user_id, poll_name } => Action::StartPoll { user_id, poll_name },
        Command::Answer {
            user_id,
            poll_run_id,
            answer,
        } => Action::AddPollAnswer {
            user_id,
            poll_run_id,
            answer,
        },
        Command::Close {
            user_id,
            poll_run_id,
            save,
        } => Action::ClosePoll {
            user_id,
            poll_run_id,
            save,
        },
        Command::Log {
            user_id,
            max_rows,
            poll_name,
        } => Action::GetPollLog {
            user_id,
            poll_name,
            max_rows,
        },
    }
}
