use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

use crate::crypto::EncryptionKey;

const DESCRIPTIONS: &[(&str, &str)] = &[
    ("/help", "Display help text."),
    ("/session <user>", "Show the session status of a user."),
    ("/unlock <user> <password>", "Unlock a user, creating them if new."),
    ("/unlock_key <user> <key>", "Unlock a user with their key."),
    ("/lock <user>", "Save and lock a user's session."),
    ("/config <user> <json>", "Replace the user's config."),
    ("/polls <user>", "List the user's polls."),
    ("/start <user> <poll name>", "Start a poll."),
    ("/answer <user> <run id> <answer>", "Answer the current question of a poll run."),
    ("/close <user> <run id> [save|discard]", "Close a poll run, saving it by default."),
    ("/log <user> <rows|all> <poll name>", "Show saved runs of a poll."),
];

#[derive(Debug, PartialEq)]
pub enum Command {
    Help,
    Session { user_id: String },
    Unlock { user_id: String, password: String },
    UnlockKey { user_id: String, key: EncryptionKey },
    Lock { user_id: String },
    Config { user_id: String, config: String },
    Polls { user_id: String },
    Start { user_id: String, poll_name: String },
    Answer { user_id: String, poll_run_id: Uuid, answer: String },
    Close { user_id: String, poll_run_id: Uuid, save: bool },
    Log { user_id: String, max_rows: Option<usize>, poll_name: String },
}

impl Command {
    pub fn descriptions() -> String {
        let mut text = "These commands are supported:".to_owned();
        for (usage, description) in DESCRIPTIONS {
            text.push_str(&format!("\n{} - {}", usage, description));
        }
        text
    }
}

/// Splits off the next whitespace separated word.
fn next_word<'a>(rest: &mut &'a str, name: &str) -> Result<&'a str> {
    let trimmed = rest.trim_start();
    if trimmed.is_empty() {
        return Err(anyhow!("Missing argument <{}>.", name));
    }
    let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
    let (word, remainder) = trimmed.split_at(end);
    *rest = remainder;
    Ok(word)
}

/// Everything that is left, which may contain spaces.
fn remainder(rest: &str, name: &str) -> Result<String> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(anyhow!("Missing argument <{}>.", name));
    }
    Ok(rest.to_owned())
}

fn parse_run_id(word: &str) -> Result<Uuid> {
    word.parse().with_context(|| format!("Invalid poll run id '{}'.", word))
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s.trim();
        let name = next_word(&mut rest, "command")?;
        let command = match name {
            "/help" => Command::Help,
            "/session" => Command::Session {
                user_id: next_word(&mut rest, "user")?.to_owned(),
            },
            "/unlock" => Command::Unlock {
                user_id: next_word(&mut rest, "user")?.to_owned(),
                password: remainder(rest, "password")?,
            },
            "/unlock_key" => Command::UnlockKey {
                user_id: next_word(&mut rest, "user")?.to_owned(),
                key: next_word(&mut rest, "key")?
                    .parse()
                    .map_err(|_| anyhow!("Invalid key."))?,
            },
            "/lock" => Command::Lock {
                user_id: next_word(&mut rest, "user")?.to_owned(),
            },
            "/config" => Command::Config {
                user_id: next_word(&mut rest, "user")?.to_owned(),
                config: remainder(rest, "json")?,
            },
            "/polls" => Command::Polls {
                user_id: next_word(&mut rest, "user")?.to_owned(),
            },
            "/start" => Command::Start {
                user_id: next_word(&mut rest, "user")?.to_owned(),
                poll_name: remainder(rest, "poll name")?,
            },
            "/answer" => Command::Answer {
                user_id: next_word(&mut rest, "user")?.to_owned(),
                poll_run_id: parse_run_id(next_word(&mut rest, "run id")?)?,
                answer: remainder(rest, "answer")?,
            },
            "/close" => {
                let user_id = next_word(&mut rest, "user")?.to_owned();
                let poll_run_id = parse_run_id(next_word(&mut rest, "run id")?)?;
                let save = match rest.trim() {
                    "" | "save" => true,
                    "discard" => false,
                    other => return Err(anyhow!("Expected save or discard, got '{}'.", other)),
                };
                Command::Close {
                    user_id,
                    poll_run_id,
                    save,
                }
            }
            "/log" => {
                let user_id = next_word(&mut rest, "user")?.to_owned();
                let max_rows = match next_word(&mut rest, "rows")? {
                    "all" => None,
                    rows => Some(
                        rows.parse()
                            .with_context(|| format!("Invalid row count '{}'.", rows))?,
                    ),
                };
                Command::Log {
                    user_id,
                    max_rows,
                    poll_name: remainder(rest, "poll name")?,
                }
            }
            other => return Err(anyhow!("Unknown command {}. Try /help.", other)),
        };
        Ok(command)
    }
}
