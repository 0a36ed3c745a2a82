use itertools::Itertools;

use crate::response::{PollWorkflowState, Response};

use super::command::Command;

pub fn render_response(response: &Response) -> String {
    match response {
        Response::Session(session) => match &session.key {
            Some(key) => format!(
                "User {} is {}. Key: {}",
                session.user_id, session.user_status, key
            ),
            None => format!("User {} is {}.", session.user_id, session.user_status),
        },
        Response::Polls(polls) if polls.is_empty() => "No polls configured.".to_owned(),
        Response::Polls(polls) => polls
            .iter()
            .map(|poll| match &poll.description {
                Some(description) => format!("{}: {}", poll.poll_name, description),
                None => poll.poll_name.clone(),
            })
            .join("\n"),
        Response::PollWorkflow(state) => render_workflow(state),
        Response::PollClosed {
            poll_run_id,
            log_id: Some(log_id),
        } => format!("Poll run {} saved as log {}.", poll_run_id, log_id),
        Response::PollClosed { poll_run_id, .. } => format!("Poll run {} discarded.", poll_run_id),
        Response::PollLog(entries) if entries.is_empty() => "Nothing logged yet.".to_owned(),
        Response::PollLog(entries) => entries
            .iter()
            .map(|entry| {
                format!(
                    "{} {}",
                    entry.poll_ts.format("%Y-%m-%d %H:%M"),
                    entry.answers.join(" | ")
                )
            })
            .join("\n"),
        Response::Reply(text) => text.clone(),
        Response::SendHelp => Command::descriptions(),
        Response::Error { code, message, .. } => format!("Error [{}]: {}", code, message),
    }
}

fn render_workflow(state: &PollWorkflowState) -> String {
    let mut lines = vec![format!("Run {}", state.poll_run_id)];
    if !state.answers.is_empty() {
        lines.push(format!("Answers: {}", state.answers.join(" | ")));
    }
    if state.completed {
        lines.push("Completed. Close the run to save it.".to_owned());
        return lines.join("\n");
    }
    if let Some(delay) = &state.delayed_for {
        lines.push(format!("Delayed, ask again in {}.", delay));
    }
    if let Some(question) = &state.current_question {
        lines.push(format!("{}. {}", state.current_question_index + 1, question));
    }
    if let Some(description) = &state.current_question_description {
        lines.push(description.clone());
    }
    if let Some(options) = &state.current_question_select_list {
        lines.push(
            options
                .iter()
                .map(|option| format!("[{}] {}", option.value, option.label))
                .join("  "),
        );
    }
    if let Some(hint) = &state.current_question_value_hint {
        lines.push(format!("Hint: {}", hint));
    }
    lines.join("\n")
}
