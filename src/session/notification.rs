use log::warn;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use super::status::UserSessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    SessionUpdate = 103,
    PollDelayPassed = 104,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSessionSchema {
    pub user_id: String,
    pub user_status: UserSessionStatus,
    /// The unlocked key, so other clients of the user can unlock without the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollDelaySchema {
    pub user_id: String,
    pub poll_run_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    SessionUpdate(UserSessionSchema),
    PollDelayPassed(PollDelaySchema),
}

impl Notification {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            Notification::SessionUpdate(_) => NotificationType::SessionUpdate,
            Notification::PollDelayPassed(_) => NotificationType::PollDelayPassed,
        }
    }

    /// The user this notification is about.
    pub fn target(&self) -> &str {
        match self {
            Notification::SessionUpdate(data) => &data.user_id,
            Notification::PollDelayPassed(data) => &data.user_id,
        }
    }

    pub fn to_json(&self) -> String {
        let data = match self {
            Notification::SessionUpdate(data) => serde_json::to_value(data),
            Notification::PollDelayPassed(data) => serde_json::to_value(data),
        }
        .unwrap_or_default();
        json!({
            "notification": self.notification_type() as u16,
            "data": data,
        })
        .to_string()
    }
}

/// Fire-and-forget hand-off of notifications to whoever drains the receiver.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Notifier, UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Notifier { sender }, receiver)
    }

    pub fn notify(&self, notification: Notification) {
        if let Err(err) = self.sender.send(notification) {
            warn!(
                "Dropping {:?} notification for user {}, nobody is listening",
                err.0.notification_type(),
                err.0.target()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{Notification, Notifier, PollDelaySchema, UserSessionSchema};
    use crate::session::UserSessionStatus;

    #[test]
    fn json_format() {
        let notification = Notification::SessionUpdate(UserSessionSchema {
            user_id: "123".to_owned(),
            user_status: UserSessionStatus::Locked,
            key: None,
        });
        assert_eq!(
            notification.to_json(),
            r#"{"data":{"user_id":"123","user_status":10},"notification":103}"#
        );

        let run_id = Uuid::new_v4();
        let notification = Notification::PollDelayPassed(PollDelaySchema {
            user_id: "123".to_owned(),
            poll_run_id: run_id,
        });
        assert!(notification.to_json().contains(&run_id.to_string()));
        assert_eq!(notification.target(), "123");
    }

    #[test]
    fn delivers_in_order_and_tolerates_closed_receiver() {
        let (notifier, mut receiver) = Notifier::channel();
        for user_id in ["a", "b"] {
            notifier.notify(Notification::SessionUpdate(UserSessionSchema {
                user_id: user_id.to_owned(),
                user_status: UserSessionStatus::New,
                key: None,
            }));
        }
        assert_eq!(receiver.try_recv().unwrap().target(), "a");
        assert_eq!(receiver.try_recv().unwrap().target(), "b");

        drop(receiver);
        notifier.notify(Notification::PollDelayPassed(PollDelaySchema {
            user_id: "a".to_owned(),
            poll_run_id: Uuid::new_v4(),
        }));
    }
}
