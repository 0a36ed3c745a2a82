use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::runtime::Handle;
use uuid::Uuid;

use super::notification::{Notification, Notifier, PollDelaySchema};

/// Work to do once a delayed question may be answered again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedJob {
    pub user_id: String,
    pub poll_run_id: Uuid,
}

pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, run_at: DateTime<Utc>, job: DelayedJob);
}

/// Runs delayed jobs as sleeping tasks on the current tokio runtime and announces
/// them with a `PollDelayPassed` notification.
pub struct TokioScheduler {
    notifier: Notifier,
}

impl TokioScheduler {
    pub fn new(notifier: Notifier) -> TokioScheduler {
        TokioScheduler { notifier }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, run_at: DateTime<Utc>, job: DelayedJob) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                warn!(
                    "Cannot schedule wake-up of poll run {} outside a runtime: {}",
                    job.poll_run_id, err
                );
                return;
            }
        };
        let wait = (run_at - Utc::now()).to_std().unwrap_or_default();
        let notifier = self.notifier.clone();
        handle.spawn(async move {
            tokio::time::sleep(wait).await;
            debug!("Delay of poll run {} for user {} passed", job.poll_run_id, job.user_id);
            notifier.notify(Notification::PollDelayPassed(PollDelaySchema {
                user_id: job.user_id,
                poll_run_id: job.poll_run_id,
            }));
        });
    }
}
