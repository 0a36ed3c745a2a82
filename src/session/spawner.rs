use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use super::{Notification, SessionContext, SessionError, UserSession, UserSessionStatus};
use crate::data::{DataCorruptionKind, DataError, DataProvider};

pub type SharedSession = Arc<Mutex<UserSession>>;

/// One session per user id for the whole process.
pub struct SessionSpawner {
    context: SessionContext,
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl SessionSpawner {
    pub fn new(context: SessionContext) -> SessionSpawner {
        SessionSpawner {
            context,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// The session of the user, loaded on first use.
    pub async fn get(&self, user_id: &str) -> Result<SharedSession, SessionError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(user_id) {
            return Ok(session.clone());
        }
        let session = Arc::new(Mutex::new(self.load_session(user_id).await?));
        sessions.insert(user_id.to_owned(), session.clone());
        Ok(session)
    }

    async fn load_session(&self, user_id: &str) -> Result<UserSession, SessionError> {
        debug!("Loading session of user {}", user_id);
        let provider = self.context.data_provider.clone();
        let owned_id = user_id.to_owned();
        let status = tokio::task::spawn_blocking(move || stored_status(provider.as_ref(), &owned_id))
            .await
            .map_err(|err| SessionError::Internal(format!("load task failed: {}", err)))??;
        Ok(UserSession::new(self.context.clone(), user_id, status))
    }

    /// Loads a session for every user known to storage and announces each of them.
    /// Users whose data can't be loaded are skipped. Returns the number loaded.
    pub async fn init_sessions(&self) -> Result<usize, SessionError> {
        let user_ids = self.context.data_provider.get_user_list()?;
        let mut sessions = self.sessions.lock().await;
        let mut loaded = 0;
        for user_id in user_ids {
            if sessions.contains_key(&user_id) {
                continue;
            }
            let session = match self.load_session(&user_id).await {
                Ok(session) => session,
                Err(err) => {
                    warn!("Failed to load session of user {}, skipping: {}", user_id, err);
                    continue;
                }
            };
            self.context
                .notifier
                .notify(Notification::SessionUpdate(session.schema()));
            sessions.insert(user_id, Arc::new(Mutex::new(session)));
            loaded += 1;
        }
        info!("Loaded {} sessions", loaded);
        Ok(loaded)
    }

    /// Closes every session, persisting their data.
    pub async fn close(&self) {
        let sessions: Vec<SharedSession> = self.sessions.lock().await.values().cloned().collect();
        for session in sessions {
            let mut session = session.lock().await;
            if let Err(err) = session.close() {
                error!("Failed to close session of user {}: {}", session.user_id(), err);
            }
        }
    }
}

fn stored_status(provider: &dyn DataProvider, user_id: &str) -> Result<UserSessionStatus, SessionError> {
    let lock_exists = provider.check_lock_exist(user_id)?;
    if !lock_exists && provider.check_user_data_exist(user_id, None)? {
        error!("User {} has stored data but no lock", user_id);
        return Err(DataError::corruption(DataCorruptionKind::UserDataNoLock, user_id).into());
    }
    Ok(if lock_exists {
        UserSessionStatus::Locked
    } else {
        UserSessionStatus::New
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use super::SessionSpawner;
    use crate::crypto::PasswordOrKey;
    use crate::session::tests::test_context;
    use crate::session::{Notification, UserSessionStatus};
    use crate::user::tests::user_json;

    #[tokio::test]
    async fn get_is_idempotent() {
        let test = test_context();
        let spawner = SessionSpawner::new(test.context.clone());
        let first = spawner.get("123").await.unwrap();
        let second = spawner.get("123").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.lock().await.status(), UserSessionStatus::New);

        let other = spawner.get("456").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(
            spawner.get("../etc").await.err().map(|err| err.code()),
            Some("DATA_INVALID_USER_ID")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_gets_share_one_session() {
        let test = test_context();
        let spawner = Arc::new(SessionSpawner::new(test.context.clone()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let spawner = spawner.clone();
                tokio::spawn(async move { spawner.get("123").await.unwrap() })
            })
            .collect();
        let mut sessions = vec![];
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }
        assert!(sessions.iter().all(|session| Arc::ptr_eq(session, &sessions[0])));
    }

    #[tokio::test]
    async fn init_sessions_announces_known_users() {
        let mut test = test_context();
        {
            let spawner = SessionSpawner::new(test.context.clone());
            for user_id in ["123", "456"] {
                let session = spawner.get(user_id).await.unwrap();
                session
                    .lock()
                    .await
                    .unlock(PasswordOrKey::from("secret"))
                    .await
                    .unwrap();
            }
            spawner
                .get("123")
                .await
                .unwrap()
                .lock()
                .await
                .set_config(&user_json("123"))
                .unwrap();
            spawner.close().await;
        }
        while test.notifications.try_recv().is_ok() {}

        let spawner = SessionSpawner::new(test.context.clone());
        assert_eq!(spawner.init_sessions().await.unwrap(), 2);
        let mut announced = vec![];
        while let Ok(Notification::SessionUpdate(schema)) = test.notifications.try_recv() {
            assert_eq!(schema.user_status, UserSessionStatus::Locked);
            assert!(schema.key.is_none());
            announced.push(schema.user_id);
        }
        announced.sort();
        assert_eq!(announced, vec!["123", "456"]);

        let session = spawner.get("123").await.unwrap();
        let mut session = session.lock().await;
        session.unlock(PasswordOrKey::from("secret")).await.unwrap();
        assert_eq!(session.status(), UserSessionStatus::Configured);
    }

    #[tokio::test]
    async fn data_without_lock_is_corruption() {
        let test = test_context();
        {
            let spawner = SessionSpawner::new(test.context.clone());
            let session = spawner.get("123").await.unwrap();
            let mut session = session.lock().await;
            session.unlock(PasswordOrKey::from("secret")).await.unwrap();
            session.set_config(&user_json("123")).unwrap();
            session.close().unwrap();
        }
        fs::remove_file(test.dir.path().join("123").join("lock")).unwrap();

        let spawner = SessionSpawner::new(test.context.clone());
        let err = spawner.get("123").await.err().unwrap();
        assert_eq!(err.code(), "DATA_CORRUPTION");
        assert_eq!(spawner.init_sessions().await.unwrap(), 0);
    }
}
