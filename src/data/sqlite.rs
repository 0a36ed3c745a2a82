//! Per-user storage on the local filesystem: `<base_path>/<user_id>/lock` and an SQLite
//! database `<base_path>/<user_id>/data.db` holding user data and the poll log.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, warn};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    open_encryption, DataCategory, DataConnection, DataError, DataProvider, LogRecord,
};
use crate::crypto::{EncryptionKey, EncryptionProvider, PasswordOrKey, ITERATIONS};

pub const PROVIDER_NAME: &str = "sqlite";

const LOCK_FILE: &str = "lock";
const DATA_FILE: &str = "data.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_data (
    category TEXT PRIMARY KEY NOT NULL,
    data BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS poll_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    poll_code TEXT NOT NULL,
    poll_ts TEXT NOT NULL,
    log BLOB NOT NULL,
    created_ts TEXT NOT NULL,
    updated_ts TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS poll_log_code_ts ON poll_log (poll_code, poll_ts);
";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteProviderParams {
    pub base_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

impl SqliteProviderParams {
    pub fn from_value(params: Value) -> Result<SqliteProviderParams, DataError> {
        let params: SqliteProviderParams = serde_json::from_value(params)
            .map_err(|err| DataError::InvalidParams(err.to_string()))?;
        if !params.base_path.is_dir() {
            return Err(DataError::InvalidParams(format!(
                "base_path '{}' is not an existing directory",
                params.base_path.display()
            )));
        }
        if params.iterations == Some(0) {
            return Err(DataError::InvalidParams(
                "iterations must be at least 1".to_owned(),
            ));
        }
        Ok(params)
    }
}

pub struct SqliteProvider {
    params: SqliteProviderParams,
}

impl SqliteProvider {
    pub fn new(params: SqliteProviderParams) -> SqliteProvider {
        SqliteProvider { params }
    }

    pub fn validate_params(params: &Value) -> Result<(), DataError> {
        SqliteProviderParams::from_value(params.clone()).map(|_| ())
    }

    pub fn from_params(params: Value) -> Result<Arc<dyn DataProvider>, DataError> {
        let params = SqliteProviderParams::from_value(params)?;
        Ok(Arc::new(SqliteProvider::new(params)))
    }

    pub fn params(&self) -> &SqliteProviderParams {
        &self.params
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf, DataError> {
        let valid = !user_id.is_empty()
            && user_id
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(DataError::InvalidUserId(user_id.to_owned()));
        }
        Ok(self.params.base_path.join(user_id))
    }

    fn lock_path(&self, user_id: &str) -> Result<PathBuf, DataError> {
        Ok(self.user_dir(user_id)?.join(LOCK_FILE))
    }

    pub fn db_path(&self, user_id: &str) -> Result<PathBuf, DataError> {
        Ok(self.user_dir(user_id)?.join(DATA_FILE))
    }

    fn open_db(&self, user_id: &str) -> Result<Connection, DataError> {
        fs::create_dir_all(self.user_dir(user_id)?)?;
        let connection = Connection::open(self.db_path(user_id)?)?;
        connection.execute_batch(SCHEMA)?;
        Ok(connection)
    }
}

impl DataProvider for SqliteProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn get_connection(
        &self,
        user_id: &str,
        password_or_key: PasswordOrKey,
    ) -> Result<Box<dyn DataConnection>, DataError> {
        let iterations = self.params.iterations.unwrap_or(ITERATIONS);
        let encryption = open_encryption(self, user_id, password_or_key, iterations)?;
        let connection = self.open_db(user_id)?;
        debug!("Opened data connection for user {}", user_id);
        Ok(Box::new(SqliteConnection {
            user_id: user_id.to_owned(),
            encryption,
            connection,
        }))
    }

    fn check_user_data_exist(
        &self,
        user_id: &str,
        category: Option<DataCategory>,
    ) -> Result<bool, DataError> {
        let db_path = self.db_path(user_id)?;
        if !db_path.is_file() {
            return Ok(false);
        }
        let connection = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let has_user_data = table_exists(&connection, "user_data")?;

        let exists = match category {
            Some(category) => {
                has_user_data
                    && connection
                        .prepare("SELECT category FROM user_data WHERE category = ?1")?
                        .exists(params![category.as_str()])?
            }
            None => {
                (has_user_data
                    && connection
                        .prepare("SELECT category FROM user_data")?
                        .exists([])?)
                    || (table_exists(&connection, "poll_log")?
                        && connection.prepare("SELECT id FROM poll_log")?.exists([])?)
            }
        };
        Ok(exists)
    }

    fn get_lock(&self, user_id: &str) -> Result<Option<Vec<u8>>, DataError> {
        let lock_path = self.lock_path(user_id)?;
        if !lock_path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read(lock_path)?))
    }

    fn save_lock(&self, user_id: &str, lock: &[u8]) -> Result<(), DataError> {
        fs::create_dir_all(self.user_dir(user_id)?)?;
        fs::write(self.lock_path(user_id)?, lock)?;
        Ok(())
    }

    fn get_user_list(&self) -> Result<Vec<String>, DataError> {
        let mut users = vec![];
        for entry in fs::read_dir(&self.params.base_path)? {
            let path = entry?.path();
            if !has_lock(&path) {
                continue;
            }
            if let Some(user_id) = path.file_name().and_then(|name| name.to_str()) {
                users.push(user_id.to_owned());
            }
        }
        users.sort();
        Ok(users)
    }
}

fn table_exists(connection: &Connection, table: &str) -> Result<bool, DataError> {
    Ok(connection
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")?
        .exists(params![table])?)
}

fn has_lock(user_dir: &Path) -> bool {
    user_dir.is_dir() && user_dir.join(LOCK_FILE).is_file()
}

pub struct SqliteConnection {
    user_id: String,
    encryption: EncryptionProvider,
    connection: Connection,
}

impl SqliteConnection {
    fn decrypt(&self, data: &[u8]) -> Result<String, DataError> {
        let plain = self.encryption.decrypt(data)?;
        String::from_utf8(plain).map_err(|_| DataError::Encoding)
    }

    fn query_logs(
        &self,
        sql: &str,
        params: Vec<Box<dyn ToSql>>,
    ) -> Result<Vec<LogRecord>, DataError> {
        let mut statement = self.connection.prepare(sql)?;
        let rows = statement.query_map(params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, DateTime<Utc>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut records = vec![];
        for row in rows {
            let (id, poll_ts, data) = row?;
            match self.decrypt(&data) {
                Ok(log) => records.push(LogRecord { id, poll_ts, log }),
                Err(err) => warn!(
                    "Skipping log record {} of user {}: {}",
                    id, self.user_id, err
                ),
            }
        }
        Ok(records)
    }
}

impl DataConnection for SqliteConnection {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn key(&self) -> &EncryptionKey {
        self.encryption.key()
    }

    fn store_user_data(&self, data: &str, category: DataCategory) -> Result<(), DataError> {
        let encrypted = self.encryption.encrypt(data.as_bytes())?;
        self.connection.execute(
            "INSERT OR REPLACE INTO user_data (category, data) VALUES (?1, ?2)",
            params![category.as_str(), encrypted.as_bytes()],
        )?;
        Ok(())
    }

    fn get_user_data(&self, category: DataCategory) -> Result<Option<String>, DataError> {
        let data: Option<Vec<u8>> = self
            .connection
            .query_row(
                "SELECT data FROM user_data WHERE category = ?1",
                params![category.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|data| self.decrypt(&data)).transpose()
    }

    fn append_log(
        &self,
        poll_code: &str,
        poll_ts: DateTime<Utc>,
        log: &str,
    ) -> Result<i64, DataError> {
        let encrypted = self.encryption.encrypt(log.as_bytes())?;
        let now = Utc::now();
        self.connection.execute(
            "INSERT INTO poll_log (poll_code, poll_ts, log, created_ts, updated_ts) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![poll_code, poll_ts, encrypted.as_bytes(), now, now],
        )?;
        Ok(self.connection.last_insert_rowid())
    }

    fn update_log(
        &self,
        id: i64,
        poll_ts: Option<DateTime<Utc>>,
        log: Option<&str>,
    ) -> Result<bool, DataError> {
        let mut assignments = vec!["updated_ts = ?"];
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(Utc::now())];
        if let Some(poll_ts) = poll_ts {
            assignments.push("poll_ts = ?");
            params.push(Box::new(poll_ts));
        }
        if let Some(log) = log {
            assignments.push("log = ?");
            params.push(Box::new(self.encryption.encrypt(log.as_bytes())?.into_bytes()));
        }
        params.push(Box::new(id));

        let sql = format!(
            "UPDATE poll_log SET {} WHERE id = ?",
            assignments.iter().join(", ")
        );
        let changed = self
            .connection
            .execute(&sql, params_from_iter(params.iter()))?;
        Ok(changed > 0)
    }

    fn get_log(&self, id: i64) -> Result<LogRecord, DataError> {
        let row: Option<(DateTime<Utc>, Vec<u8>)> = self
            .connection
            .query_row(
                "SELECT poll_ts, log FROM poll_log WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (poll_ts, data) = row.ok_or(DataError::LogNotFound(id))?;
        Ok(LogRecord {
            id,
            poll_ts,
            log: self.decrypt(&data)?,
        })
    }

    fn get_logs(&self, ids: &[i64]) -> Result<Vec<LogRecord>, DataError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let sql = format!(
            "SELECT id, poll_ts, log FROM poll_log WHERE id IN ({}) ORDER BY id",
            ids.iter().map(|_| "?").join(", ")
        );
        let params = ids
            .iter()
            .map(|id| Box::new(*id) as Box<dyn ToSql>)
            .collect();
        self.query_logs(&sql, params)
    }

    fn get_all_logs(&self) -> Result<Vec<LogRecord>, DataError> {
        self.query_logs("SELECT id, poll_ts, log FROM poll_log ORDER BY id", vec![])
    }

    fn get_poll_logs(
        &self,
        poll_code: &str,
        date_from: Option<DateTime<Utc>>,
        date_to: Option<DateTime<Utc>>,
        max_rows: Option<usize>,
    ) -> Result<Vec<LogRecord>, DataError> {
        let mut sql = String::from("SELECT id, poll_ts, log FROM poll_log WHERE poll_code = ?");
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(poll_code.to_owned())];
        if let Some(date_from) = date_from {
            sql.push_str(" AND poll_ts >= ?");
            params.push(Box::new(date_from));
        }
        if let Some(date_to) = date_to {
            sql.push_str(" AND poll_ts <= ?");
            params.push(Box::new(date_to));
        }
        sql.push_str(" ORDER BY poll_ts DESC, id DESC");
        if let Some(max_rows) = max_rows {
            sql.push_str(" LIMIT ?");
            params.push(Box::new(max_rows as i64));
        }
        self.query_logs(&sql, params)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rusqlite::{params, Connection};
    use tempfile::TempDir;

    use super::{SqliteProvider, SqliteProviderParams};
    use crate::crypto::{EncryptionProvider, PasswordOrKey};
    use crate::data::{DataCategory, DataCorruptionKind, DataError, DataProvider};

    fn test_provider(dir: &TempDir) -> SqliteProvider {
        SqliteProvider::new(SqliteProviderParams {
            base_path: dir.path().to_path_buf(),
            iterations: Some(1_000),
        })
    }

    fn corruption_kind(err: DataError) -> Option<DataCorruptionKind> {
        match err {
            DataError::Corruption(err) => Some(err.kind),
            _ => None,
        }
    }

    #[test]
    fn new_user_requires_password() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);
        let key = EncryptionProvider::new("other", 1_000).unwrap().key().clone();

        let err = provider
            .get_connection("123", PasswordOrKey::Key(key))
            .err()
            .unwrap();
        assert!(matches!(err, DataError::PasswordRequired));
        assert!(!provider.check_lock_exist("123").unwrap());

        provider.get_connection("123", "password".into()).unwrap();
        assert!(provider.check_lock_exist("123").unwrap());
        assert_eq!(provider.get_user_list().unwrap(), vec!["123".to_owned()]);
    }

    #[test]
    fn unlock_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);

        let first = provider.get_connection("123", "password".into()).unwrap();
        let second = provider.get_connection("123", "password".into()).unwrap();
        assert_eq!(first.key(), second.key());

        let by_key = provider
            .get_connection("123", first.key().clone().into())
            .unwrap();
        assert_eq!(by_key.key(), first.key());
        assert_eq!(by_key.user_id(), "123");
    }

    #[test]
    fn wrong_password_and_incorrect_lock() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);
        let conn = provider.get_connection("123", "password".into()).unwrap();

        let err = provider
            .get_connection("123", "wrong password".into())
            .err()
            .unwrap();
        assert!(matches!(err, DataError::IncorrectPasswordKey));

        let lock = provider.get_lock("123").unwrap().unwrap();
        let forged = EncryptionProvider::from_token(conn.key().clone(), &lock, None)
            .unwrap()
            .encrypt(b"wrong_user_id")
            .unwrap();
        provider.save_lock("123", forged.as_bytes()).unwrap();

        let err = provider
            .get_connection("123", conn.key().clone().into())
            .err()
            .unwrap();
        assert_eq!(corruption_kind(err), Some(DataCorruptionKind::IncorrectLock));

        provider.save_lock("123", b"garbage").unwrap();
        let err = provider
            .get_connection("123", "password".into())
            .err()
            .unwrap();
        assert_eq!(corruption_kind(err), Some(DataCorruptionKind::IncorrectLock));
    }

    #[test]
    fn data_without_lock_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);

        let conn = provider.get_connection("corrupt1", "pw".into()).unwrap();
        conn.store_user_data("test config", DataCategory::Config)
            .unwrap();
        assert!(provider
            .check_user_data_exist("corrupt1", Some(DataCategory::Config))
            .unwrap());
        assert!(!provider
            .check_user_data_exist("corrupt1", Some(DataCategory::ActivePoll))
            .unwrap());
        std::fs::remove_file(dir.path().join("corrupt1").join("lock")).unwrap();
        let err = provider
            .get_connection("corrupt1", "pw".into())
            .err()
            .unwrap();
        assert_eq!(corruption_kind(err), Some(DataCorruptionKind::UserDataNoLock));

        let conn = provider.get_connection("corrupt2", "pw".into()).unwrap();
        conn.append_log("poll", Utc::now(), "log").unwrap();
        std::fs::remove_file(dir.path().join("corrupt2").join("lock")).unwrap();
        let err = provider
            .get_connection("corrupt2", "pw".into())
            .err()
            .unwrap();
        assert_eq!(corruption_kind(err), Some(DataCorruptionKind::UserDataNoLock));
        assert!(provider.get_user_list().unwrap().is_empty());
    }

    #[test]
    fn existence_check_leaves_database_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);
        std::fs::create_dir_all(dir.path().join("u1")).unwrap();
        let db_path = provider.db_path("u1").unwrap();
        Connection::open(&db_path)
            .unwrap()
            .execute_batch("CREATE TABLE unrelated (id INTEGER)")
            .unwrap();

        assert!(!provider.check_user_data_exist("u1", None).unwrap());
        assert!(!provider
            .check_user_data_exist("u1", Some(DataCategory::Config))
            .unwrap());

        let raw = Connection::open(&db_path).unwrap();
        let tables: i64 = raw
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn user_data_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);
        let conn = provider.get_connection("u1", "pw1".into()).unwrap();

        assert_eq!(conn.get_user_data(DataCategory::Config).unwrap(), None);
        conn.store_user_data("cfgjson", DataCategory::Config).unwrap();
        assert_eq!(
            conn.get_user_data(DataCategory::Config).unwrap().as_deref(),
            Some("cfgjson")
        );
        conn.store_user_data("cfgjson2", DataCategory::Config).unwrap();
        assert_eq!(
            conn.get_user_data(DataCategory::Config).unwrap().as_deref(),
            Some("cfgjson2")
        );

        let raw = Connection::open(provider.db_path("u1").unwrap()).unwrap();
        let cell: Vec<u8> = raw
            .query_row(
                "SELECT data FROM user_data WHERE category = 'CONFIG'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(cell, b"cfgjson2");

        let reopened = provider.get_connection("u1", "pw1".into()).unwrap();
        assert_eq!(
            reopened.get_user_data(DataCategory::Config).unwrap().as_deref(),
            Some("cfgjson2")
        );
    }

    #[test]
    fn log_queries() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);
        let conn = provider.get_connection("u1", "pw".into()).unwrap();
        let now = Utc::now();

        let mut ids = vec![];
        for i in 1..=9 {
            let poll_ts = now - Duration::days(i - 1);
            ids.push(conn.append_log("poll1", poll_ts, &format!("row {}", i)).unwrap());
        }
        conn.append_log("poll2", now, "other poll").unwrap();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        let last = conn.get_last_n_logs("poll1", 5).unwrap();
        assert_eq!(last.len(), 5);
        assert_eq!(last[0].log, "row 1");
        assert!(last.windows(2).all(|pair| pair[0].poll_ts > pair[1].poll_ts));

        let by_ids = conn.get_logs(&ids[..5]).unwrap();
        assert_eq!(by_ids, last);

        let from = now - Duration::days(3) - Duration::minutes(1);
        let recent = conn.get_last_logs("poll1", from, 100).unwrap();
        assert_eq!(recent.len(), 4);
        let windowed = conn
            .get_poll_logs("poll1", Some(from), Some(now - Duration::days(1)), None)
            .unwrap();
        assert_eq!(
            windowed.iter().map(|r| r.log.as_str()).collect::<Vec<_>>(),
            vec!["row 2", "row 3", "row 4"]
        );

        assert_eq!(conn.get_all_logs().unwrap().len(), 10);
        assert_eq!(conn.get_log(ids[2]).unwrap().log, "row 3");
        assert!(matches!(conn.get_log(1000), Err(DataError::LogNotFound(1000))));
        assert!(conn.get_logs(&[]).unwrap().is_empty());
    }

    #[test]
    fn update_log() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);
        let conn = provider.get_connection("u1", "pw".into()).unwrap();
        let now = Utc::now();
        let id = conn.append_log("poll1", now, "first").unwrap();

        assert!(conn.update_log(id, None, Some("second")).unwrap());
        assert_eq!(conn.get_log(id).unwrap().log, "second");

        let earlier = now - Duration::days(2);
        assert!(conn.update_log(id, Some(earlier), None).unwrap());
        let record = conn.get_log(id).unwrap();
        assert_eq!(record.poll_ts, earlier);
        assert_eq!(record.log, "second");

        assert!(!conn.update_log(id + 1, None, Some("missing")).unwrap());
    }

    #[test]
    fn undecryptable_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);
        let conn = provider.get_connection("u1", "pw".into()).unwrap();
        let now = Utc::now();
        conn.append_log("poll1", now, "good").unwrap();

        let raw = Connection::open(provider.db_path("u1").unwrap()).unwrap();
        raw.execute(
            "INSERT INTO poll_log (poll_code, poll_ts, log, created_ts, updated_ts) VALUES (?1, ?2, ?3, ?4, ?4)",
            params!["poll1", now - Duration::hours(1), b"not a token".to_vec(), now],
        )
        .unwrap();

        let logs = conn.get_all_logs().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log, "good");
        assert_eq!(conn.get_last_n_logs("poll1", 5).unwrap().len(), 1);
        assert!(conn.get_log(2).is_err());
    }

    #[test]
    fn rejects_path_like_user_ids() {
        let dir = tempfile::tempdir().unwrap();
        let provider = test_provider(&dir);
        assert!(matches!(
            provider.get_connection("../escape", "pw".into()),
            Err(DataError::InvalidUserId(_))
        ));
    }
}
