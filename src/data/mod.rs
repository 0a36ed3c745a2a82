pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde_json::Value;

use crate::crypto::{CryptoError, EncryptionKey, EncryptionProvider, PasswordOrKey};

use self::sqlite::SqliteProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataCategory {
    Config,
    ActivePoll,
}

impl FromStr for DataCategory {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONFIG" => Ok(Self::Config),
            "ACTIVE_POLL" => Ok(Self::ActivePoll),
            _ => Err(anyhow!("Unknown data category: {}", s)),
        }
    }
}

impl DataCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataCategory::Config => "CONFIG",
            DataCategory::ActivePoll => "ACTIVE_POLL",
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decrypted row of a user's poll log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub id: i64,
    pub poll_ts: DateTime<Utc>,
    pub log: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCorruptionKind {
    /// The lock could not be written for a new user.
    LockWriteFailure,
    /// The lock is unreadable or was issued for a different user id.
    IncorrectLock,
    /// Config or log data exist but the lock is gone.
    UserDataNoLock,
}

impl DataCorruptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataCorruptionKind::LockWriteFailure => "LOCK_WRITE_FAILURE",
            DataCorruptionKind::IncorrectLock => "INCORRECT_LOCK",
            DataCorruptionKind::UserDataNoLock => "USER_DATA_NO_LOCK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("data corruption for user '{user_id}': {}", kind.as_str())]
pub struct DataCorruptionError {
    pub kind: DataCorruptionKind,
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("data provider '{0}' is not supported")]
    ProviderNotFound(String),
    #[error("invalid data provider params: {0}")]
    InvalidParams(String),
    #[error("invalid user id '{0}'")]
    InvalidUserId(String),
    #[error("incorrect password or key")]
    IncorrectPasswordKey,
    #[error("no lock found for this user, a password must be provided")]
    PasswordRequired,
    #[error(transparent)]
    Corruption(#[from] DataCorruptionError),
    #[error("log record {0} not found")]
    LogNotFound(i64),
    #[error("stored data is not valid utf-8")]
    Encoding,
    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProviderNotFound(_) => "DATA_PROVIDER_NOT_FOUND",
            Self::InvalidParams(_) => "DATA_INVALID_PARAMS",
            Self::InvalidUserId(_) => "DATA_INVALID_USER_ID",
            Self::IncorrectPasswordKey => "INCORRECT_PASSWORD_OR_KEY",
            Self::PasswordRequired => "PASSWORD_REQUIRED",
            Self::Corruption(_) => "DATA_CORRUPTION",
            Self::LogNotFound(_) => "LOG_NOT_FOUND",
            Self::Encoding | Self::Crypto(_) | Self::Storage(_) | Self::Io(_) => "DATA_STORAGE_ERROR",
        }
    }

    pub(crate) fn corruption(kind: DataCorruptionKind, user_id: &str) -> DataError {
        DataError::Corruption(DataCorruptionError {
            kind,
            user_id: user_id.to_owned(),
        })
    }
}

/// A storage backend holding every user's lock, encrypted user data and poll log.
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens the user's data, creating a lock for a previously unknown user.
    fn get_connection(
        &self,
        user_id: &str,
        password_or_key: PasswordOrKey,
    ) -> Result<Box<dyn DataConnection>, DataError>;

    /// Whether any config or log data (or data of the given category) exists for the user.
    fn check_user_data_exist(
        &self,
        user_id: &str,
        category: Option<DataCategory>,
    ) -> Result<bool, DataError>;

    fn check_lock_exist(&self, user_id: &str) -> Result<bool, DataError> {
        Ok(self.get_lock(user_id)?.is_some())
    }

    fn get_lock(&self, user_id: &str) -> Result<Option<Vec<u8>>, DataError>;

    fn save_lock(&self, user_id: &str, lock: &[u8]) -> Result<(), DataError>;

    /// Ids of all users that have a lock.
    fn get_user_list(&self) -> Result<Vec<String>, DataError>;
}

/// A user's unlocked data. Everything is encrypted with the connection's key.
pub trait DataConnection: Send {
    fn user_id(&self) -> &str;

    fn key(&self) -> &EncryptionKey;

    fn store_user_data(&self, data: &str, category: DataCategory) -> Result<(), DataError>;

    fn get_user_data(&self, category: DataCategory) -> Result<Option<String>, DataError>;

    fn append_log(
        &self,
        poll_code: &str,
        poll_ts: DateTime<Utc>,
        log: &str,
    ) -> Result<i64, DataError>;

    /// Returns `false` if no row with this id exists.
    fn update_log(
        &self,
        id: i64,
        poll_ts: Option<DateTime<Utc>>,
        log: Option<&str>,
    ) -> Result<bool, DataError>;

    fn get_log(&self, id: i64) -> Result<LogRecord, DataError>;

    /// Rows in id order. Rows that fail to decrypt are skipped.
    fn get_logs(&self, ids: &[i64]) -> Result<Vec<LogRecord>, DataError>;

    fn get_all_logs(&self) -> Result<Vec<LogRecord>, DataError>;

    /// Most recent first. Rows that fail to decrypt are skipped.
    fn get_poll_logs(
        &self,
        poll_code: &str,
        date_from: Option<DateTime<Utc>>,
        date_to: Option<DateTime<Utc>>,
        max_rows: Option<usize>,
    ) -> Result<Vec<LogRecord>, DataError>;

    fn get_last_n_logs(&self, poll_code: &str, count: usize) -> Result<Vec<LogRecord>, DataError> {
        self.get_poll_logs(poll_code, None, None, Some(count))
    }

    fn get_last_logs(
        &self,
        poll_code: &str,
        date_from: DateTime<Utc>,
        max_rows: usize,
    ) -> Result<Vec<LogRecord>, DataError> {
        self.get_poll_logs(poll_code, Some(date_from), None, Some(max_rows))
    }
}

/// Resolves the encryption for a user from their lock, or creates the lock for a new user.
///
/// The lock is the user id encrypted with the user's key, so opening it with the user id
/// as control message verifies the password or key.
pub fn open_encryption<P: DataProvider + ?Sized>(
    provider: &P,
    user_id: &str,
    password_or_key: PasswordOrKey,
    iterations: u32,
) -> Result<EncryptionProvider, DataError> {
    let lock = match provider.get_lock(user_id)? {
        Some(lock) => lock,
        None => return create_lock(provider, user_id, password_or_key, iterations),
    };

    EncryptionProvider::from_token(password_or_key, &lock, Some(user_id.as_bytes())).map_err(
        |err| match err {
            CryptoError::InvalidToken | CryptoError::InvalidKey => DataError::IncorrectPasswordKey,
            CryptoError::MalformedToken
            | CryptoError::ControlMismatch
            | CryptoError::SaltIterationMismatch => {
                error!("Lock of user {} is corrupted: {}", user_id, err);
                DataError::corruption(DataCorruptionKind::IncorrectLock, user_id)
            }
            other => DataError::Crypto(other),
        },
    )
}

fn create_lock<P: DataProvider + ?Sized>(
    provider: &P,
    user_id: &str,
    password_or_key: PasswordOrKey,
    iterations: u32,
) -> Result<EncryptionProvider, DataError> {
    if provider.check_user_data_exist(user_id, None)? {
        error!("User {} has stored data but no lock", user_id);
        return Err(DataError::corruption(
            DataCorruptionKind::UserDataNoLock,
            user_id,
        ));
    }

    let password = match password_or_key {
        PasswordOrKey::Password(password) => password,
        PasswordOrKey::Key(_) => return Err(DataError::PasswordRequired),
    };

    let encryption = EncryptionProvider::new(password, iterations)?;
    let lock = encryption.encrypt(user_id.as_bytes())?;
    provider
        .save_lock(user_id, lock.as_bytes())
        .map_err(|err| {
            error!("Failed to write lock for user {}: {}", user_id, err);
            DataError::corruption(DataCorruptionKind::LockWriteFailure, user_id)
        })?;

    info!("Created lock for new user {}", user_id);
    Ok(encryption)
}

type ValidateParams = fn(&Value) -> Result<(), DataError>;
type CreateProvider = fn(Value) -> Result<Arc<dyn DataProvider>, DataError>;

struct ProviderEntry {
    name: &'static str,
    validate: ValidateParams,
    create: CreateProvider,
}

/// The supported storage backends, by name.
pub struct ProviderRegistry {
    providers: Vec<ProviderEntry>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = ProviderRegistry::empty();
        registry.register(
            sqlite::PROVIDER_NAME,
            SqliteProvider::validate_params,
            SqliteProvider::from_params,
        );
        registry
    }
}

impl ProviderRegistry {
    pub fn empty() -> ProviderRegistry {
        ProviderRegistry { providers: vec![] }
    }

    pub fn register(&mut self, name: &'static str, validate: ValidateParams, create: CreateProvider) {
        self.providers.retain(|entry| entry.name != name);
        self.providers.push(ProviderEntry {
            name,
            validate,
            create,
        });
    }

    pub fn supported_providers(&self) -> Vec<&'static str> {
        self.providers.iter().map(|entry| entry.name).collect()
    }

    fn entry(&self, name: &str) -> Result<&ProviderEntry, DataError> {
        self.providers
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| DataError::ProviderNotFound(name.to_owned()))
    }

    pub fn validate_params(&self, name: &str, params: &Value) -> Result<(), DataError> {
        (self.entry(name)?.validate)(params)
    }

    pub fn get_data_provider(
        &self,
        name: &str,
        params: Value,
    ) -> Result<Arc<dyn DataProvider>, DataError> {
        let provider = (self.entry(name)?.create)(params)?;
        debug!("Created data provider {}", provider.name());
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DataCategory, DataError, ProviderRegistry};

    #[test]
    fn category_names() {
        assert_eq!("config".parse::<DataCategory>().unwrap(), DataCategory::Config);
        assert_eq!("ACTIVE_POLL".parse::<DataCategory>().unwrap(), DataCategory::ActivePoll);
        assert_eq!(DataCategory::ActivePoll.to_string(), "ACTIVE_POLL");
        assert!("reports".parse::<DataCategory>().is_err());
    }

    #[test]
    fn registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ProviderRegistry::default();
        assert_eq!(registry.supported_providers(), vec!["sqlite"]);

        let params = json!({ "base_path": dir.path() });
        assert!(registry.validate_params("sqlite", &params).is_ok());
        assert!(matches!(
            registry.validate_params("sqlite", &json!({ "base_path_misspelled": "test" })),
            Err(DataError::InvalidParams(_))
        ));
        assert!(matches!(
            registry.validate_params("sqlite", &json!({ "base_path": dir.path().join("missing") })),
            Err(DataError::InvalidParams(_))
        ));
        assert!(matches!(
            registry.validate_params("non_existent_provider", &params),
            Err(DataError::ProviderNotFound(_))
        ));

        let provider = registry.get_data_provider("sqlite", params).unwrap();
        assert_eq!(provider.name(), "sqlite");
        assert!(matches!(
            registry.get_data_provider("non_existent_provider", json!({})),
            Err(DataError::ProviderNotFound(_))
        ));
        assert!(ProviderRegistry::empty().supported_providers().is_empty());
    }
}
