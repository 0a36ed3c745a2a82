//! Password based symmetric encryption.
//!
//! Tokens are self describing: `base64url(salt[16] | iterations[4, BE] | nonce[12] | ciphertext)`,
//! so anyone holding the password can decrypt a token produced by another provider instance.
//! A provider built from a raw key can only decrypt tokens carrying its own salt and
//! iteration count.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{rand_core::RngCore, Aead, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

pub const ITERATIONS: u32 = 390_000;

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const ITERATIONS_LEN: usize = 4;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = SALT_LEN + ITERATIONS_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Authentication failed: wrong password or key, or a tampered token.
    #[error("invalid token or wrong password/key")]
    InvalidToken,
    #[error("token is malformed")]
    MalformedToken,
    #[error("token salt/iterations differ from this key and no password is available to re-derive it")]
    SaltIterationMismatch,
    #[error("control message mismatch")]
    ControlMismatch,
    #[error("a raw key can only be used together with an init token")]
    KeyWithoutToken,
    #[error("invalid encryption key")]
    InvalidKey,
    #[error("encryption failed")]
    EncryptionFailed,
}

/// A derived 256 bit key. Displayed and parsed as url-safe base64.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.0)
    }
}

impl FromStr for EncryptionKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE
            .decode(s.trim().as_bytes())
            .map_err(|_| CryptoError::InvalidKey)?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(EncryptionKey(key))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// What a user unlocks their data with.
#[derive(Clone)]
pub enum PasswordOrKey {
    Password(String),
    Key(EncryptionKey),
}

impl PasswordOrKey {
    pub fn is_password(&self) -> bool {
        matches!(self, PasswordOrKey::Password(_))
    }
}

impl fmt::Debug for PasswordOrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordOrKey::Password(_) => f.write_str("Password(..)"),
            PasswordOrKey::Key(_) => f.write_str("Key(..)"),
        }
    }
}

impl From<&str> for PasswordOrKey {
    fn from(password: &str) -> Self {
        PasswordOrKey::Password(password.to_owned())
    }
}

impl From<String> for PasswordOrKey {
    fn from(password: String) -> Self {
        PasswordOrKey::Password(password)
    }
}

impl From<EncryptionKey> for PasswordOrKey {
    fn from(key: EncryptionKey) -> Self {
        PasswordOrKey::Key(key)
    }
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> EncryptionKey {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    EncryptionKey(key)
}

struct TokenParts {
    salt: [u8; SALT_LEN],
    iterations: u32,
    payload: Vec<u8>,
}

fn split_token(token: &[u8]) -> Result<TokenParts, CryptoError> {
    let decoded = URL_SAFE
        .decode(token)
        .map_err(|_| CryptoError::MalformedToken)?;
    if decoded.len() <= HEADER_LEN + NONCE_LEN {
        return Err(CryptoError::MalformedToken);
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&decoded[..SALT_LEN]);
    let mut iterations = [0u8; ITERATIONS_LEN];
    iterations.copy_from_slice(&decoded[SALT_LEN..HEADER_LEN]);
    let iterations = u32::from_be_bytes(iterations);
    if iterations == 0 {
        return Err(CryptoError::MalformedToken);
    }

    Ok(TokenParts {
        salt,
        iterations,
        payload: decoded[HEADER_LEN..].to_vec(),
    })
}

pub struct EncryptionProvider {
    password: Option<String>,
    key: EncryptionKey,
    salt: [u8; SALT_LEN],
    iterations: u32,
}

impl EncryptionProvider {
    /// Derives a fresh key from a password with a new random salt.
    /// Raw keys are rejected since they carry no salt/iterations of their own.
    pub fn new(
        secret: impl Into<PasswordOrKey>,
        iterations: u32,
    ) -> Result<EncryptionProvider, CryptoError> {
        let password = match secret.into() {
            PasswordOrKey::Password(password) => password,
            PasswordOrKey::Key(_) => return Err(CryptoError::KeyWithoutToken),
        };
        if iterations == 0 {
            return Err(CryptoError::InvalidKey);
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(&password, &salt, iterations);

        Ok(EncryptionProvider {
            password: Some(password),
            key,
            salt,
            iterations,
        })
    }

    /// Adopts the salt and iteration count embedded in `init_token`.
    ///
    /// With a `control_message` the token is decrypted and compared against it, which
    /// tells a wrong password ([`CryptoError::InvalidToken`]) apart from a token that
    /// belongs to something else ([`CryptoError::ControlMismatch`]).
    pub fn from_token(
        secret: impl Into<PasswordOrKey>,
        init_token: &[u8],
        control_message: Option<&[u8]>,
    ) -> Result<EncryptionProvider, CryptoError> {
        let parts = split_token(init_token)?;
        let (password, key) = match secret.into() {
            PasswordOrKey::Password(password) => {
                let key = derive_key(&password, &parts.salt, parts.iterations);
                (Some(password), key)
            }
            PasswordOrKey::Key(key) => (None, key),
        };

        let provider = EncryptionProvider {
            password,
            key,
            salt: parts.salt,
            iterations: parts.iterations,
        };

        if let Some(control_message) = control_message {
            if provider.decrypt(init_token)? != control_message {
                return Err(CryptoError::ControlMismatch);
            }
        }

        Ok(provider)
    }

    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn encrypt(&self, message: &[u8]) -> Result<String, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(self.key.as_bytes()).map_err(|_| CryptoError::InvalidKey)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), message)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut token = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&self.salt);
        token.extend_from_slice(&self.iterations.to_be_bytes());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);

        Ok(URL_SAFE.encode(token))
    }

    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let parts = split_token(token)?;

        let derived;
        let key = if parts.salt == self.salt && parts.iterations == self.iterations {
            &self.key
        } else {
            match &self.password {
                Some(password) => {
                    derived = derive_key(password, &parts.salt, parts.iterations);
                    &derived
                }
                None => return Err(CryptoError::SaltIterationMismatch),
            }
        };

        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKey)?;
        let (nonce, ciphertext) = parts.payload.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::InvalidToken)
    }
}
