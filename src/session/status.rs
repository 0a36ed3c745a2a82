use std::fmt;

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Where a session is in its lifecycle. Ordered, a session only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UserSessionStatus {
    /// No lock exists yet, the first unlock creates one.
    New = 0,
    Locked = 10,
    Unlocked = 20,
    /// Unlocked with a parsed user config.
    Configured = 30,
}

impl UserSessionStatus {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserSessionStatus::New => "NEW",
            UserSessionStatus::Locked => "LOCKED",
            UserSessionStatus::Unlocked => "UNLOCKED",
            UserSessionStatus::Configured => "CONFIGURED",
        }
    }
}

impl TryFrom<u8> for UserSessionStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(UserSessionStatus::New),
            10 => Ok(UserSessionStatus::Locked),
            20 => Ok(UserSessionStatus::Unlocked),
            30 => Ok(UserSessionStatus::Configured),
            _ => Err(format!("unknown session status {}", code)),
        }
    }
}

impl fmt::Display for UserSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UserSessionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for UserSessionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        UserSessionStatus::try_from(u8::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}
