use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::NklError;

pub mod columns {
    pub const STORE_CODE: &str = "KDTOKO";
    pub const STORE_NAME: &str = "NAMA TOKO";
    pub const AREA_MANAGER: &str = "AM";
    pub const AREA_SUPERVISOR: &str = "AS";
    pub const ITEM_CODE: &str = "PLU";
    pub const DESCRIPTION: &str = "DESC";
    pub const QUANTITY: &str = "QTY";
    pub const VALUE: &str = "RUPIAH";
    pub const REMARK: &str = "KETERANGAN";
}

/// Employee number used as login id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub const LEN: usize = 10;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = NklError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid =
            normalized.len() == Self::LEN && normalized.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(NklError::InvalidUserId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreCode(String);

impl StoreCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StoreCode {
    type Err = NklError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && !normalized
                .chars()
                .any(|ch| ch == '/' || ch == '\\' || ch.is_control());
        if !is_valid {
            return Err(NklError::InvalidStoreCode(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Round identifier attached to a master load and to every result artifact.
///
/// Produced only by the master dataset manager and carried verbatim everywhere
/// else, so no other component derives it on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub const FORMAT: &'static str = "%m-%Y";

    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp.format(Self::FORMAT).to_string())
    }

    pub fn current() -> Self {
        Self::from_timestamp(Utc::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = NklError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() || normalized.contains('/') {
            return Err(NklError::ConfigInvalid(format!(
                "invalid version tag: {value}"
            )));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Organisational key progress is rolled up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GroupKey {
    #[value(name = "am")]
    AreaManager,
    #[value(name = "as")]
    AreaSupervisor,
}

impl GroupKey {
    pub fn column(self) -> &'static str {
        match self {
            GroupKey::AreaManager => columns::AREA_MANAGER,
            GroupKey::AreaSupervisor => columns::AREA_SUPERVISOR,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}
