use std::fmt;
use std::str::FromStr;

use super::StorageError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageEngine {
    Sled,
}

impl StorageEngine {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sled => "sled",
        }
    }
}

impl FromStr for StorageEngine {
    type Err = StorageError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().eq_ignore_ascii_case("sled") {
            return Ok(Self::Sled);
        }
        Err(StorageError::UnsupportedEngine {
            engine: raw.to_owned(),
        })
    }
}

impl fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning profile passed straight to sled; unset means sled's default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SledMode {
    LowSpace,
    HighThroughput,
}

impl FromStr for SledMode {
    type Err = StorageError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "low_space" => Ok(Self::LowSpace),
            "high_throughput" => Ok(Self::HighThroughput),
            _ => Err(StorageError::InvalidSledMode {
                mode: raw.to_owned(),
            }),
        }
    }
}

impl From<SledMode> for sled::Mode {
    fn from(value: SledMode) -> Self {
        match value {
            SledMode::LowSpace => Self::LowSpace,
            SledMode::HighThroughput => Self::HighThroughput,
        }
    }
}
