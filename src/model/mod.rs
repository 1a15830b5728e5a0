use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";
pub const BIRTH_DATE_LEN_BYTES: usize = 10;
pub const MAX_NAME_LEN_BYTES: usize = u8::MAX as usize;

#[derive(Debug, PartialEq, Eq)]
pub enum BetError {
    InvalidAgency { agency_id: u32 },
    NameTooLong { field: &'static str, len: usize },
    InvalidBirthDate { raw: String },
    ZeroNumber,
}

impl fmt::Display for BetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAgency { agency_id } => {
                write!(f, "agency id must be at least 1, got {agency_id}")
            }
            Self::NameTooLong { field, len } => write!(
                f,
                "{field} is {len} bytes long, limit is {MAX_NAME_LEN_BYTES} bytes"
            ),
            Self::InvalidBirthDate { raw } => {
                write!(f, "birth date '{raw}' is not a valid YYYY-MM-DD date")
            }
            Self::ZeroNumber => write!(f, "bet number must be at least 1; 0 is the failure ack"),
        }
    }
}

impl std::error::Error for BetError {}

/// A single wager placed through an agency. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    agency_id: u32,
    first_name: String,
    last_name: String,
    document: u32,
    birth_date: NaiveDate,
    number: u32,
}

impl Bet {
    pub fn new(
        agency_id: u32,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        document: u32,
        birth_date: NaiveDate,
        number: u32,
    ) -> Result<Self, BetError> {
        if agency_id == 0 {
            return Err(BetError::InvalidAgency { agency_id });
        }
        if number == 0 {
            return Err(BetError::ZeroNumber);
        }

        let first_name = first_name.into();
        if first_name.len() > MAX_NAME_LEN_BYTES {
            return Err(BetError::NameTooLong {
                field: "first_name",
                len: first_name.len(),
            });
        }
        let last_name = last_name.into();
        if last_name.len() > MAX_NAME_LEN_BYTES {
            return Err(BetError::NameTooLong {
                field: "last_name",
                len: last_name.len(),
            });
        }

        Ok(Self {
            agency_id,
            first_name,
            last_name,
            document,
            birth_date,
            number,
        })
    }

    pub fn agency_id(&self) -> u32 {
        self.agency_id
    }

    #[cfg(test)]
    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    #[cfg(test)]
    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn document(&self) -> u32 {
        self.document
    }

    #[cfg(test)]
    pub fn birth_date(&self) -> NaiveDate {
        self.birth_date
    }

    pub fn number(&self) -> u32 {
        self.number
    }
}

pub fn parse_birth_date(raw: &str) -> Result<NaiveDate, BetError> {
    if raw.len() != BIRTH_DATE_LEN_BYTES {
        return Err(BetError::InvalidBirthDate {
            raw: raw.to_owned(),
        });
    }

    NaiveDate::parse_from_str(raw, BIRTH_DATE_FORMAT).map_err(|_| BetError::InvalidBirthDate {
        raw: raw.to_owned(),
    })
}

/// One framed submission from an agency. `is_final` marks the last batch
/// the agency will send on its connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub agency_id: u32,
    pub bets: Vec<Bet>,
    pub is_final: bool,
}

impl Batch {
    pub fn new(agency_id: u32, bets: Vec<Bet>, is_final: bool) -> Self {
        Self {
            agency_id,
            bets,
            is_final,
        }
    }

    pub fn last_bet(&self) -> Option<&Bet> {
        self.bets.last()
    }

    pub fn len(&self) -> usize {
        self.bets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }
}
