//! Human-readable invitation numbers.
//!
//! Format: `<PREFIX>-<YYYYMMDD>-<SUFFIX>`, e.g. `VIS-20241201-7KQ2ZD`.
//! The prefix is 1–8 uppercase ASCII letters, the date is the creation day
//! (UTC) and the suffix is [`SUFFIX_LEN`] characters from [`SUFFIX_ALPHABET`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use gatepass_core::DomainError;

pub const SUFFIX_LEN: usize = 6;
pub const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const MAX_PREFIX_LEN: usize = 8;

/// Globally unique, immutable invitation number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvitationNumber(String);

impl InvitationNumber {
    /// Build a number from its parts, validating each of them.
    pub fn compose(prefix: &str, date: NaiveDate, suffix: &str) -> Result<Self, DomainError> {
        validate_prefix(prefix)?;
        validate_suffix(suffix)?;
        Ok(Self(format!("{prefix}-{}-{suffix}", date.format("%Y%m%d"))))
    }

    /// Parse an operator- or store-supplied number.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let mut parts = raw.split('-');
        let (Some(prefix), Some(date), Some(suffix), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(DomainError::validation(format!(
                "invitation number must have three dash-separated parts: {raw:?}"
            )));
        };

        if date.len() != 8 {
            return Err(DomainError::validation(format!(
                "invitation number date must be YYYYMMDD: {raw:?}"
            )));
        }
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|e| {
            DomainError::validation(format!("invitation number date is invalid ({e}): {raw:?}"))
        })?;

        Self::compose(prefix, date, suffix)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

pub fn validate_prefix(prefix: &str) -> Result<(), DomainError> {
    if prefix.is_empty()
        || prefix.len() > MAX_PREFIX_LEN
        || !prefix.bytes().all(|b| b.is_ascii_uppercase())
    {
        return Err(DomainError::validation(format!(
            "invitation number prefix must be 1-{MAX_PREFIX_LEN} uppercase letters: {prefix:?}"
        )));
    }
    Ok(())
}

fn validate_suffix(suffix: &str) -> Result<(), DomainError> {
    if suffix.len() != SUFFIX_LEN || !suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)) {
        return Err(DomainError::validation(format!(
            "invitation number suffix must be {SUFFIX_LEN} characters from [A-Z0-9]: {suffix:?}"
        )));
    }
    Ok(())
}

impl core::fmt::Display for InvitationNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for InvitationNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InvitationNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InvitationNumber> for String {
    fn from(value: InvitationNumber) -> Self {
        value.0
    }
}
