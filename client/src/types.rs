// Identifiers and ledger records as seen from the client side of the boundary

use std::fmt;

use payroll_stream::accrual::AccrualState;
use serde::{Deserialize, Serialize};

use crate::error::{PayrollError, PayrollResult};

const STRKEY_LEN: usize = 56;

/// Ledger-assigned ordinal identifier of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StreamId {
    fn from(id: u64) -> Self {
        StreamId(id)
    }
}

/// Check the shape of a Stellar strkey (`G…` account or `C…` contract).
///
/// The CRC16 checksum is left to the ledger.
fn validate_strkey(kind: &str, value: &str) -> PayrollResult<()> {
    if value.is_empty() {
        return Err(PayrollError::InvalidParameters(format!("{kind} is missing")));
    }
    if value.len() != STRKEY_LEN {
        return Err(PayrollError::InvalidParameters(format!(
            "{kind} must be {STRKEY_LEN} characters, got {}",
            value.len()
        )));
    }
    if !(value.starts_with('G') || value.starts_with('C')) {
        return Err(PayrollError::InvalidParameters(format!(
            "{kind} must start with G or C"
        )));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
    {
        return Err(PayrollError::InvalidParameters(format!(
            "{kind} contains characters outside the base32 alphabet"
        )));
    }
    Ok(())
}

/// Employer or employee account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(value: impl Into<String>) -> PayrollResult<Self> {
        let value = value.into();
        validate_strkey("account id", &value)?;
        Ok(AccountId(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Token contract identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    pub fn parse(value: impl Into<String>) -> PayrollResult<Self> {
        let value = value.into();
        validate_strkey("asset id", &value)?;
        Ok(AssetId(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! strkey_conversions {
    ($ty:ident) => {
        impl TryFrom<String> for $ty {
            type Error = PayrollError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                $ty::parse(value)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> String {
                id.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

strkey_conversions!(AccountId);
strkey_conversions!(AssetId);

/// Full ledger record of a stream. Amounts are smallest-unit integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: StreamId,
    pub employer: AccountId,
    pub employee: AccountId,
    pub deposit_token: AssetId,
    pub payment_token: AssetId,
    pub salary: i128,
    pub start_time: u64,
    /// `0` for an open-ended stream.
    pub end_time: u64,
    pub last_claim_time: u64,
    pub deposited_amount: i128,
    pub total_claimed: i128,
    pub active: bool,
    pub paused: bool,
}

impl Stream {
    pub fn accrual_state(&self) -> AccrualState {
        AccrualState {
            salary: self.salary,
            end_time: self.end_time,
            last_claim_time: self.last_claim_time,
            deposited_amount: self.deposited_amount,
            total_claimed: self.total_claimed,
            active: self.active,
            paused: self.paused,
        }
    }
}

/// An authoritative read of a stream, tagged with the ledger time it reflects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub stream: Stream,
    pub observed_at: u64,
}

/// The ledger's own answer to "what would a claim pay right now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimableReading {
    pub stream_id: StreamId,
    pub amount: i128,
    pub as_of: u64,
}

/// Outcome of an accepted mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub stream_id: StreamId,
    /// Claimed, deposited or refunded amount; `0` for pause and resume.
    pub amount: i128,
    pub ledger_time: u64,
}

/// Parameters of a new stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStream {
    pub employer: AccountId,
    pub employee: AccountId,
    pub salary: i128,
    pub deposit_token: AssetId,
    pub payment_token: AssetId,
    pub start_time: u64,
    /// Seconds of accrual; `0` means indefinite.
    pub duration: u64,
}

impl CreateStream {
    /// `0` for indefinite streams, otherwise `start_time + duration`.
    pub fn end_time(&self) -> PayrollResult<u64> {
        if self.duration == 0 {
            return Ok(0);
        }
        self.start_time
            .checked_add(self.duration)
            .ok_or_else(|| PayrollError::InvalidParameters("end time overflows".to_string()))
    }
}
