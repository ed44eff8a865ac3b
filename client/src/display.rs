//! Presentation helpers: unit formatting, status labels and simple figures
//! derived from a stream record.

use std::fmt;

use serde::Serialize;

use crate::error::{PayrollError, PayrollResult};
use crate::types::Stream;

pub const SECONDS_PER_DAY: u64 = 86_400;

fn scale(decimals: u8) -> PayrollResult<u128> {
    10u128.checked_pow(decimals as u32).ok_or_else(|| {
        PayrollError::InvalidParameters(format!("{decimals} decimals are not supported"))
    })
}

/// Render a smallest-unit amount with `decimals` fractional digits.
///
/// Trailing fractional zeros are dropped: `12_500_000` at 7 decimals is `"1.25"`.
pub fn format_units(amount: i128, decimals: u8) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let magnitude = amount.unsigned_abs();

    let Ok(unit) = scale(decimals) else {
        return format!("{amount}");
    };
    if unit == 1 {
        return format!("{sign}{magnitude}");
    }

    let whole = magnitude / unit;
    let fraction = magnitude % unit;
    if fraction == 0 {
        return format!("{sign}{whole}");
    }

    let digits = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{sign}{whole}.{}", digits.trim_end_matches('0'))
}

/// Parse a decimal string into smallest units.
///
/// More fractional digits than `decimals` is an error rather than a silent
/// truncation.
pub fn parse_units(text: &str, decimals: u8) -> PayrollResult<i128> {
    let invalid = || PayrollError::InvalidParameters(format!("not a valid amount: {text:?}"));

    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (unsigned, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    let mut digits = whole.bytes().chain(fraction.bytes());
    if !digits.all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if fraction.len() > decimals as usize {
        return Err(PayrollError::InvalidParameters(format!(
            "{text:?} has more than {decimals} decimal places"
        )));
    }

    let unit = scale(decimals)?;
    let parse = |digits: &str| -> PayrollResult<u128> {
        if digits.is_empty() {
            Ok(0)
        } else {
            digits.parse::<u128>().map_err(|_| invalid())
        }
    };

    let padding = scale(decimals - fraction.len() as u8)?;
    let magnitude = parse(whole)?
        .checked_mul(unit)
        .and_then(|w| parse(fraction).ok()?.checked_mul(padding)?.checked_add(w))
        .ok_or_else(invalid)?;

    let value = i128::try_from(magnitude).map_err(|_| invalid())?;
    Ok(if negative { -value } else { value })
}

/// One twelfth of the annual salary, truncated.
pub fn monthly_amount(salary: i128) -> i128 {
    salary / 12
}

/// Share of the escrow already paid out, in percent.
pub fn progress_percent(stream: &Stream) -> f64 {
    if stream.deposited_amount <= 0 {
        return 0.0;
    }
    let ratio = stream.total_claimed as f64 / stream.deposited_amount as f64;
    (ratio * 100.0).clamp(0.0, 100.0)
}

/// Whole days as seconds; `None` on overflow.
pub fn duration_from_days(days: u64) -> Option<u64> {
    days.checked_mul(SECONDS_PER_DAY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusLabel {
    Active,
    Paused,
    Ended,
}

impl StatusLabel {
    pub fn of(stream: &Stream) -> Self {
        if !stream.active {
            StatusLabel::Ended
        } else if stream.paused {
            StatusLabel::Paused
        } else {
            StatusLabel::Active
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatusLabel::Active => "Active",
            StatusLabel::Paused => "Paused",
            StatusLabel::Ended => "Ended",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, AssetId, StreamId};

    const ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAEMP";
    const ASSET: &str = "CAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAUSD";

    fn stream(deposited: i128, claimed: i128) -> Stream {
        let account = AccountId::parse(ACCOUNT).unwrap();
        let asset = AssetId::parse(ASSET).unwrap();
        Stream {
            id: StreamId(0),
            employer: account.clone(),
            employee: account,
            deposit_token: asset.clone(),
            payment_token: asset,
            salary: 1_200,
            start_time: 0,
            end_time: 0,
            last_claim_time: 0,
            deposited_amount: deposited,
            total_claimed: claimed,
            active: true,
            paused: false,
        }
    }

    #[test]
    fn formats_with_trimmed_fraction() {
        assert_eq!(format_units(12_500_000, 7), "1.25");
        assert_eq!(format_units(10_000_000, 7), "1");
        assert_eq!(format_units(1, 7), "0.0000001");
        assert_eq!(format_units(-5_000_000, 7), "-0.5");
        assert_eq!(format_units(42, 0), "42");
    }

    #[test]
    fn parses_decimal_amounts() {
        assert_eq!(parse_units("1.25", 7), Ok(12_500_000));
        assert_eq!(parse_units("3", 7), Ok(30_000_000));
        assert_eq!(parse_units(".5", 1), Ok(5));
        assert_eq!(parse_units("-2.5", 1), Ok(-25));
        assert_eq!(parse_units(" 7 ", 0), Ok(7));
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert!(parse_units("", 7).is_err());
        assert!(parse_units(".", 7).is_err());
        assert!(parse_units("1.2.3", 7).is_err());
        assert!(parse_units("1e5", 7).is_err());
        assert!(parse_units("0.12345678", 7).is_err());
        assert!(parse_units("999999999999999999999999999999999999999", 7).is_err());
    }

    #[test]
    fn format_then_parse_is_lossless() {
        for amount in [0, 1, 9_999_999, 123_456_789_012] {
            assert_eq!(parse_units(&format_units(amount, 7), 7), Ok(amount));
        }
    }

    #[test]
    fn monthly_amount_truncates() {
        assert_eq!(monthly_amount(1_200), 100);
        assert_eq!(monthly_amount(1_211), 100);
    }

    #[test]
    fn progress_against_escrow() {
        assert_eq!(progress_percent(&stream(0, 0)), 0.0);
        assert_eq!(progress_percent(&stream(400, 100)), 25.0);
        assert_eq!(progress_percent(&stream(400, 400)), 100.0);
    }

    #[test]
    fn status_label_prefers_ended() {
        let mut s = stream(100, 0);
        assert_eq!(StatusLabel::of(&s), StatusLabel::Active);
        s.paused = true;
        assert_eq!(StatusLabel::of(&s).to_string(), "Paused");
        s.active = false;
        assert_eq!(StatusLabel::of(&s), StatusLabel::Ended);
    }

    #[test]
    fn days_to_seconds() {
        assert_eq!(duration_from_days(30), Some(2_592_000));
        assert_eq!(duration_from_days(u64::MAX), None);
    }
}
