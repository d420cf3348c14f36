//! Monetary amounts in integer minor units
//!
//! Every stored amount is an `i64` count of the currency's minor unit
//! (cents for USD, yen for JPY). Major-unit decimal strings only appear at
//! the edges: configuration, payment references and display.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClinicError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    /// Number of minor-unit digits (0..=3)
    pub exponent: u8,
}

impl Currency {
    pub fn new(code: impl Into<String>, exponent: u8) -> Result<Self> {
        if exponent > 3 {
            return Err(ClinicError::invalid_field(
                "exponent",
                format!("unsupported currency exponent {}", exponent),
            ));
        }
        Ok(Self {
            code: code.into(),
            exponent,
        })
    }

    pub fn usd() -> Self {
        Self {
            code: "USD".to_string(),
            exponent: 2,
        }
    }

    fn scale(&self) -> i64 {
        10_i64.pow(self.exponent as u32)
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::usd()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub minor: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// Parse a major-unit decimal string ("12.5" -> 1250 cents)
    pub fn from_major_str(input: &str, currency: Currency) -> Result<Self> {
        let invalid = || ClinicError::validation(format!("invalid amount '{}'", input));
        let trimmed = input.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, fraction) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if digits.contains('.') && fraction.is_empty() {
            return Err(invalid());
        }
        if fraction.len() > currency.exponent as usize {
            return Err(ClinicError::validation(format!(
                "amount '{}' has more than {} decimal places for {}",
                input, currency.exponent, currency.code
            )));
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let mut frac_minor: i64 = if fraction.is_empty() {
            0
        } else {
            fraction.parse().map_err(|_| invalid())?
        };
        for _ in fraction.len()..currency.exponent as usize {
            frac_minor *= 10;
        }

        let minor = whole
            .checked_mul(currency.scale())
            .and_then(|m| m.checked_add(frac_minor))
            .ok_or_else(invalid)?;

        Ok(Self::new(if negative { -minor } else { minor }, currency))
    }

    /// Format as a major-unit decimal string (1250 cents -> "12.50")
    pub fn to_major_string(&self) -> String {
        let scale = self.currency.scale();
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        let whole = abs / scale as u64;
        if self.currency.exponent == 0 {
            return format!("{}{}", sign, whole);
        }
        let frac = abs % scale as u64;
        format!(
            "{}{}.{:0width$}",
            sign,
            whole,
            frac,
            width = self.currency.exponent as usize
        )
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money> {
        self.same_currency(other)?;
        self.minor
            .checked_add(other.minor)
            .map(|m| Money::new(m, self.currency.clone()))
            .ok_or_else(|| ClinicError::validation("amount overflow"))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money> {
        self.same_currency(other)?;
        self.minor
            .checked_sub(other.minor)
            .map(|m| Money::new(m, self.currency.clone()))
            .ok_or_else(|| ClinicError::validation("amount overflow"))
    }

    fn same_currency(&self, other: &Money) -> Result<()> {
        if self.currency != other.currency {
            return Err(ClinicError::validation(format!(
                "currency mismatch: {} vs {}",
                self.currency.code, other.currency.code
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_major_string(), self.currency.code)
    }
}

/// A percentage expressed in basis points (1% = 100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(u32);

impl Rate {
    pub const ZERO: Rate = Rate(0);
    pub const FULL: Rate = Rate(10_000);

    pub fn from_basis_points(bp: u32) -> Result<Self> {
        if bp > Self::FULL.0 {
            return Err(ClinicError::validation(format!(
                "rate {} basis points exceeds 100%",
                bp
            )));
        }
        Ok(Self(bp))
    }

    pub fn basis_points(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `amount × rate`, rounded half away from zero
    pub fn apply(self, amount: i64) -> i64 {
        round_div(amount as i128 * self.0 as i128, 10_000) as i64
    }

    /// Reject values that bypassed the constructor through deserialization
    pub fn validate(self, field: &str) -> Result<()> {
        if self.0 > Self::FULL.0 {
            return Err(ClinicError::invalid_field(field, "rate exceeds 100%"));
        }
        Ok(())
    }
}

/// Integer division rounding half away from zero
pub fn round_div(numerator: i128, denominator: i128) -> i128 {
    let half = denominator.abs() / 2;
    let adjusted = if (numerator < 0) != (denominator < 0) {
        numerator - if denominator < 0 { -half } else { half }
    } else {
        numerator + if denominator < 0 { -half } else { half }
    };
    adjusted / denominator
}
