//! # Money Types
//!
//! Amounts are always held in the currency's smallest unit (cents, fen).
//! Providers that speak decimal strings (`"99.00"`) go through
//! [`Price::parse_decimal`] / [`Price::to_decimal_string`], which never touch
//! floating point.

use crate::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    USD,
    EUR,
    GBP,
    JPY,
    CNY,
    CAD,
    AUD,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::GBP => "gbp",
            Currency::JPY => "jpy",
            Currency::CNY => "cny",
            Currency::CAD => "cad",
            Currency::AUD => "aud",
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, the others have 2)
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    fn minor_per_major(&self) -> i64 {
        10_i64.pow(self.decimal_places())
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usd" => Ok(Currency::USD),
            "eur" => Ok(Currency::EUR),
            "gbp" => Ok(Currency::GBP),
            "jpy" => Ok(Currency::JPY),
            "cny" | "rmb" => Ok(Currency::CNY),
            "cad" => Ok(Currency::CAD),
            "aud" => Ok(Currency::AUD),
            other => Err(PaymentError::UnsupportedCurrency {
                currency: other.to_string(),
            }),
        }
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit (cents for USD, fen for CNY)
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a price from smallest unit (cents)
    pub fn from_minor(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Parse a decimal string such as `"99.00"` or `"99.5"` into minor units.
    ///
    /// More fractional digits than the currency allows is an error rather
    /// than a silent rounding.
    pub fn parse_decimal(raw: &str, currency: Currency) -> PaymentResult<Self> {
        let invalid = |why: &str| PaymentError::InvalidAmount {
            message: format!("{:?}: {}", raw, why),
        };

        let s = raw.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if digits.is_empty() {
            return Err(invalid("empty"));
        }

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid("no digits"));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid("not a decimal number"));
        }

        let places = currency.decimal_places() as usize;
        if frac.len() > places {
            return Err(invalid("too many fractional digits"));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("out of range"))?
        };
        let mut frac_padded = frac.to_string();
        while frac_padded.len() < places {
            frac_padded.push('0');
        }
        let frac: i64 = if frac_padded.is_empty() {
            0
        } else {
            frac_padded.parse().map_err(|_| invalid("out of range"))?
        };

        let amount = whole
            .checked_mul(currency.minor_per_major())
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| invalid("out of range"))?;

        Ok(Self {
            amount: if negative { -amount } else { amount },
            currency,
        })
    }

    /// Decimal rendering without symbol, e.g. `"99.00"`.
    pub fn to_decimal_string(&self) -> String {
        let places = self.currency.decimal_places();
        if places == 0 {
            return self.amount.to_string();
        }
        let per = self.currency.minor_per_major();
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        format!(
            "{}{}.{:0width$}",
            sign,
            abs / per as u64,
            abs % per as u64,
            width = places as usize
        )
    }

    /// Multiply by a quantity, failing on overflow
    pub fn times(&self, quantity: u32) -> PaymentResult<Self> {
        self.amount
            .checked_mul(quantity as i64)
            .map(|amount| Self {
                amount,
                currency: self.currency,
            })
            .ok_or_else(|| PaymentError::InvalidAmount {
                message: "line total overflows".to_string(),
            })
    }

    /// Format for display (e.g., "$10.00")
    pub fn display(&self) -> String {
        let symbol = match self.currency {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::JPY | Currency::CNY => "¥",
            Currency::CAD => "C$",
            Currency::AUD => "A$",
        };
        format!("{}{}", symbol, self.to_decimal_string())
    }
}
