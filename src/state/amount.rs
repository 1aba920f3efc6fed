use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

use thiserror::Error;

/// Number of implied decimals in a base-unit amount.
pub const DECIMALS: u32 = 18;

/// Digits shown after the decimal point when rendering an amount.
const DISPLAY_DECIMALS: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,

    #[error("invalid base-unit amount {0:?}")]
    Invalid(String),

    #[error("amount {0:?} is out of range")]
    Overflow(String),
}

/// An exact token amount held as signed base units (10^18 per token).
///
/// Rewards and withdrawals are never negative on the wire, but a derived
/// balance can be when the remote source is inconsistent, so the
/// representation is signed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tokens(i128);

impl Tokens {
    pub const ZERO: Tokens = Tokens(0);

    #[cfg(test)]
    pub fn from_base_units(units: i128) -> Self {
        Self(units)
    }

    /// Parses the unsigned integer string the node API uses for amounts.
    pub fn parse_base_units(raw: &str) -> Result<Self, AmountError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AmountError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Invalid(raw.to_string()));
        }
        let units: u128 = raw
            .parse()
            .map_err(|_| AmountError::Overflow(raw.to_string()))?;
        let units = i128::try_from(units).map_err(|_| AmountError::Overflow(raw.to_string()))?;
        Ok(Self(units))
    }

    #[cfg(test)]
    pub fn base_units(&self) -> i128 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl Add for Tokens {
    type Output = Tokens;

    fn add(self, rhs: Tokens) -> Tokens {
        Tokens(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Tokens {
    type Output = Tokens;

    fn sub(self, rhs: Tokens) -> Tokens {
        Tokens(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Tokens {
    fn sum<I: Iterator<Item = Tokens>>(iter: I) -> Tokens {
        iter.fold(Tokens::ZERO, |acc, t| acc + t)
    }
}

/// Renders with eight decimals, rounding half away from zero.
impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = 10u128.pow(DECIMALS - DISPLAY_DECIMALS);
        let abs = self.0.unsigned_abs();
        let rounded = (abs + step / 2) / step;
        let display_scale = 10u128.pow(DISPLAY_DECIMALS);
        let whole = rounded / display_scale;
        let frac = rounded % display_scale;
        let sign = if self.0 < 0 && rounded != 0 { "-" } else { "" };
        write!(
            f,
            "{sign}{whole}.{frac:0width$}",
            width = DISPLAY_DECIMALS as usize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE: i128 = 10i128.pow(DECIMALS);

    #[test]
    fn parses_whole_and_fractional_amounts() {
        let two = Tokens::parse_base_units("2000000000000000000").unwrap();
        assert_eq!(two.base_units(), 2 * SCALE);
        let half = Tokens::parse_base_units("500000000000000000").unwrap();
        assert_eq!(half.to_string(), "0.50000000");
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!(Tokens::parse_base_units(""), Err(AmountError::Empty));
        assert!(matches!(
            Tokens::parse_base_units("-5"),
            Err(AmountError::Invalid(_))
        ));
        assert!(matches!(
            Tokens::parse_base_units("1.5"),
            Err(AmountError::Invalid(_))
        ));
        assert!(matches!(
            Tokens::parse_base_units("999999999999999999999999999999999999999999"),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn display_rounds_to_eight_decimals() {
        // 0.000000015 rounds up to 0.00000002
        let t = Tokens::from_base_units(15_000_000_000);
        assert_eq!(t.to_string(), "0.00000002");
        let t = Tokens::from_base_units(14_999_999_999);
        assert_eq!(t.to_string(), "0.00000001");
    }

    #[test]
    fn negative_balances_keep_their_sign() {
        let t = Tokens::from_base_units(SCALE) - Tokens::from_base_units(3 * SCALE / 2);
        assert!(t.is_negative());
        assert_eq!(t.to_string(), "-0.50000000");
    }

    #[test]
    fn sum_adds_every_amount() {
        let total: Tokens = [SCALE, SCALE / 4, SCALE / 4]
            .into_iter()
            .map(Tokens::from_base_units)
            .sum();
        assert_eq!(total.to_string(), "1.50000000");
    }
}
