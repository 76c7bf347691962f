use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const DEFAULT_CURRENCY_CODE: &str = "USD";

//--------------------------------------       Cents       -----------------------------------------------------------
/// A monetary amount in integer minor currency units (cents). All prices, fees and escrow amounts in the exchange are
/// expressed in `Cents` so that no floating point arithmetic ever touches money.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Cents(i64);

op!(binary Cents, Add, add);
op!(binary Cents, Sub, sub);
op!(inplace Cents, SubAssign, sub_assign);
op!(unary Cents, Neg, neg);

impl Mul<i64> for Cents {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in cents: {0}")]
pub struct CentsConversionError(String);

impl From<i64> for Cents {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for Cents {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Cents {}

impl TryFrom<u64> for Cents {
    type Error = CentsConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(CentsConversionError(format!("Value {} is too large to convert to Cents", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl Cents {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_dollars(dollars: i64) -> Self {
        Self(dollars * 100)
    }

    /// The fee amount at the given rate in basis points, rounded down.
    pub fn fee_at_bps(&self, bps: i64) -> Cents {
        Cents(self.0 * bps / 10_000)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_formats_dollars_and_cents() {
        assert_eq!(Cents::from(4_900).to_string(), "$49.00");
        assert_eq!(Cents::from(5).to_string(), "$0.05");
        assert_eq!(Cents::from(-1_250).to_string(), "-$12.50");
    }

    #[test]
    fn fee_rounds_down() {
        // 2.5% of $49.99 is 124.975c
        assert_eq!(Cents::from(4_999).fee_at_bps(250), Cents::from(124));
        assert_eq!(Cents::from(0).fee_at_bps(250), Cents::from(0));
    }

    #[test]
    fn arithmetic() {
        let a = Cents::from(1_000);
        let b = Cents::from(250);
        assert_eq!(a + b, Cents::from(1_250));
        assert_eq!(a - b, Cents::from(750));
        assert_eq!(-b, Cents::from(-250));
        assert_eq!(a * 3, Cents::from(3_000));
        assert_eq!(vec![a, b, b].into_iter().sum::<Cents>(), Cents::from(1_500));
    }
}
