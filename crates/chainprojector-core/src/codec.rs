//! Value codec — on-chain integers, addresses and fixed-point mantissas.
//!
//! Everything here is pure: the same inputs always produce the same output,
//! which is what keeps replays bit-identical.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use crate::error::ProjectionError;

/// Largest supported decimal exponent (`uint256` has 78 decimal digits).
pub const MAX_EXPONENT: i64 = 77;

/// Decimals of every vToken.
pub const VTOKEN_DECIMALS: i64 = 8;

/// Fixed-point scale used by protocol `Exp` values.
pub const MANTISSA_FACTOR: i64 = 18;

/// The zero address, used when a call returns no address.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

// ─── Mantissa ─────────────────────────────────────────────────────────────────

/// A raw on-chain integer (token amounts, rates, indices).
///
/// Serialises as a base-10 string so values above `u64` survive JSON.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Mantissa(BigInt);

impl Mantissa {
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    /// Parse a decimal string or a `0x`-prefixed hex string.
    pub fn parse(s: &str) -> Result<Self, ProjectionError> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) if hex.is_empty() => Some(BigInt::zero()),
            Some(hex) => BigInt::parse_bytes(hex.as_bytes(), 16),
            None => BigInt::parse_bytes(s.as_bytes(), 10),
        };
        parsed
            .map(Self)
            .ok_or_else(|| ProjectionError::malformed("uint256", format!("invalid integer '{s}'")))
    }

    pub fn as_bigint(&self) -> &BigInt {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// `self - other`, or `None` if the result would drop below zero.
    pub fn checked_sub(&self, other: &Mantissa) -> Option<Mantissa> {
        let out = &self.0 - &other.0;
        if out.is_negative() {
            None
        } else {
            Some(Self(out))
        }
    }

    /// Interpret this mantissa as a decimal with `exponent` fractional digits.
    pub fn to_decimal(&self, exponent: i64) -> Result<BigDecimal, ProjectionError> {
        mantissa_to_decimal(&self.0, exponent)
    }
}

impl From<u64> for Mantissa {
    fn from(v: u64) -> Self {
        Self(BigInt::from(v))
    }
}

impl From<u128> for Mantissa {
    fn from(v: u128) -> Self {
        Self(BigInt::from(v))
    }
}

impl From<BigInt> for Mantissa {
    fn from(v: BigInt) -> Self {
        Self(v)
    }
}

impl Add for &Mantissa {
    type Output = Mantissa;

    fn add(self, rhs: &Mantissa) -> Mantissa {
        Mantissa(&self.0 + &rhs.0)
    }
}

impl FromStr for Mantissa {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Mantissa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Mantissa {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Mantissa {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MantissaVisitor;

        impl<'de> Visitor<'de> for MantissaVisitor {
            type Value = Mantissa;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer or a decimal/hex integer string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Mantissa, E> {
                Ok(Mantissa::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Mantissa, E> {
                Ok(Mantissa(BigInt::from(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Mantissa, E> {
                Mantissa::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(MantissaVisitor)
    }
}

// ─── Decimal conversion ───────────────────────────────────────────────────────

fn check_exponent(exponent: i64) -> Result<(), ProjectionError> {
    if (0..=MAX_EXPONENT).contains(&exponent) {
        Ok(())
    } else {
        Err(ProjectionError::InvalidPrecision {
            exponent,
            max: MAX_EXPONENT,
        })
    }
}

/// `10^exponent` as a decimal.
pub fn exponent_to_decimal(exponent: i64) -> Result<BigDecimal, ProjectionError> {
    check_exponent(exponent)?;
    Ok(BigDecimal::new(BigInt::from(1), -exponent))
}

/// `mantissa / 10^exponent`, carrying exactly `exponent` fractional digits.
pub fn mantissa_to_decimal(mantissa: &BigInt, exponent: i64) -> Result<BigDecimal, ProjectionError> {
    check_exponent(exponent)?;
    Ok(BigDecimal::new(mantissa.clone(), exponent))
}

/// Drop every fractional digit beyond `precision` (rounds toward zero).
pub fn truncate(value: &BigDecimal, precision: i64) -> BigDecimal {
    let (digits, scale) = value.as_bigint_and_exponent();
    if scale <= precision {
        return value.clone();
    }
    let divisor = num_traits::pow(BigInt::from(10), (scale - precision) as usize);
    BigDecimal::new(digits / divisor, precision)
}

/// Per-unit exchange rate of a vToken into its underlying token.
///
/// The mantissa is scaled by `10^(18 + underlying_decimals - 8)`; the result
/// is truncated to 18 fractional digits.
pub fn exchange_rate_to_decimal(
    mantissa: &Mantissa,
    underlying_decimals: i64,
) -> Result<BigDecimal, ProjectionError> {
    let exponent = MANTISSA_FACTOR + underlying_decimals - VTOKEN_DECIMALS;
    let rate = mantissa.to_decimal(exponent)?;
    Ok(truncate(&rate, MANTISSA_FACTOR))
}

/// Underlying-token amount for `vtokens` at `exchange_rate` (both raw mantissas).
pub fn underlying_from_vtokens(vtokens: &Mantissa, exchange_rate: &Mantissa) -> Mantissa {
    let scale = num_traits::pow(BigInt::from(10), MANTISSA_FACTOR as usize);
    Mantissa(vtokens.as_bigint() * exchange_rate.as_bigint() / scale)
}

// ─── Addresses and bytes ──────────────────────────────────────────────────────

/// Canonical address form: lower-case `0x` followed by 40 hex digits.
pub fn normalize_address(raw: &str) -> Result<String, ProjectionError> {
    let trimmed = raw.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProjectionError::malformed(
            "address",
            format!("invalid address '{raw}'"),
        ));
    }
    Ok(format!("0x{}", hex_part.to_ascii_lowercase()))
}

/// `0x`-prefixed lower-case hex of raw bytes.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Little-endian 4-byte hex of `n`, without prefix (`22` → `"16000000"`).
pub fn i32_le_hex(n: i32) -> String {
    hex::encode(n.to_le_bytes())
}
