// ============================================================================
// PostgreSQL Log Sequence Numbers
// ============================================================================

pub mod probe;
pub mod registry;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use sqlx::error::BoxDynError;
use sqlx::postgres::{PgTypeInfo, PgValueFormat, PgValueRef};

use crate::core::RouterError;

/// A PostgreSQL Log Sequence Number, rendered `X/Y` where `X` is the log
/// file id and `Y` the byte offset within it.
///
/// Ordering follows the unsigned 64-bit value `(upper << 32) | lower`, which
/// is how WAL positions compare on the server.
///
/// # Examples
///
/// ```
/// use pgresolver::Lsn;
///
/// let a: Lsn = "0/3000060".parse().unwrap();
/// let b: Lsn = "0/3000080".parse().unwrap();
/// assert!(a < b);
/// assert_eq!(a.to_string(), "0/3000060");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn {
    upper: u32,
    lower: u32,
}

impl Lsn {
    /// The `0/0` sentinel: no causal requirement.
    pub const ZERO: Lsn = Lsn { upper: 0, lower: 0 };

    pub const fn new(upper: u32, lower: u32) -> Self {
        Self { upper, lower }
    }

    /// Higher 32 bits (log file id).
    pub const fn upper(&self) -> u32 {
        self.upper
    }

    /// Lower 32 bits (byte offset).
    pub const fn lower(&self) -> u32 {
        self.lower
    }

    pub const fn is_zero(&self) -> bool {
        self.upper == 0 && self.lower == 0
    }

    pub const fn as_u64(&self) -> u64 {
        ((self.upper as u64) << 32) | self.lower as u64
    }

    pub const fn from_u64(value: u64) -> Self {
        Self {
            upper: (value >> 32) as u32,
            lower: value as u32,
        }
    }

    /// Byte distance from `other` up to `self`; saturates at 0 when `self`
    /// is behind `other`.
    pub fn saturating_sub(&self, other: Lsn) -> u64 {
        self.as_u64().saturating_sub(other.as_u64())
    }

    /// Advances this position by `bytes`.
    pub fn add_bytes(&self, bytes: u64) -> Lsn {
        Lsn::from_u64(self.as_u64().wrapping_add(bytes))
    }

    pub fn compare(&self, other: &Lsn) -> Ordering {
        self.as_u64().cmp(&other.as_u64())
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.upper, self.lower)
    }
}

impl FromStr for Lsn {
    type Err = RouterError;

    /// Parses the `X/Y` form: exactly one `/`, both halves non-empty hex
    /// fitting in 32 bits. No whitespace tolerance.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(RouterError::LsnParse("empty LSN string".into()));
        }

        let (upper, lower) = s
            .split_once('/')
            .ok_or_else(|| RouterError::LsnParse(format!("{s:?} (expected X/Y)")))?;
        if lower.contains('/') {
            return Err(RouterError::LsnParse(format!("{s:?} (expected X/Y)")));
        }

        let upper = parse_half(upper)
            .ok_or_else(|| RouterError::LsnParse(format!("bad upper half in {s:?}")))?;
        let lower = parse_half(lower)
            .ok_or_else(|| RouterError::LsnParse(format!("bad lower half in {s:?}")))?;

        Ok(Lsn { upper, lower })
    }
}

fn parse_half(half: &str) -> Option<u32> {
    if half.is_empty() || !half.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(half, 16).ok()
}

impl sqlx::Type<sqlx::Postgres> for Lsn {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("pg_lsn")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Lsn {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            // Binary representation is the raw 64-bit position, big-endian.
            PgValueFormat::Binary => {
                let bytes = value.as_bytes()?;
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| format!("pg_lsn expects 8 bytes, got {}", bytes.len()))?;
                Ok(Lsn::from_u64(u64::from_be_bytes(raw)))
            }
            PgValueFormat::Text => Ok(value.as_str()?.parse()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_lsns() {
        let cases = [
            ("0/0", Lsn::new(0, 0)),
            ("0/3000060", Lsn::new(0, 0x0300_0060)),
            ("1/A0B1C2", Lsn::new(1, 0xA0B1C2)),
            ("FFFFFFFF/FFFFFFFF", Lsn::new(u32::MAX, u32::MAX)),
        ];

        for (input, expected) in cases {
            let lsn: Lsn = input.parse().unwrap();
            assert_eq!(lsn, expected, "input {input}");
            // Round-trip: uppercase canonical form equals the input.
            assert_eq!(lsn.to_string(), input);
        }
    }

    #[test]
    fn lowercase_normalizes_to_uppercase() {
        let lsn: Lsn = "1/a0b1c2".parse().unwrap();
        assert_eq!(lsn.to_string(), "1/A0B1C2");
    }

    #[test]
    fn rejects_malformed_input() {
        for input in [
            "",
            "invalid",
            "3000060",
            "0/XYZ",
            "/0",
            "0/",
            "0/0/0",
            " 0/0",
            "0/0 ",
            "100000000/0",
            "0/100000000",
        ] {
            assert!(input.parse::<Lsn>().is_err(), "should reject {input:?}");
        }
    }

    #[test]
    fn ordering_is_unsigned_64_bit() {
        let low = Lsn::new(1, 0x1000);
        let high_lower = Lsn::new(1, 0x2000);
        let high_upper = Lsn::new(2, 0x1000);

        assert!(low < high_lower);
        assert!(high_lower < high_upper);
        assert_eq!(low.compare(&low), Ordering::Equal);

        // Upper half dominates even when the lower half is larger.
        assert!(Lsn::new(1, u32::MAX) < Lsn::new(2, 0));
    }

    #[test]
    fn subtract_saturates() {
        let a = Lsn::new(0, 0x3000080);
        let b = Lsn::new(0, 0x3000060);

        assert_eq!(a.saturating_sub(b), 0x20);
        assert_eq!(b.saturating_sub(a), 0);
        assert_eq!(a.saturating_sub(a), 0);
    }

    #[test]
    fn subtract_crosses_segment_boundary() {
        let a = Lsn::new(2, 0x10);
        let b = Lsn::new(1, 0xFFFF_FFF0);
        assert_eq!(a.saturating_sub(b), 0x20);
    }

    #[test]
    fn add_bytes_carries_into_upper() {
        let lsn = Lsn::new(0, 0xFFFF_FFFF);
        assert_eq!(lsn.add_bytes(1), Lsn::new(1, 0));
        assert_eq!(Lsn::ZERO.add_bytes(0x3000060).to_string(), "0/3000060");
    }

    #[test]
    fn u64_round_trip() {
        let lsn = Lsn::new(0xDEAD, 0xBEEF);
        assert_eq!(Lsn::from_u64(lsn.as_u64()), lsn);
    }

    #[test]
    fn zero_is_sentinel() {
        assert!(Lsn::ZERO.is_zero());
        assert!("0/0".parse::<Lsn>().unwrap().is_zero());
        assert!(!Lsn::new(0, 1).is_zero());
    }
}
