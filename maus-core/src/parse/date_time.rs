//! Timestamps for the `Ers` (created) and `Mod` (modified) options.
//!
//! Stored on the wire as an 8-byte little-endian tick count: 100-nanosecond
//! intervals since `0001-01-01 00:00:00 UTC` (the .NET `DateTime.Ticks`
//! epoch), per FORMATNOTE, section 4.5.

use chrono::{DateTime, TimeZone, Utc};
use winnow::{binary::le_i64, PResult, Parser, Partial};

use crate::error::{Error, FormatError};

const TICKS_PER_SECOND: i64 = 10_000_000;

/// A Gregorian tick count, as used by the `Ers`/`Mod` options.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GregorianTicks(pub i64);

impl std::fmt::Debug for GregorianTicks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "GregorianTicks({dt})"),
            None => write!(f, "GregorianTicks(invalid: {})", self.0),
        }
    }
}

impl GregorianTicks {
    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).single().unwrap()
    }

    /// Parses an 8-byte little-endian tick count.
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        le_i64.map(Self).parse_next(i)
    }

    /// Encodes this tick count as 8 little-endian bytes.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    /// Builds a tick count from a UTC date-time, failing if it's outside the
    /// representable range (`0001-01-01` .. roughly year 9999, per `DateTime`
    /// tick arithmetic on the other end of the protocol).
    pub fn from_datetime(dt: DateTime<Utc>) -> Result<Self, Error> {
        let delta = dt.signed_duration_since(Self::epoch());
        let ticks = delta
            .num_seconds()
            .checked_mul(TICKS_PER_SECOND)
            .and_then(|s| s.checked_add((delta.subsec_nanos() as i64) / 100))
            .ok_or(FormatError::InvalidLength {
                field: "Ers/Mod",
                value: 0,
            })?;
        Ok(Self(ticks))
    }

    /// Converts to a UTC date-time, or `None` if the tick count doesn't fit
    /// in a valid date (FORMATNOTE, section 4.5: "must fit in a valid date").
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        if self.0 < 0 {
            return None;
        }
        let secs = self.0 / TICKS_PER_SECOND;
        let nanos = ((self.0 % TICKS_PER_SECOND) * 100) as u32;
        let epoch = Self::epoch();
        epoch.checked_add_signed(chrono::Duration::seconds(secs))?.with_nanosecond(nanos)
    }
}

use chrono::Timelike;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_datetime() {
        let dt = Utc.with_ymd_and_hms(2019, 9, 5, 12, 12, 1).unwrap();
        let ticks = GregorianTicks::from_datetime(dt).unwrap();
        let back = ticks.to_datetime().unwrap();
        assert_eq!(dt.timestamp(), back.timestamp());
    }

    #[test]
    fn negative_ticks_have_no_datetime() {
        assert!(GregorianTicks(-1).to_datetime().is_none());
    }
}
