//! Logical "last updated" timestamps.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A server-assigned logical timestamp.
///
/// Watermarks count seconds on the server's clock, but are only ever compared
/// with each other. `0` is the unsynced sentinel: a record carrying it has
/// local changes the server has not yet accepted.
///
/// At the request level a watermark is a plain JSON integer. Inside a
/// record's `meta` header it travels as a decimal string.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Watermark(pub u64);

impl Watermark {
    /// The unsynced sentinel.
    pub const UNSYNCED: Self = Self(0);

    /// Creates a watermark.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the unsynced sentinel.
    #[must_use]
    pub const fn is_unsynced(self) -> bool {
        self.0 == 0
    }

    /// Parses a decimal watermark.
    pub fn parse(text: &str) -> CoreResult<Self> {
        text.parse::<u64>()
            .map(Self)
            .map_err(|_| CoreError::InvalidWatermark {
                value: text.to_string(),
            })
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Watermark {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Serde adapter for watermarks written as decimal strings.
///
/// Accepts a bare integer on input as well.
pub(crate) mod decimal {
    use super::Watermark;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &Watermark, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Watermark, D::Error> {
        struct DecimalVisitor;

        impl Visitor<'_> for DecimalVisitor {
            type Value = Watermark;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal watermark")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Watermark, E> {
                Watermark::parse(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Watermark, E> {
                Ok(Watermark(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Watermark, E> {
                u64::try_from(v)
                    .map(Watermark)
                    .map_err(|_| E::custom("negative watermark"))
            }
        }

        deserializer.deserialize_any(DecimalVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_unsynced() {
        assert!(Watermark::UNSYNCED.is_unsynced());
        assert!(Watermark::default().is_unsynced());
        assert!(!Watermark::new(1).is_unsynced());
    }

    #[test]
    fn ordering_is_numeric() {
        assert!(Watermark::new(9) < Watermark::new(10));
        assert_eq!(Watermark::new(7).max(Watermark::new(3)), Watermark::new(7));
    }

    #[test]
    fn plain_serde_is_integer() {
        assert_eq!(serde_json::to_string(&Watermark::new(42)).unwrap(), "42");
        let w: Watermark = serde_json::from_str("1700000000").unwrap();
        assert_eq!(w.as_u64(), 1_700_000_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Watermark::parse("12a").is_err());
        assert!(Watermark::parse("-1").is_err());
        assert_eq!(Watermark::parse("0").unwrap(), Watermark::UNSYNCED);
    }
}
