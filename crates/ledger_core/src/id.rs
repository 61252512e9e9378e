//! Record identifiers.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Positions of the hyphens in the 8-4-4-4-12 text form.
const HYPHENS: [usize; 4] = [8, 13, 18, 23];
/// Position of the version nibble.
const VERSION_POS: usize = 14;
/// Position of the variant nibble.
const VARIANT_POS: usize = 19;
/// Length of the canonical text form.
const TEXT_LEN: usize = 36;

/// A globally unique record identifier.
///
/// Identifiers are assigned on the client when a record is created and never
/// change afterwards, including after soft deletion. They use the UUID
/// version-4 layout: 122 random bits with the version nibble fixed to `4` and
/// the variant bits fixed to `10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Sorts before every generated identifier. Only useful as a range bound.
    pub const MIN: Self = Self(Uuid::nil());

    /// Generates a fresh random identifier.
    ///
    /// Draws from the operating system's random source; no shared state.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the canonical hyphenated form.
    ///
    /// Accepts hex digits in either case. Braced, URN and simple forms are
    /// rejected, as are well-formed UUIDs of another version or variant.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let bytes = text.as_bytes();
        if bytes.len() != TEXT_LEN {
            return Err(CoreError::invalid_id(text));
        }

        for (pos, &b) in bytes.iter().enumerate() {
            let ok = if HYPHENS.contains(&pos) {
                b == b'-'
            } else {
                b.is_ascii_hexdigit()
            };
            if !ok {
                return Err(CoreError::invalid_id(text));
            }
        }

        if bytes[VERSION_POS] != b'4' {
            return Err(CoreError::invalid_id(text));
        }
        if !matches!(bytes[VARIANT_POS], b'8' | b'9' | b'a' | b'b' | b'A' | b'B') {
            return Err(CoreError::invalid_id(text));
        }

        Uuid::parse_str(text)
            .map(Self)
            .map_err(|_| CoreError::invalid_id(text))
    }

    /// Returns the raw 16 bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RecordId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn generated_ids_are_v4() {
        let id = RecordId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(&text[14..15], "4");
        assert!("89ab".contains(&text[19..20]));
    }

    #[test]
    fn generated_ids_differ() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn parse_accepts_uppercase_and_prints_lowercase() {
        let id = RecordId::parse("6BA7B810-9DAD-41D1-80B4-00C04FD430C8").unwrap();
        assert_eq!(id.to_string(), "6ba7b810-9dad-41d1-80b4-00c04fd430c8");
    }

    #[test]
    fn parse_rejects_other_forms() {
        let rejected = [
            "",
            "6ba7b8109dad41d180b400c04fd430c8",
            "{6ba7b810-9dad-41d1-80b4-00c04fd430c8}",
            "urn:uuid:6ba7b810-9dad-41d1-80b4-00c04fd430c8",
            "6ba7b810-9dad-11d1-80b4-00c04fd430c8", // version 1
            "6ba7b810-9dad-41d1-c0b4-00c04fd430c8", // wrong variant
            "6ba7b810-9dad-41d1-80b4-00c04fd430cg",
            "6ba7b810_9dad-41d1-80b4-00c04fd430c8",
        ];
        for text in rejected {
            assert!(RecordId::parse(text).is_err(), "accepted {text:?}");
        }
    }

    #[test]
    fn serde_uses_text_form() {
        let id = RecordId::parse("6ba7b810-9dad-41d1-80b4-00c04fd430c8").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"6ba7b810-9dad-41d1-80b4-00c04fd430c8\"");

        let back: RecordId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<RecordId>("\"not-an-id\"").is_err());
    }

    proptest! {
        #[test]
        fn generated_ids_parse_back(_seed in any::<u8>()) {
            let id = RecordId::generate();
            prop_assert_eq!(RecordId::parse(&id.to_string()).unwrap(), id);
        }

        #[test]
        fn arbitrary_text_never_panics(text in "\\PC{0,40}") {
            let _ = RecordId::parse(&text);
        }

        #[test]
        fn only_version_four_accepted(bytes in any::<[u8; 16]>()) {
            let text = Uuid::from_bytes(bytes).hyphenated().to_string();
            let version_ok = bytes[6] >> 4 == 4;
            let variant_ok = bytes[8] >> 6 == 0b10;
            prop_assert_eq!(RecordId::parse(&text).is_ok(), version_ok && variant_ok);
        }
    }
}
