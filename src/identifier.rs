//! Bin and connection identifiers.
//!
//! A [`BinId`] is the only thing standing between a URL segment and a
//! storage key, so the type can only be obtained through [`BinId::generate`]
//! or [`BinId::parse`], both of which guarantee the 10 hex digit grammar.
//! Collisions between independently generated ids are not checked; two
//! bins that draw the same id share one history.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Number of characters in a bin identifier.
pub const BIN_ID_LEN: usize = 10;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

static BIN_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{10}$").expect("static bin id pattern"));

static CONNECTION_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,20}(-[0-9a-f]{8})?$").expect("static connection id pattern"));

/// Canonical (uppercase) bin identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinId(String);

impl BinId {
    /// Draws 10 digits uniformly from `0-9A-F`.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let id = (0..BIN_ID_LEN)
            .map(|_| HEX_DIGITS[rng.random_range(0..HEX_DIGITS.len())] as char)
            .collect();
        BinId(id)
    }

    /// Accepts exactly 10 hex digits in any case and returns the uppercase
    /// form. Anything else, including the empty string, yields `None`.
    pub fn parse(candidate: &str) -> Option<Self> {
        if BIN_ID_PATTERN.is_match(candidate) {
            Some(BinId(candidate.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BinId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for BinId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Groups the events of one WebSocket connection inside a bin.
///
/// Minted from the connection's open time plus a short random suffix so two
/// connections opened in the same millisecond do not share a sub-stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn mint(opened_at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        ConnectionId(format!("{}-{}", opened_at.timestamp_millis(), &suffix[..8]))
    }

    /// Only names this module could have minted are accepted; anything else
    /// found in a bin's socket area (temporary files included) is ignored.
    pub fn parse(candidate: &str) -> Option<Self> {
        if CONNECTION_ID_PATTERN.is_match(candidate) {
            Some(ConnectionId(candidate.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_canonicalizes_to_uppercase() {
        let id = BinId::parse("abcdef0123").unwrap();
        assert_eq!(id.as_str(), "ABCDEF0123");
        assert_eq!(BinId::parse("AbCdEf0123").unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        for candidate in [
            "",
            "not-an-id",
            "ABCDEF012",
            "ABCDEF01234",
            "ABCDEF012G",
            " ABCDEF0123",
            "ABCDEF0123\n",
            "ABCDE/0123",
            "../../etc/",
        ] {
            assert!(BinId::parse(candidate).is_none(), "accepted {:?}", candidate);
        }
    }

    #[test]
    fn test_generate_is_parseable() {
        for _ in 0..256 {
            let id = BinId::generate();
            assert_eq!(id.as_str().len(), BIN_ID_LEN);
            assert_eq!(BinId::parse(id.as_str()), Some(id));
        }
    }

    #[test]
    fn test_connection_id_roundtrip() {
        let id = ConnectionId::mint(Utc::now());
        assert_eq!(ConnectionId::parse(id.as_str()), Some(id));
        assert!(ConnectionId::parse("1380000000000").is_some());
        assert!(ConnectionId::parse(".tmpA1b2C3").is_none());
        assert!(ConnectionId::parse("../ABCDEF0123").is_none());
    }

    proptest! {
        #[test]
        fn prop_hex_strings_parse_to_uppercase(candidate in "[0-9A-Fa-f]{10}") {
            let id = BinId::parse(&candidate).unwrap();
            prop_assert_eq!(id.as_str(), candidate.to_ascii_uppercase());
        }

        #[test]
        fn prop_other_strings_are_rejected(candidate in "\\PC{0,16}") {
            let is_valid = candidate.len() == BIN_ID_LEN
                && candidate.chars().all(|c| c.is_ascii_hexdigit());
            prop_assert_eq!(BinId::parse(&candidate).is_some(), is_valid);
        }
    }
}
