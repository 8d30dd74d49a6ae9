//! MAC address normalization
//!
//! Every MAC entering the engine goes through [`Mac::parse`], which accepts
//! the common textual forms (`aa:bb:cc:dd:ee:ff`, `AA-BB-...`, any case,
//! embedded in surrounding text) and canonicalizes them to uppercase
//! colon-separated form. Normalization is total (malformed input yields
//! `None`, never a panic) and idempotent.

use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Canonical textual length: six hex pairs plus five separators.
const CANONICAL_LEN: usize = 17;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not a valid MAC address: {0:?}")]
pub struct MacParseError(pub String);

/// A canonicalized IEEE 802 48-bit MAC address.
///
/// The inner string is always exactly twelve uppercase hex digits separated
/// by colons. Construction only happens through [`Mac::parse`] (or the
/// `FromStr`/`Deserialize` impls built on it), so two `Mac`s compare equal
/// iff they denote the same address.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Mac(String);

impl Mac {
    /// Scan `text` for the first MAC address and return it canonicalized.
    ///
    /// Returns `None` when no MAC is present. Idempotent: parsing an
    /// already-canonical MAC yields the same value.
    pub fn parse(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        if bytes.len() < CANONICAL_LEN {
            return None;
        }
        (0..=bytes.len() - CANONICAL_LEN).find_map(|i| Self::match_window(&bytes[i..i + CANONICAL_LEN]))
    }

    /// Try to read a MAC from exactly one 17-byte window.
    fn match_window(window: &[u8]) -> Option<Self> {
        let mut canonical = String::with_capacity(CANONICAL_LEN);
        for (i, &b) in window.iter().enumerate() {
            if i % 3 == 2 {
                if b != b':' && b != b'-' {
                    return None;
                }
                canonical.push(':');
            } else {
                if !b.is_ascii_hexdigit() {
                    return None;
                }
                canonical.push(b.to_ascii_uppercase() as char);
            }
        }
        Some(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address without separators, e.g. for compact identifiers.
    pub fn flat(&self) -> String {
        self.0.chars().filter(|c| *c != ':').collect()
    }
}

impl FromStr for Mac {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| MacParseError(s.to_string()))
    }
}

impl std::fmt::Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mac({})", self.0)
    }
}

impl<'de> Deserialize<'de> for Mac {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Mac::parse(&raw).ok_or_else(|| serde::de::Error::custom(MacParseError(raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lowercase_colons() {
        let mac = Mac::parse("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(mac.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_parse_dashes_mixed_case() {
        let mac = Mac::parse("Aa-bB-CC-dd-EE-ff").unwrap();
        assert_eq!(mac.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_parse_embedded_in_text() {
        let mac = Mac::parse("lladdr 00:11:22:33:44:55 REACHABLE").unwrap();
        assert_eq!(mac.as_str(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_parse_idempotent() {
        let first = Mac::parse("de:ad:be:ef:00:01").unwrap();
        let second = Mac::parse(first.as_str()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Mac::parse("").is_none());
        assert!(Mac::parse("not a mac").is_none());
        assert!(Mac::parse("aa:bb:cc:dd:ee").is_none());
        assert!(Mac::parse("gg:hh:ii:jj:kk:ll").is_none());
        assert!(Mac::parse("192.168.1.1").is_none());
    }

    #[test]
    fn test_parse_total_on_non_ascii() {
        assert!(Mac::parse("caf\u{e9} caf\u{e9} caf\u{e9} caf\u{e9}").is_none());
    }

    #[test]
    fn test_flat() {
        let mac = Mac::parse("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(mac.flat(), "AABBCCDDEEFF");
    }

    #[test]
    fn test_from_str() {
        assert!("aa:bb:cc:dd:ee:ff".parse::<Mac>().is_ok());
        assert!("bogus".parse::<Mac>().is_err());
    }
}
