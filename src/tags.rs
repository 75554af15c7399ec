//! Tag data and inventory report types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw tag memory contents (EPC, TID, match data, challenge, write payload)
///
/// Serialized and displayed as upper-case hex so persisted files and console
/// output read the same way reader tooling prints EPCs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagData(Vec<u8>);

impl TagData {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse hex, ignoring whitespace and `-` separators.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let cleaned: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        hex::decode(cleaned).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }

    /// Hex grouped in 16-bit words, e.g. `A1B1 C1D1 E1F1`
    pub fn to_hex_words(&self) -> String {
        self.0
            .chunks(2)
            .map(hex::encode_upper)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bit_len(&self) -> usize {
        self.0.len() * 8
    }

    /// Number of 16-bit words, rounding up
    pub fn word_len(&self) -> usize {
        self.0.len().div_ceil(2)
    }

    /// Compare `mask` against this data starting at `bit_pointer`.
    pub fn matches_at(&self, bit_pointer: u16, mask: &TagData) -> bool {
        let start = bit_pointer as usize;
        if start + mask.bit_len() > self.bit_len() {
            return false;
        }
        (0..mask.bit_len()).all(|i| bit_at(&self.0, start + i) == bit_at(&mask.0, i))
    }
}

fn bit_at(bytes: &[u8], index: usize) -> bool {
    bytes[index / 8] & (0x80 >> (index % 8)) != 0
}

impl fmt::Display for TagData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for TagData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<Vec<u8>> for TagData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for TagData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TagData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TagData::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// One tag observation inside a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRead {
    pub epc: TagData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<TagData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_rssi_dbm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antenna_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
}

impl TagRead {
    pub fn new(epc: TagData) -> Self {
        Self {
            epc,
            tid: None,
            peak_rssi_dbm: None,
            antenna_port: None,
            first_seen: None,
        }
    }
}

/// Tags seen in one inventory cycle, in reader order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagReport {
    pub tags: Vec<TagRead>,
}

impl TagReport {
    pub fn new(tags: Vec<TagRead>) -> Self {
        Self { tags }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_parsing_is_lenient_about_separators() {
        let data = TagData::from_hex("a1b1 c1d1-e1f1").unwrap();
        assert_eq!(data.as_bytes(), &[0xA1, 0xB1, 0xC1, 0xD1, 0xE1, 0xF1]);
        assert_eq!(data.to_hex(), "A1B1C1D1E1F1");
        assert_eq!(data.to_hex_words(), "A1B1 C1D1 E1F1");
        assert_eq!(data.bit_len(), 48);
        assert_eq!(data.word_len(), 3);
    }

    #[test]
    fn test_invalid_hex_rejected() {
        assert!(TagData::from_hex("F00").is_err());
        assert!(TagData::from_hex("ZZ").is_err());
    }

    #[test]
    fn test_matches_at_bit_offsets() {
        let epc = TagData::from_hex("F00DC018DCDF").unwrap();
        assert!(epc.matches_at(0, &TagData::from_hex("F00D").unwrap()));
        assert!(epc.matches_at(16, &TagData::from_hex("C018").unwrap()));
        // 0xF00D shifted by four bits starts with 0x00D...
        assert!(epc.matches_at(4, &TagData::from_hex("00").unwrap()));
        assert!(!epc.matches_at(0, &TagData::from_hex("F00E").unwrap()));
        assert!(!epc.matches_at(40, &TagData::from_hex("DFDF").unwrap()));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let read = TagRead::new(TagData::from_hex("300833B2DDD9014000000000").unwrap());
        let json = serde_json::to_string(&read).unwrap();
        assert_eq!(json, r#"{"epc":"300833B2DDD9014000000000"}"#);
        let back: TagRead = serde_json::from_str(&json).unwrap();
        assert_eq!(back, read);
    }
}
