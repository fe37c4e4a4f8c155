//! Strongly-typed identifiers for labgate

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Identifier parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("Identifier cannot be empty")]
    Empty,

    #[error("Identifier '{0}' contains whitespace")]
    Whitespace(String),
}

/// Stable student identifier (the university code)
///
/// Opaque to the core. Codes that are plain decimal numbers serialize as
/// integers so snapshots keep the numeric form rosters are usually written in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StudentId(String);

impl StudentId {
    pub fn parse(id: impl AsRef<str>) -> Result<Self, IdError> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if id.chars().any(char::is_whitespace) {
            return Err(IdError::Whitespace(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value, when the code is a canonical decimal number
    pub fn as_number(&self) -> Option<u64> {
        self.0
            .parse::<u64>()
            .ok()
            .filter(|n| n.to_string() == self.0)
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StudentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for StudentId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl Serialize for StudentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_number() {
            Some(n) => serializer.serialize_u64(n),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for StudentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self::from(n)),
            Raw::Text(s) => Self::parse(s).map_err(serde::de::Error::custom),
        }
    }
}

/// Session handler: lookup key of a connection and prefix of its rule names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handler(String);

impl Handler {
    /// Length of generated handlers
    pub const LEN: usize = 8;

    /// Generate a fresh random handler (8 lowercase hex characters)
    pub fn generate() -> Self {
        let mut simple = Uuid::new_v4().simple().to_string();
        simple.truncate(Self::LEN);
        Self(simple)
    }

    pub fn new(handler: impl Into<String>) -> Self {
        Self(handler.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Handler {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a connected IPC client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_id_rejects_blank_and_whitespace() {
        assert_eq!(StudentId::parse("  "), Err(IdError::Empty));
        assert!(matches!(
            StudentId::parse("10 01"),
            Err(IdError::Whitespace(_))
        ));
        assert_eq!(StudentId::parse(" 1001 ").unwrap().as_str(), "1001");
    }

    #[test]
    fn numeric_student_id_serializes_as_integer() {
        let id = StudentId::parse("20216256").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "20216256");

        let padded = StudentId::parse("007").unwrap();
        assert_eq!(padded.as_number(), None);
        assert_eq!(serde_json::to_string(&padded).unwrap(), "\"007\"");
    }

    #[test]
    fn student_id_deserializes_from_either_form() {
        let from_int: StudentId = serde_json::from_str("1001").unwrap();
        let from_str: StudentId = serde_json::from_str("\"1001\"").unwrap();
        assert_eq!(from_int, from_str);

        let alpha: StudentId = serde_json::from_str("\"a20-x\"").unwrap();
        assert_eq!(alpha.as_str(), "a20-x");

        assert!(serde_json::from_str::<StudentId>("\"\"").is_err());
    }

    #[test]
    fn generated_handlers_are_short_hex_and_distinct() {
        let h1 = Handler::generate();
        let h2 = Handler::generate();

        assert_eq!(h1.as_str().len(), Handler::LEN);
        assert!(h1.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(h1, h2);
    }
}
