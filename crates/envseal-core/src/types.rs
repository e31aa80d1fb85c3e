use serde::{Deserialize, Serialize};

use crate::error::EnvsealError;

/// Schema versions of the structured envelope header.
///
/// The headerless legacy format has no number and is not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum SchemaVersion {
    /// AES-256-GCM, body is the base64 text of the ciphertext
    V1,
    /// AES-256-GCM, raw body, explicit 16-byte tag (current value default)
    V2,
    /// AES-256-GCM chunked file format with chained IVs
    V3,
}

impl SchemaVersion {
    pub fn number(self) -> u64 {
        match self {
            SchemaVersion::V1 => 1,
            SchemaVersion::V2 => 2,
            SchemaVersion::V3 => 3,
        }
    }

    /// Versions that may be chosen for new in-memory values.
    pub fn is_value_write_version(self) -> bool {
        matches!(self, SchemaVersion::V1 | SchemaVersion::V2)
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        SchemaVersion::V2
    }
}

impl TryFrom<u64> for SchemaVersion {
    type Error = EnvsealError;

    fn try_from(n: u64) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(SchemaVersion::V1),
            2 => Ok(SchemaVersion::V2),
            3 => Ok(SchemaVersion::V3),
            other => Err(EnvsealError::UnsupportedVersion(other)),
        }
    }
}

impl From<SchemaVersion> for u64 {
    fn from(v: SchemaVersion) -> u64 {
        v.number()
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_roundtrip() {
        for v in [SchemaVersion::V1, SchemaVersion::V2, SchemaVersion::V3] {
            assert_eq!(SchemaVersion::try_from(v.number()).unwrap(), v);
        }
    }

    #[test]
    fn unknown_number_is_unsupported() {
        assert!(matches!(
            SchemaVersion::try_from(7),
            Err(EnvsealError::UnsupportedVersion(7))
        ));
        assert!(SchemaVersion::try_from(0).is_err());
    }

    #[test]
    fn only_v1_v2_are_value_writes() {
        assert!(SchemaVersion::V1.is_value_write_version());
        assert!(SchemaVersion::V2.is_value_write_version());
        assert!(!SchemaVersion::V3.is_value_write_version());
        assert_eq!(SchemaVersion::default(), SchemaVersion::V2);
    }
}
