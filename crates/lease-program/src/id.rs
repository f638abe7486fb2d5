//! 32-byte content identifiers for blocks and transactions

use borsh::{BorshDeserialize, BorshSerialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(
    BorshSerialize, BorshDeserialize, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Id(pub [u8; 32]);

impl Id {
    pub const EMPTY: Id = Id([0u8; 32]);

    /// blake3 digest of `bytes`
    pub fn hash(bytes: &[u8]) -> Self {
        Id(*blake3::hash(bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid id: {0}")]
pub struct ParseIdError(pub String);

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| ParseIdError(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParseIdError(format!("expected 32 bytes: {}", s)))?;
        Ok(Id(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse() {
        let id = Id::hash(b"block");
        let parsed: Id = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-base58-0OIl".parse::<Id>().is_err());
        assert!(bs58::encode([1u8; 8]).into_string().parse::<Id>().is_err());
    }

    #[test]
    fn test_parse_error_message() {
        let short = bs58::encode([1u8; 8]).into_string();
        let err = short.parse::<Id>().unwrap_err();
        assert_eq!(err.to_string(), format!("invalid id: expected 32 bytes: {}", short));
        let _: &dyn std::error::Error = &err;
    }
}
