//! Namespace and key format checks

use crate::{
    constants::{MAX_KEY_SIZE, MAX_PREFIX_SIZE},
    error::ChainError,
};

/// Namespace must match `^[a-z0-9]{1,256}$`
pub fn check_prefix(prefix: &str) -> Result<(), ChainError> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_SIZE {
        return Err(ChainError::InvalidPrefix(format!(
            "length {} not in 1..={}",
            prefix.len(),
            MAX_PREFIX_SIZE
        )));
    }
    if !prefix
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err(ChainError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

/// Keys allow `/`, `.`, `_` and `-` in addition to the namespace alphabet
pub fn check_key(key: &str) -> Result<(), ChainError> {
    if key.is_empty() || key.len() > MAX_KEY_SIZE {
        return Err(ChainError::InvalidKey(format!(
            "length {} not in 1..={}",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    if !key.bytes().all(|b| {
        b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'/' | b'.' | b'_' | b'-')
    }) {
        return Err(ChainError::InvalidKey(key.to_string()));
    }
    Ok(())
}
