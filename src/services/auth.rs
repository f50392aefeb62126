//! Shared-secret API key check guarding mutating operations.

use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("api key header missing")]
    Missing,
    #[error("api key not recognised")]
    Invalid,
}

/// Capability check for API keys. Swappable for a richer scheme without
/// touching the gateway core.
pub trait KeyValidator: Send + Sync {
    fn is_valid_key(&self, key: &str) -> bool;
}

/// A fixed set of keys, usually read from the comma-separated `API_KEY`
/// environment variable. An empty set accepts nothing.
#[derive(Debug, Default, Clone)]
pub struct StaticKeys {
    keys: HashSet<String>,
}

impl StaticKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(Into::into)
                .filter(|key: &String| !key.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated list, trimming whitespace around each key.
    pub fn from_csv(raw: &str) -> Self {
        Self::new(raw.split(',').map(str::trim))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyValidator for StaticKeys {
    fn is_valid_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Proof that a request carried a valid key.
///
/// Only [`authorize`] can build one, and the gateway's mutating operations
/// require it.
#[derive(Debug, Clone)]
pub struct Authorized {
    _private: (),
}

pub fn authorize(validator: &dyn KeyValidator, key: Option<&str>) -> Result<Authorized, AuthError> {
    let key = key.filter(|k| !k.is_empty()).ok_or(AuthError::Missing)?;
    if validator.is_valid_key(key) {
        Ok(Authorized { _private: () })
    } else {
        Err(AuthError::Invalid)
    }
}

#[cfg(test)]
impl Authorized {
    pub fn for_tests() -> Self {
        Self { _private: () }
    }
}
