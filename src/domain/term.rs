use std::{fmt, ops::Deref};

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};

/// A normalized matching term.
///
/// Terms are trimmed, lowercased, and have internal runs of whitespace
/// collapsed to a single space, so that `"  CNC   Machining"` and
/// `"cnc machining"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, BorshSerialize)]
#[serde(from = "String", into = "String")]
pub struct Term(String);

impl Term {
    /// Normalizes a raw label into a term.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let normalized = raw
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        Self(normalized)
    }

    /// Returns the normalized term.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the term is empty after normalization.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the words of the term.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ').filter(|word| !word.is_empty())
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Term {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<Term> for String {
    fn from(value: Term) -> Self {
        value.0
    }
}

impl AsRef<str> for Term {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Term {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
