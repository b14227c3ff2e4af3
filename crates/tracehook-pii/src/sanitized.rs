//! Sanitized text
//!
//! A `Sanitized` value is text that has already passed through a compiled
//! redaction policy. Records only accept this type for string attributes, so
//! raw payload text cannot end up on a finished record by accident.

use serde::{Serialize, Serializer};
use std::fmt;

/// Text that has been redacted and length-bounded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sanitized {
    text: String,
    redacted: bool,
    truncated: bool,
}

impl Sanitized {
    pub(crate) fn new(text: String, redacted: bool, truncated: bool) -> Self {
        Self {
            text,
            redacted,
            truncated,
        }
    }

    /// Wrap a compile-time constant (status names, semantic convention values)
    pub fn from_static(text: &'static str) -> Self {
        Self::new(text.to_string(), false, false)
    }

    /// Borrow the sanitized text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume into the underlying string
    pub fn into_string(self) -> String {
        self.text
    }

    /// Whether at least one pattern match was replaced
    pub fn was_redacted(&self) -> bool {
        self.redacted
    }

    /// Whether the text was cut to fit the length budget
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of characters in the sanitized text
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

impl fmt::Display for Sanitized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for Sanitized {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl PartialEq<str> for Sanitized {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}

impl PartialEq<&str> for Sanitized {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

impl Serialize for Sanitized {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}
