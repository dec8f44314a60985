//! Nimbus Id - Document Identifier Generation
//!
//! Sortable, collision-resistant 24-hex-character identifiers: the low 32
//! bits of Unix time in seconds, 40 bits of per-call randomness, then a
//! fresh 24-bit draw. Lexicographic order approximates insertion order at
//! second granularity. No uniqueness guarantee is made, but collisions
//! within one host-second are negligible.
//!
//! @version 0.1.0
//! @author Nimbus Development Team

use rand::Rng;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// Object Id
// =============================================================================

/// A generated document identifier: 24 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(String);

impl ObjectId {
    /// Generate a new identifier from the current clock and fresh entropy.
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;

        let mut rng = rand::thread_rng();
        let entropy: u64 = rng.gen::<u64>() & 0xFF_FFFF_FFFF;
        let tail: u32 = rng.gen_range(0..1 << 24);

        Self(format!("{secs:08x}{entropy:010x}{tail:06x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether a string has the shape of a generated identifier.
    pub fn is_valid(s: &str) -> bool {
        s.len() == 24 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

// =============================================================================
// Tests
// =============================================================================
