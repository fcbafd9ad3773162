//! Stable content-derived identifiers for code units.
//!
//! A [`CodeUnitId`] is the hex blake3 digest of `"{path}:{kind}:{name}"`.
//! The same logical code unit maps to the same id across graph rebuilds,
//! which is what lets diagnostics landing on one unit merge into one plan
//! node and lets the plan graph join against the dependency graph.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Identity of one code unit (class, function, variable or import statement).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeUnitId(String);

impl CodeUnitId {
    /// Derives the id of a code unit from its file path, syntactic kind and
    /// name.
    ///
    /// Deterministic: the same triple always produces the same id.
    pub fn derive(path: &Path, kind: &str, name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(b":");
        hasher.update(kind.as_bytes());
        hasher.update(b":");
        hasher.update(name.as_bytes());
        CodeUnitId(hasher.finalize().to_hex().to_string())
    }

    /// Wraps an id produced elsewhere (for example by an AST collaborator
    /// that already hashes units itself).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        CodeUnitId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First six characters, for log lines.
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(6)
            .map_or(self.0.as_str(), |(end, _)| &self.0[..end])
    }
}

impl fmt::Display for CodeUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CodeUnitId {
    fn from(raw: &str) -> Self {
        CodeUnitId(raw.to_string())
    }
}
