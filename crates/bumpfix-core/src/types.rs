//! Value types shared by the core and the engine: diagnostics, model
//! replacements and package upgrades.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One build/type-check diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildError {
    pub path: PathBuf,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// A diagnostic attached to a seed plan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl From<&BuildError> for ErrorMessage {
    fn from(err: &BuildError) -> Self {
        ErrorMessage {
            message: err.message.clone(),
            line: err.line,
            column: err.column,
        }
    }
}

/// One proposed textual substitution, scoped to the block of its plan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replacement {
    pub old_code: String,
    pub new_code: String,
    pub reason: String,
}

impl Replacement {
    pub fn new(
        old_code: impl Into<String>,
        new_code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            old_code: old_code.into(),
            new_code: new_code.into(),
            reason: reason.into(),
        }
    }
}

/// What the model returns for one plan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementsResult {
    pub replacements: Vec<Replacement>,
    pub commit_message: String,
}

impl ReplacementsResult {
    /// An empty result explaining why nothing was proposed.
    pub fn empty(commit_message: impl Into<String>) -> Self {
        Self {
            replacements: Vec::new(),
            commit_message: commit_message.into(),
        }
    }
}

/// A major-version upgrade of one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageUpgrade {
    pub package_name: String,
    pub new_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_uses_camel_case_on_the_wire() {
        let parsed: ReplacementsResult = serde_json::from_str(
            r#"{"replacements":[{"oldCode":"a","newCode":"b","reason":"r"}],"commitMessage":"fix: a"}"#,
        )
        .unwrap();
        assert_eq!(parsed.replacements, vec![Replacement::new("a", "b", "r")]);
        assert_eq!(parsed.commit_message, "fix: a");
    }

    #[test]
    fn error_message_from_build_error() {
        let err = BuildError {
            path: PathBuf::from("src/a.ts"),
            line: 3,
            column: 7,
            message: "oldFn is not a function".into(),
        };
        let msg = ErrorMessage::from(&err);
        assert_eq!(msg.line, 3);
        assert_eq!(msg.column, 7);
        assert_eq!(msg.message, "oldFn is not a function");
    }
}
