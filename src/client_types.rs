//! Client type table.
//!
//! Maps short type codes (what clients send with `TP`) to human-readable
//! labels. The [`WILDCARD_TYPE`] key means "accept anything" and turns the
//! verification requirement off by default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::WILDCARD_TYPE;

/// Code → label mapping for declarable client types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientTypes(BTreeMap<String, String>);

impl ClientTypes {
    /// Empty table: no declaration can succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table that accepts any declared type.
    #[must_use]
    pub fn any() -> Self {
        Self::from_pairs([(WILDCARD_TYPE, "*")])
    }

    /// Instrument types shipped with the hub.
    #[must_use]
    pub fn lab_defaults() -> Self {
        Self::from_pairs([
            ("TRG", "ezNirsTrigger client"),
            ("EXP", "experiment client"),
            ("DYE", "dynamic scrolling client"),
            ("VP", "video player client"),
            ("RST", "resting state client"),
            ("ADO", "ezAutoDo client"),
        ])
    }

    /// Build a table from `(code, label)` pairs.
    pub fn from_pairs<I, C, L>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, L)>,
        C: Into<String>,
        L: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(code, label)| (code.into(), label.into()))
                .collect(),
        )
    }

    /// Whether the wildcard entry is present.
    pub fn accepts_any(&self) -> bool {
        self.0.contains_key(WILDCARD_TYPE)
    }

    /// Whether `code` is a declarable type (the wildcard key itself is not).
    pub fn contains(&self, code: &str) -> bool {
        code != WILDCARD_TYPE && self.0.contains_key(code)
    }

    /// Label for `code`.
    pub fn label(&self, code: &str) -> Option<&str> {
        self.0.get(code).map(String::as_str)
    }

    /// Add or overwrite entries from `other`.
    pub fn merge(&mut self, other: ClientTypes) {
        self.0.extend(other.0);
    }

    /// Remove `code`. Returns whether it was present.
    pub fn remove(&mut self, code: &str) -> bool {
        self.0.remove(code).is_some()
    }

    /// Iterate `(code, label)` in code order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, l)| (c.as_str(), l.as_str()))
    }

    /// Number of entries, wildcard included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_is_not_a_declarable_code() {
        let types = ClientTypes::any();
        assert!(types.accepts_any());
        assert!(!types.contains(WILDCARD_TYPE));
    }

    #[test]
    fn test_merge_and_remove() {
        let mut types = ClientTypes::from_pairs([("TRG", "trigger")]);
        types.merge(ClientTypes::from_pairs([("EXP", "experiment"), ("TRG", "trigger box")]));

        assert_eq!(types.label("TRG"), Some("trigger box"));
        assert!(types.contains("EXP"));
        assert!(types.remove("EXP"));
        assert!(!types.remove("EXP"));
        assert_eq!(types.len(), 1);
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let types = ClientTypes::from_pairs([("TRG", "trigger")]);
        let json = serde_json::to_string(&types).unwrap();
        assert_eq!(json, r#"{"TRG":"trigger"}"#);

        let back: ClientTypes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, types);
    }
}
