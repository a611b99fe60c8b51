//! Document store request and result types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object stored in a collection.
pub type Document = Map<String, Value>;

/// Top-level equality filter; an empty filter matches every document.
pub type Filter = Map<String, Value>;

/// Update operators accepted by the document store.
pub const UPDATE_OPERATORS: [&str; 3] = ["$set", "$unset", "$inc"];

/// Result of an update call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

impl std::fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} document(s) have been updated", self.modified)
    }
}

/// Returns true when every field in `filter` equals the same field in `doc`.
pub fn filter_matches(filter: &Filter, doc: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}
