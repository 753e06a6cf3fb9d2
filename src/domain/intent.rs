use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of handling strategies for a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    DocumentationQuery,
    DataQuery,
    ActionRequest,
    StatusCheck,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::DocumentationQuery,
        Intent::DataQuery,
        Intent::ActionRequest,
        Intent::StatusCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::DocumentationQuery => "documentation-query",
            Intent::DataQuery => "data-query",
            Intent::ActionRequest => "action-request",
            Intent::StatusCheck => "status-check",
        }
    }

    /// Lenient label parsing: case, quotes, separators and trailing
    /// punctuation are ignored. Returns `None` for anything outside the set.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();

        Intent::ALL
            .into_iter()
            .find(|intent| intent.as_str() == normalized)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
