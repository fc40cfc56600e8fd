//! Core types for parsed EUR-Lex documents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Field names of a serialized [`TextFragment`], in order.
///
/// Every fragment serializes all of them, with `null` for missing values,
/// whatever layout the source document used.
pub const FRAGMENT_COLUMNS: [&str; 9] = [
    "text",
    "fragment_type",
    "cross_reference",
    "document_id",
    "document",
    "article",
    "paragraph",
    "group",
    "section",
];

/// Kind of text a fragment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentType {
    Text,
    List,
    Table,
    Note,
    Title,
    /// Produced when the markup uses no known layout.
    Untyped,
}

impl fmt::Display for FragmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::List => "list",
            Self::Table => "table",
            Self::Note => "note",
            Self::Title => "title",
            Self::Untyped => "untyped",
        };
        f.write_str(name)
    }
}

/// One row of parser output.
///
/// `article`, `paragraph`, `group` and `section` are a snapshot of the
/// nearest preceding markers at the point the fragment was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub fragment_type: FragmentType,
    /// Target of the first link inside the block, if any.
    pub cross_reference: Option<String>,
    /// Identifier of the document the fragment was parsed from.
    pub document_id: Option<String>,
    /// Document title.
    pub document: Option<String>,
    pub article: Option<u32>,
    pub paragraph: Option<u32>,
    pub group: Option<String>,
    pub section: Option<String>,
}

impl TextFragment {
    /// Fragment with no hierarchy information.
    pub fn untyped(text: impl Into<String>, document_id: Option<&str>) -> Self {
        Self {
            text: text.into(),
            fragment_type: FragmentType::Untyped,
            cross_reference: None,
            document_id: document_id.map(ToString::to_string),
            document: None,
            article: None,
            paragraph: None,
            group: None,
            section: None,
        }
    }
}
