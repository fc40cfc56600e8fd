//! Structural parser.
//!
//! Turns EUR-Lex markup (or text extracted from a scanned PDF) into an
//! ordered list of [`TextFragment`]s, each tagged with the document title,
//! article, paragraph, group and section in force where it appears.
//!
//! Parsing is a single pass: the document is flattened into structural
//! events in document order and folded through a `ParseState`.

mod html;
pub mod registry;
mod state;
mod text;

pub use html::{detect_layout, has_structural_content, parse_html};
pub use registry::{ClassRegistry, Layout, Marker};
pub use state::article_number;
pub use text::{parse_article_paragraphs, parse_text};

use crate::error::{HarvesterError, Result};
use crate::retrieval::{ContentFormat, RetrievedDocument};
use crate::types::TextFragment;

/// Fragments plus how they were obtained.
#[derive(Debug)]
pub struct ParseOutcome {
    pub fragments: Vec<TextFragment>,
    /// Detected markup layout; `None` for untyped markup and scanned text.
    pub layout: Option<Layout>,
    /// Set when nothing could be extracted. `fragments` is then empty.
    pub error: Option<HarvesterError>,
}

impl ParseOutcome {
    /// Empty outcome carrying `UnsupportedFormat`.
    #[must_use]
    pub fn unsupported(identifier: &str) -> Self {
        Self {
            fragments: Vec::new(),
            layout: None,
            error: Some(HarvesterError::UnsupportedFormat(identifier.to_string())),
        }
    }

    /// Fragments, or the error if nothing could be extracted.
    pub fn into_result(self) -> Result<Vec<TextFragment>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.fragments),
        }
    }
}

/// Parse a retrieved document according to its content format.
///
/// Reports `UnsupportedFormat` when no fragment could be extracted.
pub fn parse_retrieved(document: &RetrievedDocument) -> ParseOutcome {
    let id = document.reference.raw_id.as_str();
    let outcome = match document.content.format {
        ContentFormat::Markup => parse_html(&document.content.body, Some(id)),
        ContentFormat::ScannedText => parse_text(&document.content.body, Some(id)),
    };

    if outcome.fragments.is_empty() {
        tracing::warn!(identifier = id, strategy = %document.strategy, "No fragments extracted");
        return ParseOutcome {
            layout: outcome.layout,
            ..ParseOutcome::unsupported(id)
        };
    }
    outcome
}
