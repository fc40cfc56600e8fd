//! Running parse state, folded over the blocks of a document.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::types::{FragmentType, TextFragment};

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static ARTICLE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:article|art\.)\s+(\d+)").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static PARAGRAPH_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(\d{1,3})\.\s+(.+)$").expect("valid regex"));

/// A block consisting only of a list label: `(a)`, `a)`, `(iv)`, `1.`, `—`.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\(?[0-9]{1,3}[a-z]?\)|\(?[a-z]{1,5}\)|[0-9]{1,3}\.|[-–—•·])$")
        .expect("valid regex")
});

/// Collapse whitespace and apply NFC normalization.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .nfc()
        .collect()
}

/// Article number from a heading such as `Article 12` or `Art. 3a`.
pub fn article_number(heading: &str) -> Option<u32> {
    ARTICLE_NUMBER
        .captures(heading)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Table,
    Note,
}

/// A paragraph-level block of body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub text: String,
    pub kind: BlockKind,
    pub cross_reference: Option<String>,
}

impl Block {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: BlockKind::Text,
            cross_reference: None,
        }
    }
}

/// Structural event in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DocumentTitle(String),
    Section(String),
    SectionSubtitle(String),
    Group(String),
    Article(String),
    ArticleSubtitle(Block),
    Block(Block),
    /// Block from a document without any known layout.
    Untyped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heading {
    Document,
    Section,
    Group,
    Article,
}

/// Accumulator threaded through [`Event`]s.
///
/// Reset rules: a document title clears article, paragraph, section and
/// group; a section clears group and paragraph; a group clears paragraph;
/// an article clears paragraph.
#[derive(Debug, Default)]
pub struct ParseState {
    document_id: Option<String>,
    document: Option<String>,
    article: Option<u32>,
    paragraph: Option<u32>,
    group: Option<String>,
    section: Option<String>,
    /// List label waiting for the block it belongs to.
    pending_marker: Option<String>,
    previous_heading: Option<Heading>,
    fragments: Vec<TextFragment>,
}

impl ParseState {
    pub fn new(document_id: Option<&str>) -> Self {
        Self {
            document_id: document_id.map(ToString::to_string),
            ..Self::default()
        }
    }

    /// Apply one event. Used as the step function of a fold.
    #[must_use]
    pub fn apply(mut self, event: Event) -> Self {
        if !matches!(event, Event::Block(_)) {
            self.flush_marker();
        }

        let heading = match event {
            Event::DocumentTitle(title) => {
                if self.previous_heading == Some(Heading::Document) {
                    self.document = Some(join(self.document.take(), &title));
                } else {
                    self.document = Some(title);
                    self.article = None;
                    self.paragraph = None;
                    self.section = None;
                    self.group = None;
                }
                Some(Heading::Document)
            }
            Event::Section(title) => {
                self.section = Some(title);
                self.group = None;
                self.paragraph = None;
                Some(Heading::Section)
            }
            Event::SectionSubtitle(subtitle) => {
                self.section = Some(join(self.section.take(), &subtitle));
                Some(Heading::Section)
            }
            Event::Group(title) => {
                self.group = Some(title);
                self.paragraph = None;
                Some(Heading::Group)
            }
            Event::Article(heading) => {
                // Headings without a number ("Sole Article") continue the count
                self.article = article_number(&heading)
                    .or_else(|| Some(self.article.map_or(1, |n| n + 1)));
                self.paragraph = None;
                Some(Heading::Article)
            }
            Event::ArticleSubtitle(block) => {
                self.emit(FragmentType::Title, block.text, block.cross_reference);
                None
            }
            Event::Block(block) => {
                self.apply_block(block);
                None
            }
            Event::Untyped(text) => {
                let fragment = TextFragment::untyped(text, self.document_id.as_deref());
                self.fragments.push(fragment);
                None
            }
        };

        self.previous_heading = heading;
        self
    }

    /// Emit anything still pending and return the fragments.
    #[must_use]
    pub fn finish(mut self) -> Vec<TextFragment> {
        self.flush_marker();
        self.fragments
    }

    fn apply_block(&mut self, block: Block) {
        let Block {
            mut text,
            kind,
            cross_reference,
        } = block;

        if kind != BlockKind::Note && LIST_MARKER.is_match(&text) {
            self.pending_marker = Some(match self.pending_marker.take() {
                Some(previous) => format!("{previous} {text}"),
                None => text,
            });
            return;
        }

        if let Some(marker) = self.pending_marker.take() {
            self.emit(FragmentType::List, format!("{marker} {text}"), cross_reference);
            return;
        }

        if kind == BlockKind::Text {
            if let Some(caps) = PARAGRAPH_NUMBER.captures(&text) {
                let number = caps.get(1).and_then(|m| m.as_str().parse().ok());
                let rest = caps.get(2).map(|m| m.as_str().to_string());
                if let (Some(number), Some(rest)) = (number, rest) {
                    self.paragraph = Some(number);
                    text = rest;
                }
            }
        }

        let fragment_type = match kind {
            BlockKind::Text => FragmentType::Text,
            BlockKind::Table => FragmentType::Table,
            BlockKind::Note => FragmentType::Note,
        };
        self.emit(fragment_type, text, cross_reference);
    }

    fn flush_marker(&mut self) {
        if let Some(marker) = self.pending_marker.take() {
            self.emit(FragmentType::List, marker, None);
        }
    }

    fn emit(&mut self, fragment_type: FragmentType, text: String, cross_reference: Option<String>) {
        self.fragments.push(TextFragment {
            text,
            fragment_type,
            cross_reference,
            document_id: self.document_id.clone(),
            document: self.document.clone(),
            article: self.article,
            paragraph: self.paragraph,
            group: self.group.clone(),
            section: self.section.clone(),
        });
    }
}

fn join(current: Option<String>, next: &str) -> String {
    match current {
        Some(current) if !current.is_empty() => format!("{current} {next}"),
        _ => next.to_string(),
    }
}

/// Fold events into fragments.
pub fn fold_events(document_id: Option<&str>, events: impl IntoIterator<Item = Event>) -> Vec<TextFragment> {
    events
        .into_iter()
        .fold(ParseState::new(document_id), ParseState::apply)
        .finish()
}
