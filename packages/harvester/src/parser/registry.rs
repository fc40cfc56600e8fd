//! Class registry mapping layout CSS classes to structural markers.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

/// What a paragraph-level block means for the document structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    DocumentTitle,
    ArticleTitle,
    ArticleSubtitle,
    SectionTitle,
    SectionSubtitle,
    GroupTitle,
    Text,
    Note,
}

/// Known EUR-Lex markup families, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Current Official Journal layout (`oj-` classes).
    OfficialJournal,
    /// Pre-2014 layout (`ti-art`, `normal`, ...).
    Legacy,
    /// Commission proposal layout (`Titrearticle`, `Normal`, ...).
    Proposal,
}

impl Layout {
    /// All layouts in the order they are tried.
    pub const DETECTION_ORDER: [Layout; 3] = [Self::OfficialJournal, Self::Legacy, Self::Proposal];

    /// Registry for this layout.
    #[must_use]
    pub fn registry(self) -> ClassRegistry {
        match self {
            Self::OfficialJournal => create_official_journal_registry(),
            Self::Legacy => create_legacy_registry(),
            Self::Proposal => create_proposal_registry(),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OfficialJournal => "official_journal",
            Self::Legacy => "legacy",
            Self::Proposal => "proposal",
        };
        f.write_str(name)
    }
}

/// Registry mapping class names to markers.
///
/// Skipped classes take precedence over markers, so a block carrying both
/// a skipped and a registered class is dropped.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    markers: HashMap<String, Marker>,
    skip_classes: HashSet<String>,
}

impl ClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a marker for a class name.
    pub fn register(&mut self, class: impl Into<String>, marker: Marker) {
        self.markers.insert(class.into(), marker);
    }

    /// Mark classes as skip.
    pub fn skip(&mut self, classes: impl IntoIterator<Item = impl Into<String>>) {
        for class in classes {
            self.skip_classes.insert(class.into());
        }
    }

    /// Marker for an element carrying `classes`.
    ///
    /// Returns `None` if any class is skipped or none is registered. When
    /// several classes are registered the first one wins.
    pub fn marker_for<'c>(&self, classes: impl IntoIterator<Item = &'c str>) -> Option<Marker> {
        let mut found = None;
        for class in classes {
            if self.skip_classes.contains(class) {
                return None;
            }
            if found.is_none() {
                found = self.markers.get(class).copied();
            }
        }
        found
    }

    #[must_use]
    pub fn should_skip(&self, class: &str) -> bool {
        self.skip_classes.contains(class)
    }

    #[must_use]
    pub fn has_marker(&self, class: &str) -> bool {
        self.markers.contains_key(class)
    }

    /// True when a class is known to this layout, registered or skipped.
    #[must_use]
    pub fn recognizes(&self, class: &str) -> bool {
        self.has_marker(class) || self.should_skip(class)
    }
}

/// Registry for the current Official Journal layout.
#[must_use]
pub fn create_official_journal_registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();

    registry.register("oj-doc-ti", Marker::DocumentTitle);
    registry.register("oj-ti-art", Marker::ArticleTitle);
    registry.register("oj-sti-art", Marker::ArticleSubtitle);
    registry.register("oj-ti-section-1", Marker::SectionTitle);
    registry.register("oj-ti-section-2", Marker::SectionSubtitle);
    registry.register("oj-ti-grseq-1", Marker::GroupTitle);
    registry.register("oj-normal", Marker::Text);
    registry.register("oj-note", Marker::Note);

    // Running headers and page furniture
    registry.skip(["oj-hd-date", "oj-hd-lg", "oj-hd-ti", "oj-hd-oj", "oj-ti-tbl", "oj-signatory"]);

    registry
}

/// Registry for the legacy (pre-OJ-redesign) layout.
#[must_use]
pub fn create_legacy_registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();

    registry.register("doc-ti", Marker::DocumentTitle);
    registry.register("ti-art", Marker::ArticleTitle);
    registry.register("sti-art", Marker::ArticleSubtitle);
    registry.register("ti-section-1", Marker::SectionTitle);
    registry.register("ti-section-2", Marker::SectionSubtitle);
    registry.register("ti-grseq-1", Marker::GroupTitle);
    registry.register("normal", Marker::Text);
    registry.register("note", Marker::Note);

    registry.skip(["hd-date", "hd-lg", "hd-ti", "hd-oj", "signatory"]);

    registry
}

/// Registry for Commission proposals (COM documents).
#[must_use]
pub fn create_proposal_registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();

    registry.register("Titreobjet", Marker::DocumentTitle);
    registry.register("Typedudocument", Marker::DocumentTitle);
    registry.register("Titrearticle", Marker::ArticleTitle);
    registry.register("ChapterTitle", Marker::SectionTitle);
    registry.register("SectionTitle", Marker::GroupTitle);
    for class in [
        "Normal",
        "ManualNumPar1",
        "ManualNumPar2",
        "Point0",
        "Point1",
        "Text1",
        "Considrant",
    ] {
        registry.register(class, Marker::Text);
    }
    registry.register("Footnote", Marker::Note);

    // Signature block and date line
    registry.skip(["Fait", "Institutionquisigne", "Personnequisigne"]);

    registry
}
