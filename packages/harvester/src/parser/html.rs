//! HTML parsing for EUR-Lex markup.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::registry::{ClassRegistry, Layout, Marker};
use super::state::{fold_events, normalize_text, Block, BlockKind, Event};
use super::ParseOutcome;

#[allow(clippy::expect_used)] // Static selector that is guaranteed to be valid
static PARAGRAPH: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("valid selector"));

#[allow(clippy::expect_used)] // Static selector that is guaranteed to be valid
static CLASSED: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[class]").expect("valid selector"));

#[allow(clippy::expect_used)] // Static selector that is guaranteed to be valid
static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Detect the layout of an HTML document.
///
/// Layouts are tried in [`Layout::DETECTION_ORDER`]; the first one that
/// registers a marker for any class in the document wins.
///
/// # Examples
/// ```
/// use eurlex_harvester::parser::{detect_layout, Layout};
///
/// assert_eq!(detect_layout(r#"<p class="oj-normal">x</p>"#), Some(Layout::OfficialJournal));
/// assert_eq!(detect_layout(r#"<p class="normal">x</p>"#), Some(Layout::Legacy));
/// assert_eq!(detect_layout("<p>x</p>"), None);
/// ```
#[must_use]
pub fn detect_layout(html: &str) -> Option<Layout> {
    detect_in(&Html::parse_document(html))
}

/// True when the markup uses a known layout and at least one of its
/// blocks carries content.
#[must_use]
pub fn has_structural_content(html: &str) -> bool {
    let document = Html::parse_document(html);
    detect_in(&document)
        .is_some_and(|layout| !structured_events(&document, &layout.registry()).is_empty())
}

fn detect_in(document: &Html) -> Option<Layout> {
    let classes: HashSet<&str> = document
        .select(&CLASSED)
        .flat_map(|el| el.value().classes())
        .collect();

    Layout::DETECTION_ORDER.into_iter().find(|layout| {
        let registry = layout.registry();
        classes.iter().any(|class| registry.has_marker(class))
    })
}

/// Parse EUR-Lex HTML into fragments.
///
/// Malformed or empty markup gives zero fragments. Markup without any
/// known layout gives one untyped fragment per paragraph, with every
/// hierarchy field `None`.
pub fn parse_html(html: &str, document_id: Option<&str>) -> ParseOutcome {
    let document = Html::parse_document(html);
    let layout = detect_in(&document);

    let events = match layout {
        Some(layout) => structured_events(&document, &layout.registry()),
        None => untyped_events(&document),
    };
    let fragments = fold_events(document_id, events);

    tracing::debug!(
        document_id,
        layout = ?layout,
        fragments = fragments.len(),
        "Parsed HTML"
    );

    ParseOutcome {
        fragments,
        layout,
        error: None,
    }
}

fn block_text(element: ElementRef<'_>) -> String {
    normalize_text(&element.text().collect::<String>())
}

fn cross_reference(element: ElementRef<'_>) -> Option<String> {
    element
        .select(&LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(ToString::to_string)
}

fn in_table(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().name() == "table")
}

fn structured_events(document: &Html, registry: &ClassRegistry) -> Vec<Event> {
    document
        .select(&PARAGRAPH)
        .filter_map(|element| {
            let marker = registry.marker_for(element.value().classes())?;
            let text = block_text(element);
            if text.is_empty() {
                return None;
            }

            let block = |kind| Block {
                text: text.clone(),
                kind,
                cross_reference: cross_reference(element),
            };

            let event = match marker {
                Marker::DocumentTitle => Event::DocumentTitle(text.clone()),
                Marker::ArticleTitle => Event::Article(text.clone()),
                Marker::ArticleSubtitle => Event::ArticleSubtitle(block(BlockKind::Text)),
                Marker::SectionTitle => Event::Section(text.clone()),
                Marker::SectionSubtitle => Event::SectionSubtitle(text.clone()),
                Marker::GroupTitle => Event::Group(text.clone()),
                Marker::Text if in_table(element) => Event::Block(block(BlockKind::Table)),
                Marker::Text => Event::Block(block(BlockKind::Text)),
                Marker::Note => Event::Block(block(BlockKind::Note)),
            };
            Some(event)
        })
        .collect()
}

fn untyped_events(document: &Html) -> Vec<Event> {
    document
        .select(&PARAGRAPH)
        .map(block_text)
        .filter(|text| !text.is_empty())
        .map(Event::Untyped)
        .collect()
}
