//! Plain-text parsing for scanned documents and inline paragraph splitting.

use std::sync::LazyLock;

use regex::Regex;

use super::state::{fold_events, normalize_text, Block, Event};
use super::ParseOutcome;

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static ARTICLE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:article|art\.)\s+\d+[a-z]?$").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static SECTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:chapter|title|part)\s+(?:[ivxlc]+|\d+)\b").expect("valid regex")
});

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static GROUP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^section\s+(?:[ivxlc]+|\d+)\b").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static DOCUMENT_TITLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:COUNCIL|COMMISSION|EUROPEAN PARLIAMENT)[A-Z ,]*\s)?(?:REGULATION|DIRECTIVE|DECISION|RECOMMENDATION)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static INLINE_PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(\d{1,3}\.|\(\d{1,3}\))\s+").expect("valid regex"));

/// Longest line still considered a heading.
const MAX_HEADING_LEN: usize = 120;

/// Parse line-ordered text (as extracted from a scanned PDF).
///
/// Heuristics: `Article N` lines open an article, and a short unpunctuated
/// line right after it is the article subtitle; `CHAPTER`, `TITLE` and
/// `PART` lines open a section; `SECTION` lines open a group; an
/// upper-case `REGULATION`/`DIRECTIVE`/... line before the first article is
/// the document title. Other lines are joined into blocks, separated by
/// blank lines or headings.
pub fn parse_text(text: &str, document_id: Option<&str>) -> ParseOutcome {
    let mut events = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut seen_article = false;
    let mut expect_subtitle = false;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            flush(&mut buffer, &mut events);
            continue;
        }

        let short = line.chars().count() <= MAX_HEADING_LEN;
        let heading = if short && ARTICLE_LINE.is_match(line) {
            seen_article = true;
            Some(Event::Article(line.to_string()))
        } else if short && expect_subtitle && !line.ends_with(['.', ';', ':', ',']) {
            Some(Event::ArticleSubtitle(Block::text(normalize_text(line))))
        } else if short && SECTION_LINE.is_match(line) {
            Some(Event::Section(normalize_text(line)))
        } else if short && GROUP_LINE.is_match(line) {
            Some(Event::Group(normalize_text(line)))
        } else if !seen_article && short && DOCUMENT_TITLE_LINE.is_match(line) {
            Some(Event::DocumentTitle(normalize_text(line)))
        } else {
            None
        };

        expect_subtitle = matches!(heading, Some(Event::Article(_)));
        match heading {
            Some(event) => {
                flush(&mut buffer, &mut events);
                events.push(event);
            }
            None => buffer.push(line),
        }
    }
    flush(&mut buffer, &mut events);

    let fragments = fold_events(document_id, events);
    tracing::debug!(document_id, fragments = fragments.len(), "Parsed scanned text");

    ParseOutcome {
        fragments,
        layout: None,
        error: None,
    }
}

fn flush(buffer: &mut Vec<&str>, events: &mut Vec<Event>) {
    let joined = normalize_text(&buffer.join(" "));
    if !joined.is_empty() {
        events.push(Event::Block(Block::text(joined)));
    }
    buffer.clear();
}

/// Split inline-numbered paragraphs (`1. … 2. …` or `(1) … (2) …`).
///
/// Text before the first number gets label `None`; empty parts are dropped.
///
/// # Examples
/// ```
/// use eurlex_harvester::parser::parse_article_paragraphs;
///
/// let parts = parse_article_paragraphs("Intro:     1. First     2. Second");
/// assert_eq!(
///     parts,
///     vec![
///         (None, "Intro:".to_string()),
///         (Some("1.".to_string()), "First".to_string()),
///         (Some("2.".to_string()), "Second".to_string()),
///     ]
/// );
/// ```
#[must_use]
pub fn parse_article_paragraphs(text: &str) -> Vec<(Option<String>, String)> {
    let mut parts = Vec::new();
    let mut label: Option<String> = None;
    let mut start = 0;

    for caps in INLINE_PARAGRAPH.captures_iter(text) {
        let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_part(&mut parts, label.take(), &text[start..whole.start()]);
        label = Some(number.as_str().to_string());
        start = whole.end();
    }
    push_part(&mut parts, label, &text[start..]);

    parts
}

fn push_part(parts: &mut Vec<(Option<String>, String)>, label: Option<String>, body: &str) {
    let body = normalize_text(body);
    if !body.is_empty() || label.is_some() {
        parts.push((label, body));
    }
}
