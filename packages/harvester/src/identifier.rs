//! Identifier classification and resolution.
//!
//! Callers hand in whatever they have: a CELEX ID, a cellar URL, a bare
//! cellar UUID or an Official Journal reference. [`detect_kind`] sorts the
//! input by shape; [`Resolver`] turns it into a [`DocumentReference`] with a
//! fetchable locator, querying the metadata graph only when the mapping
//! cannot be built locally.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::celex::{is_oj_reference, CelexId};
use crate::config::{celex_resource_url, cellar_resource_url, TieBreak};
use crate::error::{HarvesterError, Result};
use crate::http::Transport;
use crate::sparql::{LocatorRow, SparqlClient};

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static CELLAR_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^\s/]+/resource/[A-Za-z_-]+/\S+$").expect("valid regex")
});

/// Cellar UUID, optionally prefixed with `cellar:` and followed by a
/// sub-part suffix (`.0006.03`).
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static CELLAR_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:cellar:)?([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}(?:\.\d{4}(?:\.\d{2})?)?)$",
    )
    .expect("valid regex")
});

/// Shape of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Celex,
    CellarUrl,
    CellarId,
    OjReference,
    Unrecognized,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Celex => "celex",
            Self::CellarUrl => "cellar_url",
            Self::CellarId => "cellar_id",
            Self::OjReference => "oj_reference",
            Self::Unrecognized => "unrecognized",
        };
        f.write_str(name)
    }
}

/// Classify an identifier by its shape. Total: every input gets one kind.
///
/// Checked in order: cellar URL, cellar id, OJ reference, CELEX.
///
/// # Examples
/// ```
/// use eurlex_harvester::identifier::{detect_kind, IdentifierKind};
///
/// assert_eq!(detect_kind("32019R0947"), IdentifierKind::Celex);
/// assert_eq!(detect_kind("C/2026/00064"), IdentifierKind::OjReference);
/// assert_eq!(
///     detect_kind("http://publications.europa.eu/resource/cellar/3b7b2a2c-0000-11e9-8d04-01aa75ed71a1"),
///     IdentifierKind::CellarUrl
/// );
/// assert_eq!(detect_kind("hello"), IdentifierKind::Unrecognized);
/// ```
#[must_use]
pub fn detect_kind(raw: &str) -> IdentifierKind {
    let trimmed = raw.trim();
    if CELLAR_URL_PATTERN.is_match(trimmed) {
        IdentifierKind::CellarUrl
    } else if CELLAR_ID_PATTERN.is_match(trimmed) {
        IdentifierKind::CellarId
    } else if is_oj_reference(trimmed) {
        IdentifierKind::OjReference
    } else if CelexId::parse(trimmed).is_ok() {
        IdentifierKind::Celex
    } else {
        IdentifierKind::Unrecognized
    }
}

/// An always-fetchable repository address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RepositoryLocator(String);

impl RepositoryLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URI of the work, without any cellar sub-part suffix.
    #[must_use]
    pub fn work_uri(&self) -> &str {
        match self.cellar_id() {
            Some(id) => {
                let uuid_len = id.find('.').unwrap_or(id.len());
                let start = self.0.len() - id.len();
                &self.0[..start + uuid_len]
            }
            None => &self.0,
        }
    }

    /// Cellar id (with sub-part suffix) when this is a `/resource/cellar/` URL.
    #[must_use]
    pub fn cellar_id(&self) -> Option<&str> {
        self.0
            .split_once("/resource/cellar/")
            .map(|(_, id)| id)
            .filter(|id| !id.is_empty())
    }

    /// True when the locator points at a cellar work rather than an alias.
    #[must_use]
    pub fn is_cellar(&self) -> bool {
        self.cellar_id().is_some()
    }
}

impl fmt::Display for RepositoryLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of resolving an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentReference {
    pub locator: RepositoryLocator,
    /// `None` when `raw_id` does not follow the CELEX grammar.
    pub celex_id: Option<CelexId>,
    pub raw_id: String,
    /// `None` when the reference was built without a metadata query.
    pub document_date: Option<NaiveDate>,
}

impl DocumentReference {
    /// Reference for a parsed CELEX ID, built without network access.
    #[must_use]
    pub fn from_celex(celex: CelexId, cellar_base: &str) -> Self {
        let raw_id = celex.to_string();
        Self {
            locator: RepositoryLocator::new(celex_resource_url(cellar_base, &raw_id)),
            celex_id: Some(celex),
            raw_id,
            document_date: None,
        }
    }

    /// Reference for a locator URL, built without network access.
    #[must_use]
    pub fn from_locator(url: &str) -> Self {
        let locator = RepositoryLocator::new(url.trim());
        let raw_id = locator
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            celex_id: CelexId::parse(&raw_id).ok(),
            raw_id,
            locator,
            document_date: None,
        }
    }
}

/// Pick one reference from the rows of an exact-match lookup.
///
/// Zero rows is `UnresolvedIdentifier`; rows pointing at more than one work
/// are `AmbiguousIdentifier`. Among rows for a single work the latest date
/// wins, and equal latest dates are settled by `tie_break`.
pub fn select_reference(
    identifier: &str,
    rows: Vec<LocatorRow>,
    tie_break: TieBreak,
) -> Result<DocumentReference> {
    let rows: BTreeSet<LocatorRow> = rows.into_iter().collect();

    let works: BTreeSet<&str> = rows.iter().map(|r| r.work.as_str()).collect();
    match works.len() {
        0 => return Err(HarvesterError::UnresolvedIdentifier(identifier.to_string())),
        1 => {}
        _ => {
            return Err(HarvesterError::AmbiguousIdentifier {
                identifier: identifier.to_string(),
                candidates: works.into_iter().map(ToString::to_string).collect(),
            });
        }
    }

    let latest = rows.iter().map(|r| r.date).max().flatten();
    let newest: Vec<&LocatorRow> = rows.iter().filter(|r| r.date == latest).collect();
    let distinct_ids: BTreeSet<&str> = newest.iter().map(|r| r.raw_id.as_str()).collect();

    if distinct_ids.len() > 1 && tie_break == TieBreak::Reject {
        return Err(HarvesterError::AmbiguousIdentifier {
            identifier: identifier.to_string(),
            candidates: distinct_ids.into_iter().map(ToString::to_string).collect(),
        });
    }

    let chosen = newest
        .into_iter()
        .min_by(|a, b| a.raw_id.cmp(&b.raw_id))
        .ok_or_else(|| HarvesterError::UnresolvedIdentifier(identifier.to_string()))?;

    if rows.len() > 1 {
        tracing::debug!(
            identifier,
            rows = rows.len(),
            chosen = %chosen.raw_id,
            "Disambiguated lookup rows"
        );
    }

    Ok(DocumentReference {
        locator: RepositoryLocator::new(chosen.work.clone()),
        celex_id: CelexId::parse(&chosen.raw_id).ok(),
        raw_id: chosen.raw_id.clone(),
        document_date: chosen.date,
    })
}

/// Turns raw identifiers into fetchable references.
pub struct Resolver<T> {
    sparql: SparqlClient<T>,
    cellar_base: String,
    tie_break: TieBreak,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            sparql: self.sparql.clone(),
            cellar_base: self.cellar_base.clone(),
            tie_break: self.tie_break,
        }
    }
}

impl<T: Transport> Resolver<T> {
    pub fn new(sparql: SparqlClient<T>, cellar_base: impl Into<String>, tie_break: TieBreak) -> Self {
        Self {
            sparql,
            cellar_base: cellar_base.into(),
            tie_break,
        }
    }

    /// Resolve any supported identifier.
    ///
    /// CELEX IDs, cellar URLs and cellar ids are mapped locally. OJ
    /// references go through [`Resolver::resolve_by_query`]. Unrecognized
    /// input fails with `MalformedIdentifier` without touching the network.
    pub async fn resolve(&self, raw: &str) -> Result<DocumentReference> {
        let trimmed = raw.trim();
        let kind = detect_kind(trimmed);
        tracing::debug!(identifier = trimmed, %kind, "Resolving identifier");

        match kind {
            IdentifierKind::Celex => Ok(DocumentReference::from_celex(
                CelexId::parse(trimmed)?,
                &self.cellar_base,
            )),
            IdentifierKind::CellarUrl => Ok(DocumentReference::from_locator(trimmed)),
            IdentifierKind::CellarId => {
                let id = CELLAR_ID_PATTERN
                    .captures(trimmed)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_lowercase())
                    .ok_or_else(|| HarvesterError::MalformedIdentifier(raw.to_string()))?;
                Ok(DocumentReference {
                    locator: RepositoryLocator::new(cellar_resource_url(&self.cellar_base, &id)),
                    celex_id: None,
                    raw_id: id,
                    document_date: None,
                })
            }
            IdentifierKind::OjReference => self.resolve_by_query(trimmed).await,
            IdentifierKind::Unrecognized => {
                Err(HarvesterError::MalformedIdentifier(raw.to_string()))
            }
        }
    }

    /// Resolve through an exact-match metadata lookup.
    pub async fn resolve_by_query(&self, raw: &str) -> Result<DocumentReference> {
        let identifier = raw.trim();
        let rows = self.sparql.lookup_locator(identifier).await?;
        let reference = select_reference(identifier, rows, self.tie_break)?;
        tracing::info!(identifier, locator = %reference.locator, "Resolved via metadata lookup");
        Ok(reference)
    }

    pub fn sparql(&self) -> &SparqlClient<T> {
        &self.sparql
    }
}
