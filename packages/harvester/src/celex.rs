//! CELEX identifier model.
//!
//! A CELEX ID is the primary key of EUR-Lex documents:
//! `SECTOR YEAR TYPE NUMBER [SUFFIX]`, e.g. `32019R0947` (sector 3,
//! year 2019, type R, number 0947) or `32012L0029R(06)` (a corrigendum).
//!
//! Official Journal references such as `C/2026/00064` look similar but are
//! not CELEX IDs; they never parse here and are classified separately by
//! [`crate::identifier::detect_kind`].

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{HarvesterError, Result};

/// Earliest accepted year.
pub const MIN_YEAR: u16 = 1900;

/// Latest accepted year.
pub const MAX_YEAR: u16 = 2099;

/// Two-digit years up to this value are read as 20xx, above as 19xx.
pub const TWO_DIGIT_YEAR_PIVOT: u16 = 50;

/// Compact form: `32019R0947`, `32012L0029R(06)`, `02016R0679-20160504`.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static COMPACT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9CE])(\d{4})([A-Z]{1,2})(\d{4,5})(R\(\d{2}\)|\(\d{2}\)|-\d{8})?$")
        .expect("valid regex")
});

/// Separated form: `3/2019/R/947`, `3-19-R-0947`, `3 2019 R 947 R(06)`.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static SEPARATED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([0-9CE])[\s/_.-]+(\d{2}|\d{4})[\s/_.-]+([A-Z]{1,2})[\s/_.-]+(\d{1,5})(?:[\s/_.-]*(R\(\d{2}\)|\(\d{2}\))|[\s/_.-]+(\d{8}))?$",
    )
    .expect("valid regex")
});

/// Official Journal reference: `LETTER/YEAR/NUMBER`.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static OJ_REFERENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]/\d{4}/\d{1,6}$").expect("valid regex"));

/// Short slash notation: `2019/947`, `947/2019`, `94/62`.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static SLASH_NOTATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,5})\s*/\s*(\d{1,5})").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static DOCUMENT_TYPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{1,2}$").expect("valid regex"));

/// CELEX sector, the leading character of the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sector {
    Consolidated,
    Treaties,
    InternationalAgreements,
    Legislation,
    ComplementaryLegislation,
    PreparatoryActs,
    CaseLaw,
    NationalTransposition,
    NationalCaseLaw,
    ParliamentaryQuestions,
    OfficialJournalC,
    Efta,
}

impl Sector {
    /// All sectors in code order.
    pub const ALL: [Sector; 12] = [
        Self::Consolidated,
        Self::Treaties,
        Self::InternationalAgreements,
        Self::Legislation,
        Self::ComplementaryLegislation,
        Self::PreparatoryActs,
        Self::CaseLaw,
        Self::NationalTransposition,
        Self::NationalCaseLaw,
        Self::ParliamentaryQuestions,
        Self::OfficialJournalC,
        Self::Efta,
    ];

    #[must_use]
    pub fn code(self) -> char {
        match self {
            Self::Consolidated => '0',
            Self::Treaties => '1',
            Self::InternationalAgreements => '2',
            Self::Legislation => '3',
            Self::ComplementaryLegislation => '4',
            Self::PreparatoryActs => '5',
            Self::CaseLaw => '6',
            Self::NationalTransposition => '7',
            Self::NationalCaseLaw => '8',
            Self::ParliamentaryQuestions => '9',
            Self::OfficialJournalC => 'C',
            Self::Efta => 'E',
        }
    }

    #[must_use]
    pub fn from_code(code: char) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code.to_ascii_uppercase())
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Common CELEX document type descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    Regulation,
    Directive,
    Decision,
    Recommendation,
    CommissionProposal,
    CommissionDocument,
    CourtJudgment,
}

impl DocumentType {
    /// Types tried, in order, when expanding a short reference without a type.
    pub const EXPANSION_ORDER: [DocumentType; 3] =
        [Self::Regulation, Self::Directive, Self::Decision];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Regulation => "R",
            Self::Directive => "L",
            Self::Decision => "D",
            Self::Recommendation => "H",
            Self::CommissionProposal => "PC",
            Self::CommissionDocument => "DC",
            Self::CourtJudgment => "CJ",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "R" => Some(Self::Regulation),
            "L" => Some(Self::Directive),
            "D" => Some(Self::Decision),
            "H" => Some(Self::Recommendation),
            "PC" => Some(Self::CommissionProposal),
            "DC" => Some(Self::CommissionDocument),
            "CJ" => Some(Self::CourtJudgment),
            _ => None,
        }
    }
}

/// Optional trailing part of a CELEX ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CelexSuffix {
    /// Corrigendum, `R(06)`.
    Corrigendum(String),
    /// Numbered sub-document, `(01)`.
    Part(String),
    /// Consolidated version date, `-20160504`.
    Consolidation(String),
}

impl fmt::Display for CelexSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrigendum(n) => write!(f, "R({n})"),
            Self::Part(n) => write!(f, "({n})"),
            Self::Consolidation(date) => write!(f, "-{date}"),
        }
    }
}

impl CelexSuffix {
    fn from_token(token: &str) -> Option<Self> {
        if let Some(inner) = token.strip_prefix("R(").and_then(|t| t.strip_suffix(')')) {
            Some(Self::Corrigendum(inner.to_string()))
        } else if let Some(inner) = token.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            Some(Self::Part(inner.to_string()))
        } else {
            let date = token.strip_prefix('-').unwrap_or(token);
            (date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit()))
                .then(|| Self::Consolidation(date.to_string()))
        }
    }
}

/// A parsed CELEX identifier. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CelexId {
    sector: Sector,
    year: u16,
    doc_type: String,
    number: String,
    suffix: Option<CelexSuffix>,
}

impl CelexId {
    /// Parse a CELEX ID in compact or separated form.
    ///
    /// A leading `CELEX:` prefix is ignored. Two-digit years are normalized
    /// to four digits; numbers shorter than four digits are zero-padded.
    ///
    /// # Examples
    /// ```
    /// use eurlex_harvester::celex::CelexId;
    ///
    /// let id = CelexId::parse("32019R0947").unwrap();
    /// assert_eq!(id.year(), 2019);
    /// assert_eq!(id.doc_type(), "R");
    /// assert_eq!(CelexId::parse("3/19/R/947").unwrap(), id);
    /// assert!(CelexId::parse("C/2026/00064").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = || HarvesterError::MalformedIdentifier(raw.to_string());

        let trimmed = raw.trim();
        let upper = trimmed.to_uppercase();
        let candidate = upper.strip_prefix("CELEX:").unwrap_or(&upper).trim();

        if OJ_REFERENCE_PATTERN.is_match(candidate) {
            return Err(malformed());
        }

        let (sector, year, doc_type, number, suffix) =
            if let Some(caps) = COMPACT_PATTERN.captures(candidate) {
                (
                    caps.get(1).map(|m| m.as_str()),
                    caps.get(2).map(|m| m.as_str()),
                    caps.get(3).map(|m| m.as_str()),
                    caps.get(4).map(|m| m.as_str()),
                    caps.get(5).map(|m| m.as_str()),
                )
            } else if let Some(caps) = SEPARATED_PATTERN.captures(candidate) {
                (
                    caps.get(1).map(|m| m.as_str()),
                    caps.get(2).map(|m| m.as_str()),
                    caps.get(3).map(|m| m.as_str()),
                    caps.get(4).map(|m| m.as_str()),
                    caps.get(5).or_else(|| caps.get(6)).map(|m| m.as_str()),
                )
            } else {
                return Err(malformed());
            };

        let sector = sector
            .and_then(|s| s.chars().next())
            .and_then(Sector::from_code)
            .ok_or_else(malformed)?;
        let year = year.and_then(normalize_year).ok_or_else(malformed)?;
        let doc_type = doc_type.ok_or_else(malformed)?.to_string();
        let number = number.map(pad_number).ok_or_else(malformed)?;
        let suffix = match suffix {
            Some(token) => Some(CelexSuffix::from_token(token).ok_or_else(malformed)?),
            None => None,
        };

        Ok(Self {
            sector,
            year,
            doc_type,
            number,
            suffix,
        })
    }

    /// Build an ID from its parts. The number is zero-padded to four digits.
    pub fn from_parts(sector: Sector, year: u16, doc_type: &str, number: &str) -> Result<Self> {
        let raw = format!("{}{year:04}{doc_type}{}", sector.code(), pad_number(number));
        if !(MIN_YEAR..=MAX_YEAR).contains(&year)
            || !DOCUMENT_TYPE_PATTERN.is_match(doc_type)
            || number.is_empty()
            || number.len() > 5
            || !number.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(HarvesterError::MalformedIdentifier(raw));
        }
        Ok(Self {
            sector,
            year,
            doc_type: doc_type.to_string(),
            number: pad_number(number),
            suffix: None,
        })
    }

    #[must_use]
    pub fn sector(&self) -> Sector {
        self.sector
    }

    #[must_use]
    pub fn year(&self) -> u16 {
        self.year
    }

    #[must_use]
    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Known document type, if the descriptor is one of the common ones.
    #[must_use]
    pub fn document_type(&self) -> Option<DocumentType> {
        DocumentType::from_code(&self.doc_type)
    }

    #[must_use]
    pub fn number(&self) -> &str {
        &self.number
    }

    #[must_use]
    pub fn suffix(&self) -> Option<&CelexSuffix> {
        self.suffix.as_ref()
    }

    /// Identifier without its suffix.
    #[must_use]
    pub fn base(&self) -> Self {
        Self {
            suffix: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for CelexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:04}{}{}",
            self.sector.code(),
            self.year,
            self.doc_type,
            self.number
        )?;
        if let Some(suffix) = &self.suffix {
            write!(f, "{suffix}")?;
        }
        Ok(())
    }
}

impl FromStr for CelexId {
    type Err = HarvesterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for CelexId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CelexId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn normalize_year(raw: &str) -> Option<u16> {
    let value: u16 = raw.parse().ok()?;
    let year = match raw.len() {
        2 if value <= TWO_DIGIT_YEAR_PIVOT => 2000 + value,
        2 => 1900 + value,
        4 => value,
        _ => return None,
    };
    (MIN_YEAR..=MAX_YEAR).contains(&year).then_some(year)
}

fn pad_number(raw: &str) -> String {
    format!("{raw:0>4}")
}

/// Check whether a string is a valid CELEX ID. Never fails.
///
/// # Examples
/// ```
/// use eurlex_harvester::celex::is_valid_celex_id;
///
/// assert!(is_valid_celex_id("32012L0029R(06)"));
/// assert!(!is_valid_celex_id("C/2026/00064"));
/// ```
#[must_use]
pub fn is_valid_celex_id(raw: &str) -> bool {
    CelexId::parse(raw).is_ok()
}

/// Check whether a string is an Official Journal reference (`C/2026/00064`).
#[must_use]
pub fn is_oj_reference(raw: &str) -> bool {
    OJ_REFERENCE_PATTERN.is_match(raw.trim())
}

/// Expand a short slash notation into every plausible CELEX ID.
///
/// Order (most likely first):
/// 1. year/number reading: a 4-digit year in first position, a 4-digit year
///    in second position, then 2-digit years in first and second position;
/// 2. sector: the requested one, else sector 3 (legislation);
/// 3. document type: the requested one, else R, L, D.
///
/// Only the first two numeric parts are used, so `2019/947/EU` and
/// `(EU) 2019/947` expand like `2019/947`.
///
/// # Examples
/// ```
/// use eurlex_harvester::celex::expand_variants;
///
/// let ids: Vec<String> = expand_variants("2019/947", None, None)
///     .unwrap()
///     .iter()
///     .map(ToString::to_string)
///     .collect();
/// assert_eq!(ids[0], "32019R0947");
/// assert!(ids.contains(&"32019L0947".to_string()));
/// ```
pub fn expand_variants(
    slash_notation: &str,
    document_type: Option<&str>,
    sector: Option<Sector>,
) -> Result<Vec<CelexId>> {
    let malformed = || HarvesterError::MalformedIdentifier(slash_notation.to_string());

    let caps = SLASH_NOTATION_PATTERN
        .captures(slash_notation)
        .ok_or_else(malformed)?;
    let first = caps.get(1).map(|m| m.as_str()).ok_or_else(malformed)?;
    let second = caps.get(2).map(|m| m.as_str()).ok_or_else(malformed)?;

    let types: Vec<String> = match document_type {
        Some(t) => {
            let t = t.trim().to_uppercase();
            if !DOCUMENT_TYPE_PATTERN.is_match(&t) {
                return Err(HarvesterError::MalformedIdentifier(t));
            }
            vec![t]
        }
        None => DocumentType::EXPANSION_ORDER
            .iter()
            .map(|t| t.code().to_string())
            .collect(),
    };
    let sectors = vec![sector.unwrap_or(Sector::Legislation)];

    let mut readings: Vec<(u16, &str)> = Vec::new();
    for (year_part, number_part, digits) in [
        (first, second, 4),
        (second, first, 4),
        (first, second, 2),
        (second, first, 2),
    ] {
        if year_part.len() != digits || number_part.len() > 5 {
            continue;
        }
        if let Some(year) = normalize_year(year_part) {
            if !readings.contains(&(year, number_part)) {
                readings.push((year, number_part));
            }
        }
    }

    let mut variants = Vec::new();
    for (year, number) in readings {
        for sector in &sectors {
            for doc_type in &types {
                let id = CelexId::from_parts(*sector, year, doc_type, number)?;
                if !variants.contains(&id) {
                    variants.push(id);
                }
            }
        }
    }

    Ok(variants)
}

/// Most likely CELEX ID for a slash notation (first of [`expand_variants`]).
///
/// # Examples
/// ```
/// use eurlex_harvester::celex::get_celex_id;
///
/// assert_eq!(get_celex_id("947/2019", None, None).unwrap().to_string(), "32019R0947");
/// ```
pub fn get_celex_id(
    slash_notation: &str,
    document_type: Option<&str>,
    sector: Option<Sector>,
) -> Result<CelexId> {
    expand_variants(slash_notation, document_type, sector)?
        .into_iter()
        .next()
        .ok_or_else(|| HarvesterError::MalformedIdentifier(slash_notation.to_string()))
}
