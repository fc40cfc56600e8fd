//! Error types for the harvester.
//!
//! `HarvesterError` carries enough context (identifier, strategy, last HTTP
//! status) for a caller to decide what to do next. Transient failures are
//! retried inside the HTTP layer and only surface as `ServiceUnavailable`
//! once the retry budget is spent.

use thiserror::Error;

/// Main error type for the harvester library.
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// Input does not match the CELEX grammar (or any other known identifier shape).
    #[error("Malformed identifier: '{0}'. Expected a CELEX ID (e.g., 32019R0947), cellar URL/ID or OJ reference")]
    MalformedIdentifier(String),

    /// Metadata lookup returned no rows.
    #[error("No document found for identifier '{0}'")]
    UnresolvedIdentifier(String),

    /// Metadata lookup returned rows for more than one document.
    #[error("Identifier '{identifier}' is ambiguous: {} candidates ({})", .candidates.len(), .candidates.join(", "))]
    AmbiguousIdentifier {
        identifier: String,
        candidates: Vec<String>,
    },

    /// A bot-mitigation page was served instead of the document.
    #[error("Bot challenge detected for '{identifier}' during {strategy} ({url})")]
    ChallengeError {
        identifier: String,
        strategy: String,
        url: String,
    },

    /// Transient failures persisted after all retries.
    #[error("Service unavailable at {url} after {attempts} attempts{}: {message}", .status.map(|s| format!(" (last status {s})")).unwrap_or_default())]
    ServiceUnavailable {
        url: String,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    /// Metadata traversal found no fetchable rendition.
    #[error("Could not resolve a rendition for '{identifier}' via {strategy}: {reason}")]
    ResolutionFailed {
        identifier: String,
        strategy: String,
        reason: String,
    },

    /// No recognizable structure and no extractable text.
    #[error("Unsupported document format for '{0}': no structural content or extractable text")]
    UnsupportedFormat(String),

    /// Non-retryable HTTP status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Transport-level failure that is not retried (invalid URL, TLS, ...).
    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    /// HTTP client construction failed.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The SPARQL endpoint rejected the query.
    #[error("SPARQL query error (status {status}): {message}")]
    SparqlQuery { status: u16, message: String },

    /// The SPARQL endpoint returned something other than JSON bindings.
    #[error("Invalid SPARQL response: {0}")]
    SparqlResponse(String),

    /// PDF text extraction failed.
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    /// Invalid date format.
    #[error("Invalid date format: '{0}'. Expected YYYY-MM-DD (e.g., 2025-01-01)")]
    InvalidDate(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error.
    #[error("YAML serialization failed: {0}")]
    YamlSerialization(#[from] serde_yaml_ng::Error),
}

impl HarvesterError {
    /// Last HTTP status code associated with this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServiceUnavailable { status, .. } => *status,
            Self::HttpStatus { status, .. } | Self::SparqlQuery { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvesterError>;
