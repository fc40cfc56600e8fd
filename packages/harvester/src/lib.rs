//! EUR-Lex harvester - Retrieve EU legislation and parse it into fragments.
//!
//! Identifiers in any of the common shapes (CELEX IDs, cellar URLs, cellar
//! ids, Official Journal references) are resolved to a fetchable location,
//! retrieved through a chain of fallbacks and parsed into [`TextFragment`]s
//! that keep their place in the document hierarchy.
//!
//! # Example
//!
//! ```
//! use eurlex_harvester::{detect_kind, CelexId, IdentifierKind};
//!
//! let celex = CelexId::parse("32019R0947").unwrap();
//! assert_eq!(celex.year(), 2019);
//! assert_eq!(detect_kind("C/2026/00064"), IdentifierKind::OjReference);
//! ```
//!
//! # Architecture
//!
//! - [`celex`]: CELEX identifier model and short-reference expansion
//! - [`identifier`]: Identifier classification and resolution
//! - [`retrieval`]: Fetch state machine, async and blocking clients
//! - [`http`]: Transport seam, throttling and retry
//! - [`sparql`]: Metadata query client
//! - [`parser`]: Structural parser for markup and scanned text
//! - [`scanned`]: PDF text extraction
//! - [`types`]: Fragment rows
//! - [`output`]: JSON/YAML output
//! - [`config`]: Client configuration and constants
//! - [`error`]: Error types and Result alias
//! - [`cli`]: Command-line interface

pub mod celex;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod identifier;
pub mod output;
pub mod parser;
pub mod retrieval;
pub mod scanned;
pub mod sparql;
pub mod types;

pub use celex::{expand_variants, get_celex_id, is_valid_celex_id, CelexId, DocumentType, Sector};
pub use config::{default_config, init_default_config, ClientConfig, RetryPolicy, TieBreak};
pub use error::{HarvesterError, Result};
pub use identifier::{detect_kind, DocumentReference, IdentifierKind, RepositoryLocator, Resolver};
pub use parser::{parse_html, parse_retrieved, parse_text, ParseOutcome};
pub use retrieval::{BlockingClient, Client, RetrievedDocument, Strategy};
pub use sparql::{DateType, SparqlClient, TabularResult};
pub use types::{FragmentType, TextFragment};
