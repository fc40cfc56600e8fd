//! Retrieval pipeline.
//!
//! Each fetch runs a small state machine:
//!
//! ```text
//! Start -> DirectFetch -> Received -> Done
//!               |            |
//!               v            v
//!      ChallengeDetected   ScannedFallback -> Done
//!               |
//!               v
//!      MetadataFallback -> Received
//! ```
//!
//! Transient failures (HTTP 500/502/503/504, connect errors, timeouts) are
//! retried inside [`HttpDispatcher::send_with_retry`]; every other failure
//! ends the fetch with an error naming the identifier and the strategy that
//! was running.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::{authority_language, default_config, html_url, pdf_url, ClientConfig};
use crate::error::{HarvesterError, Result};
use crate::http::{bytes_to_string, HttpDispatcher, HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::identifier::{DocumentReference, Resolver};
use crate::parser::{self, has_structural_content, ParseOutcome};
use crate::scanned;
use crate::sparql::{DateType, SparqlClient, TabularResult};

/// Markers of a bot-mitigation page served instead of the document.
pub const CHALLENGE_SIGNATURES: &[&str] = &[
    "awsWafCookieDomainList",
    "AwsWafIntegration",
    "gokuProps",
    "challenge.js",
    "aws-waf-token",
];

/// Manifestation types accepted as markup renditions, best first.
pub const HTML_FORMATS: &[&str] = &["xhtml", "html"];

/// Manifestation types accepted as scanned renditions, best first.
pub const PDF_FORMATS: &[&str] = &["pdfa2a", "pdfa1a", "pdf", "pdfx"];

const RENDITION_ACCEPT: &str = "application/xhtml+xml, text/html;q=0.9, */*;q=0.1";
const PDF_ACCEPT: &str = "application/pdf";

/// True when `body` is a bot-challenge page.
///
/// # Examples
/// ```
/// use eurlex_harvester::retrieval::is_challenge;
///
/// assert!(is_challenge("<script>window.awsWafCookieDomainList = [];</script>"));
/// assert!(!is_challenge("<p class=\"oj-normal\">Article 1</p>"));
/// ```
#[must_use]
pub fn is_challenge(body: &str) -> bool {
    CHALLENGE_SIGNATURES.iter().any(|sig| body.contains(sig))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// HTML or XHTML markup.
    Markup,
    /// Text extracted from a PDF rendition.
    ScannedText,
}

/// Raw content of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievedContent {
    pub body: String,
    pub format: ContentFormat,
    /// URL the content was served from.
    pub url: String,
    pub content_type: Option<String>,
}

/// Strategy that produced the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Direct,
    MetadataFallback,
    ScannedFallback,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::MetadataFallback => "metadata_fallback",
            Self::ScannedFallback => "scanned_fallback",
        })
    }
}

/// A successfully retrieved document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievedDocument {
    pub reference: DocumentReference,
    pub content: RetrievedContent,
    pub strategy: Strategy,
}

#[derive(Debug)]
enum FetchState {
    Start,
    DirectFetch(DocumentReference),
    ChallengeDetected {
        reference: DocumentReference,
        url: String,
    },
    MetadataFallback(DocumentReference),
    /// Markup fetched; not yet checked for structure.
    Received {
        reference: DocumentReference,
        content: RetrievedContent,
        strategy: Strategy,
    },
    /// Markup without known structure; look for a PDF rendition.
    ScannedFallback {
        reference: DocumentReference,
        markup: RetrievedContent,
        strategy: Strategy,
    },
    Done(RetrievedDocument),
}

impl FetchState {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::DirectFetch(_) => "direct_fetch",
            Self::ChallengeDetected { .. } => "challenge_detected",
            Self::MetadataFallback(_) => "metadata_fallback",
            Self::Received { .. } => "received",
            Self::ScannedFallback { .. } => "scanned_fallback",
            Self::Done(_) => "done",
        }
    }
}

fn markup_content(response: HttpResponse) -> RetrievedContent {
    RetrievedContent {
        body: bytes_to_string(&response.body, &response.url),
        format: ContentFormat::Markup,
        url: response.url,
        content_type: response.content_type,
    }
}

/// True when markup has at least one paragraph of text, structured or not.
fn has_text(markup: &RetrievedContent) -> bool {
    !parser::parse_html(&markup.body, None).fragments.is_empty()
}

/// Async EUR-Lex client.
///
/// All requests of one client (document fetches and SPARQL queries) share
/// a single throttle, so `request_delay` spaces dispatches across
/// concurrent fetches.
pub struct Client<T = ReqwestTransport> {
    config: ClientConfig,
    dispatcher: Arc<HttpDispatcher<T>>,
    sparql: SparqlClient<T>,
    resolver: Resolver<T>,
}

impl Client<ReqwestTransport> {
    /// Create a client backed by `reqwest`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Create a client from the process-wide default configuration.
    pub fn from_default() -> Result<Self> {
        Self::new(default_config().clone())
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        let dispatcher = Arc::new(HttpDispatcher::new(transport, config.request_delay));
        let sparql = SparqlClient::new(Arc::clone(&dispatcher), &config);
        let resolver = Resolver::new(
            sparql.clone(),
            config.endpoints.cellar_base_url.clone(),
            config.tie_break,
        );
        Self {
            config,
            dispatcher,
            sparql,
            resolver,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sparql(&self) -> &SparqlClient<T> {
        &self.sparql
    }

    pub fn resolver(&self) -> &Resolver<T> {
        &self.resolver
    }

    pub fn transport(&self) -> &T {
        self.dispatcher.transport()
    }

    /// Resolve an identifier without fetching it.
    pub async fn resolve(&self, raw: &str) -> Result<DocumentReference> {
        self.resolver.resolve(raw).await
    }

    /// Fetch one document, running the full fallback chain.
    pub async fn fetch(&self, raw: &str) -> Result<RetrievedDocument> {
        let identifier = raw.trim();
        let mut state = FetchState::Start;

        loop {
            tracing::debug!(identifier, state = state.name(), "Fetch state");
            state = match state {
                FetchState::Start => FetchState::DirectFetch(self.resolver.resolve(identifier).await?),
                FetchState::DirectFetch(reference) => self.direct_fetch(identifier, reference).await?,
                FetchState::ChallengeDetected { reference, url } => {
                    if self.config.raise_on_challenge || !self.config.sparql_fallback {
                        return Err(HarvesterError::ChallengeError {
                            identifier: identifier.to_string(),
                            strategy: Strategy::Direct.to_string(),
                            url,
                        });
                    }
                    tracing::warn!(identifier, %url, "Bot challenge detected, falling back to metadata lookup");
                    FetchState::MetadataFallback(reference)
                }
                FetchState::MetadataFallback(reference) => {
                    self.metadata_fallback(identifier, reference).await?
                }
                FetchState::Received {
                    reference,
                    content,
                    strategy,
                } => {
                    if has_structural_content(&content.body) {
                        FetchState::Done(RetrievedDocument {
                            reference,
                            content,
                            strategy,
                        })
                    } else {
                        tracing::info!(identifier, %strategy, "No structural markup, trying scanned rendition");
                        FetchState::ScannedFallback {
                            reference,
                            markup: content,
                            strategy,
                        }
                    }
                }
                FetchState::ScannedFallback {
                    reference,
                    markup,
                    strategy,
                } => self.scanned_fallback(identifier, reference, markup, strategy).await?,
                FetchState::Done(document) => {
                    tracing::info!(
                        identifier,
                        strategy = %document.strategy,
                        url = %document.content.url,
                        "Fetched document"
                    );
                    return Ok(document);
                }
            };
        }
    }

    /// Fetch several documents with at most `concurrency` in flight.
    ///
    /// Results are aligned with `identifiers`; a failure only affects its
    /// own entry.
    pub async fn fetch_many<S: AsRef<str>>(
        &self,
        identifiers: &[S],
        concurrency: usize,
    ) -> Vec<Result<RetrievedDocument>> {
        stream::iter(identifiers.iter().map(|id| self.fetch(id.as_ref())))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Fetch and parse a document.
    ///
    /// A document with no extractable content, including a PDF rendition
    /// that cannot be read, gives an empty outcome that carries
    /// `UnsupportedFormat` rather than an error.
    pub async fn get_fragments(&self, raw: &str) -> Result<ParseOutcome> {
        match self.fetch(raw).await {
            Ok(document) => Ok(parser::parse_retrieved(&document)),
            Err(HarvesterError::UnsupportedFormat(identifier)) => {
                Ok(ParseOutcome::unsupported(&identifier))
            }
            Err(e) => Err(e),
        }
    }

    fn request(&self, url: impl Into<String>) -> HttpRequest {
        HttpRequest::new(url).headers(self.config.request_headers())
    }

    /// Request for a cellar locator, content-negotiated for markup.
    fn rendition_request(&self, url: &str) -> HttpRequest {
        self.request(url)
            .header("Accept", RENDITION_ACCEPT)
            .header(
                "Accept-Language",
                authority_language(&self.config.language).to_lowercase(),
            )
    }

    async fn direct_fetch(&self, identifier: &str, reference: DocumentReference) -> Result<FetchState> {
        let request = match &reference.celex_id {
            Some(celex) => self.request(html_url(
                &self.config.endpoints.eurlex_base_url,
                &self.config.language,
                &celex.to_string(),
            )),
            None => self.rendition_request(reference.locator.as_str()),
        };

        let response = self
            .dispatcher
            .send_with_retry(&request, &self.config.retry)
            .await?
            .error_for_status()?;

        if response.is_pdf() {
            return self.scanned_document(identifier, reference, response, Strategy::Direct);
        }

        let content = markup_content(response);
        if is_challenge(&content.body) {
            return Ok(FetchState::ChallengeDetected {
                reference,
                url: content.url,
            });
        }
        Ok(FetchState::Received {
            reference,
            content,
            strategy: Strategy::Direct,
        })
    }

    async fn metadata_fallback(
        &self,
        identifier: &str,
        reference: DocumentReference,
    ) -> Result<FetchState> {
        let failed = |reason: &str| HarvesterError::ResolutionFailed {
            identifier: identifier.to_string(),
            strategy: Strategy::MetadataFallback.to_string(),
            reason: reason.to_string(),
        };

        let items = self.renditions(&reference, HTML_FORMATS).await?;
        if items.is_empty() {
            return Err(failed("no markup rendition reachable from the work"));
        }

        for item in &items {
            let request = self.rendition_request(item);
            let response = match self.dispatcher.send_with_retry(&request, &self.config.retry).await {
                Ok(response) if response.is_success() => response,
                Ok(response) => {
                    tracing::warn!(identifier, url = %item, status = response.status, "Rendition not available");
                    continue;
                }
                Err(e @ HarvesterError::ServiceUnavailable { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(identifier, url = %item, error = %e, "Rendition fetch failed");
                    continue;
                }
            };

            let content = markup_content(response);
            if is_challenge(&content.body) {
                tracing::warn!(identifier, url = %item, "Rendition is a bot challenge as well");
                continue;
            }
            return Ok(FetchState::Received {
                reference,
                content,
                strategy: Strategy::MetadataFallback,
            });
        }

        Err(failed("no rendition could be fetched"))
    }

    async fn scanned_fallback(
        &self,
        identifier: &str,
        reference: DocumentReference,
        markup: RetrievedContent,
        strategy: Strategy,
    ) -> Result<FetchState> {
        let pdf = self.find_pdf(&reference).await?;

        if let Some(response) = pdf {
            match self.scanned_document(identifier, reference.clone(), response, Strategy::ScannedFallback) {
                Err(HarvesterError::UnsupportedFormat(_)) if has_text(&markup) => {}
                other => return other,
            }
        } else if !has_text(&markup) {
            return Err(HarvesterError::ResolutionFailed {
                identifier: identifier.to_string(),
                strategy: Strategy::ScannedFallback.to_string(),
                reason: "no PDF rendition found".to_string(),
            });
        }

        tracing::warn!(identifier, url = %markup.url, "Using unstructured markup");
        Ok(FetchState::Done(RetrievedDocument {
            reference,
            content: markup,
            strategy,
        }))
    }

    fn scanned_document(
        &self,
        identifier: &str,
        reference: DocumentReference,
        response: HttpResponse,
        strategy: Strategy,
    ) -> Result<FetchState> {
        let text = match scanned::extract_text(&response.body) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(identifier, url = %response.url, error = %e, "PDF could not be read");
                return Err(HarvesterError::UnsupportedFormat(identifier.to_string()));
            }
        };
        if text.is_empty() {
            tracing::warn!(identifier, url = %response.url, "PDF has no text layer");
            return Err(HarvesterError::UnsupportedFormat(identifier.to_string()));
        }
        Ok(FetchState::Done(RetrievedDocument {
            reference,
            content: RetrievedContent {
                body: text,
                format: ContentFormat::ScannedText,
                url: response.url,
                content_type: response.content_type,
            },
            strategy,
        }))
    }

    /// First PDF rendition found: the EUR-Lex PDF endpoint for CELEX ids,
    /// then PDF manifestations of the work.
    async fn find_pdf(&self, reference: &DocumentReference) -> Result<Option<HttpResponse>> {
        if let Some(celex) = &reference.celex_id {
            let url = pdf_url(
                &self.config.endpoints.eurlex_base_url,
                &self.config.language,
                &celex.to_string(),
            );
            if let Some(response) = self.fetch_pdf(&url).await? {
                return Ok(Some(response));
            }
        }

        if !self.config.sparql_fallback {
            return Ok(None);
        }
        for item in self.renditions(reference, PDF_FORMATS).await? {
            if let Some(response) = self.fetch_pdf(&item).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    async fn fetch_pdf(&self, url: &str) -> Result<Option<HttpResponse>> {
        let request = self.request(url).header("Accept", PDF_ACCEPT);
        match self.dispatcher.send_with_retry(&request, &self.config.retry).await {
            Ok(response) if response.is_success() && response.is_pdf() => Ok(Some(response)),
            Ok(response) => {
                tracing::debug!(url, status = response.status, "No PDF at URL");
                Ok(None)
            }
            Err(e @ HarvesterError::ServiceUnavailable { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(url, error = %e, "PDF fetch failed");
                Ok(None)
            }
        }
    }

    /// Item URIs of the reference's work for the given manifestation types.
    async fn renditions(&self, reference: &DocumentReference, formats: &[&str]) -> Result<Vec<String>> {
        let work = if reference.locator.is_cellar() {
            reference.locator.work_uri().to_string()
        } else {
            match self.resolver.resolve_by_query(&reference.raw_id).await {
                Ok(resolved) => resolved.locator.work_uri().to_string(),
                Err(HarvesterError::UnresolvedIdentifier(_)) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            }
        };

        self.sparql
            .find_renditions(&work, &authority_language(&self.config.language), formats)
            .await
    }
}

/// Blocking wrapper around [`Client`].
///
/// Owns a current-thread runtime; every call blocks the caller's thread
/// until the retrieval completes.
pub struct BlockingClient {
    inner: Client,
    runtime: tokio::runtime::Runtime,
}

impl BlockingClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            inner: Client::new(config)?,
            runtime,
        })
    }

    pub fn from_default() -> Result<Self> {
        Self::new(default_config().clone())
    }

    pub fn config(&self) -> &ClientConfig {
        self.inner.config()
    }

    pub fn fetch(&self, raw: &str) -> Result<RetrievedDocument> {
        self.runtime.block_on(self.inner.fetch(raw))
    }

    pub fn fetch_many<S: AsRef<str>>(
        &self,
        identifiers: &[S],
        concurrency: usize,
    ) -> Vec<Result<RetrievedDocument>> {
        self.runtime.block_on(self.inner.fetch_many(identifiers, concurrency))
    }

    pub fn get_fragments(&self, raw: &str) -> Result<ParseOutcome> {
        self.runtime.block_on(self.inner.get_fragments(raw))
    }

    pub fn resolve(&self, raw: &str) -> Result<DocumentReference> {
        self.runtime.block_on(self.inner.resolve(raw))
    }

    pub fn query_by_date_range(
        &self,
        start: chrono::NaiveDate,
        end: Option<chrono::NaiveDate>,
        date_type: DateType,
    ) -> Result<std::vec::IntoIter<DocumentReference>> {
        self.runtime
            .block_on(self.inner.sparql().query_by_date_range(start, end, date_type))
    }

    pub fn guess_celex_ids(
        &self,
        slash_notation: &str,
        document_type: Option<&str>,
        sector: Option<crate::celex::Sector>,
    ) -> Result<Vec<String>> {
        self.runtime.block_on(
            self.inner
                .sparql()
                .guess_celex_ids(slash_notation, document_type, sector),
        )
    }

    pub fn run_query(&self, query: &str) -> Result<TabularResult> {
        self.runtime.block_on(self.inner.sparql().run_query(query))
    }
}
