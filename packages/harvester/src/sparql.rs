//! SPARQL client for the CELLAR metadata graph.
//!
//! Queries go out as `GET ?query=…` with JSON result bindings. The client
//! shares its client's dispatcher (and therefore its throttle) but has its
//! own retry policy.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::celex::{expand_variants, CelexId, Sector};
use crate::config::{ClientConfig, RetryPolicy, CELLAR_BASE_URL, USER_AGENT};
use crate::error::{HarvesterError, Result};
use crate::http::{bytes_to_string, HttpDispatcher, HttpRequest, Transport};
use crate::identifier::{DocumentReference, RepositoryLocator};

/// Media type requested from the endpoint.
pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Maximum hops followed by [`SparqlClient::find_renditions`].
pub const MAX_TRAVERSAL_DEPTH: usize = 3;

/// Maximum candidates kept per hop by [`SparqlClient::find_renditions`].
pub const MAX_TRAVERSAL_BRANCHING: usize = 5;

/// Namespace prefixes used in queries and for shortening IRIs.
pub const EURLEX_PREFIXES: &[(&str, &str)] = &[
    ("cdm", "http://publications.europa.eu/ontology/cdm#"),
    ("celex", "http://publications.europa.eu/resource/celex/"),
    ("cellar", "http://publications.europa.eu/resource/cellar/"),
    ("oj", "http://publications.europa.eu/resource/oj/"),
    ("lang", "http://publications.europa.eu/resource/authority/language/"),
    (
        "restype",
        "http://publications.europa.eu/resource/authority/resource-type/",
    ),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("skos", "http://www.w3.org/2004/02/skos/core#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ("dc", "http://purl.org/dc/elements/1.1/"),
    ("dcterms", "http://purl.org/dc/terms/"),
];

/// Prepend `prefix` declarations for [`EURLEX_PREFIXES`] to a query.
///
/// # Examples
/// ```
/// use eurlex_harvester::sparql::prepend_prefixes;
///
/// let query = prepend_prefixes("SELECT ?s WHERE { ?s a cdm:work }");
/// assert!(query.contains("prefix cdm: <http://publications.europa.eu/ontology/cdm#>"));
/// assert!(query.ends_with("SELECT ?s WHERE { ?s a cdm:work }"));
/// ```
#[must_use]
pub fn prepend_prefixes(query: &str) -> String {
    let mut out = String::new();
    for (prefix, iri) in EURLEX_PREFIXES {
        out.push_str(&format!("prefix {prefix}: <{iri}>\n"));
    }
    out.push('\n');
    out.push_str(query.trim());
    out
}

/// Shorten an IRI to `prefix:local` if it falls under a known namespace.
///
/// # Examples
/// ```
/// use eurlex_harvester::sparql::simplify_iri;
///
/// assert_eq!(simplify_iri("http://publications.europa.eu/ontology/cdm#test"), "cdm:test");
/// assert_eq!(simplify_iri("cdm:test"), "cdm:test");
/// assert_eq!(simplify_iri("http://example.com/test"), "http://example.com/test");
/// ```
#[must_use]
pub fn simplify_iri(iri: &str) -> String {
    EURLEX_PREFIXES
        .iter()
        .find_map(|(prefix, ns)| iri.strip_prefix(ns).map(|local| format!("{prefix}:{local}")))
        .unwrap_or_else(|| iri.to_string())
}

/// Escape a value for use inside a double-quoted SPARQL literal.
fn literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Date predicate used by [`SparqlClient::query_by_date_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DateType {
    /// Publication date of the document.
    #[default]
    Document,
    /// Creation date in CELLAR.
    Created,
    /// Last modification date; finds old documents with recent amendments.
    Modified,
}

impl DateType {
    #[must_use]
    pub fn predicate(self) -> &'static str {
        match self {
            Self::Document => "cdm:work_date_document",
            Self::Created => "cdm:work_date_creation",
            Self::Modified => "cdm:work_date_lastUpdate",
        }
    }
}

impl fmt::Display for DateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Document => "document",
            Self::Created => "created",
            Self::Modified => "modified",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize)]
struct SparqlJson {
    #[serde(default)]
    head: SparqlHead,
    results: SparqlResults,
}

#[derive(Debug, Default, Deserialize)]
struct SparqlHead {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<BTreeMap<String, SparqlValue>>,
}

#[derive(Debug, Deserialize)]
struct SparqlValue {
    value: String,
}

/// Rows of variable bindings. Unbound variables are absent from a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TabularResult {
    pub variables: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl TabularResult {
    /// Parse a `application/sparql-results+json` body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let parsed: SparqlJson = serde_json::from_slice(body)
            .map_err(|e| HarvesterError::SparqlResponse(e.to_string()))?;
        let rows = parsed
            .results
            .bindings
            .into_iter()
            .map(|row| row.into_iter().map(|(k, v)| (k, v.value)).collect())
            .collect();
        Ok(Self {
            variables: parsed.head.vars,
            rows,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All bound values of one variable, in row order.
    #[must_use]
    pub fn column(&self, variable: &str) -> Vec<&str> {
        self.rows
            .iter()
            .filter_map(|row| row.get(variable).map(String::as_str))
            .collect()
    }

    /// Same rows with every value passed through [`simplify_iri`].
    #[must_use]
    pub fn simplified(&self) -> Self {
        Self {
            variables: self.variables.clone(),
            rows: self
                .rows
                .iter()
                .map(|row| row.iter().map(|(k, v)| (k.clone(), simplify_iri(v))).collect())
                .collect(),
        }
    }
}

/// One row of an exact-match locator lookup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocatorRow {
    pub work: String,
    pub raw_id: String,
    pub date: Option<NaiveDate>,
}

/// Document listing row returned by [`SparqlClient::get_documents`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub celex: String,
    pub date: String,
    pub link: String,
    #[serde(rename = "type")]
    pub doc_type: String,
}

/// Subject/predicate/object triple with simplified IRIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// One hop of the FRBR chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    WorkToExpression,
    ExpressionToManifestation,
    ManifestationToItem,
}

impl Relation {
    /// Predicate linking the child node back to its parent.
    #[must_use]
    pub fn predicate(self) -> &'static str {
        match self {
            Self::WorkToExpression => "cdm:expression_belongs_to_work",
            Self::ExpressionToManifestation => "cdm:manifestation_manifests_expression",
            Self::ManifestationToItem => "cdm:item_belongs_to_manifestation",
        }
    }

    /// Predicate of the attribute used to filter children, if any.
    #[must_use]
    pub fn attribute(self) -> Option<&'static str> {
        match self {
            Self::WorkToExpression => Some("cdm:expression_uses_language"),
            Self::ExpressionToManifestation => Some("cdm:manifestation_type"),
            Self::ManifestationToItem => None,
        }
    }
}

/// A node reached through [`SparqlClient::related`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedNode {
    pub uri: String,
    /// Last path segment of the filter attribute, lowercased (`eng`, `xhtml`).
    pub attribute: Option<String>,
}

fn attribute_key(value: &str) -> String {
    value
        .rsplit(['/', '#'])
        .next()
        .unwrap_or(value)
        .to_lowercase()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let prefix = value.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Client for the SPARQL endpoint.
pub struct SparqlClient<T> {
    dispatcher: Arc<HttpDispatcher<T>>,
    endpoint: String,
    retry: RetryPolicy,
}

impl<T> Clone for SparqlClient<T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            endpoint: self.endpoint.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<T: Transport> SparqlClient<T> {
    pub fn new(dispatcher: Arc<HttpDispatcher<T>>, config: &ClientConfig) -> Self {
        Self {
            dispatcher,
            endpoint: config.endpoints.sparql_endpoint.clone(),
            retry: config.sparql_retry.clone(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run a query, retrying transient failures with the SPARQL retry policy.
    ///
    /// Client errors (4xx) mean the query was rejected and are reported as
    /// `SparqlQuery` without retrying.
    pub async fn run_query(&self, query: &str) -> Result<TabularResult> {
        let url = url::Url::parse_with_params(&self.endpoint, &[("query", query)])
            .map_err(|e| HarvesterError::Config(format!("invalid SPARQL endpoint: {e}")))?;
        let request = HttpRequest::new(url.as_str())
            .header("Accept", SPARQL_RESULTS_JSON)
            .header("User-Agent", USER_AGENT);

        tracing::debug!(endpoint = %self.endpoint, "Running SPARQL query");
        let response = self.dispatcher.send_with_retry(&request, &self.retry).await?;

        if (400..500).contains(&response.status) {
            let body = bytes_to_string(&response.body, &response.url);
            let message: String = body.chars().take(300).collect();
            return Err(HarvesterError::SparqlQuery {
                status: response.status,
                message,
            });
        }
        let response = response.error_for_status()?;

        let result = TabularResult::from_json(&response.body)?;
        tracing::debug!(rows = result.len(), "SPARQL query returned");
        Ok(result)
    }

    /// Exact-match lookup of the work(s) identified by `identifier`.
    ///
    /// Matches either the `celex:` document id or the legal CELEX id.
    pub async fn lookup_locator(&self, identifier: &str) -> Result<Vec<LocatorRow>> {
        let id = literal(identifier);
        let query = format!(
            r#"SELECT DISTINCT ?work ?rawId ?date
WHERE {{
    {{
        ?work cdm:work_id_document ?idUri .
        BIND(STRAFTER(STR(?idUri), "celex:") AS ?rawId)
        FILTER(?rawId = {id})
    }}
    UNION
    {{
        ?work cdm:resource_legal_id_celex ?legalId .
        BIND(STR(?legalId) AS ?rawId)
        FILTER(?rawId = {id})
    }}
    OPTIONAL {{ ?work cdm:work_date_document ?date . }}
}}"#
        );

        let result = self.run_query(&prepend_prefixes(&query)).await?;
        let rows = result
            .rows
            .iter()
            .filter_map(|row| {
                let work = row.get("work")?.clone();
                let raw_id = row
                    .get("rawId")
                    .cloned()
                    .unwrap_or_else(|| identifier.to_string());
                let date = row.get("date").and_then(|d| parse_date(d));
                Some(LocatorRow { work, raw_id, date })
            })
            .collect();
        Ok(rows)
    }

    /// Documents whose `date_type` date falls in `[start, end]`.
    ///
    /// `end` defaults to `start` (single day). Results are ordered by date
    /// ascending, then raw id.
    pub async fn query_by_date_range(
        &self,
        start: NaiveDate,
        end: Option<NaiveDate>,
        date_type: DateType,
    ) -> Result<std::vec::IntoIter<DocumentReference>> {
        let end = end.unwrap_or(start);
        if end < start {
            return Err(HarvesterError::InvalidDate(format!(
                "end date {end} is before start date {start}"
            )));
        }

        let predicate = date_type.predicate();
        let query = format!(
            r#"SELECT DISTINCT ?work (STRAFTER(STR(?idUri), "celex:") AS ?celexId) ?targetDate
WHERE {{
    ?work a cdm:work ;
        cdm:work_id_document ?idUri ;
        {predicate} ?targetDate .

    FILTER(?targetDate >= "{start}"^^xsd:date &&
           ?targetDate <= "{end}"^^xsd:date &&
           regex(str(?idUri), "celex"))
}}
ORDER BY ASC(?targetDate) ASC(?celexId)"#
        );

        let result = self.run_query(&prepend_prefixes(&query)).await?;
        let mut references: Vec<DocumentReference> = result
            .rows
            .iter()
            .filter_map(|row| {
                let work = row.get("work")?;
                let raw_id = row.get("celexId")?;
                let date = row.get("targetDate").and_then(|d| parse_date(d));
                Some(DocumentReference {
                    locator: RepositoryLocator::new(work.clone()),
                    celex_id: CelexId::parse(raw_id).ok(),
                    raw_id: raw_id.clone(),
                    document_date: date,
                })
            })
            .collect();
        references.sort_by(|a, b| {
            a.document_date
                .cmp(&b.document_date)
                .then_with(|| a.raw_id.cmp(&b.raw_id))
        });

        tracing::info!(
            start = %start,
            end = %end,
            date_type = %date_type,
            count = references.len(),
            "Date range query complete"
        );
        Ok(references.into_iter())
    }

    /// CELEX ids that actually exist among the expansions of a slash notation.
    pub async fn guess_celex_ids(
        &self,
        slash_notation: &str,
        document_type: Option<&str>,
        sector: Option<Sector>,
    ) -> Result<Vec<String>> {
        let candidates = expand_variants(slash_notation, document_type, sector)?;
        let clauses: Vec<String> = candidates
            .iter()
            .map(|id| {
                format!("{{ ?s owl:sameAs <{CELLAR_BASE_URL}/resource/celex/{id}> . ?s owl:sameAs ?o }}")
            })
            .collect();
        let query = format!("SELECT * WHERE {{ {} }}", clauses.join(" UNION "));

        let result = self.run_query(&prepend_prefixes(&query)).await?;
        let mut found: Vec<String> = result
            .column("o")
            .into_iter()
            .filter(|o| o.contains("/celex/"))
            .filter_map(|o| o.rsplit('/').next())
            .map(ToString::to_string)
            .collect();
        found.sort();
        found.dedup();
        Ok(found)
    }

    /// Cellar ids of regulations.
    pub async fn get_regulations(&self, limit: Option<usize>, shuffle: bool) -> Result<Vec<String>> {
        let mut query = String::from(
            "SELECT DISTINCT ?doc WHERE { ?doc cdm:work_has_resource-type restype:REG }",
        );
        if shuffle {
            query.push_str(" ORDER BY RAND()");
        }
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let result = self.run_query(&prepend_prefixes(&query)).await?;
        Ok(result
            .column("doc")
            .into_iter()
            .filter_map(|doc| doc.rsplit('/').next())
            .map(ToString::to_string)
            .collect())
    }

    /// Documents of the given resource types (`REG`, `DIR`, `DEC_IMPL`, ...).
    /// An empty slice means `REG`.
    pub async fn get_documents(
        &self,
        types: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSummary>> {
        let types: Vec<String> = if types.is_empty() {
            vec!["REG".to_string()]
        } else {
            types.to_vec()
        };
        let filters: Vec<String> = types.iter().map(|t| format!("?type = restype:{t}")).collect();

        let mut query = format!(
            r#"SELECT DISTINCT ?doc ?type ?celex ?date
WHERE {{
    ?doc cdm:work_has_resource-type ?type .
    FILTER({})
    OPTIONAL {{ ?doc cdm:resource_legal_id_celex ?celex . }}
    OPTIONAL {{ ?doc cdm:work_date_document ?date . }}
    FILTER(BOUND(?celex))
}}"#,
            filters.join(" || ")
        );
        if let Some(limit) = limit {
            query.push_str(&format!("\nLIMIT {limit}"));
        }

        let result = self.run_query(&prepend_prefixes(&query)).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| {
                let get = |key: &str| row.get(key).cloned().unwrap_or_default();
                DocumentSummary {
                    celex: get("celex"),
                    date: get("date"),
                    link: get("doc"),
                    doc_type: get("type").rsplit('/').next().unwrap_or_default().to_string(),
                }
            })
            .collect())
    }

    /// All triples of the work identified by a CELEX id.
    pub async fn celex_triples(&self, celex: &CelexId) -> Result<Vec<Triple>> {
        let query = format!(
            "SELECT ?s ?p ?o WHERE {{ ?s owl:sameAs <{CELLAR_BASE_URL}/resource/celex/{celex}> . ?s ?p ?o }}"
        );
        let result = self.run_query(&prepend_prefixes(&query)).await?;
        Ok(result
            .simplified()
            .rows
            .into_iter()
            .filter_map(|mut row| {
                Some(Triple {
                    subject: row.remove("s")?,
                    predicate: row.remove("p")?,
                    object: row.remove("o")?,
                })
            })
            .collect())
    }

    /// Children of `subject` along one relation.
    ///
    /// When `accepted` is non-empty, only children whose attribute (last
    /// path segment, case-insensitive) is listed are returned, ordered by
    /// their position in `accepted`. At most [`MAX_TRAVERSAL_BRANCHING`]
    /// children are returned.
    pub async fn related(
        &self,
        subject: &str,
        relation: Relation,
        accepted: &[&str],
    ) -> Result<Vec<RelatedNode>> {
        let predicate = relation.predicate();
        let attribute = relation.attribute().filter(|_| !accepted.is_empty());
        let query = match attribute {
            Some(attr_predicate) => {
                let values: Vec<String> =
                    accepted.iter().map(|a| literal(&a.to_lowercase())).collect();
                format!(
                    r#"SELECT DISTINCT ?node ?attr WHERE {{
    ?node {predicate} <{subject}> ;
        {attr_predicate} ?attr .
    FILTER(LCASE(REPLACE(STR(?attr), "^.*[/#]", "")) IN ({}))
}}"#,
                    values.join(", ")
                )
            }
            None => format!("SELECT DISTINCT ?node WHERE {{ ?node {predicate} <{subject}> . }}"),
        };

        let result = self.run_query(&prepend_prefixes(&query)).await?;
        let mut nodes: Vec<RelatedNode> = result
            .rows
            .iter()
            .filter_map(|row| {
                Some(RelatedNode {
                    uri: row.get("node")?.clone(),
                    attribute: row.get("attr").map(|a| attribute_key(a)),
                })
            })
            .filter(|node| match (&attribute, &node.attribute) {
                (Some(_), Some(attr)) => accepted.iter().any(|a| a.eq_ignore_ascii_case(attr)),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();

        let rank = |node: &RelatedNode| {
            node.attribute
                .as_deref()
                .and_then(|attr| accepted.iter().position(|a| a.eq_ignore_ascii_case(attr)))
                .unwrap_or(usize::MAX)
        };
        nodes.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.uri.cmp(&b.uri)));
        // A node listed under several attributes keeps its best-ranked entry
        let mut seen = HashSet::new();
        nodes.retain(|node| seen.insert(node.uri.clone()));
        nodes.truncate(MAX_TRAVERSAL_BRANCHING);
        Ok(nodes)
    }

    /// Walk work → expression (`language`) → manifestation (`formats`) →
    /// item and return the fetchable item URIs, preferred formats first.
    ///
    /// Returns an empty list when the chain breaks at any hop.
    pub async fn find_renditions(
        &self,
        work: &str,
        language: &str,
        formats: &[&str],
    ) -> Result<Vec<String>> {
        let language = language.to_lowercase();
        let chain: [(Relation, Vec<&str>); 3] = [
            (Relation::WorkToExpression, vec![language.as_str()]),
            (Relation::ExpressionToManifestation, formats.to_vec()),
            (Relation::ManifestationToItem, Vec::new()),
        ];

        let mut frontier = vec![work.to_string()];
        for (depth, (relation, accepted)) in chain.iter().enumerate() {
            if depth >= MAX_TRAVERSAL_DEPTH {
                break;
            }
            let mut next = Vec::new();
            for node in &frontier {
                for child in self.related(node, *relation, accepted).await? {
                    if !next.contains(&child.uri) {
                        next.push(child.uri);
                    }
                }
                if next.len() >= MAX_TRAVERSAL_BRANCHING {
                    break;
                }
            }
            next.truncate(MAX_TRAVERSAL_BRANCHING);
            tracing::debug!(work, depth, ?relation, found = next.len(), "Traversal hop");
            if next.is_empty() {
                return Ok(Vec::new());
            }
            frontier = next;
        }
        Ok(frontier)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::http::test_support::{sparql_json, MockTransport};
    use crate::http::HttpResponse;
    use pretty_assertions::assert_eq;

    fn client(transport: MockTransport) -> SparqlClient<MockTransport> {
        let config = ClientConfig::builder()
            .request_delay(Duration::ZERO)
            .sparql_retry(RetryPolicy::new(2, Duration::from_secs(1), 2.0))
            .sparql_endpoint("https://sparql.test/sparql")
            .build();
        let dispatcher = Arc::new(HttpDispatcher::new(transport, Duration::ZERO));
        SparqlClient::new(dispatcher, &config)
    }

    #[test]
    fn test_prepend_prefixes() {
        let query = prepend_prefixes("SELECT ?s WHERE { ?s ?p ?o }");
        assert!(query.contains("prefix rdf:"));
        assert!(query.contains("prefix cdm:"));
    }

    #[test]
    fn test_simplify_iri() {
        assert_eq!(
            simplify_iri("http://publications.europa.eu/resource/cellar/abc"),
            "cellar:abc"
        );
        assert_eq!(simplify_iri("http://example.com/test"), "http://example.com/test");
    }

    #[test]
    fn test_date_type_predicates() {
        assert_eq!(DateType::Document.predicate(), "cdm:work_date_document");
        assert_eq!(DateType::Created.predicate(), "cdm:work_date_creation");
        assert_eq!(DateType::Modified.predicate(), "cdm:work_date_lastUpdate");
        assert_eq!(DateType::Modified.to_string(), "modified");
    }

    #[test]
    fn test_tabular_result_from_json() {
        let body = br#"{"head":{"vars":["s"]},"results":{"bindings":[
            {"s":{"type":"uri","value":"http://publications.europa.eu/ontology/cdm#test"}},
            {}
        ]}}"#;
        let result = TabularResult::from_json(body).unwrap();
        assert_eq!(result.variables, vec!["s"]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.column("s").len(), 1);
        assert_eq!(result.simplified().rows[0]["s"], "cdm:test");
    }

    #[test]
    fn test_tabular_result_rejects_non_json() {
        let err = TabularResult::from_json(b"<html>").unwrap_err();
        assert!(matches!(err, HarvesterError::SparqlResponse(_)));
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(literal(r#"a"b"#), r#""a\"b""#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_query_sends_accept_header() {
        let transport = MockTransport::new().route(
            "sparql.test",
            vec![Ok(sparql_json(&["s"], &[&[("s", "x")]]))],
        );
        let client = client(transport);
        let result = client.run_query("SELECT ?s WHERE { ?s ?p ?o }").await.unwrap();
        assert_eq!(result.column("s"), vec!["x"]);

        let requests = client.dispatcher.transport().requests();
        assert_eq!(requests[0].0.header_value("accept"), Some(SPARQL_RESULTS_JSON));
        assert!(requests[0].0.url.starts_with("https://sparql.test/sparql?query="));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_query_retries_503() {
        let transport = MockTransport::new().route(
            "sparql.test",
            vec![
                Ok(HttpResponse::new(503, "", Vec::new())),
                Ok(sparql_json(&["s"], &[])),
            ],
        );
        let client = client(transport);
        let result = client.run_query("SELECT ?s WHERE { ?s ?p ?o }").await.unwrap();
        assert!(result.is_empty());
        assert_eq!(client.dispatcher.transport().requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_query_bad_request_is_query_error() {
        let transport = MockTransport::new().route(
            "sparql.test",
            vec![Ok(HttpResponse::new(400, "", b"syntax error".to_vec()))],
        );
        let err = client(transport).run_query("SELEC").await.unwrap_err();
        match err {
            HarvesterError::SparqlQuery { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "syntax error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_by_date_range_sorted_ascending() {
        let transport = MockTransport::new().route(
            "work_date_lastUpdate",
            vec![Ok(sparql_json(
                &["work", "celexId", "targetDate"],
                &[
                    &[
                        ("work", "http://publications.europa.eu/resource/cellar/b"),
                        ("celexId", "32026R0002"),
                        ("targetDate", "2026-01-02"),
                    ],
                    &[
                        ("work", "http://publications.europa.eu/resource/cellar/c"),
                        ("celexId", "C/2026/00064"),
                        ("targetDate", "2026-01-01"),
                    ],
                    &[
                        ("work", "http://publications.europa.eu/resource/cellar/a"),
                        ("celexId", "32026R0001"),
                        ("targetDate", "2026-01-02"),
                    ],
                ],
            ))],
        );
        let client = client(transport);
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();

        let refs: Vec<DocumentReference> = client
            .query_by_date_range(start, Some(end), DateType::Modified)
            .await
            .unwrap()
            .collect();

        let ids: Vec<&str> = refs.iter().map(|r| r.raw_id.as_str()).collect();
        assert_eq!(ids, vec!["C/2026/00064", "32026R0001", "32026R0002"]);
        assert!(refs[0].celex_id.is_none());
        assert_eq!(refs[1].celex_id.as_ref().map(ToString::to_string).as_deref(), Some("32026R0001"));
        assert_eq!(refs[1].locator.as_str(), "http://publications.europa.eu/resource/cellar/a");

        let (request, _) = &client.dispatcher.transport().requests()[0];
        let decoded: String = url::Url::parse(&request.url)
            .unwrap()
            .query_pairs()
            .map(|(_, v)| v.into_owned())
            .collect();
        assert!(decoded.contains(r#""2026-01-01"^^xsd:date"#));
        assert!(decoded.contains(r#""2026-01-31"^^xsd:date"#));
        assert!(decoded.contains("ORDER BY ASC(?targetDate)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_by_date_range_rejects_inverted_range() {
        let client = client(MockTransport::new());
        let start = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let err = client
            .query_by_date_range(start, Some(end), DateType::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvesterError::InvalidDate(_)));
        assert!(client.dispatcher.transport().requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guess_celex_ids() {
        let transport = MockTransport::new().route(
            "owl:sameAs",
            vec![Ok(sparql_json(
                &["s", "o"],
                &[
                    &[
                        ("s", "http://publications.europa.eu/resource/cellar/x"),
                        ("o", "http://publications.europa.eu/resource/celex/32019R0947"),
                    ],
                    &[
                        ("s", "http://publications.europa.eu/resource/cellar/x"),
                        ("o", "http://publications.europa.eu/resource/oj/JOL_2019_152_R_0045"),
                    ],
                ],
            ))],
        );
        let ids = client(transport).guess_celex_ids("2019/947", None, None).await.unwrap();
        assert_eq!(ids, vec!["32019R0947"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_documents_defaults_to_regulations() {
        let transport = MockTransport::new().route(
            "restype:REG",
            vec![Ok(sparql_json(
                &["doc", "type", "celex", "date"],
                &[&[
                    ("doc", "http://publications.europa.eu/resource/cellar/x"),
                    (
                        "type",
                        "http://publications.europa.eu/resource/authority/resource-type/REG",
                    ),
                    ("celex", "32019R0947"),
                    ("date", "2019-05-24"),
                ]],
            ))],
        );
        let docs = client(transport).get_documents(&[], Some(5)).await.unwrap();
        assert_eq!(
            docs,
            vec![DocumentSummary {
                celex: "32019R0947".into(),
                date: "2019-05-24".into(),
                link: "http://publications.europa.eu/resource/cellar/x".into(),
                doc_type: "REG".into(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_renditions_walks_chain() {
        let work = "http://publications.europa.eu/resource/cellar/w";
        let transport = MockTransport::new()
            .route(
                "expression_belongs_to_work",
                vec![Ok(sparql_json(
                    &["node", "attr"],
                    &[&[
                        ("node", "http://publications.europa.eu/resource/cellar/w.0006"),
                        (
                            "attr",
                            "http://publications.europa.eu/resource/authority/language/ENG",
                        ),
                    ]],
                ))],
            )
            .route(
                "manifestation_manifests_expression",
                vec![Ok(sparql_json(
                    &["node", "attr"],
                    &[
                        &[
                            ("node", "http://publications.europa.eu/resource/cellar/w.0006.02"),
                            ("attr", "html"),
                        ],
                        &[
                            ("node", "http://publications.europa.eu/resource/cellar/w.0006.03"),
                            ("attr", "xhtml"),
                        ],
                    ],
                ))],
            )
            .route(
                "item_belongs_to_manifestation",
                vec![Ok(sparql_json(
                    &["node"],
                    &[&[(
                        "node",
                        "http://publications.europa.eu/resource/cellar/w.0006.03/DOC_1",
                    )]],
                ))],
            );

        let items = client(transport)
            .find_renditions(work, "ENG", &["xhtml", "html"])
            .await
            .unwrap();

        // Each manifestation is asked for items; the mock returns the same item
        assert_eq!(
            items,
            vec!["http://publications.europa.eu/resource/cellar/w.0006.03/DOC_1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_renditions_broken_chain_is_empty() {
        let transport = MockTransport::new().route(
            "expression_belongs_to_work",
            vec![Ok(sparql_json(&["node", "attr"], &[]))],
        );
        let items = client(transport)
            .find_renditions("http://x/w", "eng", &["xhtml"])
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_related_orders_by_accepted() {
        let transport = MockTransport::new().route(
            "manifestation_manifests_expression",
            vec![Ok(sparql_json(
                &["node", "attr"],
                &[
                    &[("node", "http://x/m1"), ("attr", "html")],
                    &[("node", "http://x/m2"), ("attr", "xhtml")],
                    &[("node", "http://x/m3"), ("attr", "pdf")],
                ],
            ))],
        );
        let nodes = client(transport)
            .related("http://x/e", Relation::ExpressionToManifestation, &["xhtml", "html"])
            .await
            .unwrap();
        let uris: Vec<&str> = nodes.iter().map(|n| n.uri.as_str()).collect();
        assert_eq!(uris, vec!["http://x/m2", "http://x/m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_related_keeps_one_entry_per_node() {
        let transport = MockTransport::new().route(
            "manifestation_manifests_expression",
            vec![Ok(sparql_json(
                &["node", "attr"],
                &[
                    &[("node", "http://x/m1"), ("attr", "html")],
                    &[("node", "http://x/m2"), ("attr", "xhtml")],
                    &[("node", "http://x/m1"), ("attr", "xhtml")],
                ],
            ))],
        );
        let nodes = client(transport)
            .related("http://x/e", Relation::ExpressionToManifestation, &["xhtml", "html"])
            .await
            .unwrap();
        let entries: Vec<(&str, Option<&str>)> = nodes
            .iter()
            .map(|n| (n.uri.as_str(), n.attribute.as_deref()))
            .collect();
        assert_eq!(entries, vec![("http://x/m1", Some("xhtml")), ("http://x/m2", Some("xhtml"))]);
    }
}
