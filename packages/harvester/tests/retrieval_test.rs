//! Retrieval pipeline tests against a mock EUR-Lex/CELLAR server.

use std::time::Duration;

use eurlex_harvester::retrieval::{ContentFormat, Strategy};
use eurlex_harvester::{parse_retrieved, BlockingClient, Client, ClientConfig, HarvesterError};
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path, query_param, query_param_contains};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OJ_HTML: &str = r#"<html><body>
<p class="oj-doc-ti">REGULATION (EU) 2016/679</p>
<p class="oj-normal">Recital text</p>
<p class="oj-ti-art">Article 1</p>
<p class="oj-normal">1.   This Regulation lays down rules.</p>
<p class="oj-ti-art">Article 2</p>
<p class="oj-normal">Material scope.</p>
</body></html>"#;

const CHALLENGE_HTML: &str = r#"<html><head>
<script src="https://x.token.awswaf.com/challenge.js"></script>
<script>window.awsWafCookieDomainList = [];</script>
</head><body></body></html>"#;

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::builder()
        .request_delay(Duration::ZERO)
        .retry_delay(Duration::from_millis(10))
        .max_retries(3)
        .eurlex_base_url(server.uri())
        .cellar_base_url(server.uri())
        .sparql_endpoint(format!("{}/sparql", server.uri()))
        .build()
}

fn sparql_body(vars: &[&str], rows: &[&[(&str, &str)]]) -> serde_json::Value {
    let bindings: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            let binding: serde_json::Map<String, serde_json::Value> = row
                .iter()
                .map(|(name, value)| {
                    let kind = if value.starts_with("http") { "uri" } else { "literal" };
                    ((*name).to_string(), serde_json::json!({ "type": kind, "value": value }))
                })
                .collect();
            serde_json::Value::Object(binding)
        })
        .collect();
    serde_json::json!({ "head": { "vars": vars }, "results": { "bindings": bindings } })
}

async fn mount_html(server: &MockServer, celex: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path("/legal-content/EN/TXT/HTML/"))
        .and(query_param("uri", format!("CELEX:{celex}")))
        .respond_with(
            ResponseTemplate::new(status).set_body_raw(body.to_string(), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

async fn mount_sparql(server: &MockServer, needle: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .and(query_param_contains("query", needle))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_direct_fetch_and_parse() {
    let server = MockServer::start().await;
    mount_html(&server, "32016R0679", 200, OJ_HTML).await;

    let client = Client::new(config(&server)).unwrap();
    let document = client.fetch("32016R0679").await.unwrap();

    assert_eq!(document.strategy, Strategy::Direct);
    assert_eq!(document.content.format, ContentFormat::Markup);
    assert_eq!(document.reference.raw_id, "32016R0679");

    let outcome = parse_retrieved(&document);
    let articles: Vec<Option<u32>> = outcome.fragments.iter().map(|f| f.article).collect();
    assert_eq!(articles, vec![None, Some(1), Some(2)]);
    assert_eq!(outcome.fragments[1].paragraph, Some(1));
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/legal-content/EN/TXT/HTML/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_html(&server, "32016R0679", 200, OJ_HTML).await;

    let client = Client::new(config(&server)).unwrap();
    let document = client.fetch("32016R0679").await.unwrap();

    assert!(document.content.body.contains("Material scope"));
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_retries_exhausted_reports_status() {
    let server = MockServer::start().await;
    mount_html(&server, "32016R0679", 502, "").await;

    let config = config(&server).to_builder().max_retries(1).build();
    let err = Client::new(config).unwrap().fetch("32016R0679").await.unwrap_err();

    match err {
        HarvesterError::ServiceUnavailable { attempts, status, .. } => {
            assert_eq!(attempts, 2);
            assert_eq!(status, Some(502));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_challenge_uses_metadata_fallback() {
    let server = MockServer::start().await;
    let work = format!("{}/resource/cellar/0a1b2c3d-0000-11e6-9a2e-01aa75ed71a1", server.uri());
    let expression = format!("{work}.0006");
    let manifestation = format!("{work}.0006.03");
    let item = format!("{manifestation}/DOC_1");

    mount_html(&server, "32016R0679", 200, CHALLENGE_HTML).await;
    mount_sparql(
        &server,
        "work_id_document",
        sparql_body(
            &["work", "rawId", "date"],
            &[&[("work", work.as_str()), ("rawId", "32016R0679"), ("date", "2016-04-27")]],
        ),
    )
    .await;
    mount_sparql(
        &server,
        "expression_belongs_to_work",
        sparql_body(
            &["node", "attr"],
            &[&[
                ("node", expression.as_str()),
                ("attr", "http://publications.europa.eu/resource/authority/language/ENG"),
            ]],
        ),
    )
    .await;
    mount_sparql(
        &server,
        "manifestation_manifests_expression",
        sparql_body(&["node", "attr"], &[&[("node", manifestation.as_str()), ("attr", "xhtml")]]),
    )
    .await;
    mount_sparql(
        &server,
        "item_belongs_to_manifestation",
        sparql_body(&["node"], &[&[("node", item.as_str())]]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/resource/cellar/0a1b2c3d-0000-11e6-9a2e-01aa75ed71a1.0006.03/DOC_1"))
        .and(header("accept-language", "eng"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(OJ_HTML, "application/xhtml+xml"))
        .mount(&server)
        .await;

    let client = Client::new(config(&server)).unwrap();
    let document = client.fetch("32016R0679").await.unwrap();

    assert_eq!(document.strategy, Strategy::MetadataFallback);
    assert_eq!(document.content.url, item);
    assert_eq!(parse_retrieved(&document).fragments.len(), 3);
}

#[tokio::test]
async fn test_challenge_raises_when_configured() {
    let server = MockServer::start().await;
    mount_html(&server, "32016R0679", 200, CHALLENGE_HTML).await;

    let config = config(&server).to_builder().raise_on_challenge(true).build();
    let err = Client::new(config).unwrap().fetch("32016R0679").await.unwrap_err();

    match err {
        HarvesterError::ChallengeError { identifier, strategy, .. } => {
            assert_eq!(identifier, "32016R0679");
            assert_eq!(strategy, "direct");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_journal_reference_resolves_through_lookup() {
    let server = MockServer::start().await;
    let work = format!("{}/resource/cellar/11111111-2222-3333-4444-555555555555", server.uri());

    mount_sparql(
        &server,
        "C/2026/00064",
        sparql_body(
            &["work", "rawId", "date"],
            &[&[("work", work.as_str()), ("rawId", "C/2026/00064"), ("date", "2026-01-08")]],
        ),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/resource/cellar/11111111-2222-3333-4444-555555555555"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(OJ_HTML, "text/html"))
        .mount(&server)
        .await;

    let client = Client::new(config(&server)).unwrap();
    let document = client.fetch("C/2026/00064").await.unwrap();

    assert_eq!(document.reference.locator.as_str(), work);
    assert_eq!(document.reference.celex_id, None);
    assert_eq!(document.strategy, Strategy::Direct);
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let server = MockServer::start().await;
    mount_html(&server, "32016R0679", 200, OJ_HTML).await;
    mount_html(&server, "32019R0947", 200, OJ_HTML).await;

    let client = Client::new(config(&server)).unwrap();
    let results = client
        .fetch_many(&["32016R0679", "not-an-id", "32019R0947"], 3)
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(HarvesterError::MalformedIdentifier(_))));
    assert_eq!(results[2].as_ref().unwrap().reference.raw_id, "32019R0947");
}

#[tokio::test]
async fn test_blocking_client() {
    let server = MockServer::start().await;
    mount_html(&server, "32016R0679", 200, OJ_HTML).await;
    let config = config(&server);

    // The blocking client owns its runtime, so it runs on a plain thread
    let outcome = std::thread::spawn(move || {
        BlockingClient::new(config)
            .unwrap()
            .get_fragments("32016R0679")
    })
    .join()
    .unwrap()
    .unwrap();

    assert!(outcome.error.is_none());
    assert_eq!(outcome.fragments.len(), 3);
}
