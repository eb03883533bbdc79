//! Catalog client against a mock upstream
//!
//! Exercises the real HTTP stack: query string shape, error
//! classification per status code, and the one-call-one-request
//! contract.

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use catalog_ingest_lib::domain::services::{FetchError, PageFetcher};
use catalog_ingest_lib::infrastructure::catalog_client::CatalogClient;
use catalog_ingest_lib::infrastructure::config::{ClientConfig, aboutyou};

fn client_for(server: &MockServer) -> CatalogClient {
    let config = ClientConfig {
        base_url: format!("{}/v1", server.uri()),
        max_requests_per_second: 100,
        ..ClientConfig::default()
    };
    CatalogClient::new(&config).expect("client")
}

#[tokio::test]
async fn fetch_sends_expected_query_and_parses_the_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .and(query_param("page", "2"))
        .and(query_param("with", "categories,priceRange"))
        .and(header("user-agent", aboutyou::USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entities": [
                { "id": 1, "name": "Sneaker" },
                { "id": 2, "name": "Jacket" }
            ],
            "pagination": { "current": 2, "total": 408, "perPage": 204, "prev": 1, "last": 2 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let page = client.fetch_page(2).await.unwrap();

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[0]["name"], "Sneaker");
    assert_eq!(page.pagination.current, 2);
    assert_eq!(page.pagination.total_pages(), 2);
}

#[tokio::test]
async fn configured_filters_ride_along_as_bracketed_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .and(query_param("filters[category]", "shoes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entities": [],
            "pagination": { "current": 1, "total": 0, "perPage": 204 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut filters = std::collections::HashMap::new();
    filters.insert("category".to_string(), "shoes".to_string());
    let config = ClientConfig {
        base_url: format!("{}/v1", server.uri()),
        max_requests_per_second: 100,
        filters,
        ..ClientConfig::default()
    };
    let client = CatalogClient::new(&config).expect("client");

    let page = client.fetch_page(1).await.unwrap();
    assert!(page.is_empty());
}

#[tokio::test]
async fn server_errors_classify_as_transient_upstream_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_page(3).await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::UpstreamStatus {
            page: 3,
            status: 500
        }
    ));
    assert!(err.is_transient());
}

#[tokio::test]
async fn client_errors_classify_as_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_page(9).await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::UpstreamStatus {
            page: 9,
            status: 404
        }
    ));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn rate_limiting_reads_the_retry_after_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_page(1).await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::RateLimited {
            page: 1,
            retry_after_secs: 7
        }
    ));
    assert!(err.is_transient());
}

#[tokio::test]
async fn rate_limiting_without_header_defaults_to_a_minute() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_page(1).await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::RateLimited {
            retry_after_secs: 60,
            ..
        }
    ));
}

#[tokio::test]
async fn unparseable_bodies_classify_as_permanent_decode_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>definitely not json</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_page(1).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode { page: 1, .. }));
    assert!(!err.is_transient());
}
