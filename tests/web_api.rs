#![cfg(feature = "server")]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use clear_urls_service::config::Config;
use clear_urls_service::db::Db;
use clear_urls_service::rule_store::RuleStore;
use clear_urls_service::web::{create_app, AppState};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower::ServiceExt;
use url::form_urlencoded;

const RULES: &str = r#"{"providers": {
    "google": {
        "urlPattern": "^https?://(?:[a-z0-9-]+\\.)*?google(?:\\.[a-z]{2,}){1,}",
        "redirections": ["/url\\?.*?(?:url|q)=(https?[^&]+)"]
    },
    "globalRules": {
        "urlPattern": ".*",
        "rules": ["utm_[a-z]+", "fbclid"],
        "referralMarketing": ["ref"]
    }
}}"#;

async fn setup() -> (Router, RuleStore) {
    let config = Config {
        database_url: "sqlite::memory:".into(),
        server_addr: "127.0.0.1:0".into(),
        rules_url: "http://127.0.0.1:9/rules".into(),
        rules_hash_url: "http://127.0.0.1:9/hash".into(),
        refresh_interval: Duration::from_secs(3600),
        retry_attempts: 0,
        retry_delay: Duration::from_millis(1),
        log_dir: None,
    };
    let db = Db::new(&config.database_url).await.unwrap();
    let rules = RuleStore::new(db.clone(), &config);
    let app = create_app(AppState {
        db,
        rules: rules.clone(),
    });
    (app, rules)
}

async fn install_rules(store: &RuleStore) {
    let hash = hex::encode(Sha256::digest(RULES.as_bytes()));
    store.install(RULES, &hash).await.unwrap();
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn clean_uri(pairs: &[(&str, &str)]) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        query.append_pair(k, v);
    }
    format!("/clean?{}", query.finish())
}

#[tokio::test]
async fn health_check() {
    let (app, _) = setup().await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));
}

#[tokio::test]
async fn heuristic_clean_over_get() {
    let (app, _) = setup().await;
    let uri = clean_uri(&[(
        "url",
        "https://example.com/page?utm_source=google&custom_param=value#utm_content=ad",
    )]);
    let (status, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://example.com/page?custom_param=value");
    assert_eq!(body["changed"], true);
    assert_eq!(body["error"], Value::Null);
}

#[tokio::test]
async fn repeated_keep_parameters_are_honored() {
    let (app, _) = setup().await;
    let uri = clean_uri(&[
        ("url", "https://example.com/?utm_source=a&fbclid=b&gclid=c"),
        ("keep", "utm_source"),
        ("keep", "fbclid"),
    ]);
    let (_, body) = send(&app, get(&uri)).await;
    assert_eq!(body["url"], "https://example.com/?utm_source=a&fbclid=b");
}

#[tokio::test]
async fn invalid_url_is_unprocessable() {
    let (app, _) = setup().await;
    let (status, body) = send(&app, get(&clean_uri(&[("url", "not a url")]))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "InvalidURL");
    assert_eq!(body["url"], "not a url");
}

#[tokio::test]
async fn unknown_strategy_is_rejected() {
    let (app, _) = setup().await;
    let uri = clean_uri(&[("url", "https://example.com/"), ("strategy", "magic")]);
    let (status, _) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rules_strategy_without_rules_is_unavailable() {
    let (app, _) = setup().await;
    let uri = clean_uri(&[("url", "https://example.com/?utm_source=x"), ("strategy", "rules")]);
    let (status, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "RulesUnavailable");
    assert_eq!(body["url"], "https://example.com/?utm_source=x");
}

#[tokio::test]
async fn rules_strategy_over_post() {
    let (app, store) = setup().await;
    install_rules(&store).await;

    let req = json_request(
        Method::POST,
        "/clean",
        json!({
            "url": "https://www.google.com/url?q=https%3A%2F%2Fexample.com%2F%3Futm_source%3Dx%26id%3D1",
            "strategy": "rules"
        }),
    );
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://example.com/?id=1");
    assert_eq!(body["unwrappedFrom"], "google");

    let (_, history) = send(&app, get("/history")).await;
    assert_eq!(history.as_array().map(Vec::len), Some(1));
    assert_eq!(history[0]["strategy"], "rules");
    assert_eq!(history[0]["provider_name"], "google");
}

#[tokio::test]
async fn stored_options_drive_cleaning() {
    let (app, _) = setup().await;

    let (status, saved) = send(
        &app,
        json_request(Method::PUT, "/options", json!({ "removeReferral": false, "keepParams": ["utm_id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["removeReferral"], false);
    assert_eq!(saved["allowReferral"], true);

    let (_, fetched) = send(&app, get("/options")).await;
    assert_eq!(fetched["keepParams"], json!(["utm_id"]));

    let uri = clean_uri(&[("url", "https://example.com/?ref=abc&utm_id=1&utm_source=x")]);
    let (_, body) = send(&app, get(&uri)).await;
    assert_eq!(body["url"], "https://example.com/?ref=abc&utm_id=1");

    // Other profiles keep the defaults.
    let uri = clean_uri(&[("url", "https://example.com/?ref=abc"), ("profile", "other")]);
    let (_, body) = send(&app, get(&uri)).await;
    assert_eq!(body["url"], "https://example.com/");
}

#[tokio::test]
async fn rules_status_reports_snapshot() {
    let (app, store) = setup().await;

    let (_, before) = send(&app, get("/rules/status")).await;
    assert_eq!(before["loaded"], false);

    install_rules(&store).await;
    let (_, after) = send(&app, get("/rules/status")).await;
    assert_eq!(after["loaded"], true);
    assert_eq!(after["provider_count"], 2);
}

#[tokio::test]
async fn failed_refresh_is_a_bad_gateway() {
    let (app, store) = setup().await;
    install_rules(&store).await;

    let req = Request::builder()
        .method(Method::POST)
        .uri("/rules/refresh")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].is_string());
    assert!(store.status().loaded);
}

#[tokio::test]
async fn options_with_comma_in_a_name_are_rejected() {
    let (app, _) = setup().await;
    let (status, body) = send(
        &app,
        json_request(Method::PUT, "/options", json!({ "keepParams": ["utm_id,ref"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (_, fetched) = send(&app, get("/options")).await;
    assert_eq!(fetched["keepParams"], json!([]));
}
