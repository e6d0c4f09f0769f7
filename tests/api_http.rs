use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use readpress::checkpoint::EPOCH;
use readpress::config::{Config, Readwise};
use readpress::db::Database;
use readpress::handler::AppState;
use readpress::model::SettingKey;
use readpress::readwise::ReadwiseClient;
use readpress::routes::routes;
use readpress::sync::{SyncOptions, Syncer};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn app(base_url: &str) -> (Arc<Database>, Router) {
    let db = Arc::new(Database::in_memory().await.unwrap());
    let client = ReadwiseClient::new(&Readwise {
        base_url: base_url.to_string(),
        timeout_seconds: 5,
    })
    .unwrap();
    let syncer = Arc::new(Syncer::new(
        Arc::new(client),
        db.clone(),
        SyncOptions::from(&Config::default()),
    ));
    let router = routes().with_state(AppState {
        db: db.clone(),
        syncer,
    });
    (db, router)
}

async fn send(router: Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = router.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn healthcheck_is_ok() {
    let (_db, router) = app("http://127.0.0.1:9").await;
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();

    let (status, body) = send(router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn sync_without_token_is_unauthorized() {
    let (db, router) = app("http://127.0.0.1:9").await;
    let req = Request::builder()
        .method("POST")
        .uri("/sync")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "auth_error");
    assert_eq!(db.get_setting(SettingKey::TimeLastChecked).await.unwrap(), None);
}

#[tokio::test]
async fn sync_returns_report_and_lists_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/export/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "nextPageCursor": null,
            "results": [{
                "user_book_id": 11,
                "title": "On Writing",
                "author": "S. King",
                "category": "books",
                "highlights": [{
                    "id": 1,
                    "text": "Ideas matter",
                    "tags": [{"name": "philosophy"}, {"name": "wppost:publish"}],
                }],
            }],
        })))
        .mount(&server)
        .await;

    let (db, router) = app(&server.uri()).await;
    db.set_setting(SettingKey::AccessToken, "tok").await.unwrap();

    let (status, body) = send(
        router.clone(),
        json_request("POST", "/sync", json!({"fetchAll": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fetch_all"], true);
    assert_eq!(body["data"]["stats"]["created"], 1);
    assert_eq!(body["data"]["results"][0]["title"], "On Writing");

    let req = Request::builder()
        .uri("/entries?page=1&limit=10")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["status"], "publish");
    assert_eq!(body["data"]["items"][0]["tags"], json!(["philosophy"]));
}

#[tokio::test]
async fn settings_mask_token_and_reject_bad_rules() {
    let (_db, router) = app("http://127.0.0.1:9").await;

    let (status, body) = send(
        router.clone(),
        json_request(
            "PUT",
            "/settings",
            json!({
                "readwise_access_token": "secret",
                "new_name_sets": "S. King===Stephen King",
                "user_added_tags": "quotes",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["has_access_token"], true);
    assert_eq!(body["data"]["user_added_tags"], "quotes");
    assert!(!body.to_string().contains("secret"));

    let (status, _) = send(
        router.clone(),
        json_request("PUT", "/settings", json!({"new_name_sets": "no separator"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        router.clone(),
        json_request("PUT", "/settings", json!({"time_last_checked": "yesterday"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::builder().uri("/settings").body(Body::empty()).unwrap();
    let (status, body) = send(router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["new_name_sets"], "S. King===Stephen King");
}

const STORED_CHECKPOINT: &str = "2024-01-01T00:00:00Z";

async fn checkpointed_app() -> (MockServer, Arc<Database>, Router) {
    let server = MockServer::start().await;
    for since in [EPOCH, STORED_CHECKPOINT] {
        Mock::given(method("GET"))
            .and(path("/api/v2/export/"))
            .and(query_param("updatedAfter", since))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 0,
                "nextPageCursor": null,
                "results": [],
            })))
            .mount(&server)
            .await;
    }

    let (db, router) = app(&server.uri()).await;
    db.set_setting(SettingKey::AccessToken, "tok").await.unwrap();
    db.set_setting(SettingKey::TimeLastChecked, STORED_CHECKPOINT)
        .await
        .unwrap();
    (server, db, router)
}

fn raw_request(content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/sync")
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn form_encoded_fetch_all_starts_from_epoch() {
    let (_server, _db, router) = checkpointed_app().await;

    let (status, body) = send(
        router.clone(),
        raw_request("application/x-www-form-urlencoded", "fetchAll=true"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fetch_all"], true);
    assert_eq!(body["data"]["since"], EPOCH);
}

#[tokio::test]
async fn form_encoded_incremental_sync_uses_checkpoint() {
    let (_server, _db, router) = checkpointed_app().await;

    let (status, body) = send(
        router,
        raw_request("application/x-www-form-urlencoded; charset=UTF-8", "fetchAll=false"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["fetch_all"], false);
    assert_eq!(body["data"]["since"], STORED_CHECKPOINT);
}

#[tokio::test]
async fn string_fetch_all_in_json_is_honoured() {
    let (_server, _db, router) = checkpointed_app().await;

    let (status, body) = send(
        router,
        json_request("POST", "/sync", json!({"fetchAll": "true"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["since"], EPOCH);
}

#[tokio::test]
async fn malformed_sync_bodies_are_rejected() {
    let (_server, db, router) = checkpointed_app().await;

    for (content_type, payload) in [
        ("application/json", r#"{"fetchAll":true"#),
        ("application/json", r#"{"fetchAll":"sometimes"}"#),
        ("application/x-www-form-urlencoded", "fetchAll=maybe"),
    ] {
        let (status, body) = send(router.clone(), raw_request(content_type, payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", payload);
        assert!(body["error"].is_string());
    }

    assert_eq!(
        db.get_setting(SettingKey::TimeLastChecked).await.unwrap().as_deref(),
        Some(STORED_CHECKPOINT)
    );
}

#[tokio::test]
async fn unknown_entry_is_not_found() {
    let (_db, router) = app("http://127.0.0.1:9").await;
    let req = Request::builder().uri("/entries/42").body(Body::empty()).unwrap();

    let (status, body) = send(router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "entry not found");
}
