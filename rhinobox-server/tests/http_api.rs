//! End-to-end HTTP tests: build the full router in-process and drive it
//! with `tower::ServiceExt::oneshot`, the way the teacher's server crate
//! tests its axum app.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use rhinobox_core::config::Config;
use rhinobox_server::app_state::AppState;
use rhinobox_server::router;
use tower::ServiceExt;

fn test_config(data_dir: &std::path::Path) -> Config {
    let mut cfg = Config::default();
    cfg.data_dir = data_dir.to_string_lossy().into_owned();
    cfg
}

fn test_app(data_dir: &std::path::Path) -> axum::Router {
    let cfg = test_config(data_dir);
    let state = Arc::new(AppState::new(cfg).expect("app state"));
    router::build(state)
}

fn multipart_body(boundary: &str, field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "ok");
}

#[tokio::test]
async fn ingest_then_search_finds_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let boundary = "testboundary";
    let payload = multipart_body(boundary, "file", "report.txt", "text/plain", b"hello rhinobox");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ingest")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    let hash = json["data"]["files"][0]["hash"].as_str().unwrap().to_string();
    assert!(!json["data"]["files"][0]["duplicate"].as_bool().unwrap());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/files/search?name=report")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["records"][0]["hash"], hash);
}

#[tokio::test]
async fn ingesting_identical_bytes_twice_is_flagged_as_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let boundary = "dupboundary";

    for name in ["first.bin", "second.bin"] {
        let payload = multipart_body(boundary, "file", name, "application/octet-stream", b"same bytes");
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest")
                    .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        let is_dup = json["data"]["files"][0]["duplicate"].as_bool().unwrap();
        if name == "first.bin" {
            assert!(!is_dup);
        } else {
            assert!(is_dup);
        }
    }
}

#[tokio::test]
async fn unknown_hash_returns_uniform_not_found_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let bogus = "a".repeat(64);
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/files/{bogus}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn version_chain_upload_and_revert() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let boundary = "versionboundary";

    for (content, comment) in [(b"v1 body".as_slice(), "initial"), (b"v2 body".as_slice(), "update")] {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"comment\"\r\n\r\n");
        body.extend_from_slice(comment.as_bytes());
        body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"doc.txt\"\r\nContent-Type: text/plain\r\n\r\n",
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/files/doc-1/versions")
                    .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/files/doc-1/versions/current")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["version"], 2);

    let revert_body = serde_json::json!({ "version": 1 }).to_string();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/files/doc-1/revert")
                .header("content-type", "application/json")
                .body(Body::from(revert_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["version"], 3);
}

#[tokio::test]
async fn byte_range_request_returns_partial_content() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let boundary = "rangeboundary";
    let payload = multipart_body(boundary, "file", "range.bin", "application/octet-stream", b"0123456789");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ingest")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    let hash = json["data"]["files"][0]["hash"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/files/stream?hash={hash}"))
                .header("range", "bytes=2-5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let content_range = response.headers().get("content-range").unwrap().to_str().unwrap().to_string();
    assert_eq!(content_range, "bytes 2-5/10");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"2345");
}

#[tokio::test]
async fn metadata_edit_rejects_protected_keys() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());
    let boundary = "metaboundary";
    let payload = multipart_body(boundary, "file", "note.txt", "text/plain", b"content");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ingest")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    let hash = json["data"]["files"][0]["hash"].as_str().unwrap().to_string();

    let edit_body = serde_json::json!({
        "action": "merge",
        "data": { "hash": "not-allowed" }
    })
    .to_string();
    let response = app
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/files/{hash}/metadata"))
                .header("content-type", "application/json")
                .body(Body::from(edit_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
}
