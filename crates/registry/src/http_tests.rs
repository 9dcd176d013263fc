// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::auth::{GrantTable, RegistryAuth, GRANT_USER};
use crate::test_support::{fixture, manifest_body, Fixture};
use axum::body::Body;
use axum::http::Request;
use fleet_core::FakeClock;
use tower::ServiceExt;

struct App {
    _f: Fixture,
    router: Router,
    grants: Arc<GrantTable<FakeClock>>,
    clock: FakeClock,
}

fn app() -> App {
    let f = fixture();
    let clock = FakeClock::new();
    let grants = Arc::new(GrantTable::new(clock.clone()));
    let auth = Arc::new(RegistryAuth::new(
        Arc::clone(&grants),
        Some(("ops".to_string(), "push-token".to_string())),
    ));
    let manifests = Arc::new(ManifestStore::new(
        Arc::clone(&f.store),
        Arc::clone(&f.blobs),
    ));
    let state = AppState::new(manifests, auth, clock.clone());
    App { _f: f, router: router(state), grants, clock }
}

fn basic(user: &str, secret: &str) -> String {
    format!("Basic {}", BASE64_STANDARD.encode(format!("{user}:{secret}")))
}

async fn send(
    app: &App,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    extra_headers: &[(&str, &str)],
    body: Vec<u8>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = auth {
        builder = builder.header("authorization", value);
    }
    for &(name, value) in extra_headers {
        builder = builder.header(name, value);
    }
    app.router
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(resp: Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn header<'a>(resp: &'a Response, name: &str) -> &'a str {
    resp.headers().get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn base_check_requires_credentials() {
    let app = app();
    let resp = send(&app, "GET", "/v2/", None, &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(header(&resp, "WWW-Authenticate").starts_with("Basic"));
    assert_eq!(header(&resp, "Docker-Distribution-Api-Version"), "registry/2.0");
}

#[tokio::test]
async fn base_check_with_operator_token() {
    let app = app();
    let auth = basic("ops", "push-token");
    let resp = send(&app, "GET", "/v2/", Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn bad_credentials_are_denied() {
    let app = app();
    let auth = basic("ops", "wrong");
    let resp = send(&app, "GET", "/v2/", Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = String::from_utf8(body_bytes(resp).await).unwrap();
    assert!(body.contains("DENIED"));
}

#[tokio::test]
async fn grant_can_pull_but_not_push() {
    let app = app();
    let (_id, secret) = app.grants.issue();
    let auth = basic(GRANT_USER, &secret);
    let resp = send(&app, "GET", "/v2/", Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&app, "POST", "/v2/app/blobs/uploads/", Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

/// Full chunked upload through the HTTP surface; returns the blob digest.
async fn upload_blob(app: &App, content: &[u8]) -> Digest {
    let auth = basic("ops", "push-token");
    let resp = send(app, "POST", "/v2/app/blobs/uploads/", Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let location = header(&resp, "Location").to_string();

    let mid = content.len() / 2;
    let resp = send(app, "PATCH", &location, Some(&auth), &[], content[..mid].to_vec()).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let resp = send(app, "PATCH", &location, Some(&auth), &[], content[mid..].to_vec()).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let digest = Digest::of_bytes(content);
    let uri = format!("{location}?digest={digest}");
    let resp = send(app, "PUT", &uri, Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(header(&resp, "Docker-Content-Digest"), digest.as_str());
    digest
}

#[tokio::test]
async fn blob_upload_and_fetch_round_trip() {
    let app = app();
    let digest = upload_blob(&app, b"layer-content").await;

    let auth = basic("ops", "push-token");
    let uri = format!("/v2/app/blobs/{digest}");
    let resp = send(&app, "GET", &uri, Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "Docker-Content-Digest"), digest.as_str());
    assert_eq!(body_bytes(resp).await, b"layer-content");
}

#[tokio::test]
async fn unknown_blob_is_404() {
    let app = app();
    let auth = basic("ops", "push-token");
    let uri = format!("/v2/app/blobs/{}", Digest::of_bytes(b"nope"));
    let resp = send(&app, "GET", &uri, Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_digest_is_400() {
    let app = app();
    let auth = basic("ops", "push-token");
    let resp = send(&app, "GET", "/v2/app/blobs/not-a-digest", Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn finalize_with_wrong_digest_is_rejected() {
    let app = app();
    let auth = basic("ops", "push-token");
    let resp = send(&app, "POST", "/v2/app/blobs/uploads/", Some(&auth), &[], vec![]).await;
    let location = header(&resp, "Location").to_string();
    send(&app, "PATCH", &location, Some(&auth), &[], b"real".to_vec()).await;

    let wrong = Digest::of_bytes(b"different");
    let uri = format!("{location}?digest={wrong}");
    let resp = send(&app, "PUT", &uri, Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chunk_with_stale_content_range_is_rejected() {
    let app = app();
    let auth = basic("ops", "push-token");
    let resp = send(&app, "POST", "/v2/app/blobs/uploads/", Some(&auth), &[], vec![]).await;
    let location = header(&resp, "Location").to_string();
    send(&app, "PATCH", &location, Some(&auth), &[], b"01234".to_vec()).await;

    // Claims to start at 0 again
    let resp = send(
        &app,
        "PATCH",
        &location,
        Some(&auth),
        &[("content-range", "0-5")],
        b"56789".to_vec(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn upload_status_reports_progress() {
    let app = app();
    let auth = basic("ops", "push-token");
    let resp = send(&app, "POST", "/v2/app/blobs/uploads/", Some(&auth), &[], vec![]).await;
    let location = header(&resp, "Location").to_string();
    send(&app, "PATCH", &location, Some(&auth), &[], vec![0u8; 10]).await;

    let resp = send(&app, "GET", &location, Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(header(&resp, "Range"), "0-9");
}

#[tokio::test]
async fn manifest_push_and_fetch() {
    let app = app();
    let auth = basic("ops", "push-token");
    let config = upload_blob(&app, b"{}").await;
    let layer_content = b"layer-bytes";
    let layer = upload_blob(&app, layer_content).await;

    let body = serde_json::to_vec(&serde_json::json!({
        "config": {"digest": config},
        "layers": [{
            "digest": layer,
            "size": layer_content.len(),
            "mediaType": fleet_core::LAYER_MEDIA_TYPE,
        }],
    }))
    .unwrap();

    let resp = send(&app, "PUT", "/v2/app/manifests/latest", Some(&auth), &[], body.clone()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let digest = header(&resp, "Docker-Content-Digest").to_string();
    assert_eq!(digest, Digest::of_bytes(&body).as_str());

    // Fetch by tag returns the exact bytes
    let resp = send(&app, "GET", "/v2/app/manifests/latest", Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "Content-Type"), fleet_core::MANIFEST_MEDIA_TYPE);
    assert_eq!(body_bytes(resp).await, body);

    // And by digest
    let uri = format!("/v2/app/manifests/{digest}");
    let resp = send(&app, "GET", &uri, Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn manifest_push_with_missing_blob_is_400() {
    let app = app();
    let auth = basic("ops", "push-token");
    let body = serde_json::to_vec(&serde_json::json!({
        "config": {"digest": Digest::of_bytes(b"missing-config")},
        "layers": [],
    }))
    .unwrap();
    let resp = send(&app, "PUT", "/v2/app/manifests/v1", Some(&auth), &[], body).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let text = String::from_utf8(body_bytes(resp).await).unwrap();
    assert!(text.contains("MANIFEST_INVALID"));
}

#[tokio::test]
async fn unknown_manifest_is_404() {
    let app = app();
    let auth = basic("ops", "push-token");
    let resp = send(&app, "GET", "/v2/app/manifests/ghost", Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expired_grant_is_denied() {
    let app = app();
    let (_id, secret) = app.grants.issue();
    app.clock
        .advance(crate::auth::GRANT_TTL + std::time::Duration::from_secs(1));
    let auth = basic(GRANT_USER, &secret);
    let resp = send(&app, "GET", "/v2/", Some(&auth), &[], vec![]).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn manifest_body_helper_is_pushable() {
    // Guards the shared fixture helper against drifting from the real
    // handler's expectations.
    let app = app();
    let auth = basic("ops", "push-token");
    let body = manifest_body(&app._f.blobs, &[b"l1", b"l2"], b"{}");
    let resp = send(&app, "PUT", "/v2/app/manifests/v2", Some(&auth), &[], body).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}
