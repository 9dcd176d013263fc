// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry wire protocol over HTTP.
//!
//! Implements the push/pull subset of the standard container-registry API:
//! liveness, blob fetch, resumable blob uploads, and manifest push/fetch.
//! Every request carries a Basic credential checked against the
//! [`CredentialValidator`] collaborator; pushes additionally require push
//! scope.

use crate::auth::{CredentialValidator, Scope};
use crate::manifests::{ManifestStore, RegistryError};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{HeaderMap, AUTHORIZATION};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use fleet_core::{Clock, Digest, UploadId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const API_VERSION_HEADER: (&str, &str) = ("Docker-Distribution-Api-Version", "registry/2.0");
const WWW_AUTHENTICATE: (&str, &str) =
    ("WWW-Authenticate", "Basic realm=\"fleet registry\", charset=\"UTF-8\"");

/// Object-safe epoch source so the state is not generic over the clock.
trait EpochSource: Send + Sync {
    fn epoch_ms(&self) -> u64;
}

struct ClockSource<C: Clock>(C);

impl<C: Clock> EpochSource for ClockSource<C> {
    fn epoch_ms(&self) -> u64 {
        self.0.epoch_ms()
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    manifests: Arc<ManifestStore>,
    auth: Arc<dyn CredentialValidator>,
    clock: Arc<dyn EpochSource>,
}

impl AppState {
    pub fn new(
        manifests: Arc<ManifestStore>,
        auth: Arc<dyn CredentialValidator>,
        clock: impl Clock + 'static,
    ) -> Self {
        Self { manifests, auth, clock: Arc::new(ClockSource(clock)) }
    }
}

/// Build the `/v2/` router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v2/", get(base_check))
        .route("/v2/{repo}/blobs/uploads/", post(upload_start))
        .route(
            "/v2/{repo}/blobs/uploads/{id}",
            get(upload_status).patch(upload_chunk).put(upload_finish),
        )
        .route("/v2/{repo}/blobs/{digest}", get(blob_get))
        .route("/v2/{repo}/manifests/{reference}", get(manifest_get).put(manifest_put))
        .layer(axum::middleware::map_response(tag_api_version))
        .with_state(state)
}

async fn tag_api_version(mut response: Response) -> Response {
    if let Ok(value) = API_VERSION_HEADER.1.parse() {
        response.headers_mut().insert(API_VERSION_HEADER.0, value);
    }
    response
}

fn error_body(code: &str, message: &str) -> String {
    serde_json::json!({
        "errors": [{"code": code, "message": message, "detail": "null"}]
    })
    .to_string()
}

fn auth_failure(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        [WWW_AUTHENTICATE, ("Content-Type", "application/json; charset=utf-8")],
        error_body(code, message),
    )
        .into_response()
}

fn client_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        [("Content-Type", "application/json; charset=utf-8")],
        error_body(code, message),
    )
        .into_response()
}

/// Validate the Basic credential on a request. Returns the user name.
async fn check_auth(
    state: &AppState,
    headers: &HeaderMap,
    scope: Scope,
) -> Result<String, Response> {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Err(auth_failure(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "authentication required",
        ));
    };
    let decoded = value
        .strip_prefix("Basic ")
        .and_then(|b64| BASE64_STANDARD.decode(b64).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok());
    let Some((user, secret)) = decoded.as_deref().and_then(|s| s.split_once(':')) else {
        return Err(auth_failure(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "authentication required",
        ));
    };
    if state.auth.validate(user, secret, scope).await {
        Ok(user.to_string())
    } else {
        warn!(user, %scope, "registry auth failure");
        Err(auth_failure(StatusCode::FORBIDDEN, "DENIED", "access denied"))
    }
}

/// Parsed `Content-Range: <start>-<end>` header.
fn content_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let raw = headers.get("content-range")?.to_str().ok()?;
    let (start, end) = raw.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

// GET /v2/ — check that the endpoint implements the registry API.
async fn base_check(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = check_auth(&state, &headers, Scope::Pull).await {
        return resp;
    }
    StatusCode::OK.into_response()
}

// POST /v2/{repo}/blobs/uploads/ — initiate a resumable upload.
async fn upload_start(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers, Scope::Push).await {
        return resp;
    }
    let id = match state.manifests.blob_store().begin_upload() {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "upload initiate failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    debug!(%id, %repo, "upload started");
    (
        StatusCode::ACCEPTED,
        [
            ("Content-Length", "0".to_string()),
            ("Location", format!("/v2/{repo}/blobs/uploads/{id}")),
            ("Range", "0-0".to_string()),
            ("Docker-Upload-UUID", id.to_string()),
        ],
    )
        .into_response()
}

// GET /v2/{repo}/blobs/uploads/{id} — resumable upload status.
async fn upload_status(
    State(state): State<AppState>,
    Path((repo, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers, Scope::Pull).await {
        return resp;
    }
    let id = UploadId::from_string(id);
    match state.manifests.blob_store().upload_status(&id) {
        Some(written) => (
            StatusCode::ACCEPTED,
            [
                ("Location", format!("/v2/{repo}/blobs/uploads/{id}")),
                ("Range", format!("0-{}", written.saturating_sub(1))),
                ("Docker-Upload-UUID", id.to_string()),
            ],
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// PATCH /v2/{repo}/blobs/uploads/{id} — append a chunk.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((repo, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers, Scope::Push).await {
        return resp;
    }
    let id = UploadId::from_string(id);
    let blobs = state.manifests.blob_store();
    let Some(offset) = blobs.upload_status(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some((start, end)) = content_range(&headers) {
        if start != offset {
            warn!(%id, start, offset, "chunk not at end of upload");
            return client_error(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "BLOB_UPLOAD_INVALID",
                "chunk offset does not match upload state",
            );
        }
        if end.saturating_sub(start) != body.len() as u64 {
            return client_error(
                StatusCode::BAD_REQUEST,
                "BLOB_UPLOAD_INVALID",
                "content-range does not match body length",
            );
        }
    }
    match blobs.append_chunk(&id, &body) {
        Ok(written) => (
            StatusCode::ACCEPTED,
            [
                ("Location", format!("/v2/{repo}/blobs/uploads/{id}")),
                ("Range", format!("0-{}", written.saturating_sub(1))),
                ("Content-Length", "0".to_string()),
                ("Docker-Upload-UUID", id.to_string()),
            ],
        )
            .into_response(),
        Err(e) => {
            warn!(%id, error = %e, "chunk append failed");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

#[derive(Deserialize)]
struct FinishParams {
    digest: Option<String>,
}

// PUT /v2/{repo}/blobs/uploads/{id}?digest= — finalize, optionally with a
// trailing chunk in the body.
async fn upload_finish(
    State(state): State<AppState>,
    Path((repo, id)): Path<(String, String)>,
    Query(params): Query<FinishParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers, Scope::Push).await {
        return resp;
    }
    let Some(declared) = params.digest.as_deref().and_then(|d| Digest::parse(d).ok()) else {
        return client_error(
            StatusCode::BAD_REQUEST,
            "DIGEST_INVALID",
            "finalize requires a valid digest parameter",
        );
    };
    let id = UploadId::from_string(id);
    let blobs = state.manifests.blob_store();
    if blobs.upload_status(&id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !body.is_empty() {
        if let Err(e) = blobs.append_chunk(&id, &body) {
            warn!(%id, error = %e, "final chunk append failed");
            return StatusCode::NOT_FOUND.into_response();
        }
    }
    match blobs.finish_upload(&id, &declared) {
        Ok(_written) => (
            StatusCode::CREATED,
            [
                ("Location", format!("/v2/{repo}/blobs/{declared}")),
                ("Content-Length", "0".to_string()),
                ("Docker-Content-Digest", declared.to_string()),
            ],
        )
            .into_response(),
        Err(e) => {
            warn!(%id, error = %e, "upload finalize rejected");
            client_error(StatusCode::BAD_REQUEST, "DIGEST_INVALID", &e.to_string())
        }
    }
}

// GET /v2/{repo}/blobs/{digest} — fetch a blob (HEAD shares the route).
async fn blob_get(
    State(state): State<AppState>,
    Path((_repo, digest)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers, Scope::Pull).await {
        return resp;
    }
    let Ok(digest) = Digest::parse(&digest) else {
        return client_error(StatusCode::BAD_REQUEST, "DIGEST_INVALID", "bad blob digest");
    };
    match state.manifests.blob_store().read(&digest) {
        Ok(Some(bytes)) => (
            StatusCode::OK,
            [
                ("Docker-Content-Digest", digest.to_string()),
                ("Content-Type", "application/octet-stream".to_string()),
            ],
            bytes,
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(%digest, error = %e, "blob read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// GET /v2/{repo}/manifests/{reference} — fetch by tag or digest.
async fn manifest_get(
    State(state): State<AppState>,
    Path((repo, reference)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = check_auth(&state, &headers, Scope::Pull).await {
        return resp;
    }
    match state.manifests.fetch(&repo, &reference) {
        Ok(record) => (
            StatusCode::OK,
            [
                ("Content-Type", fleet_core::MANIFEST_MEDIA_TYPE.to_string()),
                ("Docker-Content-Digest", record.digest.to_string()),
            ],
            record.body,
        )
            .into_response(),
        Err(RegistryError::NotFound) => {
            debug!(repo, reference, "manifest not found");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            warn!(repo, reference, error = %e, "manifest fetch failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// PUT /v2/{repo}/manifests/{reference} — push a manifest.
async fn manifest_put(
    State(state): State<AppState>,
    Path((repo, reference)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = match check_auth(&state, &headers, Scope::Push).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let now_ms = state.clock.epoch_ms();
    match state.manifests.push(&repo, &reference, &body, &user, now_ms) {
        Ok(record) => (
            StatusCode::CREATED,
            [
                ("Location", format!("/v2/{repo}/manifests/{}", record.digest)),
                ("Content-Length", "0".to_string()),
                ("Docker-Content-Digest", record.digest.to_string()),
            ],
        )
            .into_response(),
        Err(
            e @ (RegistryError::MissingBlob(_)
            | RegistryError::BadMediaType { .. }
            | RegistryError::SizeMismatch { .. }
            | RegistryError::InvalidBody(_)
            | RegistryError::NotUtf8
            | RegistryError::Digest(_)),
        ) => {
            warn!(repo, reference, error = %e, "manifest push rejected");
            client_error(StatusCode::BAD_REQUEST, "MANIFEST_INVALID", &e.to_string())
        }
        Err(e) => {
            warn!(repo, reference, error = %e, "manifest push failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
