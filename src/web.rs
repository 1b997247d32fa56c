//! HTTP management surface.
//!
//! Handlers never touch frame state directly: every mutation is queued to
//! the main loop through [`FrameHandle`] and the reply is relayed back.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ManagementConfig;
use crate::connectivity::NetworkStack;
use crate::error::{ControlError, StorageError};
use crate::events::{ControlOutcome, ControlRequest, FrameHandle};
use crate::storage::Storage;

const UPLOAD_LIMIT_BYTES: usize = 32 * 1024 * 1024;

struct ApiState<N> {
    frame: FrameHandle,
    stack: Arc<N>,
    storage: Option<Arc<dyn Storage>>,
    index_path: Option<Arc<PathBuf>>,
}

impl<N> Clone for ApiState<N> {
    fn clone(&self) -> Self {
        Self {
            frame: self.frame.clone(),
            stack: Arc::clone(&self.stack),
            storage: self.storage.clone(),
            index_path: self.index_path.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SequenceBody {
    mode: i64,
}

#[derive(Debug, Deserialize)]
struct BrightnessBody {
    level: i64,
}

#[derive(Debug, Deserialize)]
struct WifiBody {
    ssid: String,
    #[serde(default)]
    secret: String,
}

/// Build the management router. `storage` backs the upload/delete
/// endpoints; `index_path` is served verbatim at `/`.
pub fn router<N: NetworkStack>(
    frame: FrameHandle,
    stack: Arc<N>,
    storage: Option<Arc<dyn Storage>>,
    index_path: Option<PathBuf>,
) -> Router {
    let state = ApiState {
        frame,
        stack,
        storage,
        index_path: index_path.map(Arc::new),
    };
    Router::new()
        .route("/", get(index::<N>))
        .route("/api/status", get(status::<N>))
        .route("/api/networks", get(networks::<N>))
        .route("/api/rescan", post(rescan::<N>))
        .route("/api/sequence", post(set_sequence::<N>))
        .route("/api/brightness", post(set_brightness::<N>))
        .route("/api/wifi", post(set_wifi::<N>))
        .route(
            "/api/images/{name}",
            put(upload_image::<N>).delete(delete_image::<N>),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES))
        .with_state(state)
}

/// Serve `router` until `cancel` fires.
pub async fn serve(config: &ManagementConfig, router: Router, cancel: CancellationToken) -> Result<()> {
    let addr = SocketAddr::new(
        config
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind address {}", config.bind_address))?,
        config.port,
    );
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind management listener on {addr}"))?;
    info!(%addr, "management surface listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("management server exited")?;
    Ok(())
}

async fn index<N: NetworkStack>(State(state): State<ApiState<N>>) -> Response {
    let Some(path) = state.index_path else {
        return (StatusCode::NOT_FOUND, "no index page configured").into_response();
    };
    match tokio::fs::read_to_string(path.as_ref()).await {
        Ok(page) => Html(page).into_response(),
        Err(err) => {
            warn!(path = %path.display(), error = ?err, "failed to read index page");
            (StatusCode::NOT_FOUND, "index page unavailable").into_response()
        }
    }
}

async fn status<N: NetworkStack>(State(state): State<ApiState<N>>) -> Response {
    Json(state.frame.status()).into_response()
}

async fn networks<N: NetworkStack>(State(state): State<ApiState<N>>) -> Response {
    match state.stack.scan().await {
        Ok(found) => Json(found).into_response(),
        Err(err) => {
            warn!(error = ?err, "network scan failed");
            error_response(StatusCode::BAD_GATEWAY, "network scan failed")
        }
    }
}

async fn rescan<N: NetworkStack>(State(state): State<ApiState<N>>) -> Response {
    command(&state.frame, ControlRequest::Rescan).await
}

async fn set_sequence<N: NetworkStack>(
    State(state): State<ApiState<N>>,
    Json(body): Json<SequenceBody>,
) -> Response {
    command(&state.frame, ControlRequest::SetSequenceMode { mode: body.mode }).await
}

async fn set_brightness<N: NetworkStack>(
    State(state): State<ApiState<N>>,
    Json(body): Json<BrightnessBody>,
) -> Response {
    command(&state.frame, ControlRequest::SetBrightness { level: body.level }).await
}

async fn set_wifi<N: NetworkStack>(
    State(state): State<ApiState<N>>,
    Json(body): Json<WifiBody>,
) -> Response {
    command(
        &state.frame,
        ControlRequest::SetCredentials {
            ssid: body.ssid,
            secret: body.secret,
        },
    )
    .await
}

async fn upload_image<N: NetworkStack>(
    State(state): State<ApiState<N>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let Some(storage) = state.storage.clone() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable");
    };
    let identifier = format!("/{name}");
    let target = identifier.clone();
    let written = tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
        let mut file = storage.open_write(&target)?;
        file.write_all(&body)?;
        file.flush()?;
        Ok(())
    })
    .await;
    match written {
        Ok(Ok(())) => {
            info!(%identifier, "image uploaded");
            command(&state.frame, ControlRequest::Rescan).await
        }
        Ok(Err(StorageError::BadIdentifier(_))) => {
            error_response(StatusCode::BAD_REQUEST, "invalid image name")
        }
        Ok(Err(err)) => {
            warn!(%identifier, error = %err, "upload failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "upload failed")
        }
        Err(err) => {
            warn!(%identifier, error = ?err, "upload task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "upload failed")
        }
    }
}

async fn delete_image<N: NetworkStack>(
    State(state): State<ApiState<N>>,
    Path(name): Path<String>,
) -> Response {
    let Some(storage) = state.storage.clone() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable");
    };
    let identifier = format!("/{name}");
    let target = identifier.clone();
    let removed = tokio::task::spawn_blocking(move || storage.remove(&target)).await;
    match removed {
        Ok(Ok(())) => command(&state.frame, ControlRequest::Rescan).await,
        Ok(Err(StorageError::BadIdentifier(_))) => {
            error_response(StatusCode::BAD_REQUEST, "invalid image name")
        }
        Ok(Err(err)) => {
            warn!(%identifier, error = %err, "delete failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "delete failed")
        }
        Err(err) => {
            warn!(%identifier, error = ?err, "delete task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "delete failed")
        }
    }
}

async fn command(frame: &FrameHandle, request: ControlRequest) -> Response {
    match frame.send(request).await {
        Ok(outcome @ ControlOutcome::RestartScheduled) => {
            (StatusCode::ACCEPTED, Json(outcome)).into_response()
        }
        Ok(outcome) => Json(outcome).into_response(),
        Err(err @ ControlError::Unavailable) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, &err.to_string())
        }
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
