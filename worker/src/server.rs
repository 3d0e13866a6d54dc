use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use mobile_core::context::ActionContext;
use tokio::sync::mpsc;
use tower_http::compression::CompressionLayer;

use crate::service::{MobileService, ServiceError};
use crate::types::*;

type SharedService = Arc<MobileService>;

const STREAM_BUFFER: usize = 16;

#[derive(Debug)]
struct AppError {
    message: String,
    status: StatusCode,
}

impl AppError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Internal(_) | ServiceError::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            message: err.to_string(),
            status,
        }
    }
}

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/v1/devices", get(list_devices))
        .route("/v1/devices/{device_id}/app", get(get_active_app))
        .route("/v1/devices/{device_id}/tree", get(get_ui_tree))
        .route("/v1/devices/{device_id}/elements/find", post(find_elements))
        .route("/v1/devices/{device_id}/tap", post(tap))
        .route("/v1/devices/{device_id}/type", post(type_text))
        .route("/v1/devices/{device_id}/swipe", post(swipe))
        .route(
            "/v1/devices/{device_id}/screenshot/stream",
            get(screenshot_stream),
        )
        .layer(CompressionLayer::new())
        .with_state(service)
}

async fn list_devices(
    State(service): State<SharedService>,
) -> Result<Json<ListDevicesResponse>, AppError> {
    Ok(Json(service.list_devices().await?))
}

async fn get_active_app(
    State(service): State<SharedService>,
    Path(device_id): Path<String>,
    Query(options): Query<RequestOptions>,
) -> Result<Json<ActiveAppResponse>, AppError> {
    Ok(Json(service.get_active_app(&device_id, options).await?))
}

async fn get_ui_tree(
    State(service): State<SharedService>,
    Path(device_id): Path<String>,
    Query(query): Query<UiTreeQuery>,
) -> Result<Json<UiTreeResponse>, AppError> {
    Ok(Json(service.get_ui_tree(&device_id, query).await?))
}

async fn find_elements(
    State(service): State<SharedService>,
    Path(device_id): Path<String>,
    Json(req): Json<FindElementsRequest>,
) -> Result<Json<FindElementsResponse>, AppError> {
    Ok(Json(service.find_elements(&device_id, req).await?))
}

// Action endpoints answer 200 even on failure; clients read
// `ActionResponse.status`.

async fn tap(
    State(service): State<SharedService>,
    Path(device_id): Path<String>,
    Json(req): Json<TapRequest>,
) -> Json<ActionResponse> {
    Json(service.tap(&device_id, req).await)
}

async fn type_text(
    State(service): State<SharedService>,
    Path(device_id): Path<String>,
    Json(req): Json<TypeRequest>,
) -> Json<ActionResponse> {
    Json(service.type_text(&device_id, req).await)
}

async fn swipe(
    State(service): State<SharedService>,
    Path(device_id): Path<String>,
    Json(req): Json<SwipeRequest>,
) -> Json<ActionResponse> {
    Json(service.swipe(&device_id, req).await)
}

/// Receiver wrapper that cancels the stream context when the response body is
/// dropped. A disconnected client stops the producer at the next await.
struct StreamReceiver {
    rx: mpsc::Receiver<StreamEvent>,
    ctx: ActionContext,
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

async fn screenshot_stream(
    State(service): State<SharedService>,
    Path(device_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, AppError> {
    let ctx = ActionContext::background();
    // Surface unknown devices as a 404 before committing to a stream body.
    service.ensure_runtime(&ctx, &device_id).await?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        match service
            .screenshot_stream(&task_ctx, &device_id, query, tx)
            .await
        {
            Ok(()) => {}
            Err(ServiceError::Cancelled) => {
                tracing::debug!(device_id = %device_id, "screenshot stream cancelled")
            }
            Err(err) => {
                tracing::warn!(device_id = %device_id, error = %err, "screenshot stream failed")
            }
        }
    });

    let receiver = StreamReceiver { rx, ctx };
    let body = Body::from_stream(futures::stream::unfold(receiver, |mut receiver| async move {
        let event = receiver.rx.recv().await?;
        let mut line = serde_json::to_vec(&event).ok()?;
        line.push(b'\n');
        Some((
            Ok::<_, std::convert::Infallible>(Bytes::from(line)),
            receiver,
        ))
    }));

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .map_err(|err| AppError::new(format!("build stream response: {err}")))
}
