use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use notifier::WebhookDispatcher;
use serde::Deserialize;
use server_api::{auth, ApiContext};
use shared::{
    domain::{ComplaintId, ImageId, NewComplaint, Status, Viewer},
    error::{ApiError, ErrorCode},
    protocol::{
        ChangeStatusRequest, ComplaintView, ResponseDispatchReceipt, SaveComplaintRequest,
        ServerEvent, StatusSummary,
    },
};
use storage::Storage;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

/// Room for a base64 resolution image plus the rest of the form.
const MAX_BODY_BYTES: usize = server_api::MAX_IMAGE_BYTES * 4 / 3 + 64 * 1024;
const DEFAULT_PAGE_SIZE: u32 = 100;

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<ServerEvent>,
}

#[derive(Debug, Deserialize)]
struct ListComplaintsQuery {
    status: Option<Status>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    if settings.uses_dev_jwt_secret() {
        warn!("APP__JWT_SECRET is not set; tokens are signed with the public development secret");
    }
    let local_offset = settings.local_offset()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let storage = storage.with_local_offset(local_offset);

    let webhook = settings.webhook_config()?;
    if webhook.url.is_none() {
        warn!("no webhook url configured; sending responses will fail");
    }
    let api = ApiContext {
        storage,
        dispatcher: Arc::new(WebhookDispatcher::new(webhook)?),
        auth: auth::AuthConfig {
            jwt_secret: settings.jwt_secret,
            ttl_seconds: settings.token_ttl_seconds,
        },
    };
    let (events, _) = broadcast::channel(256);

    let state = AppState { api, events };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/complaints", post(http_intake).get(http_list_complaints))
        .route(
            "/complaints/:complaint_id",
            get(http_get_complaint).put(http_save_complaint),
        )
        .route("/complaints/:complaint_id/status", post(http_change_status))
        .route("/complaints/:complaint_id/response", post(http_send_response))
        .route(
            "/complaints/:complaint_id/images/:image_id",
            get(http_download_image),
        )
        .route("/reports/summary", get(http_status_summary))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn status_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(err: ApiError) -> HttpError {
    (status_code(err.code), Json(err))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn viewer(state: &AppState, headers: &HeaderMap) -> Result<Viewer, HttpError> {
    let token = bearer_token(headers).ok_or_else(|| {
        http_error(ApiError::new(
            ErrorCode::Unauthorized,
            "missing bearer token",
        ))
    })?;
    auth::viewer_from_token(&state.api.auth, token).map_err(http_error)
}

fn publish(state: &AppState, event: &ServerEvent) {
    // No subscribers is not an error.
    let _ = state.events.send(event.clone());
}

fn updated_view(event: &ServerEvent) -> Result<ComplaintView, HttpError> {
    event.complaint().cloned().map(server_api::view).ok_or_else(|| {
        http_error(ApiError::new(
            ErrorCode::Internal,
            "mutation produced no complaint",
        ))
    })
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Internal, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn http_intake(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewComplaint>,
) -> Result<(StatusCode, Json<ComplaintView>), HttpError> {
    let viewer = viewer(&state, &headers)?;
    let event = server_api::intake_complaint(&state.api, &viewer, req)
        .await
        .map_err(http_error)?;
    publish(&state, &event);
    Ok((StatusCode::CREATED, Json(updated_view(&event)?)))
}

async fn http_list_complaints(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListComplaintsQuery>,
) -> Result<Json<Vec<ComplaintView>>, HttpError> {
    let viewer = viewer(&state, &headers)?;
    let complaints = server_api::list_complaints(
        &state.api,
        &viewer,
        q.status,
        q.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    )
    .await
    .map_err(http_error)?;
    Ok(Json(complaints))
}

async fn http_get_complaint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(complaint_id): Path<i64>,
) -> Result<Json<ComplaintView>, HttpError> {
    let viewer = viewer(&state, &headers)?;
    let view = server_api::get_complaint(&state.api, &viewer, ComplaintId(complaint_id))
        .await
        .map_err(http_error)?;
    Ok(Json(view))
}

async fn http_change_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(complaint_id): Path<i64>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<ComplaintView>, HttpError> {
    let viewer = viewer(&state, &headers)?;
    let event = server_api::change_status(&state.api, &viewer, ComplaintId(complaint_id), req)
        .await
        .map_err(http_error)?;
    publish(&state, &event);
    Ok(Json(updated_view(&event)?))
}

async fn http_save_complaint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(complaint_id): Path<i64>,
    Json(req): Json<SaveComplaintRequest>,
) -> Result<Json<ComplaintView>, HttpError> {
    let viewer = viewer(&state, &headers)?;
    let event = server_api::save_complaint(&state.api, &viewer, ComplaintId(complaint_id), req)
        .await
        .map_err(http_error)?;
    publish(&state, &event);
    Ok(Json(updated_view(&event)?))
}

async fn http_send_response(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(complaint_id): Path<i64>,
) -> Result<Json<ResponseDispatchReceipt>, HttpError> {
    let viewer = viewer(&state, &headers)?;
    let (receipt, event) =
        server_api::send_response(&state.api, &viewer, ComplaintId(complaint_id))
            .await
            .map_err(http_error)?;
    publish(&state, &event);
    Ok(Json(receipt))
}

async fn http_download_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((complaint_id, image_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, HttpError> {
    let viewer = viewer(&state, &headers)?;
    let image = server_api::load_image(
        &state.api,
        &viewer,
        ComplaintId(complaint_id),
        ImageId(image_id),
    )
    .await
    .map_err(http_error)?;

    let mut response_headers = HeaderMap::new();
    let content_type = image
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) =
        HeaderValue::from_str(&format!("inline; filename=\"{}\"", image.filename))
    {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((StatusCode::OK, response_headers, image.bytes))
}

async fn http_status_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusSummary>, HttpError> {
    let viewer = viewer(&state, &headers)?;
    let summary = server_api::status_summary(&state.api, &viewer)
        .await
        .map_err(http_error)?;
    Ok(Json(summary))
}

/// Browsers cannot set headers on a websocket handshake, so the token may
/// also arrive as `?token=`.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<WsQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let viewer = match q.token.as_deref() {
        Some(token) => auth::viewer_from_token(&state.api.auth, token).map_err(http_error)?,
        None => viewer(&state, &headers)?,
    };
    Ok(ws.on_upgrade(move |socket| ws_connection(state, socket, viewer)))
}

/// Whether a feed event may be forwarded to this viewer.
fn visible_to(viewer: &Viewer, event: &ServerEvent) -> bool {
    match event.complaint() {
        Some(complaint) => viewer.can_see(complaint.office_id),
        None => true,
    }
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket, viewer: Viewer) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};
    use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.events.subscribe());
    info!(user_id = %viewer.user_id, "feed subscriber connected");

    let send_task = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) if visible_to(&viewer, &event) => event,
                Ok(_) => continue,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(user_id = %viewer.user_id, skipped, "feed subscriber lagged");
                    ServerEvent::Error(ApiError::new(
                        ErrorCode::Conflict,
                        format!("missed {skipped} updates; reload the complaint list"),
                    ))
                }
            };
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
