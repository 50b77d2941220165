use crate::error::PlaybackError;
use crate::library::SortMode;
use crate::navigation::{BrowseView, Navigator};
use crate::settings::PlaybackConfig;
use crate::supervisor::ScriptSupervisor;
use crate::viewer::ZoomDirection;
use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const UPLOAD_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub navigator: Arc<Navigator>,
    pub scripts: Arc<ScriptSupervisor>,
}

type ApiResult<T> = std::result::Result<T, PlaybackError>;

impl IntoResponse for PlaybackError {
    fn into_response(self) -> Response {
        let status = match &self {
            PlaybackError::NotFound(_) => StatusCode::NOT_FOUND,
            PlaybackError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PlaybackError::Forbidden(_) => StatusCode::FORBIDDEN,
            PlaybackError::Io { .. }
            | PlaybackError::ExternalProcess { .. }
            | PlaybackError::Task(_) => {
                warn!(error = %self, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/playback/next", get(next))
        .route("/playback/previous", get(previous))
        .route("/playback/jump", post(jump))
        .route("/playback/delete", post(delete))
        .route("/playback/select-folder", post(select_folder))
        .route("/playback/set-delay", post(set_delay))
        .route("/playback/weighted-shuffle", post(weighted_shuffle))
        .route("/playback/viewer-mtime", get(viewer_mtime))
        .route("/playback/current-full", get(current_full))
        .route("/playback/config", get(playback_config))
        .route("/playback/browse", get(browse))
        .route("/playback/reshuffle", post(reshuffle))
        .route("/viewer/zoom", post(zoom))
        .route("/folders", get(list_folders).post(create_folder))
        .route("/folders/{folder}/images", get(folder_images))
        .route("/folders/{folder}/order", post(save_order))
        .route(
            "/folders/{folder}/upload",
            post(upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/thumbs/{folder}/{file}", get(thumbnail))
        .route("/scripts/launch", post(launch_script))
        .route("/scripts/cancel", post(cancel_script))
        .route("/scripts/active", get(active_script));

    let public_url = state.navigator.viewer().public_url().to_string();
    if public_url.starts_with('/') && public_url != "/playback/current-full" {
        router = router.route(&public_url, get(current_full));
    }
    router.with_state(state)
}

/// Serve the API on `addr` until `cancel` fires.
pub async fn serve(addr: SocketAddr, state: AppState, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    info!(?addr, "HTTP server listening");
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("http server exited")?;
    info!("HTTP server stopped");
    Ok(())
}

/// Run filesystem and viewer work off the async workers. Navigator calls
/// fsync, wait on its mutation lock and signal the viewer process.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ApiResult<T> + Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| PlaybackError::Task(err.to_string()))?
}

/// Viewer reference returned after every pointer change.
#[derive(Debug, Serialize)]
struct Shown {
    image: Option<String>,
    filename: Option<String>,
}

impl Shown {
    fn of(navigator: &Navigator, filename: Option<String>) -> Json<Self> {
        let image = filename.as_ref().and_then(|_| navigator.viewer().reference());
        Json(Self { image, filename })
    }
}

async fn next(State(state): State<AppState>) -> ApiResult<Json<Shown>> {
    let nav = state.navigator;
    blocking(move || {
        let shown = nav.advance()?;
        Ok(Shown::of(&nav, shown))
    })
    .await
}

async fn previous(State(state): State<AppState>) -> ApiResult<Json<Shown>> {
    let nav = state.navigator;
    blocking(move || {
        let shown = nav.retreat()?;
        Ok(Shown::of(&nav, shown))
    })
    .await
}

#[derive(Deserialize)]
struct JumpRequest {
    path: String,
}

async fn jump(
    State(state): State<AppState>,
    Json(req): Json<JumpRequest>,
) -> ApiResult<Json<Shown>> {
    // Accept a full URL path as well as a bare filename.
    let filename = req.path.rsplit('/').next().unwrap_or_default().to_string();
    let nav = state.navigator;
    blocking(move || {
        let shown = nav.jump(&filename)?;
        Ok(Shown::of(&nav, Some(shown)))
    })
    .await
}

#[derive(Deserialize)]
struct DeleteRequest {
    #[serde(default)]
    file: Option<String>,
}

async fn delete(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<Json<Shown>> {
    let Some(file) = req.file.filter(|f| !f.trim().is_empty()) else {
        return Err(PlaybackError::InvalidInput("file is required".into()));
    };
    let nav = state.navigator;
    blocking(move || {
        let shown = nav.delete(&file)?;
        Ok(Shown::of(&nav, shown))
    })
    .await
}

#[derive(Deserialize)]
struct SelectFolderRequest {
    folder: String,
}

async fn select_folder(
    State(state): State<AppState>,
    Json(req): Json<SelectFolderRequest>,
) -> ApiResult<Json<Shown>> {
    let nav = state.navigator;
    blocking(move || {
        let shown = nav.select_folder(&req.folder)?;
        Ok(Shown::of(&nav, shown))
    })
    .await
}

#[derive(Deserialize)]
struct DelayRequest {
    minutes: u64,
}

async fn set_delay(
    State(state): State<AppState>,
    Json(req): Json<DelayRequest>,
) -> ApiResult<Json<PlaybackConfig>> {
    let nav = state.navigator;
    blocking(move || nav.set_delay(req.minutes).map(Json)).await
}

#[derive(Deserialize)]
struct ShuffleRequest {
    enabled: bool,
}

async fn weighted_shuffle(
    State(state): State<AppState>,
    Json(req): Json<ShuffleRequest>,
) -> ApiResult<Json<PlaybackConfig>> {
    let nav = state.navigator;
    blocking(move || Ok(Json(nav.set_weighted_shuffle(req.enabled)))).await
}

async fn viewer_mtime(State(state): State<AppState>) -> ApiResult<Response> {
    let nav = state.navigator;
    blocking(move || Ok(Json(json!({ "mtime": nav.viewer().read_mtime() })).into_response())).await
}

async fn current_full(State(state): State<AppState>) -> ApiResult<Response> {
    let nav = state.navigator;
    blocking(move || {
        let path = nav
            .viewer()
            .resolve()
            .ok_or_else(|| PlaybackError::NotFound("no image is being shown".into()))?;
        image_file(&path)
    })
    .await
}

async fn playback_config(State(state): State<AppState>) -> ApiResult<Json<PlaybackConfig>> {
    let nav = state.navigator;
    blocking(move || Ok(Json(nav.settings().load()))).await
}

async fn browse(State(state): State<AppState>) -> ApiResult<Json<BrowseView>> {
    let nav = state.navigator;
    blocking(move || Ok(Json(nav.browse()))).await
}

async fn reshuffle(State(state): State<AppState>) -> ApiResult<Response> {
    let nav = state.navigator;
    blocking(move || {
        let order = nav.reshuffle();
        Ok(Json(json!({ "total": order.len(), "order": order })).into_response())
    })
    .await
}

#[derive(Deserialize)]
struct ZoomRequest {
    direction: ZoomDirection,
}

async fn zoom(State(state): State<AppState>, Json(req): Json<ZoomRequest>) -> StatusCode {
    let delivered = state.navigator.viewer().request_zoom(req.direction).await;
    debug!(direction = ?req.direction, delivered, "zoom requested");
    StatusCode::NO_CONTENT
}

async fn list_folders(State(state): State<AppState>) -> ApiResult<Response> {
    let nav = state.navigator;
    blocking(move || {
        let folders = nav.library().list_folders()?;
        let active = nav.active_folder(&nav.settings().load());
        Ok(Json(json!({ "folders": folders, "current": active })).into_response())
    })
    .await
}

#[derive(Deserialize)]
struct CreateFolderRequest {
    name: String,
}

async fn create_folder(
    State(state): State<AppState>,
    Json(req): Json<CreateFolderRequest>,
) -> ApiResult<Response> {
    let nav = state.navigator;
    let folder = blocking(move || nav.library().create_folder(&req.name)).await?;
    info!(folder = %folder, "folder created");
    Ok((StatusCode::CREATED, Json(json!({ "folder": folder }))).into_response())
}

#[derive(Deserialize)]
struct ImagesQuery {
    #[serde(default)]
    sort: SortMode,
}

async fn folder_images(
    State(state): State<AppState>,
    Path(folder): Path<String>,
    Query(query): Query<ImagesQuery>,
) -> ApiResult<Response> {
    let nav = state.navigator;
    let view = blocking(move || nav.folder_images(&folder, query.sort)).await?;
    Ok(Json(view).into_response())
}

#[derive(Deserialize)]
struct OrderRequest {
    order: Vec<String>,
}

async fn save_order(
    State(state): State<AppState>,
    Path(folder): Path<String>,
    Json(req): Json<OrderRequest>,
) -> ApiResult<StatusCode> {
    let entries = req.order.len();
    let nav = state.navigator;
    let saved = folder.clone();
    blocking(move || nav.library().save_custom_order(&saved, &req.order)).await?;
    info!(folder = %folder, entries, "custom order saved");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct UploadQuery {
    name: String,
}

async fn upload(
    State(state): State<AppState>,
    Path(folder): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<Response> {
    if body.is_empty() {
        return Err(PlaybackError::InvalidInput("upload body is empty".into()));
    }
    let nav = state.navigator;
    let filename = blocking(move || nav.media().ingest(&folder, &query.name, &body)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "filename": filename }))).into_response())
}

async fn thumbnail(
    State(state): State<AppState>,
    Path((folder, file)): Path<(String, String)>,
) -> ApiResult<Response> {
    crate::library::validate_name(&folder)?;
    crate::library::validate_name(&file)?;
    let nav = state.navigator;
    blocking(move || {
        let path = nav
            .media()
            .thumbnail(&folder, &file)
            .ok_or_else(|| PlaybackError::NotFound(format!("thumbnail for '{file}'")))?;
        image_file(&path)
    })
    .await
}

#[derive(Deserialize)]
struct LaunchRequest {
    script: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    duration_minutes: Option<u64>,
}

async fn launch_script(
    State(state): State<AppState>,
    Json(req): Json<LaunchRequest>,
) -> ApiResult<Response> {
    let duration = req
        .duration_minutes
        .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)));
    state.scripts.start(&req.script, &req.args, duration).await?;
    Ok(Json(json!({ "script": req.script.trim() })).into_response())
}

async fn cancel_script(State(state): State<AppState>) -> StatusCode {
    state.scripts.stop().await;
    StatusCode::NO_CONTENT
}

async fn active_script(State(state): State<AppState>) -> Response {
    Json(json!({ "script": state.scripts.active().await })).into_response()
}

fn image_file(path: &FsPath) -> ApiResult<Response> {
    let bytes = fs::read(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => {
            PlaybackError::NotFound(format!("{}", path.display()))
        }
        _ => PlaybackError::io("failed to read", path, err),
    })?;
    let mime = image::ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}
