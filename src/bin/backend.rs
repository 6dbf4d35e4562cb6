#![forbid(unsafe_code)]

//! Axum front end for tubegrab.
//!
//! `/` resolves a link into download options (HTML for browsers, JSON for API
//! clients) and `/download*` delivers one rendition as a file attachment. The
//! heavy lifting (yt-dlp, ffmpeg) happens on the blocking pool so one slow
//! download never stalls other requests.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Form, FromRequest, Path as AxumPath, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tubegrab::{
    DownloadError, DownloadRequest, Dispatcher, InvalidLinkError, ResolutionError, Resolver,
    SessionStore, TargetError, VideoMetadata,
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    dispatcher::download_url,
    render::{self, PageContext, ServerInfo},
    security::{content_disposition, ensure_not_root},
    session::{issue_token, is_well_formed_token},
    transcode::FfmpegTranscoder,
    validate,
    ytdlp::YtDlpProvider,
};

const SESSION_COOKIE: &str = "tubegrab_session";

/// Command-line overrides. Anything left out falls back to the environment,
/// then to the `.env` file, then to the built-in defaults.
#[derive(Debug, Parser)]
#[command(name = "backend", about = "Resolve video links and serve downloads")]
struct BackendArgs {
    /// Address to listen on (TUBEGRAB_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (TUBEGRAB_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Parent directory for per-download scratch space (TUBEGRAB_WORK_DIR)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Alternative `.env` file
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            work_dir: self.work_dir,
            env_path: self.env_file,
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBEGRAB_HOST")
}

type Provider = YtDlpProvider;
type Encoder = FfmpegTranscoder;

/// Shared handles passed to every handler.
///
/// * `resolver` answers "what can I download for this link?"
/// * `dispatcher` produces the file for one chosen rendition.
/// * `sessions` remembers the last link per browser for `/download/{id}`.
#[derive(Clone)]
struct AppState {
    resolver: Arc<Resolver<Provider>>,
    dispatcher: Arc<Dispatcher<Provider, Encoder>>,
    sessions: Arc<SessionStore>,
    server: Arc<ServerInfo>,
    session_ttl: Duration,
}

impl AppState {
    fn from_settings(settings: &RuntimeSettings) -> Self {
        let provider = YtDlpProvider::new(settings.ytdlp_bin.clone())
            .with_cookies(settings.cookies.clone())
            .with_scratch_dir(settings.work_dir.clone());
        let resolver = Arc::new(Resolver::new(provider));
        let dispatcher = Dispatcher::new(
            resolver.clone(),
            FfmpegTranscoder::new(settings.ffmpeg_bin.clone()),
            settings.work_dir.clone(),
        );
        Self {
            resolver,
            dispatcher: Arc::new(dispatcher),
            sessions: Arc::new(SessionStore::new(
                settings.session_ttl,
                settings.session_capacity,
            )),
            server: Arc::new(ServerInfo::detect(settings.environment.clone())),
            session_ttl: settings.session_ttl,
        }
    }
}

/// Whether the caller wants machine-readable answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClientFormat {
    Html,
    Json,
}

impl ClientFormat {
    fn from_headers(headers: &HeaderMap) -> Self {
        let wants_json = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.contains("application/json"))
        };
        if wants_json(header::CONTENT_TYPE) || wants_json(header::ACCEPT) {
            Self::Json
        } else {
            Self::Html
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<InvalidLinkError> for ApiError {
    fn from(err: InvalidLinkError) -> Self {
        Self::bad_request(err.message)
    }
}

impl From<ResolutionError> for ApiError {
    fn from(err: ResolutionError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<TargetError> for ApiError {
    fn from(err: TargetError) -> Self {
        match err {
            TargetError::InvalidLink(err) => err.into(),
            TargetError::MissingUrl => Self::bad_request(err.to_string()),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::NotFound { .. } => Self::not_found(err.to_string()),
            DownloadError::UpstreamFailure(_)
            | DownloadError::TranscodeFailure(_)
            | DownloadError::Cancelled => Self::bad_request(err.to_string()),
            DownloadError::Workspace(_) => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

/// Renders a failure for the kind of client that asked: JSON clients get the
/// error document, browsers get the page with the error banner.
fn failure(state: &AppState, format: ClientFormat, err: ApiError) -> Response {
    match format {
        ClientFormat::Json => err.into_response(),
        ClientFormat::Html => {
            let page = render::page(
                &state.server,
                &PageContext {
                    error: Some(&err.message),
                    ..PageContext::default()
                },
            );
            (err.status, Html(page)).into_response()
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Request body that may arrive as JSON or as a url-encoded form (query
/// string for GET requests). Remembers which one the client spoke.
struct Payload<T>(T, ClientFormat);

impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let format = ClientFormat::from_headers(req.headers());
        let is_json_body = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        if is_json_body {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|err| ApiError::bad_request(err.body_text()))?;
            Ok(Self(value, ClientFormat::Json))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|err| ApiError::bad_request(err.body_text()))?;
            Ok(Self(value, format))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ResolveForm {
    #[serde(default, alias = "url", alias = "link")]
    youtube_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DownloadForm {
    #[serde(default, alias = "link")]
    url: Option<String>,
    #[serde(default, alias = "itag")]
    stream_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    is_audio: bool,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DownloadQuery {
    #[serde(default, alias = "link")]
    url: Option<String>,
}

/// Accepts JSON booleans as well as the `"true"`/`"false"` strings HTML forms
/// send.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
    })
}

#[derive(Serialize)]
struct ResolveResponse<'a> {
    title: &'a str,
    thumbnail_url: &'a str,
    session: &'a str,
    streams: Vec<StreamOption<'a>>,
}

#[derive(Serialize)]
struct StreamOption<'a> {
    id: &'a str,
    quality_label: &'a str,
    container: &'a str,
    size_mb: f64,
    is_audio: bool,
}

impl<'a> ResolveResponse<'a> {
    fn new(metadata: &'a VideoMetadata, session: &'a str) -> Self {
        Self {
            title: &metadata.title,
            thumbnail_url: &metadata.thumbnail_url,
            session,
            streams: metadata
                .renditions
                .iter()
                .map(|rendition| StreamOption {
                    id: &rendition.stream_id,
                    quality_label: &rendition.quality_label,
                    container: &rendition.container,
                    size_mb: rendition.size_mb,
                    is_audio: rendition.is_audio,
                })
                .collect(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = BackendArgs::parse();

    ensure_not_root("backend")?;

    let settings = resolve_runtime_settings(args.into_overrides())?;
    let host = parse_host_arg(&settings.host)?;
    std::fs::create_dir_all(&settings.work_dir)
        .with_context(|| format!("creating work directory {}", settings.work_dir.display()))?;

    warn_if_unavailable(&settings.ytdlp_bin, "--version");
    warn_if_unavailable(&settings.ffmpeg_bin, "-version");

    let state = AppState::from_settings(&settings);
    let app = router(state);

    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(%addr, work_dir = %settings.work_dir.display(), "tubegrab listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(resolve_link))
        .route("/download", get(download).post(download))
        .route("/download/{id}", get(download_video_by_id))
        .route("/download_audio/{id}", get(download_audio_by_id))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    // Only affects graceful shutdown; Ctrl+C still terminates the process.
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}

/// Logs a warning when a helper executable does not answer its version flag.
/// Startup continues; requests needing the tool will fail with a clear error.
fn warn_if_unavailable(binary: &Path, version_flag: &str) {
    let status = Command::new(binary)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => {
            tracing::warn!(binary = %binary.display(), %status, "helper executable misbehaves")
        }
        Err(err) => {
            tracing::warn!(binary = %binary.display(), error = %err, "helper executable not found")
        }
    }
}

async fn fallback() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(render::page(&state.server, &PageContext::default()))
}

async fn resolve_link(
    State(state): State<AppState>,
    jar: CookieJar,
    Payload(form, format): Payload<ResolveForm>,
) -> Response {
    let raw = form.youtube_link.unwrap_or_default();
    match resolve(&state, &raw).await {
        Ok((url, metadata)) => {
            let token = session_token(&jar).unwrap_or_else(issue_token);
            state.sessions.put(&token, url.clone(), metadata.clone());

            let response = match format {
                ClientFormat::Json => Json(ResolveResponse::new(&metadata, &token)).into_response(),
                ClientFormat::Html => Html(render::page(
                    &state.server,
                    &PageContext {
                        link: Some(url.as_str()),
                        error: None,
                        video: Some(&metadata),
                    },
                ))
                .into_response(),
            };
            let jar = jar.add(session_cookie(token, state.session_ttl));
            (jar, response).into_response()
        }
        Err(err) => failure(&state, format, err),
    }
}

/// Validator first, so rejected input never reaches the provider.
async fn resolve(
    state: &AppState,
    raw: &str,
) -> ApiResult<(tubegrab::ValidatedUrl, Arc<VideoMetadata>)> {
    let url = validate(raw)?;
    let resolver = state.resolver.clone();
    let lookup_url = url.clone();
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let metadata = tokio::task::spawn_blocking(move || resolver.resolve(&lookup_url, &cancel))
        .await
        .map_err(|err| ApiError::internal(format!("lookup task failed: {err}")))??;
    Ok((url, Arc::new(metadata)))
}

async fn download(
    State(state): State<AppState>,
    jar: CookieJar,
    Payload(form, format): Payload<DownloadForm>,
) -> Response {
    let token = form
        .session
        .clone()
        .filter(|token| is_well_formed_token(token))
        .or_else(|| session_token(&jar));
    deliver(
        &state,
        form.url.as_deref(),
        form.stream_id,
        form.is_audio,
        token,
    )
    .await
    .unwrap_or_else(|err| failure(&state, format, err))
}

async fn download_video_by_id(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<DownloadQuery>,
) -> Response {
    download_by_id(state, id, &headers, &jar, query, false).await
}

async fn download_audio_by_id(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<DownloadQuery>,
) -> Response {
    download_by_id(state, id, &headers, &jar, query, true).await
}

async fn download_by_id(
    state: AppState,
    id: String,
    headers: &HeaderMap,
    jar: &CookieJar,
    query: DownloadQuery,
    want_audio: bool,
) -> Response {
    let format = ClientFormat::from_headers(headers);
    let token = session_token(jar);
    deliver(&state, query.url.as_deref(), Some(id), want_audio, token)
        .await
        .unwrap_or_else(|err| failure(&state, format, err))
}

/// Shared download path: figure out the link, run the dispatcher on the
/// blocking pool, stream the result.
///
/// If the client disconnects, axum drops this future; the drop guard then
/// cancels the token and the dispatcher kills whatever child it is running.
async fn deliver(
    state: &AppState,
    explicit_url: Option<&str>,
    stream_id: Option<String>,
    want_audio: bool,
    token: Option<String>,
) -> ApiResult<Response> {
    let stream_id = stream_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing stream id (itag)."))?;
    let url = download_url(explicit_url, &state.sessions, token.as_deref())?;
    let request = DownloadRequest {
        url,
        stream_id,
        want_audio,
    };

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let dispatcher = state.dispatcher.clone();
    let prepared = tokio::task::spawn_blocking(move || dispatcher.dispatch(&request, &cancel))
        .await
        .map_err(|err| ApiError::internal(format!("download task failed: {err}")))??;

    let disposition = HeaderValue::from_str(&content_disposition(&prepared.file_name))
        .map_err(|err| ApiError::internal(format!("building Content-Disposition: {err}")))?;
    let content_type = HeaderValue::from_str(&prepared.content_type)
        .map_err(|err| ApiError::internal(format!("building Content-Type: {err}")))?;
    let len = prepared.len;

    let stream = prepared
        .into_stream()
        .await
        .map_err(|err| ApiError::internal(format!("opening download: {err}")))?;
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

/// Reads the session cookie, ignoring anything that is not a token we could
/// have issued.
fn session_token(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value().trim().to_string())
        .filter(|token| is_well_formed_token(token))
}

fn session_cookie(token: String, ttl: Duration) -> Cookie<'static> {
    let max_age = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age))
        .build()
}
