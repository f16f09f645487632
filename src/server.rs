use std::convert::Infallible;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use warp::{Filter, Reply};
use warp::http::{HeaderValue, Method, StatusCode, header};
use warp::path::FullPath;
use warp::reply::Response as WarpResponse;

use crate::config::Config;
use crate::manifest::MANIFEST_FILE;

const CACHE_CONTROL_DEV: &str = "no-cache, no-store, must-revalidate";
const CORS_ALLOW_METHODS: &str = "GET, HEAD, OPTIONS";
const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization";
const OCTET_STREAM: &str = "application/octet-stream";

const MIME_TYPES: [(&str, &str); 12] = [
    ("js", "application/javascript"),
    ("css", "text/css"),
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("ttf", "font/ttf"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
];

/// Where a request path points inside the publish directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Manifest(PathBuf),
    File(PathBuf),
    /// Path is not under the mount root.
    Unmounted,
    /// Path escapes the publish directory.
    Forbidden,
    /// Path could not be decoded.
    Invalid,
}

#[derive(Debug, Clone)]
pub struct AppState {
    root: PathBuf,
    mount: String,
}

impl AppState {
    pub fn new(root: impl Into<PathBuf>, mount: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            mount: mount.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Maps a URL path to a file under the root without touching the filesystem.
    pub fn resolve(&self, url_path: &str) -> Resolution {
        let mount_root = format!("/{}", self.mount);
        let Some(after_mount) = url_path.strip_prefix(&mount_root) else {
            return Resolution::Unmounted;
        };
        if after_mount.is_empty() || after_mount == "/" {
            return Resolution::Manifest(self.root.join(MANIFEST_FILE));
        }
        let Some(rest) = after_mount.strip_prefix('/') else {
            return Resolution::Unmounted;
        };

        let decoded = match urlencoding::decode(rest) {
            Ok(decoded) => decoded,
            Err(_) => return Resolution::Invalid,
        };
        match confine(&self.root, &decoded) {
            Some(path) => Resolution::File(path),
            None => Resolution::Forbidden,
        }
    }
}

/// Joins `relative` onto `root`, or `None` if it would leave `root`.
fn confine(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut parts: Vec<&OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.iter().fold(root.to_path_buf(), |acc, part| acc.join(part)))
}

pub fn mime_type(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(OsStr::to_str) else {
        return OCTET_STREAM;
    };
    let ext = ext.to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or(OCTET_STREAM)
}

pub async fn run_server(config: Config) -> Result<()> {
    let serve_options = config
        .serve_options()
        .cloned()
        .ok_or_else(|| anyhow!("server mode requires the serve command"))?;

    let state = Arc::new(AppState::new(
        config.publish_dir.clone(),
        serve_options.mount.clone(),
    ));

    let addr_tuple = (serve_options.bind, serve_options.port);
    let listener = match TcpListener::bind(addr_tuple).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            return Err(anyhow!(
                "Port {} is already in use. Try a different port with: PORT=5678 bundle-cdn serve",
                serve_options.port
            ));
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to bind {}:{}", serve_options.bind, serve_options.port)
            });
        }
    };
    let listening_addr = listener.local_addr()?;
    let base = format!("http://{}:{}", listening_addr.ip(), listening_addr.port());
    let mount = state.mount();

    info!("Development server running on {base}");
    info!("Build directory: {}", state.root().display());
    info!("Available endpoints:");
    info!("  GET {base}/{mount}                    -> {MANIFEST_FILE}");
    info!("  GET {base}/{mount}/{MANIFEST_FILE}      -> {MANIFEST_FILE}");
    info!("  GET {base}/{mount}/_expo/static/...   -> JS/CSS files");
    info!("Set window.cdnBaseUrl = \"{base}/{mount}\" in your application");
    info!("Press Ctrl+C to stop the server");

    warp::serve(routes(state.clone()))
        .incoming(listener)
        .graceful(shutdown_signal())
        .run()
        .await;

    info!("Development server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutting down development server...");
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    warp::method()
        .and(warp::path::full())
        .and(with_state(state))
        .and_then(request_handler)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn request_handler(
    method: Method,
    path: FullPath,
    state: Arc<AppState>,
) -> Result<WarpResponse, Infallible> {
    let url_path = path.as_str();
    info!("{method} {url_path}");

    let mut response = if method == Method::OPTIONS {
        empty_response(StatusCode::OK)
    } else if method == Method::GET || method == Method::HEAD {
        serve_path(&state, url_path, method == Method::HEAD).await
    } else {
        text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    };
    insert_dev_headers(&mut response);
    Ok(response)
}

async fn serve_path(state: &AppState, url_path: &str, head_only: bool) -> WarpResponse {
    match state.resolve(url_path) {
        Resolution::Manifest(path) | Resolution::File(path) => {
            serve_file(state, &path, url_path, head_only).await
        }
        Resolution::Unmounted => text_response(
            StatusCode::NOT_FOUND,
            format!(
                "Not Found - This server only serves /{}/* paths",
                state.mount()
            ),
        ),
        Resolution::Forbidden => forbidden(),
        Resolution::Invalid => not_found(url_path),
    }
}

async fn serve_file(state: &AppState, path: &Path, url_path: &str, head_only: bool) -> WarpResponse {
    // Symlinks inside the root may still point outside of it.
    let (Ok(canonical), Ok(root)) = (
        tokio::fs::canonicalize(path).await,
        tokio::fs::canonicalize(state.root()).await,
    ) else {
        return not_found(url_path);
    };
    if !canonical.starts_with(&root) {
        return forbidden();
    }

    let metadata = match tokio::fs::metadata(&canonical).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return not_found(url_path),
    };

    let mut response = if head_only {
        WarpResponse::new(Vec::<u8>::new().into())
    } else {
        match tokio::fs::File::open(&canonical).await {
            Ok(file) => stream_file(file, canonical.clone()),
            Err(err) => {
                error!("Error serving file {}: {err}", canonical.display());
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        }
    };
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(mime_type(path)),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    response
}

// Headers are already on the wire once the body streams, so read errors can
// only be logged.
fn stream_file(file: tokio::fs::File, path: PathBuf) -> WarpResponse {
    let chunks = ReaderStream::new(file).map(move |chunk| {
        if let Err(err) = &chunk {
            error!("Error serving file {}: {err}", path.display());
        }
        chunk
    });
    warp::reply::stream(chunks).into_response()
}

fn insert_dev_headers(response: &mut WarpResponse) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL_DEV),
    );
}

fn empty_response(status: StatusCode) -> WarpResponse {
    let mut response = WarpResponse::new(Vec::<u8>::new().into());
    *response.status_mut() = status;
    response
}

fn text_response(status: StatusCode, body: impl Into<String>) -> WarpResponse {
    let body: String = body.into();
    let mut response = WarpResponse::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn not_found(url_path: &str) -> WarpResponse {
    text_response(StatusCode::NOT_FOUND, format!("File not found: {url_path}"))
}

fn forbidden() -> WarpResponse {
    text_response(StatusCode::FORBIDDEN, "Forbidden - Path traversal not allowed")
}
