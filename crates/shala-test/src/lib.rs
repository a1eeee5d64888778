//! Helpers for testing the content client.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. The directory is deleted as soon as the handle is dropped.
//!
//!  - When using [`BackendServer`], make sure that the server is held until all requests to
//!    the server have been made. It stops serving when dropped, and all further connections
//!    to it fail.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{self, OriginalUri, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use reqwest::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `shala` crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("shala_service=trace,shala_cli=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`keep`](TempDir::keep) is called. Use it as a guard to automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Creates a PDF-like payload of exactly `size` bytes.
///
/// The payload starts with the `%PDF-` magic, so it passes header validation.
pub fn pdf_bytes(size: usize) -> Bytes {
    let mut data = b"%PDF-1.7\n".to_vec();
    data.resize(size, b'x');
    Bytes::from(data)
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = std::net::TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Default)]
struct BackendState {
    files: Mutex<BTreeMap<String, Bytes>>,
    json: Mutex<BTreeMap<String, serde_json::Value>>,
    hits: Mutex<BTreeMap<String, usize>>,
    last_headers: Mutex<BTreeMap<String, String>>,
    last_body: Mutex<Bytes>,
}

impl BackendState {
    fn file(&self, path: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

/// An in-process stand-in for the backend API.
///
/// Serves registered PDF files and canned JSON responses, and counts hits per request URI.
/// Besides the registered paths, it answers a few special routes:
///
///  - `/status/:code/*path` responds with the given status code.
///  - `/delay/:time/*path` waits for the given duration (e.g. `1s`) before serving `path`.
///  - `/chunked/*path` streams `path` without a `Content-Length` header.
pub struct BackendServer {
    server: Server,
    state: Arc<BackendState>,
}

impl BackendServer {
    pub fn new() -> Self {
        let state = Arc::new(BackendState::default());

        let router = Router::new()
            .route(
                "/status/:code/*tail",
                get(
                    |extract::Path((code, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route("/delay/:time/*path", get(delayed_file))
            .route("/chunked/*path", get(chunked_file))
            .fallback(serve)
            .layer(middleware::from_fn_with_state(state.clone(), record_request))
            .with_state(state.clone());

        let server = Server::with_router(router);

        Self { server, state }
    }

    /// Registers a file served at `path`, given without leading slash.
    pub fn add(&self, path: &str, contents: Bytes) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(path.to_owned(), contents);
    }

    /// Registers a JSON response for `path`, given without leading slash, for any method.
    pub fn add_json(&self, path: &str, value: serde_json::Value) {
        self.state
            .json
            .lock()
            .unwrap()
            .insert(path.to_owned(), value);
    }

    /// Returns the number of requests since the last call, and resets the counters.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.state.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the hits per request URI since the last call, and resets the counters.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.state.hits.lock().unwrap());
        map.into_iter().collect()
    }

    /// The headers of the most recent request, with lowercase names.
    pub fn last_headers(&self) -> BTreeMap<String, String> {
        self.state.last_headers.lock().unwrap().clone()
    }

    /// The body of the most recent request.
    pub fn last_body(&self) -> Bytes {
        self.state.last_body.lock().unwrap().clone()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for BackendServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn record_request(
    State(state): State<Arc<BackendState>>,
    OriginalUri(uri): OriginalUri,
    req: Request,
    next: Next,
) -> Response {
    {
        let mut hits = state.hits.lock().unwrap();
        *hits.entry(uri.to_string()).or_default() += 1;
    }

    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_owned(), value.to_owned()))
        })
        .collect();
    *state.last_headers.lock().unwrap() = headers;

    next.run(req).await
}

async fn serve(
    State(state): State<Arc<BackendState>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Response {
    *state.last_body.lock().unwrap() = body;
    let path = uri.path().trim_start_matches('/');

    if let Some(value) = state.json.lock().unwrap().get(path).cloned() {
        return Json(value).into_response();
    }

    match state.file(path) {
        Some(contents) if method == Method::GET => pdf_response(contents),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delayed_file(
    State(state): State<Arc<BackendState>>,
    extract::Path((time, path)): extract::Path<(String, String)>,
) -> Response {
    let duration = humantime::parse_duration(&time).unwrap();
    tokio::time::sleep(duration).await;

    match state.file(&path) {
        Some(contents) => pdf_response(contents),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn chunked_file(
    State(state): State<Arc<BackendState>>,
    extract::Path(path): extract::Path<String>,
) -> Response {
    let Some(contents) = state.file(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let chunks: Vec<Result<Bytes, std::io::Error>> = contents
        .chunks(8 * 1024)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    let body = Body::from_stream(futures::stream::iter(chunks));

    ([(header::CONTENT_TYPE, "application/pdf")], body).into_response()
}

fn pdf_response(contents: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/pdf")], contents).into_response()
}
