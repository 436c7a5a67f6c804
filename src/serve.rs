//! The built-in content worker behind `stackctl serve`.
//!
//! Serves the files of one directory over HTTP on `127.0.0.1:<port>` and
//! prints the readiness line once the listener is bound. Stops on SIGINT
//! or SIGTERM.

use crate::config::DEFAULT_READY_LINE;
use crate::error::Result;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Router serving files under `root`. Directory paths map to `index.html`.
pub fn router(root: PathBuf) -> Router {
    Router::new().fallback(serve_file).with_state(Arc::new(root))
}

/// Bind, announce readiness, and serve until interrupted.
pub async fn run(port: u16, dir: PathBuf) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("{} http://localhost:{}", DEFAULT_READY_LINE, port);
    tracing::debug!("Serving {} on {}", dir.display(), addr);

    axum::serve(listener, router(dir))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

async fn serve_file(State(root): State<Arc<PathBuf>>, uri: Uri) -> Response {
    let Some(path) = resolve(&root, uri.path()) else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(body) => ([(header::CONTENT_TYPE, content_type(&path))], body).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

/// Map a request path onto a file under `root`. Anything that could climb
/// out of `root` resolves to `None`.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if relative.is_empty() || relative.ends_with('/') || path.is_dir() {
        path.push("index.html");
    }
    Some(path)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
