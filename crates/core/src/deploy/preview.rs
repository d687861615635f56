//! # Local Preview
//!
//! Serves a finished package over HTTP on localhost so module scripts and
//! relative assets load the way they would once deployed. Every response
//! carries permissive CORS headers and disables caching, so a rebuilt
//! package shows up on reload.
//!
//! A `PreviewHost` runs at most one server: serving again stops the
//! previous one first. When no server can be started, `present` falls back
//! to a `file://` URL for the entrypoint.

use anyhow::{bail, Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use walkdir::WalkDir;

use super::PackagedOutput;

pub const DEFAULT_PREVIEW_PORT: u16 = 9000;

/// Static file router for `root` with the preview headers applied
pub fn router(root: impl AsRef<Path>) -> Router {
    let files = ServeDir::new(root.as_ref()).append_index_html_on_directories(true);
    Router::new()
        .fallback_service(files)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
}

/// A running preview server. Dropping it stops the server.
pub struct PreviewServer {
    addr: SocketAddr,
    root: PathBuf,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PreviewServer {
    /// Bind `127.0.0.1:port` (0 picks a free port) and serve `root`
    pub async fn start(root: impl Into<PathBuf>, port: u16) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("Nothing to preview: {} is not a directory", root.display());
        }

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .with_context(|| format!("Failed to bind preview port {}", port))?;
        let addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = router(&root);
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(e) = server.await {
                tracing::warn!(error = %e, "Preview server stopped with an error");
            }
        });

        tracing::info!(%addr, root = %root.display(), "Preview server started");
        Ok(Self {
            addr,
            root,
            shutdown,
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// HTTP URL of a file under the served root
    pub fn url_for(&self, file: &Path) -> String {
        let relative = file.strip_prefix(&self.root).unwrap_or(file);
        let segments: Vec<String> = relative
            .components()
            .map(|c| urlencoding::encode(&c.as_os_str().to_string_lossy()).into_owned())
            .collect();
        format!("http://{}/{}", self.addr, segments.join("/"))
    }

    /// Stop accepting connections and wait for the server task to finish
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        tracing::info!(addr = %self.addr, "Preview server stopped");
    }
}

impl Drop for PreviewServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Where a presented package can be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewUrl {
    Http(String),
    /// No server could be started; relative module imports may not load
    File { url: String, reason: String },
}

impl PreviewUrl {
    pub fn as_str(&self) -> &str {
        match self {
            PreviewUrl::Http(url) => url,
            PreviewUrl::File { url, .. } => url,
        }
    }
}

/// Owner of the single running preview server
#[derive(Default)]
pub struct PreviewHost {
    current: Option<PreviewServer>,
}

impl PreviewHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `root`, stopping whatever was served before
    pub async fn serve(&mut self, root: impl Into<PathBuf>, port: u16) -> Result<&PreviewServer> {
        self.stop().await;
        let server = PreviewServer::start(root, port).await?;
        Ok(self.current.insert(server))
    }

    /// Serve a package and return the URL of its entrypoint
    pub async fn present(&mut self, package: &PackagedOutput, port: u16) -> Result<PreviewUrl> {
        match self.serve(&package.root, port).await {
            Ok(server) => Ok(PreviewUrl::Http(server.url_for(&package.entrypoint))),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "Preview server unavailable, using a file URL");
                Ok(PreviewUrl::File {
                    url: file_url(&package.entrypoint)?,
                    reason: format!("{:#}", e),
                })
            }
        }
    }

    pub async fn stop(&mut self) {
        if let Some(server) = self.current.take() {
            server.stop().await;
        }
    }

    pub fn current(&self) -> Option<&PreviewServer> {
        self.current.as_ref()
    }
}

/// `file://` URL for a local path
pub fn file_url(path: &Path) -> Result<String> {
    let absolute = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", path.display()))?;
    reqwest::Url::from_file_path(&absolute)
        .map(|url| url.to_string())
        .map_err(|_| anyhow::anyhow!("{} cannot be expressed as a file URL", absolute.display()))
}

/// Indented listing of everything under `root`, directories marked with `/`
pub fn render_tree(root: &Path) -> String {
    let mut out = String::new();
    for entry in WalkDir::new(root).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
        let name = if entry.depth() == 0 {
            entry.path().display().to_string()
        } else {
            entry.file_name().to_string_lossy().into_owned()
        };
        let marker = if entry.file_type().is_dir() { "/" } else { "" };
        out.push_str(&"  ".repeat(entry.depth()));
        out.push_str(&name);
        out.push_str(marker);
        out.push('\n');
    }
    out
}
