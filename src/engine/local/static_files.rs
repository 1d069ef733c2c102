//! Serving files below the document root before handlers see a request.

use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::http::{header, Method, Response, StatusCode};

/// Canonical document root.
#[derive(Debug, Clone)]
pub(crate) struct StaticRoot {
    root: PathBuf,
}

impl StaticRoot {
    pub fn new(root: &Path) -> std::io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// Resolve a request path to an existing file beneath the root.
    ///
    /// Paths with `..` segments, or that escape the root through links, are
    /// refused.
    pub async fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }

        let candidate = tokio::fs::canonicalize(self.root.join(relative)).await.ok()?;
        if !candidate.starts_with(&self.root) {
            tracing::debug!(path = %request_path, "Static path escapes document root");
            return None;
        }
        let metadata = tokio::fs::metadata(&candidate).await.ok()?;
        metadata.is_file().then_some(candidate)
    }

    /// Response for GET/HEAD of an existing file, `None` to fall through.
    pub async fn serve(&self, method: &Method, request_path: &str) -> Option<Response<Body>> {
        if *method != Method::GET && *method != Method::HEAD {
            return None;
        }
        let path = self.resolve(request_path).await?;
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to read static file");
                return None;
            }
        };

        let length = contents.len();
        let body = if *method == Method::HEAD {
            Body::empty()
        } else {
            Body::from(contents)
        };
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type(&path))
            .header(header::CONTENT_LENGTH, length)
            .body(body)
            .ok()
    }
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js" | "mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
