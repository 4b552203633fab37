use bytes::Bytes;
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use http_body_util::combinators::BoxBody;
use hyper::{Response, StatusCode};
use shared::http::{empty_response, full_body};
use std::path::{Component, Path, PathBuf};

pub const FAVICON: &str = "favicon.ico";
pub const STATICS_MARKER: &str = "cniep-statics/";

/// Files served straight from the static directory.
#[derive(Clone, Debug)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StaticFiles { root: root.into() }
    }

    /// Maps a request path below the static root to a file path. Query
    /// strings are dropped; anything that would leave the root is rejected.
    pub fn path_for(&self, relative: &str) -> Option<PathBuf> {
        let relative = relative.split(['?', '#']).next().unwrap_or_default();
        let relative = Path::new(relative.trim_start_matches('/'));

        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }

        (path != self.root).then_some(path)
    }

    pub async fn serve<E>(&self, relative: &str) -> Response<BoxBody<Bytes, E>>
    where
        E: 'static,
    {
        let Some(path) = self.path_for(relative) else {
            return empty_response(StatusCode::NOT_FOUND);
        };

        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return empty_response(StatusCode::NOT_FOUND);
        }

        match tokio::fs::read(&path).await {
            Ok(contents) => {
                let mut response = Response::new(full_body(contents));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
                response
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read static file");
                empty_response(StatusCode::NOT_FOUND)
            }
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
