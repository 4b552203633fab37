pub mod config;
pub mod context;
pub mod metrics_defs;
pub mod render;
pub mod resolver;
pub mod service;
pub mod statics;

use render::TemplateError;
use resolver::ResolveError;
use service::ErrorPageService;
use shared::http::run_http_service;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum RendererError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("could not open template {path}: {source}")]
    Asset {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not render template: {0}")]
    Template(#[from] TemplateError),
    #[error("could not serialize page context: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serves error pages on `host:port` until the listener fails.
pub async fn run(host: &str, port: u16, service: ErrorPageService) -> Result<(), RendererError> {
    run_http_service(host, port, service).await
}
