//! Locates the HTML and CSS files for a template set and status code.
//!
//! Each kind is searched independently, first match wins:
//!
//! 1. `<root>/<set>/<base>-<code>.<ext>`
//! 2. `<root>/<set>/<base>.<ext>`
//! 3. `<root>/default/<base>.<ext>`

use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_TEMPLATE_SET: &str = "default";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Html,
    Css,
}

impl AssetKind {
    fn base(&self) -> &'static str {
        match self {
            AssetKind::Html => "index",
            AssetKind::Css => "style",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            AssetKind::Html => "html",
            AssetKind::Css => "css",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("no {kind} template for template set {template:?} and code {code}")]
pub struct ResolveError {
    pub kind: AssetKind,
    pub template: String,
    pub code: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateLocation {
    pub html: PathBuf,
    pub css: PathBuf,
}

#[derive(Clone, Debug)]
pub struct TemplateResolver {
    root: PathBuf,
}

impl TemplateResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TemplateResolver { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate paths in search order. Tiers 1 and 2 are left out when the
    /// template set name is empty or not a plain directory name.
    pub fn candidates(&self, template: &str, code: u32, kind: AssetKind) -> Vec<PathBuf> {
        let (base, ext) = (kind.base(), kind.extension());
        let mut paths = Vec::with_capacity(3);

        if is_plain_name(template) {
            let dir = self.root.join(template);
            paths.push(dir.join(format!("{base}-{code}.{ext}")));
            paths.push(dir.join(format!("{base}.{ext}")));
        }
        paths.push(
            self.root
                .join(DEFAULT_TEMPLATE_SET)
                .join(format!("{base}.{ext}")),
        );

        paths
    }

    pub async fn resolve(&self, template: &str, code: u32, kind: AssetKind) -> Option<PathBuf> {
        for path in self.candidates(template, code, kind) {
            if is_regular_file(&path).await {
                return Some(path);
            }
        }
        None
    }

    pub async fn locate(&self, template: &str, code: u32) -> Result<TemplateLocation, ResolveError> {
        let missing = |kind| ResolveError {
            kind,
            template: template.to_string(),
            code,
        };

        let html = self
            .resolve(template, code, AssetKind::Html)
            .await
            .ok_or_else(|| missing(AssetKind::Html))?;
        let css = self
            .resolve(template, code, AssetKind::Css)
            .await
            .ok_or_else(|| missing(AssetKind::Css))?;

        Ok(TemplateLocation { html, css })
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
