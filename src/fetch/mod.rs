//! Artifact fetching
//!
//! Provides the `ArtifactFetcher` trait and its backends:
//! - `HttpFetcher` for `http://` and `https://` indexes
//! - `LocalFetcher` for `file://` URLs and plain directory mirrors

mod http;
mod local;

pub use http::HttpFetcher;
pub use local::LocalFetcher;

use crate::config::schema::DependenciesConfig;
use crate::error::DockyardResult;
use crate::lock::LockEntry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Source of package artifacts
///
/// Implementations fetch exactly once per call; retrying is left to
/// whoever re-runs the stage.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch the artifact bytes for a locked package
    async fn fetch(&self, entry: &LockEntry) -> DockyardResult<Vec<u8>>;

    /// Human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}

/// Location of an entry's artifact: its own `url`, or the index template
pub fn artifact_url(template: &str, index: &str, entry: &LockEntry) -> String {
    if let Some(ref url) = entry.url {
        return url.clone();
    }
    template
        .replace("{index}", index.trim_end_matches('/'))
        .replace("{name}", &entry.name)
        .replace("{version}", &entry.version.to_string())
}

/// File name an artifact is stored under inside its package directory
pub fn artifact_file_name(url: &str) -> String {
    url.rsplit('/')
        .next()
        .map(|s| s.split(['?', '#']).next().unwrap_or(s))
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or("artifact")
        .to_string()
}

/// Create the fetcher for the configured index
pub fn create_fetcher(config: &DependenciesConfig) -> Arc<dyn ArtifactFetcher> {
    let template = config.url_template.clone();
    let index = config.index_url.clone();

    if index.starts_with("http://") || index.starts_with("https://") {
        Arc::new(HttpFetcher::new(
            template,
            index,
            Duration::from_secs(config.timeout_secs),
        ))
    } else {
        Arc::new(LocalFetcher::new(template, index))
    }
}
