//! Local mirror fetcher

use super::{artifact_url, ArtifactFetcher};
use crate::error::{DockyardError, DockyardResult};
use crate::lock::LockEntry;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Reads artifacts from a directory mirror or `file://` URLs
pub struct LocalFetcher {
    template: String,
    index: String,
}

impl LocalFetcher {
    pub fn new(template: String, index: String) -> Self {
        Self { template, index }
    }

    fn path_for(&self, entry: &LockEntry) -> DockyardResult<PathBuf> {
        let url = artifact_url(&self.template, &self.index, entry);
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if url.contains("://") {
            return Err(DockyardError::NetworkFetchFailed {
                package: entry.name.clone(),
                reason: format!("unsupported artifact location {}", url),
            });
        }
        Ok(PathBuf::from(url))
    }
}

#[async_trait]
impl ArtifactFetcher for LocalFetcher {
    async fn fetch(&self, entry: &LockEntry) -> DockyardResult<Vec<u8>> {
        let path = self.path_for(entry)?;
        debug!("Reading artifact {}", path.display());
        tokio::fs::read(&path)
            .await
            .map_err(|e| DockyardError::NetworkFetchFailed {
                package: entry.name.clone(),
                reason: format!("{}: {}", path.display(), e),
            })
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
