//! HTTP(S) artifact fetcher

use super::{artifact_url, ArtifactFetcher, LocalFetcher};
use crate::error::{DockyardError, DockyardResult};
use crate::lock::LockEntry;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Upper bound on a single artifact download
const MAX_ARTIFACT_BYTES: u64 = 1024 * 1024 * 1024;

/// Fetches artifacts over HTTP(S) with a blocking agent off the runtime
pub struct HttpFetcher {
    template: String,
    index: String,
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(template: String, index: String, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            template,
            index,
            agent,
        }
    }
}

fn get(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>, ureq::Error> {
    let mut response = agent.get(url).call()?;
    response
        .body_mut()
        .with_config()
        .limit(MAX_ARTIFACT_BYTES)
        .read_to_vec()
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, entry: &LockEntry) -> DockyardResult<Vec<u8>> {
        let url = artifact_url(&self.template, &self.index, entry);

        // Entries may pin their own file:// URL even with an HTTP index
        if url.starts_with("file://") {
            return LocalFetcher::new(self.template.clone(), self.index.clone())
                .fetch(entry)
                .await;
        }

        debug!("GET {}", url);
        let agent = self.agent.clone();
        let request_url = url.clone();
        let result = tokio::task::spawn_blocking(move || get(&agent, &request_url))
            .await
            .map_err(|e| DockyardError::Internal(format!("fetch task failed: {}", e)))?;

        result.map_err(|e| DockyardError::NetworkFetchFailed {
            package: entry.name.clone(),
            reason: format!("{}: {}", url, e),
        })
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
