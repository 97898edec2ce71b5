use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::info;

use super::models::{ClearResponse, DeleteResponse, HistoryRecord};

/// Client for the remote detection record store
#[derive(Clone)]
pub struct HistoryClient {
    base_url: String,
    agent: ureq::Agent,
}

impl HistoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .build();

        Self { base_url, agent }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All persisted records, newest first
    pub async fn list(&self) -> Result<Vec<HistoryRecord>> {
        let url = format!("{}/", self.base_url);
        let records: Vec<HistoryRecord> = self.call("GET", url).await?;
        info!("Fetched {} history records", records.len());
        Ok(records)
    }

    /// Delete one record by id
    pub async fn delete(&self, id: i64) -> Result<()> {
        let url = format!("{}/{}", self.base_url, id);
        let response: DeleteResponse = self.call("DELETE", url).await?;

        if let Some(error) = response.error {
            bail!("Failed to delete record {}: {}", id, error);
        }
        if !response.success {
            bail!("Record store refused to delete record {}", id);
        }

        info!("Deleted history record {}", id);
        Ok(())
    }

    /// Delete every record; returns how many were removed
    pub async fn clear(&self) -> Result<u64> {
        let url = format!("{}/clear", self.base_url);
        let response: ClearResponse = self.call("GET", url).await?;

        if !response.success {
            bail!("Record store refused to clear history");
        }

        info!("Cleared {} history records", response.deleted);
        Ok(response.deleted)
    }

    /// Blocking HTTP round-trip, run off the async threads
    async fn call<T>(&self, method: &'static str, url: String) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();

        tokio::task::spawn_blocking(move || {
            let response = agent
                .request(method, &url)
                .call()
                .with_context(|| format!("{} {} failed", method, url))?;

            response
                .into_json::<T>()
                .with_context(|| format!("Invalid response body from {}", url))
        })
        .await
        .context("History request worker failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HistoryClient::new("http://localhost:8000/history/");
        assert_eq!(client.base_url(), "http://localhost:8000/history");
    }

    #[tokio::test]
    async fn test_unreachable_store_is_an_error() {
        let client = HistoryClient::new("http://127.0.0.1:9/history");
        assert!(client.list().await.is_err());
    }
}
