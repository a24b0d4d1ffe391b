use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PreloadReport {
    pub requested: usize,
    pub loaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Best-effort warm-up of image assets. Implementations never fail; every URL
/// ends up counted as loaded, failed, or skipped.
pub trait AssetPreloader: Send + Sync {
    fn preload(&self, urls: Vec<String>) -> BoxFuture<'static, PreloadReport>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPreloader;

impl AssetPreloader for NoopPreloader {
    fn preload(&self, urls: Vec<String>) -> BoxFuture<'static, PreloadReport> {
        let report =
            PreloadReport { requested: urls.len(), loaded: 0, failed: 0, skipped: urls.len() };
        futures::future::ready(report).boxed()
    }
}

/// Upper bound on in-flight image requests per preload call.
pub const DEFAULT_PRELOAD_CONCURRENCY: usize = 16;

/// Issues one GET per URL, at most `concurrency` at a time, and waits until
/// all have settled. Only the status line is checked; bodies are dropped.
#[derive(Debug, Clone)]
pub struct HttpAssetPreloader {
    client: reqwest::Client,
    concurrency: usize,
}

impl HttpAssetPreloader {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for image preload")?;
        Ok(Self { client, concurrency: DEFAULT_PRELOAD_CONCURRENCY })
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

async fn fetch_status(client: reqwest::Client, url: String) -> bool {
    let outcome = match client.get(&url).send().await {
        Ok(response) => response.error_for_status().map(drop),
        Err(err) => Err(err),
    };
    match outcome {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(%url, error = %err, "image preload failed");
            false
        }
    }
}

impl AssetPreloader for HttpAssetPreloader {
    fn preload(&self, urls: Vec<String>) -> BoxFuture<'static, PreloadReport> {
        let client = self.client.clone();
        let concurrency = self.concurrency;
        async move {
            let requested = urls.len();
            let loaded = futures::stream::iter(urls)
                .map(|url| fetch_status(client.clone(), url))
                .buffer_unordered(concurrency)
                .filter(|ok| futures::future::ready(*ok))
                .count()
                .await;
            PreloadReport { requested, loaded, failed: requested - loaded, skipped: 0 }
        }
        .boxed()
    }
}
