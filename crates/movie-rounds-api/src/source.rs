use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use movie_rounds_core::{catalog_fingerprint, parse_catalog, CatalogItem};

use crate::BuildError;

#[derive(Debug, Clone)]
pub struct LoadedCatalog {
    pub items: Arc<Vec<CatalogItem>>,
    pub fingerprint: String,
}

/// Supplies the catalog for each build attempt.
pub trait CatalogSource: Send + Sync {
    fn load(&self) -> BoxFuture<'static, Result<LoadedCatalog, BuildError>>;

    fn describe(&self) -> String;
}

/// Reads a JSON dataset from disk on every load, so edits are picked up after
/// an invalidate.
#[derive(Debug, Clone)]
pub struct FileCatalogSource {
    path: PathBuf,
}

impl FileCatalogSource {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CatalogSource for FileCatalogSource {
    fn load(&self) -> BoxFuture<'static, Result<LoadedCatalog, BuildError>> {
        let path = self.path.clone();
        async move {
            let bytes = tokio::fs::read(&path).await.map_err(|err| {
                BuildError::Catalog(format!("failed to read {}: {err}", path.display()))
            })?;
            let items = parse_catalog(&bytes).map_err(|err| {
                BuildError::Catalog(format!("{}: {err}", path.display()))
            })?;
            tracing::debug!(path = %path.display(), items = items.len(), "loaded catalog file");
            Ok(LoadedCatalog { items: Arc::new(items), fingerprint: catalog_fingerprint(&bytes) })
        }
        .boxed()
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[derive(Debug, Clone)]
pub struct StaticCatalogSource {
    catalog: LoadedCatalog,
}

impl StaticCatalogSource {
    #[must_use]
    pub fn new(items: Vec<CatalogItem>) -> Self {
        let fingerprint = serde_json::to_vec(&items).map_or_else(
            |_| "sha256:unavailable".to_string(),
            |bytes| catalog_fingerprint(&bytes),
        );
        Self { catalog: LoadedCatalog { items: Arc::new(items), fingerprint } }
    }
}

impl CatalogSource for StaticCatalogSource {
    fn load(&self) -> BoxFuture<'static, Result<LoadedCatalog, BuildError>> {
        futures::future::ready(Ok(self.catalog.clone())).boxed()
    }

    fn describe(&self) -> String {
        format!("static:{} items", self.catalog.items.len())
    }
}
