//! Runtime surface around the round allocator: experiment configuration,
//! catalog sources, best-effort image preload, and the build-once rounds
//! service shared by the HTTP service and the CLI.

mod config;
mod preload;
mod service;
mod source;

use movie_rounds_core::AllocationError;

pub use config::{
    ConfigError, ExperimentConfig, DEFAULT_IMAGE_BASE_URL, DEFAULT_MOVIES_PER_CATEGORY,
    DEFAULT_PRELOAD_TIMEOUT_MS, DEFAULT_ROUNDS_COUNT,
};
pub use preload::{
    AssetPreloader, HttpAssetPreloader, NoopPreloader, PreloadReport, DEFAULT_PRELOAD_CONCURRENCY,
};
pub use service::{CatalogStats, RoundSnapshot, RoundsService};
pub use source::{CatalogSource, FileCatalogSource, LoadedCatalog, StaticCatalogSource};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Why a rounds build did not produce a snapshot.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("catalog unavailable: {0}")]
    Catalog(String),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

impl BuildError {
    /// Stable machine-readable code for service and CLI error payloads.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Catalog(_) => "catalog_unavailable",
            Self::Allocation(AllocationError::Validation(_)) => "invalid_request",
            Self::Allocation(AllocationError::PoolExhausted { .. }) => "pool_exhausted",
        }
    }
}
