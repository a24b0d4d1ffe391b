use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use movie_rounds_core::{allocate, genre_counts, FilterSummary, RoundPlan};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

use crate::config::ExperimentConfig;
use crate::preload::{AssetPreloader, PreloadReport};
use crate::source::CatalogSource;
use crate::BuildError;

/// A completed build: the allocated rounds plus where they came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSnapshot {
    pub build_id: Ulid,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub catalog_fingerprint: String,
    pub catalog_size: usize,
    pub preload: PreloadReport,
    #[serde(flatten)]
    pub plan: RoundPlan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogStats {
    pub source: String,
    pub fingerprint: String,
    pub total: usize,
    pub by_genre: BTreeMap<String, usize>,
    pub eligible_by_category: BTreeMap<String, usize>,
}

type BuildFuture = Shared<BoxFuture<'static, Result<Arc<RoundSnapshot>, BuildError>>>;

enum Slot {
    Empty,
    Pending { generation: u64, future: BuildFuture },
    Ready(Arc<RoundSnapshot>),
}

struct SlotState {
    slot: Slot,
    generation: u64,
}

struct Inner {
    config: ExperimentConfig,
    source: Arc<dyn CatalogSource>,
    preloader: Arc<dyn AssetPreloader>,
    seed: Option<u64>,
    builds_started: AtomicU64,
    state: Mutex<SlotState>,
}

/// Build-once holder for the experiment rounds.
///
/// Concurrent callers of [`RoundsService::get_or_build`] share one in-flight
/// build. A successful result is kept until [`RoundsService::invalidate`]; a
/// failed build leaves the slot empty so the next call starts over.
#[derive(Clone)]
pub struct RoundsService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RoundsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundsService")
            .field("source", &self.inner.source.describe())
            .field("seed", &self.inner.seed)
            .field("builds_started", &self.builds_started())
            .finish_non_exhaustive()
    }
}

impl RoundsService {
    #[must_use]
    pub fn new(
        config: ExperimentConfig,
        source: Arc<dyn CatalogSource>,
        preloader: Arc<dyn AssetPreloader>,
    ) -> Self {
        Self::from_parts(config, source, preloader, None)
    }

    /// Same as [`RoundsService::new`] but every build shuffles from `seed`.
    #[must_use]
    pub fn with_seed(
        config: ExperimentConfig,
        source: Arc<dyn CatalogSource>,
        preloader: Arc<dyn AssetPreloader>,
        seed: u64,
    ) -> Self {
        Self::from_parts(config, source, preloader, Some(seed))
    }

    fn from_parts(
        config: ExperimentConfig,
        source: Arc<dyn CatalogSource>,
        preloader: Arc<dyn AssetPreloader>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                preloader,
                seed,
                builds_started: AtomicU64::new(0),
                state: Mutex::new(SlotState { slot: Slot::Empty, generation: 0 }),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExperimentConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn builds_started(&self) -> u64 {
        self.inner.builds_started.load(Ordering::SeqCst)
    }

    /// The memoized snapshot, if a build has completed.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<RoundSnapshot>> {
        match &self.inner.state.lock().slot {
            Slot::Ready(snapshot) => Some(Arc::clone(snapshot)),
            Slot::Empty | Slot::Pending { .. } => None,
        }
    }

    #[must_use]
    pub fn is_building(&self) -> bool {
        matches!(self.inner.state.lock().slot, Slot::Pending { .. })
    }

    /// Return the memoized rounds, joining or starting a build as needed.
    ///
    /// # Errors
    /// Returns [`BuildError`] when the catalog cannot be loaded or a category
    /// runs out of eligible movies. The memo is cleared in that case.
    pub async fn get_or_build(&self) -> Result<Arc<RoundSnapshot>, BuildError> {
        let (generation, future) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            match &state.slot {
                Slot::Ready(snapshot) => return Ok(Arc::clone(snapshot)),
                Slot::Pending { generation, future } => (*generation, future.clone()),
                Slot::Empty => {
                    state.generation += 1;
                    let generation = state.generation;
                    let future = self.start_build(generation);
                    state.slot = Slot::Pending { generation, future: future.clone() };
                    (generation, future)
                }
            }
        };

        let result = future.await;

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let still_current = matches!(
            &state.slot,
            Slot::Pending { generation: pending, .. } if *pending == generation
        );
        if still_current {
            state.slot = match &result {
                Ok(snapshot) => Slot::Ready(Arc::clone(snapshot)),
                Err(_) => Slot::Empty,
            };
        }
        result
    }

    /// Drop the memoized rounds. An in-flight build still resolves for the
    /// callers already waiting on it, but its result is not kept.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.slot = Slot::Empty;
        tracing::info!(generation = state.generation, "invalidated experiment rounds cache");
    }

    #[must_use]
    pub fn filter_summary(&self, category_id: &str) -> Option<FilterSummary> {
        self.inner.config.filter_summary(category_id)
    }

    /// # Errors
    /// Returns [`BuildError::Catalog`] when the catalog cannot be loaded.
    pub async fn catalog_stats(&self) -> Result<CatalogStats, BuildError> {
        let catalog = self.inner.source.load().await?;
        let eligible_by_category = self
            .inner
            .config
            .categories
            .iter()
            .map(|category| {
                let eligible = catalog.items.iter().filter(|item| category.admits(item)).count();
                (category.id.clone(), eligible)
            })
            .collect();
        Ok(CatalogStats {
            source: self.inner.source.describe(),
            fingerprint: catalog.fingerprint,
            total: catalog.items.len(),
            by_genre: genre_counts(&catalog.items),
            eligible_by_category,
        })
    }

    fn start_build(&self, generation: u64) -> BuildFuture {
        let inner = Arc::clone(&self.inner);
        async move { inner.build(generation).await.map(Arc::new) }.boxed().shared()
    }
}

impl Inner {
    async fn build(&self, generation: u64) -> Result<RoundSnapshot, BuildError> {
        self.builds_started.fetch_add(1, Ordering::SeqCst);
        let build_id = Ulid::new();
        let started = Instant::now();
        tracing::info!(
            %build_id,
            generation,
            source = %self.source.describe(),
            "building experiment rounds"
        );

        let result = self.assemble(build_id).await;
        match &result {
            Ok(snapshot) => tracing::info!(
                %build_id,
                rounds = snapshot.plan.rounds.len(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "experiment rounds ready"
            ),
            Err(err) => tracing::warn!(%build_id, error = %err, "experiment rounds build failed"),
        }
        result
    }

    async fn assemble(&self, build_id: Ulid) -> Result<RoundSnapshot, BuildError> {
        let catalog = self.source.load().await?;
        let conditions = self.config.conditions();
        let plan = {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            allocate(&self.config.allocation_request(&catalog.items, &conditions), &mut rng)?
        };

        let urls = plan.image_urls(&self.config.image_base_url).into_iter().collect::<Vec<_>>();
        let preload = self.preloader.preload(urls).await;
        tracing::info!(
            %build_id,
            requested = preload.requested,
            loaded = preload.loaded,
            failed = preload.failed,
            "image preload settled"
        );

        Ok(RoundSnapshot {
            build_id,
            generated_at: OffsetDateTime::now_utc(),
            catalog_fingerprint: catalog.fingerprint,
            catalog_size: catalog.items.len(),
            preload,
            plan,
        })
    }
}
