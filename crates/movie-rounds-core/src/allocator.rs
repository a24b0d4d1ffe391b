use std::collections::{BTreeSet, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogItem;
use crate::condition::ConditionFlags;
use crate::policy::{label_keys, MergedFilter, PolicyBook, PolicyScope};

/// Adjective used when the configured pool is empty.
pub const DEFAULT_ADJECTIVE: &str = "Recommended";
pub const MAX_KEYWORDS_PER_ITEM: usize = 5;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AllocationError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(
        "not enough movies available for {category_label} (category `{category_id}`, \
         round {round}): filled {filled} of {quota}"
    )]
    PoolExhausted {
        category_id: String,
        category_label: String,
        round: usize,
        filled: usize,
        quota: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CategoryDefinition {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub required_genre_id: Option<u32>,
}

impl CategoryDefinition {
    /// Pool membership: genre label matches case-insensitively and the item
    /// has something to display.
    #[must_use]
    pub fn admits(&self, item: &CatalogItem) -> bool {
        item.genre.to_lowercase() == self.label.to_lowercase() && item.has_image()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SelectionMeta {
    pub adjective: String,
    pub keywords: Vec<String>,
    pub trailer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedItem {
    #[serde(flatten)]
    pub item: CatalogItem,
    pub experiment_meta: SelectionMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryBucket {
    pub id: String,
    pub label: String,
    pub required_genre_id: Option<u32>,
    pub movies: Vec<EnrichedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub index: usize,
    pub label: String,
    pub condition_id: String,
    pub condition: ConditionFlags,
    pub categories: Vec<CategoryBucket>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoundPlan {
    pub rounds: Vec<Round>,
}

impl RoundPlan {
    pub fn items(&self) -> impl Iterator<Item = &EnrichedItem> {
        self.rounds
            .iter()
            .flat_map(|round| round.categories.iter())
            .flat_map(|bucket| bucket.movies.iter())
    }

    /// Every poster and backdrop URL referenced by the plan, de-duplicated.
    #[must_use]
    pub fn image_urls(&self, base_url: &str) -> BTreeSet<String> {
        self.items()
            .flat_map(|enriched| enriched.item.image_paths())
            .map(|path| format!("{base_url}{path}"))
            .collect()
    }
}

/// Inputs for one allocation run.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    pub catalog: &'a [CatalogItem],
    pub categories: &'a [CategoryDefinition],
    pub conditions: &'a [ConditionFlags],
    pub adjectives: &'a [String],
    pub policies: &'a PolicyBook,
    pub quota: usize,
    pub round_count: usize,
}

impl AllocationRequest<'_> {
    fn validate(&self) -> Result<(), AllocationError> {
        if self.quota == 0 {
            return Err(AllocationError::Validation(
                "movies per category MUST be >= 1".to_string(),
            ));
        }
        if self.categories.is_empty() {
            return Err(AllocationError::Validation(
                "at least one category MUST be configured".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for category in self.categories {
            if category.id.trim().is_empty() {
                return Err(AllocationError::Validation(
                    "category id MUST be non-empty".to_string(),
                ));
            }
            if !seen.insert(category.id.as_str()) {
                return Err(AllocationError::Validation(format!(
                    "duplicate category id `{}`",
                    category.id
                )));
            }
        }
        Ok(())
    }
}

struct CategoryPool<'a> {
    definition: &'a CategoryDefinition,
    filter: MergedFilter,
    items: Vec<&'a CatalogItem>,
    cursor: usize,
}

impl<'a> CategoryPool<'a> {
    fn build<R: Rng + ?Sized>(
        definition: &'a CategoryDefinition,
        catalog: &'a [CatalogItem],
        policies: &PolicyBook,
        rng: &mut R,
    ) -> Self {
        let mut items = catalog.iter().filter(|item| definition.admits(item)).collect::<Vec<_>>();
        items.shuffle(rng);

        let required_genre_ids = definition.required_genre_id.into_iter().collect::<Vec<_>>();
        let extra_keys = label_keys(&definition.label);
        let filter = policies.resolve_scope(&PolicyScope {
            category_id: &definition.id,
            required_genre_ids: &required_genre_ids,
            extra_keys: &extra_keys,
        });

        Self { definition, filter, items, cursor: 0 }
    }

    fn next(&mut self) -> Option<&'a CatalogItem> {
        let item = self.items.get(self.cursor).copied();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }

    fn accepts(&self, item: &CatalogItem, used: &HashSet<&str>, condition: ConditionFlags) -> bool {
        if used.contains(item.id.as_str()) {
            return false;
        }
        if let Some(genre_id) = self.definition.required_genre_id {
            if !item.genre_ids.contains(&genre_id) {
                return false;
            }
        }
        if self.filter.excludes(item) {
            return false;
        }
        !(condition.use_adjectives && item.usable_keywords().next().is_none())
    }
}

struct AdjectiveCursor<'a> {
    pool: &'a [String],
    position: usize,
}

impl AdjectiveCursor<'_> {
    fn next(&mut self) -> String {
        let adjective = if self.pool.is_empty() {
            DEFAULT_ADJECTIVE.to_string()
        } else {
            self.pool[self.position % self.pool.len()].clone()
        };
        self.position += 1;
        adjective
    }
}

fn enrich(item: &CatalogItem, adjective: String) -> EnrichedItem {
    EnrichedItem {
        item: item.clone(),
        experiment_meta: SelectionMeta {
            adjective,
            keywords: item
                .usable_keywords()
                .take(MAX_KEYWORDS_PER_ITEM)
                .map(String::from)
                .collect(),
            trailer_id: item.trailer_id.clone(),
        },
    }
}

/// Partition the catalog into rounds of quota-sized category buckets.
///
/// Pools and condition order are shuffled exactly once with `rng`. Every pool
/// cursor only moves forward, so an item rejected for one round is never
/// reconsidered. The adjective cursor is shared by the whole allocation.
///
/// # Errors
/// Returns [`AllocationError::Validation`] for unusable request parameters and
/// [`AllocationError::PoolExhausted`] when a category pool runs dry before
/// filling its bucket. No partial plan is returned.
pub fn allocate<R: Rng + ?Sized>(
    request: &AllocationRequest<'_>,
    rng: &mut R,
) -> Result<RoundPlan, AllocationError> {
    request.validate()?;

    let mut pools = request
        .categories
        .iter()
        .map(|definition| {
            CategoryPool::build(definition, request.catalog, request.policies, &mut *rng)
        })
        .collect::<Vec<_>>();
    for pool in &pools {
        tracing::debug!(
            category = %pool.definition.id,
            eligible = pool.items.len(),
            "built category pool"
        );
    }

    let mut conditions = request.conditions.to_vec();
    conditions.shuffle(rng);
    conditions.truncate(request.round_count.min(conditions.len()));

    let mut used: HashSet<&str> = HashSet::new();
    let mut adjectives = AdjectiveCursor { pool: request.adjectives, position: 0 };
    let mut rounds = Vec::with_capacity(conditions.len());

    for (index, condition) in conditions.into_iter().enumerate() {
        let mut categories = Vec::with_capacity(pools.len());
        for pool in &mut pools {
            let mut movies = Vec::with_capacity(request.quota);
            while movies.len() < request.quota {
                let Some(item) = pool.next() else {
                    return Err(AllocationError::PoolExhausted {
                        category_id: pool.definition.id.clone(),
                        category_label: pool.definition.label.clone(),
                        round: index + 1,
                        filled: movies.len(),
                        quota: request.quota,
                    });
                };
                if !pool.accepts(item, &used, condition) {
                    continue;
                }
                movies.push(enrich(item, adjectives.next()));
                used.insert(item.id.as_str());
            }

            tracing::debug!(
                round = index + 1,
                category = %pool.definition.id,
                cursor = pool.cursor,
                remaining = pool.items.len() - pool.cursor,
                "filled category bucket"
            );
            categories.push(CategoryBucket {
                id: pool.definition.id.clone(),
                label: pool.definition.label.clone(),
                required_genre_id: pool.definition.required_genre_id,
                movies,
            });
        }

        rounds.push(Round {
            index,
            label: format!("Round {}", index + 1),
            condition_id: condition.id(),
            condition,
            categories,
        });
    }

    tracing::info!(
        rounds = rounds.len(),
        categories = pools.len(),
        assigned = used.len(),
        "allocated experiment rounds"
    );
    Ok(RoundPlan { rounds })
}
