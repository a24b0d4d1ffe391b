//! Round allocation for the movie-selection experiment.
//!
//! The crate turns a flat movie catalog into an ordered list of experiment
//! rounds. Each round pairs one condition (a combination of display flags)
//! with a fixed set of category buckets, and no movie is ever assigned to
//! more than one bucket across the whole allocation.

mod allocator;
mod catalog;
mod condition;
mod policy;

pub use allocator::{
    allocate, AllocationError, AllocationRequest, CategoryBucket, CategoryDefinition,
    EnrichedItem, Round, RoundPlan, SelectionMeta, DEFAULT_ADJECTIVE, MAX_KEYWORDS_PER_ITEM,
};
pub use catalog::{
    catalog_fingerprint, dedupe_catalog, extract_youtube_id, genre_counts, parse_catalog,
    CatalogError, CatalogItem, DedupeReport, RawCatalogRow,
};
pub use condition::ConditionFlags;
pub use policy::{
    label_keys, FilterRules, FilterSummary, MergedFilter, PolicyBook, PolicyScope, PolicySource,
    RuleId, RuleList,
};
