//! Manual include/exclude rules layered over the category pools.
//!
//! Rules live in a [`PolicyBook`] grouped by the kind of source they apply to.
//! For one category the applicable sources are resolved in a fixed order
//! (default, category id, required genre ids, label keys) and merged by plain
//! union. Precedence exists only between rule kinds: a non-empty include-only
//! set acts as an allow-list, and an exclude match always removes the item.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogItem;

/// A rule id as written in configuration; TMDB ids appear both as numbers and strings.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum RuleId {
    Number(i64),
    Text(String),
}

impl RuleId {
    fn normalized(&self) -> Option<String> {
        let value = match self {
            Self::Number(number) => number.to_string(),
            Self::Text(text) => text.trim().to_string(),
        };
        (!value.is_empty()).then_some(value)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RuleList {
    #[serde(default)]
    pub ids: Vec<RuleId>,
    #[serde(default)]
    pub titles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct FilterRules {
    #[serde(default)]
    pub exclude: RuleList,
    #[serde(default, alias = "includeOnly")]
    pub include_only: RuleList,
}

/// Where a set of rules comes from, in resolution order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PolicySource {
    Default,
    Category(String),
    Genre(u32),
    Label(String),
}

/// Lookup inputs for one category.
#[derive(Debug, Clone, Copy)]
pub struct PolicyScope<'a> {
    pub category_id: &'a str,
    pub required_genre_ids: &'a [u32],
    pub extra_keys: &'a [String],
}

impl PolicyScope<'_> {
    #[must_use]
    pub fn sources(&self) -> Vec<PolicySource> {
        let mut sources = vec![PolicySource::Default];
        if !self.category_id.is_empty() {
            sources.push(PolicySource::Category(self.category_id.to_string()));
        }
        sources.extend(self.required_genre_ids.iter().copied().map(PolicySource::Genre));
        sources.extend(self.extra_keys.iter().cloned().map(PolicySource::Label));
        sources
    }
}

/// Label-derived lookup keys: the trimmed lowercase label, plus its hyphenated
/// slug when that differs.
#[must_use]
pub fn label_keys(label: &str) -> Vec<String> {
    let trimmed = label.trim().to_lowercase();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let slug = trimmed.split_whitespace().collect::<Vec<_>>().join("-");
    if slug == trimmed {
        vec![trimmed]
    } else {
        vec![trimmed, slug]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PolicyBook {
    #[serde(default)]
    pub default: Option<FilterRules>,
    #[serde(default)]
    pub categories: BTreeMap<String, FilterRules>,
    #[serde(default)]
    pub genres: BTreeMap<u32, FilterRules>,
    #[serde(default)]
    pub labels: BTreeMap<String, FilterRules>,
}

impl PolicyBook {
    #[must_use]
    pub fn lookup(&self, source: &PolicySource) -> Option<&FilterRules> {
        match source {
            PolicySource::Default => self.default.as_ref(),
            PolicySource::Category(id) => self.categories.get(id),
            PolicySource::Genre(genre_id) => self.genres.get(genre_id),
            PolicySource::Label(key) => self.labels.get(key),
        }
    }

    /// Union every rule set reachable from `sources`.
    #[must_use]
    pub fn resolve(&self, sources: &[PolicySource]) -> MergedFilter {
        let mut merged = MergedFilter::default();
        for rules in sources.iter().filter_map(|source| self.lookup(source)) {
            merged.absorb(rules);
        }
        merged
    }

    #[must_use]
    pub fn resolve_scope(&self, scope: &PolicyScope<'_>) -> MergedFilter {
        self.resolve(&scope.sources())
    }

    #[must_use]
    pub fn is_excluded(&self, item: &CatalogItem, scope: &PolicyScope<'_>) -> bool {
        self.resolve_scope(scope).excludes(item)
    }

    #[must_use]
    pub fn summarize(&self, scope: &PolicyScope<'_>) -> FilterSummary {
        self.resolve_scope(scope).summary()
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MergedFilter {
    exclude_ids: BTreeSet<String>,
    exclude_titles: BTreeSet<String>,
    include_ids: BTreeSet<String>,
    include_titles: BTreeSet<String>,
}

impl MergedFilter {
    fn absorb(&mut self, rules: &FilterRules) {
        self.exclude_ids.extend(rules.exclude.ids.iter().filter_map(RuleId::normalized));
        self.exclude_titles.extend(rules.exclude.titles.iter().filter_map(|t| normalize_title(t)));
        self.include_ids.extend(rules.include_only.ids.iter().filter_map(RuleId::normalized));
        self.include_titles
            .extend(rules.include_only.titles.iter().filter_map(|t| normalize_title(t)));
    }

    #[must_use]
    pub fn has_rules(&self) -> bool {
        self.has_include_rules() || !self.exclude_ids.is_empty() || !self.exclude_titles.is_empty()
    }

    fn has_include_rules(&self) -> bool {
        !self.include_ids.is_empty() || !self.include_titles.is_empty()
    }

    /// Include-only sets are checked first; an exclude hit removes the item
    /// even when it also appears in an include set.
    #[must_use]
    pub fn excludes(&self, item: &CatalogItem) -> bool {
        if !self.has_rules() {
            return false;
        }

        let id = item.id.trim();
        let title = item.display_title().trim().to_lowercase();
        let id_in = |set: &BTreeSet<String>| !id.is_empty() && set.contains(id);
        let title_in = |set: &BTreeSet<String>| !title.is_empty() && set.contains(&title);

        if self.has_include_rules() && !(id_in(&self.include_ids) || title_in(&self.include_titles))
        {
            return true;
        }

        id_in(&self.exclude_ids) || title_in(&self.exclude_titles)
    }

    #[must_use]
    pub fn summary(&self) -> FilterSummary {
        FilterSummary {
            has_rules: self.has_rules(),
            include_ids: self.include_ids.iter().cloned().collect(),
            include_titles: self.include_titles.iter().cloned().collect(),
            exclude_ids: self.exclude_ids.iter().cloned().collect(),
            exclude_titles: self.exclude_titles.iter().cloned().collect(),
        }
    }
}

fn normalize_title(value: &str) -> Option<String> {
    let normalized = value.trim().to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct FilterSummary {
    pub has_rules: bool,
    pub include_ids: Vec<String>,
    pub include_titles: Vec<String>,
    pub exclude_ids: Vec<String>,
    pub exclude_titles: Vec<String>,
}
