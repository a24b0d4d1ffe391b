use std::collections::HashSet;
use std::path::Path;

use movie_rounds_core::{
    label_keys, AllocationRequest, CatalogItem, CategoryDefinition, ConditionFlags,
    FilterSummary, PolicyBook, PolicyScope,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MOVIES_PER_CATEGORY: usize = 10;
pub const DEFAULT_ROUNDS_COUNT: usize = 8;
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/original";
pub const DEFAULT_PRELOAD_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_ADJECTIVES: [&str; 23] = [
    "Captivating",
    "Enchanting",
    "Daring",
    "Heartwarming",
    "Intriguing",
    "Intense",
    "Magical",
    "Immersive",
    "Unpredictable",
    "Moving",
    "Gritty",
    "Brilliant",
    "Spectacular",
    "Thrilling",
    "Sparkling",
    "Stylish",
    "Bold",
    "Stunning",
    "Refreshing",
    "Uplifting",
    "Alluring",
    "Surprising",
    "Fiery",
];

const DEFAULT_CATEGORIES: [(&str, &str, u32); 4] = [
    ("action", "Action", 28),
    ("comedy", "Comedy", 35),
    ("drama", "Drama", 18),
    ("thriller", "Thriller", 53),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Static experiment setup shared by every round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExperimentConfig {
    pub categories: Vec<CategoryDefinition>,
    pub adjectives: Vec<String>,
    pub movies_per_category: usize,
    pub rounds_count: usize,
    pub image_base_url: String,
    pub preload_timeout_ms: u64,
    pub filters: PolicyBook,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES
                .iter()
                .map(|(id, label, genre_id)| CategoryDefinition {
                    id: (*id).to_string(),
                    label: (*label).to_string(),
                    required_genre_id: Some(*genre_id),
                })
                .collect(),
            adjectives: DEFAULT_ADJECTIVES
                .iter()
                .map(|adjective| (*adjective).to_string())
                .collect(),
            movies_per_category: DEFAULT_MOVIES_PER_CATEGORY,
            rounds_count: DEFAULT_ROUNDS_COUNT,
            image_base_url: DEFAULT_IMAGE_BASE_URL.to_string(),
            preload_timeout_ms: DEFAULT_PRELOAD_TIMEOUT_MS,
            filters: PolicyBook::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load and validate a config file. `.json` files are parsed as JSON,
    /// everything else as YAML.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&body)
        } else {
            Self::from_yaml_str(&body)
        }
    }

    /// # Errors
    /// Returns [`ConfigError`] on malformed YAML or invalid values.
    pub fn from_yaml_str(body: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(body).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError`] on malformed JSON or invalid values.
    pub fn from_json_str(body: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(body).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::Validation`] when quotas, rounds, or categories are unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.movies_per_category == 0 {
            return Err(ConfigError::Validation("movies_per_category MUST be >= 1".to_string()));
        }
        if self.rounds_count == 0 {
            return Err(ConfigError::Validation("rounds_count MUST be >= 1".to_string()));
        }
        if self.categories.is_empty() {
            return Err(ConfigError::Validation("categories MUST be non-empty".to_string()));
        }
        let mut seen = HashSet::new();
        for category in &self.categories {
            if category.id.trim().is_empty() || category.label.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "category id and label MUST be non-empty".to_string(),
                ));
            }
            if !seen.insert(category.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate category id `{}`",
                    category.id
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn conditions(&self) -> Vec<ConditionFlags> {
        ConditionFlags::all()
    }

    #[must_use]
    pub fn category(&self, id: &str) -> Option<&CategoryDefinition> {
        self.categories.iter().find(|category| category.id == id)
    }

    #[must_use]
    pub fn allocation_request<'a>(
        &'a self,
        catalog: &'a [CatalogItem],
        conditions: &'a [ConditionFlags],
    ) -> AllocationRequest<'a> {
        AllocationRequest {
            catalog,
            categories: &self.categories,
            conditions,
            adjectives: &self.adjectives,
            policies: &self.filters,
            quota: self.movies_per_category,
            round_count: self.rounds_count,
        }
    }

    /// Merged manual rules that apply to one configured category.
    #[must_use]
    pub fn filter_summary(&self, category_id: &str) -> Option<FilterSummary> {
        let category = self.category(category_id)?;
        let required_genre_ids = category.required_genre_id.into_iter().collect::<Vec<_>>();
        let extra_keys = label_keys(&category.label);
        Some(self.filters.summarize(&PolicyScope {
            category_id: &category.id,
            required_genre_ids: &required_genre_ids,
            extra_keys: &extra_keys,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_four_genre_experiment() {
        let config = ExperimentConfig::default();
        assert_eq!(config.categories.len(), 4);
        assert_eq!(config.adjectives.len(), 23);
        assert_eq!(config.movies_per_category, 10);
        assert_eq!(config.rounds_count, 8);
        assert_eq!(config.category("thriller").and_then(|c| c.required_genre_id), Some(53));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let config = match ExperimentConfig::from_yaml_str(
            r"
movies_per_category: 3
categories:
  - id: action
    label: Action
    required_genre_id: 28
filters:
  categories:
    action:
      exclude:
        ids: [603, '604']
  labels:
    action:
      include_only:
        titles: ['The Matrix']
",
        ) {
            Ok(config) => config,
            Err(err) => panic!("yaml config should parse: {err}"),
        };

        assert_eq!(config.movies_per_category, 3);
        assert_eq!(config.rounds_count, DEFAULT_ROUNDS_COUNT);
        assert_eq!(config.adjectives.len(), 23);

        let summary = match config.filter_summary("action") {
            Some(summary) => summary,
            None => panic!("action category should exist"),
        };
        assert!(summary.has_rules);
        assert_eq!(summary.exclude_ids, vec!["603".to_string(), "604".to_string()]);
        assert_eq!(summary.include_titles, vec!["the matrix".to_string()]);
        assert!(config.filter_summary("missing").is_none());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        for body in [
            "movies_per_category: 0",
            "rounds_count: 0",
            "categories: []",
            "categories: [{id: a, label: A}, {id: a, label: B}]",
        ] {
            match ExperimentConfig::from_yaml_str(body) {
                Ok(_) => panic!("config `{body}` should be rejected"),
                Err(err) => assert!(matches!(err, ConfigError::Validation(_)), "{body}: {err}"),
            }
        }
    }

    #[test]
    fn load_picks_parser_from_extension() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("failed to create temp dir: {err}"),
        };
        let path = dir.path().join("experiment.json");
        if let Err(err) = std::fs::write(&path, r#"{"rounds_count": 2}"#) {
            panic!("failed to write config: {err}");
        }

        let config = match ExperimentConfig::load(&path) {
            Ok(config) => config,
            Err(err) => panic!("json config should load: {err}"),
        };
        assert_eq!(config.rounds_count, 2);

        let missing = ExperimentConfig::load(&dir.path().join("absent.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
