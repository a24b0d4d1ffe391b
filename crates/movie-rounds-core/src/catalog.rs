use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CatalogError {
    #[error("catalog parse error: {0}")]
    Parse(String),
}

/// One candidate movie, normalized once at catalog load and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub tmdb_id: Option<u64>,
    pub title: String,
    pub name: Option<String>,
    pub original_title: Option<String>,
    pub original_name: Option<String>,
    pub year: Option<i32>,
    pub release_date: Option<String>,
    pub genre: String,
    #[serde(default)]
    pub genre_ids: Vec<u32>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub trailer_url: Option<String>,
    pub trailer_id: Option<String>,
    pub tmdb_url: Option<String>,
    pub popularity: Option<f64>,
    pub vote_count: Option<u64>,
    pub vote_average: Option<f64>,
    pub language: Option<String>,
    #[serde(default)]
    pub overview: String,
}

impl CatalogItem {
    /// True when the item carries at least one poster or backdrop fragment.
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image_paths().next().is_some()
    }

    /// Backdrop first, then poster; blank fragments are skipped.
    pub fn image_paths(&self) -> impl Iterator<Item = &str> {
        [self.backdrop_path.as_deref(), self.poster_path.as_deref()]
            .into_iter()
            .flatten()
            .filter(|path| !path.trim().is_empty())
    }

    /// Title used for policy matching: title, then name, then the original variants.
    #[must_use]
    pub fn display_title(&self) -> &str {
        [
            Some(self.title.as_str()),
            self.name.as_deref(),
            self.original_title.as_deref(),
            self.original_name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.is_empty())
        .unwrap_or("")
    }

    pub fn usable_keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(String::as_str).filter(|keyword| !keyword.is_empty())
    }

    /// Key used to collapse duplicate dataset rows: the TMDB id from the
    /// source URL when present, otherwise the item id.
    #[must_use]
    pub fn dedupe_key(&self) -> String {
        self.tmdb_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .and_then(|url| url.rsplit('/').next())
            .filter(|segment| !segment.is_empty())
            .map_or_else(|| self.id.clone(), ToString::to_string)
    }
}

/// Dataset row as written by the catalog build scripts. Field types are kept
/// loose because the scripts emit ids as numbers or strings depending on source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCatalogRow {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub year: Option<Value>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub genre_ids: Option<Value>,
    #[serde(default)]
    pub keywords: Option<Value>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default, alias = "youtubeTrailerUrl", alias = "trailer_url")]
    pub youtube_trailer_url: Option<String>,
    #[serde(default)]
    pub tmdb_url: Option<String>,
    #[serde(default)]
    pub popularity: Option<Value>,
    #[serde(default)]
    pub vote_count: Option<Value>,
    #[serde(default)]
    pub vote_average: Option<Value>,
    #[serde(default, alias = "language")]
    pub original_language: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
}

impl RawCatalogRow {
    #[must_use]
    pub fn normalize(self) -> CatalogItem {
        let title = self.title.unwrap_or_default();
        let year = self.year.as_ref().and_then(value_as_year);
        let id = match &self.id {
            Some(Value::Number(number)) => Some(number.to_string()),
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            _ => None,
        }
        .unwrap_or_else(|| {
            format!("{title}-{}", year.map_or_else(|| "NA".to_string(), |year| year.to_string()))
        });
        let tmdb_id = match &self.id {
            Some(Value::Number(number)) => number.as_u64(),
            Some(Value::String(text)) => text.trim().parse().ok(),
            _ => None,
        };

        let keywords = array_items(self.keywords)
            .into_iter()
            .filter_map(|keyword| match keyword {
                Value::String(text) => Some(text),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|keyword| !keyword.is_empty())
            .collect();
        let genre_ids = array_items(self.genre_ids)
            .iter()
            .filter_map(Value::as_u64)
            .filter_map(|genre_id| u32::try_from(genre_id).ok())
            .collect();
        let trailer_id = self.youtube_trailer_url.as_deref().and_then(extract_youtube_id);

        CatalogItem {
            id,
            tmdb_id,
            title,
            name: self.name,
            original_title: self.original_title,
            original_name: self.original_name,
            year,
            release_date: self.release_date,
            genre: self.genre.unwrap_or_default(),
            genre_ids,
            keywords,
            poster_path: self.poster_path,
            backdrop_path: self.backdrop_path,
            trailer_url: self.youtube_trailer_url,
            trailer_id,
            tmdb_url: self.tmdb_url,
            popularity: self.popularity.as_ref().and_then(value_as_metric),
            vote_count: self.vote_count.as_ref().and_then(value_as_count),
            vote_average: self.vote_average.as_ref().and_then(value_as_metric),
            language: self.original_language,
            overview: self.overview.unwrap_or_default(),
        }
    }
}

fn value_as_year(value: &Value) -> Option<i32> {
    match value {
        Value::Number(number) => number.as_i64().and_then(|year| i32::try_from(year).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Array-valued fields; anything else (null, a scalar, an object) reads as empty.
fn array_items(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn value_as_metric(value: &Value) -> Option<f64> {
    let metric: f64 = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    metric.is_finite().then_some(metric)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn value_as_count(value: &Value) -> Option<u64> {
    if let Some(count) = value.as_u64() {
        return Some(count);
    }
    let metric = value_as_metric(value)?;
    (metric >= 0.0 && metric.fract() == 0.0 && metric <= 9_007_199_254_740_992.0)
        .then_some(metric as u64)
}

/// Parse a JSON dataset (an array of raw rows) into normalized catalog items.
///
/// # Errors
/// Returns [`CatalogError::Parse`] when the payload is not a JSON array of rows.
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<CatalogItem>, CatalogError> {
    let rows: Vec<RawCatalogRow> =
        serde_json::from_slice(bytes).map_err(|err| CatalogError::Parse(err.to_string()))?;
    Ok(rows.into_iter().map(RawCatalogRow::normalize).collect())
}

#[must_use]
pub fn catalog_fingerprint(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn youtube_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:v=|youtu\.be/|/embed/|/shorts/)([A-Za-z0-9_-]{6,})").ok())
        .as_ref()
}

/// Pull the video id out of a YouTube link.
#[must_use]
pub fn extract_youtube_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = url::Url::parse(raw) {
        if parsed.host_str().is_some_and(|host| host.contains("youtu")) {
            if let Some((_, value)) =
                parsed.query_pairs().find(|(key, value)| key == "v" && !value.is_empty())
            {
                return Some(value.into_owned());
            }
            if let Some(segment) =
                parsed.path_segments().and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            {
                return Some(segment.to_string());
            }
        }
    }

    youtube_id_pattern()?
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|matched| matched.as_str().to_string())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DedupeReport {
    pub items: Vec<CatalogItem>,
    pub removed_ids: Vec<String>,
}

/// Keep the first row for each dedupe key, preserving dataset order.
#[must_use]
pub fn dedupe_catalog(items: Vec<CatalogItem>) -> DedupeReport {
    let mut seen = BTreeSet::new();
    let mut kept = Vec::with_capacity(items.len());
    let mut removed_ids = Vec::new();
    for item in items {
        if seen.insert(item.dedupe_key()) {
            kept.push(item);
        } else {
            removed_ids.push(item.id);
        }
    }
    DedupeReport { items: kept, removed_ids }
}

#[must_use]
pub fn genre_counts(items: &[CatalogItem]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(item.genre.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(payload: &serde_json::Value) -> Vec<CatalogItem> {
        match parse_catalog(payload.to_string().as_bytes()) {
            Ok(items) => items,
            Err(err) => panic!("fixture catalog should parse: {err}"),
        }
    }

    #[test]
    fn numeric_ids_are_stringified_and_missing_ids_fall_back_to_title_year() {
        let items = parse(&serde_json::json!([
            {"id": 603, "title": "The Matrix", "genre": "Action", "year": 1999},
            {"title": "Untitled", "genre": "Drama", "year": 2004},
            {"title": "Undated", "genre": "Drama"}
        ]));

        assert_eq!(items[0].id, "603");
        assert_eq!(items[0].tmdb_id, Some(603));
        assert_eq!(items[1].id, "Untitled-2004");
        assert_eq!(items[2].id, "Undated-NA");
        assert_eq!(items[2].tmdb_id, None);
    }

    #[test]
    fn normalized_items_parse_back_as_rows() {
        let items = parse(&serde_json::json!([
            {
                "id": "603",
                "title": "The Matrix",
                "genre": "Action",
                "youtubeTrailerUrl": "https://www.youtube.com/watch?v=vKQi3bBA1y8",
                "original_language": "en"
            }
        ]));
        let written = match serde_json::to_value(&items) {
            Ok(value) => value,
            Err(err) => panic!("items should serialize: {err}"),
        };

        let reparsed = parse(&written);
        assert_eq!(reparsed, items);
        assert_eq!(reparsed[0].tmdb_id, Some(603));
        assert_eq!(reparsed[0].language.as_deref(), Some("en"));
    }

    #[test]
    fn keywords_and_genre_ids_are_coerced() {
        let items = parse(&serde_json::json!([
            {
                "id": "a1",
                "title": "Mixed",
                "genre": "Comedy",
                "genre_ids": [35, "18", 10.5, 99],
                "keywords": ["heist", null, "", 42]
            }
        ]));

        assert_eq!(items[0].genre_ids, vec![35, 99]);
        assert_eq!(items[0].keywords, vec!["heist".to_string(), "42".to_string()]);
    }

    #[test]
    fn malformed_optional_fields_do_not_reject_the_row() {
        let items = parse(&serde_json::json!([
            {
                "id": 1,
                "title": "Null Genres",
                "genre": "Drama",
                "genre_ids": null,
                "keywords": "solo"
            },
            {
                "id": 2,
                "title": "Float Counts",
                "genre": "Drama",
                "vote_count": 1234.0,
                "vote_average": "7.5",
                "popularity": "n/a"
            },
            {"id": 3, "title": "Negative", "genre": "Drama", "vote_count": -4}
        ]));

        assert_eq!(items.len(), 3);
        assert!(items[0].genre_ids.is_empty());
        assert!(items[0].keywords.is_empty());
        assert_eq!(items[1].vote_count, Some(1234));
        assert_eq!(items[1].vote_average, Some(7.5));
        assert_eq!(items[1].popularity, None);
        assert_eq!(items[2].vote_count, None);
    }

    #[test]
    fn non_array_payload_is_rejected() {
        let err = match parse_catalog(br#"{"id": 1}"#) {
            Ok(items) => panic!("expected parse error, got {} items", items.len()),
            Err(err) => err,
        };
        assert!(err.to_string().contains("catalog parse error"));
    }

    #[test]
    fn youtube_ids_are_extracted_from_common_link_shapes() {
        assert_eq!(
            extract_youtube_id("https://www.youtube.com/watch?v=vKQi3bBA1y8"),
            Some("vKQi3bBA1y8".to_string())
        );
        assert_eq!(
            extract_youtube_id("https://youtu.be/vKQi3bBA1y8"),
            Some("vKQi3bBA1y8".to_string())
        );
        assert_eq!(
            extract_youtube_id("https://www.youtube.com/embed/vKQi3bBA1y8"),
            Some("vKQi3bBA1y8".to_string())
        );
        assert_eq!(extract_youtube_id("not a url v=abcdef123"), Some("abcdef123".to_string()));
        assert_eq!(extract_youtube_id("https://vimeo.com/12345"), None);
        assert_eq!(extract_youtube_id("   "), None);
    }

    #[test]
    fn trailer_alias_is_accepted_and_resolved() {
        let items = parse(&serde_json::json!([
            {
                "id": 1,
                "title": "A",
                "genre": "Action",
                "youtubeTrailerUrl": "https://youtu.be/abcdefgh"
            }
        ]));
        assert_eq!(items[0].trailer_id.as_deref(), Some("abcdefgh"));
    }

    #[test]
    fn display_title_walks_fallback_chain() {
        let items = parse(&serde_json::json!([
            {"id": 1, "title": "", "name": "", "original_title": "Le Titre", "genre": "Drama"}
        ]));
        assert_eq!(items[0].display_title(), "Le Titre");
    }

    #[test]
    fn has_image_ignores_blank_fragments() {
        let items = parse(&serde_json::json!([
            {"id": 1, "title": "A", "genre": "Drama", "poster_path": " ", "backdrop_path": null},
            {"id": 2, "title": "B", "genre": "Drama", "poster_path": "/b.jpg"}
        ]));
        assert!(!items[0].has_image());
        assert!(items[1].has_image());
    }

    #[test]
    fn dedupe_keeps_first_row_per_tmdb_id() {
        let items = parse(&serde_json::json!([
            {
                "id": "x1",
                "title": "First",
                "genre": "Action",
                "tmdb_url": "https://www.themoviedb.org/movie/550"
            },
            {
                "id": "x2",
                "title": "Dup",
                "genre": "Drama",
                "tmdb_url": "https://www.themoviedb.org/movie/550/"
            },
            {"id": "x3", "title": "Other", "genre": "Drama"}
        ]));

        let report = dedupe_catalog(items);
        let kept = report.items.iter().map(|item| item.id.as_str()).collect::<Vec<_>>();
        assert_eq!(kept, vec!["x1", "x3"]);
        assert_eq!(report.removed_ids, vec!["x2".to_string()]);
    }

    #[test]
    fn genre_counts_group_by_label() {
        let items = parse(&serde_json::json!([
            {"id": 1, "title": "A", "genre": "Action"},
            {"id": 2, "title": "B", "genre": "Action"},
            {"id": 3, "title": "C", "genre": "Drama"}
        ]));
        let counts = genre_counts(&items);
        assert_eq!(counts.get("Action"), Some(&2));
        assert_eq!(counts.get("Drama"), Some(&1));
    }

    #[test]
    fn fingerprint_is_prefixed_sha256() {
        let fingerprint = catalog_fingerprint(b"[]");
        assert!(fingerprint.starts_with("sha256:"));
        assert_eq!(fingerprint.len(), "sha256:".len() + 64);
    }
}
