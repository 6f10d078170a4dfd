//! Search document model and index actions

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index field names. Queries against the unified index must use these verbatim.
pub mod fields {
    pub const KEY: &str = "Key";
    pub const TYPE: &str = "Type";
    pub const ID: &str = "Id";
    pub const IDS: &str = "Ids";
    pub const SITE_ID: &str = "SiteId";
    pub const EXTERNAL_ID: &str = "ExternalId";
    pub const PRIMARY_MODEL_ID: &str = "PrimaryModelId";
    pub const MODEL_IDS: &str = "ModelIds";
    pub const MODEL_NAMES: &str = "ModelNames";
    pub const NAMES: &str = "Names";
    pub const SECONDARY_NAMES: &str = "SecondaryNames";
    pub const LOCATION: &str = "Location";
    pub const LOCATION_NAMES: &str = "LocationNames";
    pub const FEEDS: &str = "Feeds";
    pub const FED_BY: &str = "FedBy";
    pub const TENANT: &str = "Tenant";
    pub const TAGS: &str = "Tags";
    pub const CATEGORY: &str = "Category";
    pub const IMPORTANCE: &str = "Importance";
    pub const EARLIEST: &str = "Earliest";
    pub const LATEST: &str = "Latest";
    pub const INDEXED_DATE: &str = "IndexedDate";
}

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-_]+$").expect("Failed to compile key pattern"));

/// Whether `key` is acceptable as a document key in the remote index.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && KEY_PATTERN.is_match(key)
}

/// Strip the platform DTDL prefix and version suffix from a model id.
///
/// The airports prefix is removed before the generic one, so
/// `dtmi:com:willowinc:airports:Gate;1` becomes `Gate`. Indexes built by
/// the earlier indexer stored `airports:Gate` for the same model, and their
/// `ModelIds` values will not match names cleaned here.
pub fn model_without_fluff(model_id: &str) -> Option<String> {
    if model_id.is_empty() {
        return None;
    }
    Some(
        model_id
            .replace("dtmi:com:willowinc:airports:", "")
            .replace("dtmi:com:willowinc:", "")
            .replace(";1", ""),
    )
}

fn non_empty<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values
        .into_iter()
        .map(Into::into)
        .filter(|v: &String| !v.is_empty())
        .collect()
}

/// One entry of the unified search index: a twin, model, insight, rule,
/// rule instance or time series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchDocument {
    #[serde(default)]
    pub key: String,
    #[serde(rename = "Type", default)]
    pub doc_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub site_id: String,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub primary_model_id: String,
    #[serde(default)]
    pub model_ids: Vec<String>,
    #[serde(default)]
    pub model_names: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub secondary_names: Vec<String>,
    #[serde(default)]
    pub location: Vec<String>,
    #[serde(default)]
    pub location_names: Vec<String>,
    #[serde(default)]
    pub feeds: Vec<String>,
    #[serde(default)]
    pub fed_by: Vec<String>,
    #[serde(default)]
    pub tenant: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: String,
    /// Relevance boost in `0..=100`
    #[serde(default)]
    pub importance: i32,
    #[serde(default)]
    pub earliest: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest: Option<DateTime<Utc>>,
    #[serde(default)]
    pub indexed_date: Option<DateTime<Utc>>,
}

impl SearchDocument {
    /// Create a document whose key is derived from `doc_type` and `id`.
    ///
    /// Insights and rule instances share ids, so the key covers both parts.
    pub fn new(doc_type: impl Into<String>, id: impl Into<String>, importance: i32) -> Self {
        let doc_type = doc_type.into();
        let id = id.into();
        Self {
            key: Self::safe_key(&format!("{}{}", doc_type, id)),
            doc_type,
            id,
            importance: importance.clamp(0, 100),
            ..Default::default()
        }
    }

    /// URL-safe unpadded base64 of `raw`; always matches the key pattern.
    pub fn safe_key(raw: &str) -> String {
        if raw.is_empty() {
            return "MISSINGID".to_string();
        }
        Base64UrlUnpadded::encode_string(raw.as_bytes())
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = non_empty(names);
        self
    }

    pub fn with_secondary_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary_names = non_empty(names);
        self
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = non_empty(ids);
        self
    }

    pub fn with_location<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.location = non_empty(ids);
        self
    }

    pub fn with_location_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.location_names = non_empty(names);
        self
    }

    pub fn with_feeds<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feeds = non_empty(ids);
        self
    }

    pub fn with_fed_by<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fed_by = non_empty(ids);
        self
    }

    pub fn with_tenant<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tenant = non_empty(ids);
        self
    }

    pub fn with_model_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_ids = non_empty(ids);
        self
    }

    pub fn with_model_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_names = non_empty(names);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = non_empty(tags);
        self
    }

    pub fn with_primary_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.primary_model_id = model_id.into();
        self
    }

    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = site_id.into();
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = external_id.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_earliest(mut self, at: DateTime<Utc>) -> Self {
        self.earliest = Some(at);
        self
    }

    pub fn with_latest(mut self, at: DateTime<Utc>) -> Self {
        self.latest = Some(at);
        self
    }

    pub fn with_indexed_date(mut self, at: DateTime<Utc>) -> Self {
        self.indexed_date = Some(at);
        self
    }
}

impl fmt::Display for SearchDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} - {} - {}",
            self.doc_type,
            self.ids.first().map(String::as_str).unwrap_or(""),
            self.names.first().map(String::as_str).unwrap_or(""),
            self.category
        )
    }
}

/// Remote batch operation applied to a document
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Upload,
    Merge,
    MergeOrUpload,
    Delete,
}

impl ActionKind {
    /// Counts towards inserted documents rather than deleted ones
    pub fn is_insert(&self) -> bool {
        !matches!(self, ActionKind::Delete)
    }
}

/// A queued action waiting for the next flush
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub document: SearchDocument,
}

impl PendingAction {
    pub fn new(kind: ActionKind, document: SearchDocument) -> Self {
        Self { kind, document }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("abc-DEF_123"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("has space"));
        assert!(!is_valid_key("slash/y"));
        assert!(!is_valid_key("plus+"));
        assert!(!is_valid_key("dtmi:com:x;1"));
    }

    #[test]
    fn test_safe_key_is_always_valid() {
        for raw in ["twin", "insight550e8400-e29b", "rule/with+odd chars?", "ü-ñ"] {
            let key = SearchDocument::safe_key(raw);
            assert!(is_valid_key(&key), "{} -> {}", raw, key);
            assert!(!key.ends_with('='));
        }
        assert_eq!(SearchDocument::safe_key(""), "MISSINGID");
    }

    #[test]
    fn test_key_distinguishes_types_sharing_an_id() {
        let insight = SearchDocument::new("insight", "42", 40);
        let instance = SearchDocument::new("ruleinstance", "42", 10);
        assert_ne!(insight.key, instance.key);
    }

    #[test]
    fn test_importance_is_clamped() {
        assert_eq!(SearchDocument::new("twin", "a", 250).importance, 100);
        assert_eq!(SearchDocument::new("twin", "a", -5).importance, 0);
    }

    #[test]
    fn test_setters_drop_empty_values() {
        let doc = SearchDocument::new("twin", "t1", 80)
            .with_names(["AHU-1", ""])
            .with_ids(vec!["t1".to_string(), String::new(), "ext-9".to_string()]);

        assert_eq!(doc.names, vec!["AHU-1"]);
        assert_eq!(doc.ids, vec!["t1", "ext-9"]);
    }

    #[test]
    fn test_serializes_with_index_field_names() {
        let doc = SearchDocument::new("twin", "t1", 80)
            .with_fed_by(["ahu-1"])
            .with_primary_model_id("dtmi:com:willowinc:AirHandlingUnit;1");
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json[fields::TYPE], "twin");
        assert_eq!(json[fields::FED_BY][0], "ahu-1");
        assert_eq!(json[fields::PRIMARY_MODEL_ID], "dtmi:com:willowinc:AirHandlingUnit;1");
        assert_eq!(json[fields::IMPORTANCE], 80);
        assert!(json.get(fields::INDEXED_DATE).is_some());
    }

    #[test]
    fn test_model_without_fluff() {
        assert_eq!(
            model_without_fluff("dtmi:com:willowinc:AirHandlingUnit;1").as_deref(),
            Some("AirHandlingUnit")
        );
        assert_eq!(
            model_without_fluff("dtmi:com:willowinc:airports:Gate;1").as_deref(),
            Some("Gate")
        );
        assert_eq!(model_without_fluff(""), None);
    }

    #[test]
    fn test_action_kinds() {
        let inserts: Vec<_> = ActionKind::iter().filter(|k| k.is_insert()).collect();
        assert_eq!(inserts.len(), 3);
        assert_eq!(
            serde_json::to_value(ActionKind::MergeOrUpload).unwrap(),
            "mergeOrUpload"
        );
    }

    #[test]
    fn test_display() {
        let doc = SearchDocument::new("twin", "t1", 80)
            .with_ids(["t1"])
            .with_names(["Chiller 2"])
            .with_category("Chiller");
        assert_eq!(doc.to_string(), "twin: t1 - Chiller 2 - Chiller");
    }
}
