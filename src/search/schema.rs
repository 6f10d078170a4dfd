//! Declarative index schema in the REST wire shape.
//!
//! The unified index is declared once here and pushed by
//! [`IndexSchemaManager`](crate::search::IndexSchemaManager). Field names come
//! from [`fields`] so queries and documents can never drift from the schema.

use crate::search::document::fields;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Built-in analyzer that indexes the whole value as one token
pub const KEYWORD_ANALYZER: &str = "keyword";

/// Built-in English analyzer
pub const ENGLISH_ANALYZER: &str = "en.microsoft";

/// Custom analyzer: keyword tokenizer plus lowercase filter
pub const LOWERCASE_KEYWORD_ANALYZER: &str = "lowercase_keyword";

/// Synonym map attached to the name-like fields
pub const SYNONYM_MAP_NAME: &str = "unified-synonyms";

/// Scoring profile applied by default to unified searches
pub const SCORING_PROFILE_NAME: &str = "rules";

/// Suggester over `Names`
pub const SUGGESTER_NAME: &str = "nameSuggester";

/// Solr-format synonym rules for building and equipment vocabulary
const SYNONYMS: &[&str] = &[
    "ahu, air handling unit, air handler",
    "vav, variable air volume",
    "fcu, fan coil unit",
    "rtu, rooftop unit",
    "hvac, heating ventilation and air conditioning",
    "chw, chilled water",
    "hhw, heating hot water",
    "dhw, domestic hot water",
    "oat, outside air temperature",
    "lvl, level, floor",
    "bldg, building",
];

/// Data type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "Edm.String")]
    String,
    #[serde(rename = "Collection(Edm.String)")]
    StringCollection,
    #[serde(rename = "Edm.Int32")]
    Int32,
    #[serde(rename = "Edm.DateTimeOffset")]
    DateTimeOffset,
}

/// One field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub facetable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonym_maps: Vec<String>,
}

impl SearchField {
    fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            key: false,
            filterable: false,
            searchable: false,
            sortable: false,
            facetable: false,
            analyzer: None,
            synonym_maps: Vec::new(),
        }
    }

    fn key(name: &str) -> Self {
        Self {
            key: true,
            filterable: true,
            ..Self::new(name, FieldType::String)
        }
    }

    /// Filterable and searchable with the given analyzer
    fn text(name: &str, field_type: FieldType, analyzer: &str) -> Self {
        Self {
            filterable: true,
            searchable: true,
            analyzer: Some(analyzer.to_string()),
            ..Self::new(name, field_type)
        }
    }

    fn filterable_date(name: &str) -> Self {
        Self {
            filterable: true,
            ..Self::new(name, FieldType::DateTimeOffset)
        }
    }

    fn not_filterable(mut self) -> Self {
        self.filterable = false;
        self
    }

    fn with_synonyms(mut self, map: &str) -> Self {
        self.synonym_maps.push(map.to_string());
        self
    }
}

/// Analyzer built from a tokenizer and token filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAnalyzer {
    #[serde(rename = "@odata.type")]
    pub odata_type: String,
    pub name: String,
    pub tokenizer: String,
    #[serde(default)]
    pub token_filters: Vec<String>,
}

impl CustomAnalyzer {
    pub fn lowercase_keyword() -> Self {
        Self {
            odata_type: "#Microsoft.Azure.Search.CustomAnalyzer".to_string(),
            name: LOWERCASE_KEYWORD_ANALYZER.to_string(),
            tokenizer: "keyword_v2".to_string(),
            token_filters: vec!["lowercase".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextWeights {
    pub weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagnitudeParameters {
    pub boosting_range_start: f64,
    pub boosting_range_end: f64,
}

/// Numeric boost over a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringFunction {
    #[serde(rename = "type")]
    pub function_type: String,
    pub field_name: String,
    pub boost: f64,
    #[serde(default)]
    pub interpolation: Option<String>,
    #[serde(default)]
    pub magnitude: Option<MagnitudeParameters>,
}

impl ScoringFunction {
    pub fn magnitude(field: &str, boost: f64, start: f64, end: f64) -> Self {
        Self {
            function_type: "magnitude".to_string(),
            field_name: field.to_string(),
            boost,
            interpolation: Some("linear".to_string()),
            magnitude: Some(MagnitudeParameters {
                boosting_range_start: start,
                boosting_range_end: end,
            }),
        }
    }
}

/// How function boosts combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionAggregation {
    Sum,
    Average,
    Minimum,
    Maximum,
    FirstMatching,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringProfile {
    pub name: String,
    #[serde(default)]
    pub text: Option<TextWeights>,
    #[serde(default)]
    pub functions: Vec<ScoringFunction>,
    #[serde(default)]
    pub function_aggregation: Option<FunctionAggregation>,
}

impl ScoringProfile {
    /// Weight for a field, if the profile boosts it
    pub fn weight(&self, field: &str) -> Option<f64> {
        self.text.as_ref()?.weights.get(field).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggester {
    pub name: String,
    pub search_mode: String,
    pub source_fields: Vec<String>,
}

/// Query-time term equivalences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynonymMap {
    pub name: String,
    pub format: String,
    /// Newline separated rules
    pub synonyms: String,
}

impl SynonymMap {
    /// The map referenced by the unified index
    pub fn unified() -> Self {
        Self {
            name: SYNONYM_MAP_NAME.to_string(),
            format: "solr".to_string(),
            synonyms: SYNONYMS.join("\n"),
        }
    }
}

/// Complete index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    pub name: String,
    pub fields: Vec<SearchField>,
    #[serde(default)]
    pub scoring_profiles: Vec<ScoringProfile>,
    #[serde(default)]
    pub suggesters: Vec<Suggester>,
    #[serde(default)]
    pub analyzers: Vec<CustomAnalyzer>,
}

impl IndexSchema {
    pub fn field(&self, name: &str) -> Option<&SearchField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn key_field(&self) -> Option<&SearchField> {
        self.fields.iter().find(|f| f.key)
    }

    pub fn scoring_profile(&self, name: &str) -> Option<&ScoringProfile> {
        self.scoring_profiles.iter().find(|p| p.name == name)
    }
}

/// Schema of the unified twins/insights/rules index.
pub fn unified_index_schema(index_name: &str) -> IndexSchema {
    use FieldType::{String as Str, StringCollection as Strings};

    let fields = vec![
        SearchField::key(fields::KEY),
        SearchField::text(fields::TYPE, Str, KEYWORD_ANALYZER),
        SearchField::text(fields::IDS, Strings, LOWERCASE_KEYWORD_ANALYZER),
        // boosted over the Ids collection
        SearchField::text(fields::ID, Str, LOWERCASE_KEYWORD_ANALYZER).not_filterable(),
        SearchField::text(fields::LOCATION, Strings, KEYWORD_ANALYZER),
        SearchField::text(fields::LOCATION_NAMES, Strings, ENGLISH_ANALYZER),
        SearchField::text(fields::FEEDS, Strings, KEYWORD_ANALYZER),
        SearchField::text(fields::FED_BY, Strings, KEYWORD_ANALYZER),
        SearchField::text(fields::TENANT, Strings, KEYWORD_ANALYZER),
        SearchField::text(fields::MODEL_IDS, Strings, LOWERCASE_KEYWORD_ANALYZER),
        SearchField::text(fields::MODEL_NAMES, Strings, ENGLISH_ANALYZER),
        SearchField::text(fields::PRIMARY_MODEL_ID, Str, KEYWORD_ANALYZER),
        SearchField::text(fields::SITE_ID, Str, KEYWORD_ANALYZER),
        SearchField::text(fields::EXTERNAL_ID, Str, KEYWORD_ANALYZER),
        SearchField::text(fields::NAMES, Strings, ENGLISH_ANALYZER).with_synonyms(SYNONYM_MAP_NAME),
        SearchField::text(fields::SECONDARY_NAMES, Strings, ENGLISH_ANALYZER)
            .with_synonyms(SYNONYM_MAP_NAME),
        SearchField::text(fields::TAGS, Strings, LOWERCASE_KEYWORD_ANALYZER),
        SearchField::filterable_date(fields::EARLIEST),
        SearchField::filterable_date(fields::LATEST),
        SearchField::filterable_date(fields::INDEXED_DATE),
        SearchField {
            filterable: true,
            sortable: true,
            facetable: true,
            analyzer: Some(KEYWORD_ANALYZER.to_string()),
            synonym_maps: vec![SYNONYM_MAP_NAME.to_string()],
            ..SearchField::new(fields::CATEGORY, Str)
        },
        // magnitude scoring needs a filterable numeric field
        SearchField {
            filterable: true,
            sortable: true,
            ..SearchField::new(fields::IMPORTANCE, FieldType::Int32)
        },
    ];

    let weights = [
        (fields::NAMES, 9.0),
        (fields::SECONDARY_NAMES, 8.0),
        (fields::ID, 12.0),
        (fields::IDS, 11.0),
        (fields::MODEL_NAMES, 8.0),
        (fields::MODEL_IDS, 8.0),
        (fields::TAGS, 7.0),
        (fields::TYPE, 7.0),
        (fields::LOCATION, 5.0),
        (fields::LOCATION_NAMES, 5.0),
        (fields::FEEDS, 5.0),
        (fields::FED_BY, 5.0),
        (fields::CATEGORY, 5.0),
    ]
    .into_iter()
    .map(|(field, weight)| (field.to_string(), weight))
    .collect();

    IndexSchema {
        name: index_name.to_string(),
        fields,
        scoring_profiles: vec![ScoringProfile {
            name: SCORING_PROFILE_NAME.to_string(),
            text: Some(TextWeights { weights }),
            functions: vec![ScoringFunction::magnitude(
                fields::IMPORTANCE,
                1.5,
                0.0,
                100.0,
            )],
            function_aggregation: Some(FunctionAggregation::Sum),
        }],
        suggesters: vec![Suggester {
            name: SUGGESTER_NAME.to_string(),
            search_mode: "analyzingInfixMatching".to_string(),
            source_fields: vec![fields::NAMES.to_string()],
        }],
        analyzers: vec![CustomAnalyzer::lowercase_keyword()],
    }
}
