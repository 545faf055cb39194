use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Reserved prefix that may not appear in user-supplied field names.
pub const RESERVED_PREFIX: &str = "marqo__";

/// Storage name of the document-side score-modifiers tensor: a `p{}`-keyed
/// mapping from ScoreModifier field name to its numeric value, written by
/// the Document Translator and read by the `modifiers` rank profile.
pub const SCORE_MODIFIERS_FIELD: &str = "marqo__score_modifiers";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Bool,
    Int,
    Long,
    Float,
    Double,
    ArrayText,
    ArrayInt,
    ArrayLong,
    ArrayFloat,
    ArrayDouble,
    ImagePointer,
    MultimodalCombination,
    VideoPointer,
    AudioPointer,
    MapNumeric,
    CustomVector,
}

impl FieldType {
    /// Backend storage type for this field, used by the schema generator.
    /// Total over the enumeration; callers that hit an unmapped variant have
    /// a broken invariant (`Internal`), which cannot happen as long as this
    /// match stays exhaustive.
    pub fn backend_type(self) -> &'static str {
        match self {
            FieldType::Text => "string",
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Long => "long",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::ArrayText => "array<string>",
            FieldType::ArrayInt => "array<int>",
            FieldType::ArrayLong => "array<long>",
            FieldType::ArrayFloat => "array<float>",
            FieldType::ArrayDouble => "array<double>",
            FieldType::ImagePointer => "string",
            FieldType::VideoPointer => "string",
            FieldType::AudioPointer => "string",
            FieldType::MultimodalCombination => "string",
            FieldType::MapNumeric => "map<string, float>",
            FieldType::CustomVector => "tensor<float>(x[0])",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Int | FieldType::Long | FieldType::Float | FieldType::Double
        )
    }

    /// Float score-modifier fields accept int literals on the way in;
    /// everything else must match exactly.
    pub fn accepts(self, other: FieldType) -> bool {
        self == other || (self == FieldType::Float && other == FieldType::Int)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldFeature {
    LexicalSearch,
    Filter,
    ScoreModifier,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub features: HashSet<FieldFeature>,
}

/// The derived, backend-facing storage name(s) a logical field maps to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageNames {
    /// Neither LexicalSearch nor Filter: a plain summary field.
    Plain(String),
    /// LexicalSearch only: `lexical_<name>`.
    Lexical(String),
    /// Filter only: `filter_<name>`, also used as the summary source.
    Filter(String),
    /// Both features: lexical storage plus a filter-backed summary source.
    Both { lexical: String, filter: String },
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType, features: impl IntoIterator<Item = FieldFeature>) -> Result<Self> {
        let name = name.into();
        validate_field_name(&name)?;
        let features: HashSet<FieldFeature> = features.into_iter().collect();
        if features.contains(&FieldFeature::ScoreModifier) && !field_type.is_numeric() {
            return Err(CoreError::InvalidDataType(format!(
                "field '{name}' has ScoreModifier feature but type {field_type:?} is not numeric"
            )));
        }
        Ok(Self { name, field_type, features })
    }

    /// Derived storage names: LexicalSearch -> `lexical_<name>`, Filter ->
    /// `filter_<name>`; neither -> a plain summary field; both -> lexical
    /// storage with the filter field also serving as summary source.
    pub fn storage_names(&self) -> StorageNames {
        let has_lex = self.features.contains(&FieldFeature::LexicalSearch);
        let has_filter = self.features.contains(&FieldFeature::Filter);
        match (has_lex, has_filter) {
            (true, true) => StorageNames::Both {
                lexical: format!("lexical_{}", self.name),
                filter: format!("filter_{}", self.name),
            },
            (true, false) => StorageNames::Lexical(format!("lexical_{}", self.name)),
            (false, true) => StorageNames::Filter(format!("filter_{}", self.name)),
            (false, false) => StorageNames::Plain(self.name.clone()),
        }
    }
}

pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidFieldName("field name must not be empty".into()));
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err(CoreError::InvalidFieldName(format!(
            "field name '{name}' uses the reserved '{RESERVED_PREFIX}' prefix"
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    Euclidean,
    Angular,
    DotProduct,
    PrenormalizedAngular,
    Geodegrees,
    Hamming,
}

impl DistanceMetric {
    pub fn backend_name(self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Angular => "angular",
            DistanceMetric::DotProduct => "dotproduct",
            DistanceMetric::PrenormalizedAngular => "prenormalized-angular",
            DistanceMetric::Geodegrees => "geodegrees",
            DistanceMetric::Hamming => "hamming",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HnswConfig {
    pub m: u32,
    pub ef_construction: u32,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self { m: 16, ef_construction: 100 }
    }
}
