use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::field::{validate_field_name, DistanceMetric, FieldDescriptor, HnswConfig, StorageNames};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    Structured,
    Unstructured,
    SemiStructured,
}

/// A tensor field pairs a logical name with the model dimension used to
/// embed it, plus the two derived storage names.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TensorField {
    pub name: String,
    pub model_dim: u32,
}

impl TensorField {
    pub fn chunks_field(&self) -> String {
        format!("chunks_{}", self.name)
    }

    pub fn embeddings_field(&self) -> String {
        format!("embeddings_{}", self.name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub dimension: u32,
}

/// Cached, O(1) lookup tables built once at construction and never mutated
/// after publication.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FieldMaps {
    pub fields_by_name: HashMap<String, usize>,
    pub tensor_fields_by_name: HashMap<String, usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub index_type: IndexType,
    pub model: ModelSpec,
    pub distance_metric: DistanceMetric,
    pub hnsw: HnswConfig,
    pub fields: Vec<FieldDescriptor>,
    pub tensor_fields: Vec<TensorField>,
    pub version: u32,
    pub schema_name: String,
    #[serde(skip)]
    pub field_maps: FieldMaps,
}

impl IndexDescriptor {
    /// Builds an immutable descriptor, validating field/tensor-field
    /// invariants and populating the derived field maps exactly once.
    pub fn new(
        name: impl Into<String>,
        index_type: IndexType,
        model: ModelSpec,
        distance_metric: DistanceMetric,
        hnsw: HnswConfig,
        fields: Vec<FieldDescriptor>,
        tensor_fields: Vec<TensorField>,
        version: u32,
    ) -> Result<Self> {
        let name = name.into();
        validate_field_name(&name)?;

        let mut fields_by_name = HashMap::with_capacity(fields.len());
        for (idx, f) in fields.iter().enumerate() {
            if fields_by_name.insert(f.name.clone(), idx).is_some() {
                return Err(CoreError::InvalidFieldName(format!("duplicate field name '{}'", f.name)));
            }
        }

        let mut tensor_fields_by_name = HashMap::with_capacity(tensor_fields.len());
        for (idx, tf) in tensor_fields.iter().enumerate() {
            if tensor_fields_by_name.insert(tf.name.clone(), idx).is_some() {
                return Err(CoreError::InvalidFieldName(format!("duplicate tensor field name '{}'", tf.name)));
            }
            // Every tensor field names an existing field or a multimodal combination;
            // multimodal combinations are themselves declared as ordinary fields with
            // FieldType::MultimodalCombination, so this check is uniform.
            if !fields_by_name.contains_key(&tf.name) {
                return Err(CoreError::InvalidFieldName(format!(
                    "tensor field '{}' does not name an existing field or multimodal combination",
                    tf.name
                )));
            }
        }

        let schema_name = format!("{name}_{version}");

        Ok(Self {
            name,
            index_type,
            model,
            distance_metric,
            hnsw,
            fields,
            tensor_fields,
            version,
            schema_name,
            field_maps: FieldMaps { fields_by_name, tensor_fields_by_name },
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_maps.fields_by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn tensor_field(&self, name: &str) -> Option<&TensorField> {
        self.field_maps.tensor_fields_by_name.get(name).map(|&i| &self.tensor_fields[i])
    }

    /// Storage names of every field carrying the LexicalSearch feature, in
    /// descriptor order. Used by the Schema Generator's default fieldset and
    /// `bm25` rank profile.
    pub fn lexical_field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter_map(|f| match f.storage_names() {
                StorageNames::Lexical(name) => Some(name),
                StorageNames::Both { lexical, .. } => Some(lexical),
                _ => None,
            })
            .collect()
    }

    /// Returns a new descriptor with `version` incremented by one and the
    /// same fields; used by the Index-Setting Store to stamp a save.
    pub fn with_next_version(&self) -> Self {
        let mut cloned = self.clone();
        cloned.version += 1;
        cloned.schema_name = format!("{}_{}", cloned.name, cloned.version);
        cloned
    }

    /// Recomputes the derived lookup maps from `fields`/`tensor_fields`.
    /// `field_maps` is `#[serde(skip)]`, so anything deserialized from disk
    /// needs this before `field`/`tensor_field` lookups are valid again.
    pub fn rebuild_field_maps(&mut self) {
        self.field_maps.fields_by_name = self.fields.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();
        self.field_maps.tensor_fields_by_name = self.tensor_fields.iter().enumerate().map(|(i, t)| (t.name.clone(), i)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldFeature, FieldType};

    fn sample_fields() -> Vec<FieldDescriptor> {
        vec![FieldDescriptor::new("t", FieldType::Text, [FieldFeature::LexicalSearch, FieldFeature::Filter]).unwrap()]
    }

    #[test]
    fn unique_field_names_enforced() {
        let dup = vec![
            FieldDescriptor::new("t", FieldType::Text, []).unwrap(),
            FieldDescriptor::new("t", FieldType::Text, []).unwrap(),
        ];
        let err = IndexDescriptor::new(
            "idx",
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            dup,
            vec![],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidFieldName(_)));
    }

    #[test]
    fn tensor_field_must_name_existing_field() {
        let err = IndexDescriptor::new(
            "idx",
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            sample_fields(),
            vec![TensorField { name: "missing".into(), model_dim: 3 }],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidFieldName(_)));
    }

    #[test]
    fn schema_name_derived_from_name_and_version() {
        let d = IndexDescriptor::new(
            "idx",
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            sample_fields(),
            vec![TensorField { name: "t".into(), model_dim: 3 }],
            0,
        )
        .unwrap();
        assert_eq!(d.schema_name, "idx_0");
        assert_eq!(d.with_next_version().schema_name, "idx_1");
    }

    #[test]
    fn field_lookups_are_cached() {
        let d = IndexDescriptor::new(
            "idx",
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            sample_fields(),
            vec![TensorField { name: "t".into(), model_dim: 3 }],
            0,
        )
        .unwrap();
        assert!(d.field("t").is_some());
        assert!(d.tensor_field("t").is_some());
        assert!(d.field("nonexistent").is_none());
    }
}
