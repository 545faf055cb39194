use std::collections::HashMap;

use serde_json::Value;

use crate::document::{BackendDocument, DocumentTranslator, LogicalDocument, TensorChunks};
use crate::error::{CoreError, Result};
use crate::field::{FieldFeature, FieldType, StorageNames, SCORE_MODIFIERS_FIELD};
use crate::index_descriptor::IndexDescriptor;

/// Validates a JSON value against a declared field type. Float/Double accept
/// int literals; everything else must match exactly.
fn check_value_type(field_name: &str, field_type: FieldType, value: &Value) -> Result<()> {
    let ok = match field_type {
        FieldType::Text | FieldType::ImagePointer | FieldType::VideoPointer | FieldType::AudioPointer | FieldType::MultimodalCombination => value.is_string(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Int | FieldType::Long => value.is_i64() || value.is_u64(),
        FieldType::Float | FieldType::Double => value.is_f64() || value.is_i64() || value.is_u64(),
        FieldType::ArrayText => value.as_array().map(|a| a.iter().all(|v| v.is_string())).unwrap_or(false),
        FieldType::ArrayInt | FieldType::ArrayLong => value.as_array().map(|a| a.iter().all(|v| v.is_i64() || v.is_u64())).unwrap_or(false),
        FieldType::ArrayFloat | FieldType::ArrayDouble => {
            value.as_array().map(|a| a.iter().all(|v| v.is_f64() || v.is_i64() || v.is_u64())).unwrap_or(false)
        }
        FieldType::MapNumeric => value.as_object().map(|o| o.values().all(|v| v.is_f64() || v.is_i64() || v.is_u64())).unwrap_or(false),
        FieldType::CustomVector => value.as_array().map(|a| a.iter().all(|v| v.is_f64() || v.is_i64() || v.is_u64())).unwrap_or(false),
    };
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidDataType(format!(
            "field '{field_name}' expects {field_type:?}, got {value}"
        )))
    }
}

/// Translates logical documents against a fully declared schema: every field
/// is validated against the index's type map and routed to its derived
/// storage name(s).
pub struct StructuredTranslator<'a> {
    pub descriptor: &'a IndexDescriptor,
}

impl<'a> StructuredTranslator<'a> {
    pub fn new(descriptor: &'a IndexDescriptor) -> Self {
        Self { descriptor }
    }

    fn embeddings_to_value(embeddings: &HashMap<String, Vec<f32>>) -> Value {
        let obj: serde_json::Map<String, Value> = embeddings
            .iter()
            .map(|(k, v)| (k.clone(), Value::Array(v.iter().map(|f| Value::from(*f as f64)).collect())))
            .collect();
        Value::Object(obj)
    }

    fn embeddings_from_value(value: &Value) -> HashMap<String, Vec<f32>> {
        value
            .as_object()
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| {
                        let vec = v.as_array().map(|a| a.iter().filter_map(|x| x.as_f64()).map(|f| f as f32).collect()).unwrap_or_default();
                        (k.clone(), vec)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<'a> DocumentTranslator for StructuredTranslator<'a> {
    fn to_backend(&self, logical: &LogicalDocument) -> Result<BackendDocument> {
        let mut backend = BackendDocument::new(logical.id.clone());
        let mut score_modifiers = serde_json::Map::new();
        for (name, value) in &logical.fields {
            let field = self
                .descriptor
                .field(name)
                .ok_or_else(|| CoreError::InvalidFieldName(format!("unknown field '{name}' for index '{}'", self.descriptor.name)))?;
            check_value_type(name, field.field_type, value)?;
            if field.features.contains(&FieldFeature::ScoreModifier) {
                if let Some(weight) = value.as_f64() {
                    score_modifiers.insert(field.name.clone(), Value::from(weight));
                }
            }
            match field.storage_names() {
                StorageNames::Plain(storage) => {
                    backend.fields.insert(storage, value.clone());
                }
                StorageNames::Lexical(storage) => {
                    backend.fields.insert(storage, value.clone());
                }
                StorageNames::Filter(storage) => {
                    backend.fields.insert(storage, value.clone());
                }
                StorageNames::Both { lexical, filter } => {
                    backend.fields.insert(lexical, value.clone());
                    backend.fields.insert(filter, value.clone());
                }
            }
        }
        if !score_modifiers.is_empty() {
            backend.fields.insert(SCORE_MODIFIERS_FIELD.to_string(), Value::Object(score_modifiers));
        }
        for tf in &self.descriptor.tensor_fields {
            if let Some(chunks) = logical.tensors.get(&tf.name) {
                backend.fields.insert(tf.chunks_field(), Value::Array(chunks.chunks.iter().cloned().map(Value::String).collect()));
                backend.fields.insert(tf.embeddings_field(), Self::embeddings_to_value(&chunks.embeddings));
            }
        }
        Ok(backend)
    }

    fn to_logical(&self, backend: &BackendDocument, return_highlights: bool) -> Result<LogicalDocument> {
        let mut logical = LogicalDocument::new(backend.id.clone());
        for field in &self.descriptor.fields {
            match field.storage_names() {
                StorageNames::Plain(storage) => {
                    if let Some(v) = backend.fields.get(&storage) {
                        logical.fields.insert(field.name.clone(), v.clone());
                    }
                }
                StorageNames::Lexical(storage) => {
                    if let Some(v) = backend.fields.get(&storage) {
                        logical.fields.insert(field.name.clone(), v.clone());
                    }
                }
                StorageNames::Filter(storage) => {
                    if let Some(v) = backend.fields.get(&storage) {
                        logical.fields.insert(field.name.clone(), v.clone());
                    }
                }
                StorageNames::Both { lexical, filter: _ } => {
                    if let Some(v) = backend.fields.get(&lexical) {
                        logical.fields.insert(field.name.clone(), v.clone());
                    }
                }
            }
        }
        for tf in &self.descriptor.tensor_fields {
            let chunks = backend.fields.get(&tf.chunks_field());
            let embeddings = backend.fields.get(&tf.embeddings_field());
            if chunks.is_some() || embeddings.is_some() {
                let chunk_list: Vec<String> = chunks.and_then(|v| v.as_array()).map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default();
                let embeddings_map = embeddings.map(Self::embeddings_from_value).unwrap_or_default();
                logical.tensors.insert(tf.name.clone(), TensorChunks { chunks: chunk_list, embeddings: embeddings_map });
            }
        }
        if return_highlights {
            logical.highlights = backend.fields.get("_highlights").cloned();
        }
        Ok(logical)
    }
}
