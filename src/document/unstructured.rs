use serde_json::Value;

use crate::document::{BackendDocument, DocumentTranslator, LogicalDocument};
use crate::error::Result;

/// Type tags used to encode a field's runtime JSON shape into its storage
/// field name, so a single schemaless document type can serve many logical
/// shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeTag {
    Text,
    Bool,
    Long,
    Double,
    ArrayText,
    ArrayNumeric,
    Map,
}

impl TypeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Text => "text",
            TypeTag::Bool => "bool",
            TypeTag::Long => "long",
            TypeTag::Double => "double",
            TypeTag::ArrayText => "array_text",
            TypeTag::ArrayNumeric => "array_numeric",
            TypeTag::Map => "map",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "text" => TypeTag::Text,
            "bool" => TypeTag::Bool,
            "long" => TypeTag::Long,
            "double" => TypeTag::Double,
            "array_text" => TypeTag::ArrayText,
            "array_numeric" => TypeTag::ArrayNumeric,
            "map" => TypeTag::Map,
            _ => return None,
        })
    }

    pub fn all() -> &'static [TypeTag] {
        &[TypeTag::Text, TypeTag::Bool, TypeTag::Long, TypeTag::Double, TypeTag::ArrayText, TypeTag::ArrayNumeric, TypeTag::Map]
    }

    fn infer(value: &Value) -> TypeTag {
        match value {
            Value::String(_) => TypeTag::Text,
            Value::Bool(_) => TypeTag::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => TypeTag::Long,
            Value::Number(_) => TypeTag::Double,
            Value::Array(items) if items.iter().all(|v| v.is_string()) => TypeTag::ArrayText,
            Value::Array(_) => TypeTag::ArrayNumeric,
            Value::Object(_) => TypeTag::Map,
            Value::Null => TypeTag::Text,
        }
    }
}

const PREFIX_SEP: &str = "__";

pub fn storage_name(tag: TypeTag, field: &str) -> String {
    format!("{}{PREFIX_SEP}{}", tag.as_str(), field)
}

/// All storage names a logical field name might resolve to, since the
/// runtime type isn't known without a document to inspect. Used by filter
/// evaluation to build an OR across every type variant.
pub fn candidate_storage_names(field: &str) -> Vec<String> {
    TypeTag::all().iter().map(|t| storage_name(*t, field)).collect()
}

/// Splits a storage field name back into its type tag and logical name, if
/// it follows the unstructured naming convention.
pub fn parse_storage_name(storage: &str) -> Option<(TypeTag, &str)> {
    let (tag_str, name) = storage.split_once(PREFIX_SEP)?;
    TypeTag::from_str(tag_str).map(|t| (t, name))
}

/// Admits arbitrary top-level fields with no declared schema; types are
/// encoded in the storage field name.
#[derive(Default)]
pub struct UnstructuredTranslator;

impl UnstructuredTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentTranslator for UnstructuredTranslator {
    fn to_backend(&self, logical: &LogicalDocument) -> Result<BackendDocument> {
        let mut backend = BackendDocument::new(logical.id.clone());
        for (name, value) in &logical.fields {
            let tag = TypeTag::infer(value);
            backend.fields.insert(storage_name(tag, name), value.clone());
        }
        Ok(backend)
    }

    fn to_logical(&self, backend: &BackendDocument, return_highlights: bool) -> Result<LogicalDocument> {
        let mut logical = LogicalDocument::new(backend.id.clone());
        for (storage, value) in &backend.fields {
            if storage == "_highlights" {
                continue;
            }
            if let Some((_, name)) = parse_storage_name(storage) {
                logical.fields.insert(name.to_string(), value.clone());
            }
        }
        if return_highlights {
            logical.highlights = backend.fields.get("_highlights").cloned();
        }
        Ok(logical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_shapes() {
        let translator = UnstructuredTranslator::new();
        let mut doc = LogicalDocument::new("d1");
        doc.fields.insert("name".into(), Value::String("shoe".into()));
        doc.fields.insert("views".into(), Value::from(12));
        doc.fields.insert("rating".into(), Value::from(4.5));
        doc.fields.insert("tags".into(), Value::Array(vec![Value::String("a".into()), Value::String("b".into())]));

        let backend = translator.to_backend(&doc).unwrap();
        assert!(backend.fields.contains_key("text__name"));
        assert!(backend.fields.contains_key("long__views"));
        assert!(backend.fields.contains_key("double__rating"));
        assert!(backend.fields.contains_key("array_text__tags"));

        let back = translator.to_logical(&backend, false).unwrap();
        assert!(back.equivalent(&doc));
    }

    #[test]
    fn candidate_names_cover_every_tag() {
        let names = candidate_storage_names("color");
        assert_eq!(names.len(), TypeTag::all().len());
        assert!(names.contains(&"text__color".to_string()));
    }
}
