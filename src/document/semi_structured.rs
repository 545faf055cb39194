use crate::document::structured::StructuredTranslator;
use crate::document::unstructured::{self, UnstructuredTranslator};
use crate::document::{BackendDocument, DocumentTranslator, LogicalDocument};
use crate::error::Result;
use crate::index_descriptor::IndexDescriptor;

/// Union of `Structured` and `Unstructured`: declared fields behave
/// structured, undeclared fields behave unstructured. Represented as one
/// concrete translator holding both strategy objects and dispatching per
/// field, rather than via inheritance.
pub struct SemiStructuredTranslator<'a> {
    pub descriptor: &'a IndexDescriptor,
    structured: StructuredTranslator<'a>,
    unstructured: UnstructuredTranslator,
}

impl<'a> SemiStructuredTranslator<'a> {
    pub fn new(descriptor: &'a IndexDescriptor) -> Self {
        Self { descriptor, structured: StructuredTranslator::new(descriptor), unstructured: UnstructuredTranslator::new() }
    }

    /// Storage field candidates a filter clause against `field` might resolve
    /// to. Declared fields route through the structured naming scheme;
    /// undeclared fields fall back to the unstructured type-tag convention,
    /// since their runtime type is unknown ahead of time.
    pub fn filter_storage_candidates(&self, field: &str) -> Vec<String> {
        if let Some(declared) = self.descriptor.field(field) {
            match declared.storage_names() {
                crate::field::StorageNames::Plain(s) => vec![s],
                crate::field::StorageNames::Lexical(s) => vec![s],
                crate::field::StorageNames::Filter(s) => vec![s],
                crate::field::StorageNames::Both { filter, .. } => vec![filter],
            }
        } else {
            unstructured::candidate_storage_names(field)
        }
    }
}

impl<'a> DocumentTranslator for SemiStructuredTranslator<'a> {
    fn to_backend(&self, logical: &LogicalDocument) -> Result<BackendDocument> {
        let mut declared = LogicalDocument::new(logical.id.clone());
        let mut undeclared = LogicalDocument::new(logical.id.clone());
        for (name, value) in &logical.fields {
            if self.descriptor.field(name).is_some() {
                declared.fields.insert(name.clone(), value.clone());
            } else {
                undeclared.fields.insert(name.clone(), value.clone());
            }
        }
        declared.tensors = logical.tensors.clone();

        let mut backend = self.structured.to_backend(&declared)?;
        let extra = self.unstructured.to_backend(&undeclared)?;
        backend.fields.extend(extra.fields);
        Ok(backend)
    }

    fn to_logical(&self, backend: &BackendDocument, return_highlights: bool) -> Result<LogicalDocument> {
        let mut merged = self.structured.to_logical(backend, false)?;
        let extra = self.unstructured.to_logical(backend, false)?;
        merged.fields.extend(extra.fields);
        if return_highlights {
            merged.highlights = backend.fields.get("_highlights").cloned();
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DistanceMetric, FieldDescriptor, FieldFeature, FieldType, HnswConfig};
    use crate::index_descriptor::{IndexType, ModelSpec};
    use serde_json::Value;

    fn descriptor() -> IndexDescriptor {
        IndexDescriptor::new(
            "idx",
            IndexType::SemiStructured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            vec![FieldDescriptor::new("title", FieldType::Text, [FieldFeature::LexicalSearch]).unwrap()],
            vec![],
            0,
        )
        .unwrap()
    }

    #[test]
    fn routes_declared_and_undeclared_fields_independently() {
        let d = descriptor();
        let translator = SemiStructuredTranslator::new(&d);
        let mut doc = LogicalDocument::new("doc-1");
        doc.fields.insert("title".into(), Value::String("Shoe".into()));
        doc.fields.insert("color".into(), Value::String("red".into()));

        let backend = translator.to_backend(&doc).unwrap();
        assert!(backend.fields.contains_key("lexical_title"));
        assert!(backend.fields.contains_key("text__color"));

        let back = translator.to_logical(&backend, false).unwrap();
        assert!(back.equivalent(&doc));
    }

    #[test]
    fn filter_candidates_use_structured_scheme_for_declared_fields() {
        let d = descriptor();
        let translator = SemiStructuredTranslator::new(&d);
        assert_eq!(translator.filter_storage_candidates("title"), vec!["lexical_title".to_string()]);
        assert!(translator.filter_storage_candidates("color").contains(&"text__color".to_string()));
    }
}
