pub mod semi_structured;
pub mod structured;
pub mod unstructured;

pub use semi_structured::SemiStructuredTranslator;
pub use structured::StructuredTranslator;
pub use unstructured::UnstructuredTranslator;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Shared contract implemented by the three document translator variants.
/// `to_backend`/`to_logical` are the only two operations every variant must
/// support; a round-trip law binds them together: translating a logical
/// document to backend form and back must reproduce the original.
pub trait DocumentTranslator {
    fn to_backend(&self, logical: &LogicalDocument) -> Result<BackendDocument>;
    fn to_logical(&self, backend: &BackendDocument, return_highlights: bool) -> Result<LogicalDocument>;
}

/// Per-chunk tensor payload: an ordered sequence of chunk strings plus a
/// chunk-index-keyed embeddings mapping.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TensorChunks {
    pub chunks: Vec<String>,
    pub embeddings: HashMap<String, Vec<f32>>,
}

/// Logical document: field-name -> value, plus `_id` and an optional
/// per-tensor-field chunk/embedding submapping.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LogicalDocument {
    pub id: String,
    pub fields: HashMap<String, Value>,
    pub tensors: HashMap<String, TensorChunks>,
    /// Present only when translated back with `return_highlights = true`.
    pub highlights: Option<Value>,
}

impl LogicalDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), fields: HashMap::new(), tensors: HashMap::new(), highlights: None }
    }

    /// Equality used by the round-trip law, which ignores `_highlights`
    /// (its presence depends on the `return_highlights` flag, not on the
    /// document's content).
    pub fn equivalent(&self, other: &LogicalDocument) -> bool {
        self.id == other.id && self.fields == other.fields && self.tensors == other.tensors
    }
}

/// Backend document: storage-field-name -> value, produced deterministically
/// from a logical document given an `IndexDescriptor`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BackendDocument {
    pub id: String,
    pub fields: HashMap<String, Value>,
}

impl BackendDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), fields: HashMap::new() }
    }
}
