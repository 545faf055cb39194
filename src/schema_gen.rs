use std::fmt::Write as _;

use crate::field::{FieldFeature, StorageNames, SCORE_MODIFIERS_FIELD};
use crate::index_descriptor::IndexDescriptor;

/// Deterministically emits a backend schema document from an
/// `IndexDescriptor`: document fields block, score-modifier tensor, tensor
/// chunk/embedding pairs with HNSW parameters, default fieldset over lexical
/// fields, summaries, then rank profiles. Identical input produces
/// byte-identical output.
pub fn generate_schema(descriptor: &IndexDescriptor) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "schema {} {{", descriptor.schema_name);
    let _ = writeln!(out, "    document {} {{", descriptor.schema_name);
    write_id_field(&mut out);
    write_document_fields(&mut out, descriptor);
    if has_score_modifiers(descriptor) {
        write_score_modifier_tensor(&mut out);
    }
    for tf in &descriptor.tensor_fields {
        write_tensor_field(&mut out, descriptor, tf);
    }
    let _ = writeln!(out, "    }}");
    out.push('\n');

    let lexical = descriptor.lexical_field_names();
    if !lexical.is_empty() {
        write_default_fieldset(&mut out, &lexical);
    }

    write_summaries(&mut out, descriptor);
    write_rank_profiles(&mut out, descriptor);

    let _ = writeln!(out, "}}");
    out
}

fn has_score_modifiers(descriptor: &IndexDescriptor) -> bool {
    descriptor.fields.iter().any(|f| f.features.contains(&FieldFeature::ScoreModifier))
}

fn write_id_field(out: &mut String) {
    let _ = writeln!(out, "        field id type string {{");
    let _ = writeln!(out, "            indexing: summary | attribute");
    let _ = writeln!(out, "        }}");
}

fn write_document_fields(out: &mut String, descriptor: &IndexDescriptor) {
    for field in &descriptor.fields {
        match field.storage_names() {
            StorageNames::Plain(name) => {
                let _ = writeln!(out, "        field {name} type {} {{", field.field_type.backend_type());
                let _ = writeln!(out, "            indexing: summary");
                let _ = writeln!(out, "        }}");
            }
            StorageNames::Lexical(name) => {
                let _ = writeln!(out, "        field {name} type {} {{", field.field_type.backend_type());
                let _ = writeln!(out, "            indexing: summary | index");
                let _ = writeln!(out, "        }}");
            }
            StorageNames::Filter(name) => {
                let _ = writeln!(out, "        field {name} type {} {{", field.field_type.backend_type());
                let _ = writeln!(out, "            indexing: summary | attribute");
                let _ = writeln!(out, "            attribute: fast-search");
                let _ = writeln!(out, "        }}");
            }
            StorageNames::Both { lexical, filter } => {
                let _ = writeln!(out, "        field {lexical} type {} {{", field.field_type.backend_type());
                let _ = writeln!(out, "            indexing: summary | index");
                let _ = writeln!(out, "        }}");
                let _ = writeln!(out, "        field {filter} type {} {{", field.field_type.backend_type());
                let _ = writeln!(out, "            indexing: attribute");
                let _ = writeln!(out, "            attribute: fast-search");
                let _ = writeln!(out, "        }}");
            }
        }
    }
}

/// Per-document mapping from score-modifier field name to its numeric value,
/// populated by the Document Translator at feed time, consumed by the
/// `modifiers` rank profile's `query(marqo__mult_weights)`/`query(marqo__add_weights)`
/// reduction.
fn write_score_modifier_tensor(out: &mut String) {
    let _ = writeln!(out, "        field {SCORE_MODIFIERS_FIELD} type tensor<float>(p{{}}) {{");
    let _ = writeln!(out, "            indexing: attribute");
    let _ = writeln!(out, "        }}");
}

fn write_tensor_field(out: &mut String, descriptor: &IndexDescriptor, tf: &crate::index_descriptor::TensorField) {
    let _ = writeln!(out, "        field {} type array<string> {{", tf.chunks_field());
    let _ = writeln!(out, "            indexing: summary");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "        field {} type tensor<float>(p{{}}, x[{}]) {{", tf.embeddings_field(), tf.model_dim);
    let _ = writeln!(out, "            indexing: attribute | index");
    let _ = writeln!(out, "            attribute {{");
    let _ = writeln!(out, "                distance-metric: {}", descriptor.distance_metric.backend_name());
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "            index {{");
    let _ = writeln!(out, "                hnsw {{");
    let _ = writeln!(out, "                    max-links-per-node: {}", descriptor.hnsw.m);
    let _ = writeln!(out, "                    neighbors-to-explore-at-insert: {}", descriptor.hnsw.ef_construction);
    let _ = writeln!(out, "                }}");
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "        }}");
}

fn write_default_fieldset(out: &mut String, lexical: &[String]) {
    let _ = writeln!(out, "    fieldset default {{");
    let _ = writeln!(out, "        fields: {}", lexical.join(", "));
    let _ = writeln!(out, "    }}");
    out.push('\n');
}

fn write_summaries(out: &mut String, descriptor: &IndexDescriptor) {
    let _ = writeln!(out, "    document-summary all-non-vector-summary {{");
    let _ = writeln!(out, "        summary id {{}}");
    for field in &descriptor.fields {
        for name in summary_source_names(field) {
            let _ = writeln!(out, "        summary {name} {{}}");
        }
    }
    for tf in &descriptor.tensor_fields {
        let _ = writeln!(out, "        summary {} {{}}", tf.chunks_field());
    }
    let _ = writeln!(out, "    }}");
    out.push('\n');

    let _ = writeln!(out, "    document-summary all-vector-summary {{");
    let _ = writeln!(out, "        summary id {{}}");
    for tf in &descriptor.tensor_fields {
        let _ = writeln!(out, "        summary {} {{}}", tf.embeddings_field());
    }
    let _ = writeln!(out, "    }}");
    out.push('\n');
}

fn summary_source_names(field: &crate::field::FieldDescriptor) -> Vec<String> {
    match field.storage_names() {
        StorageNames::Plain(n) => vec![n],
        StorageNames::Lexical(n) => vec![n],
        StorageNames::Filter(n) => vec![n],
        StorageNames::Both { filter, .. } => vec![filter],
    }
}

fn bm25_expression(descriptor: &IndexDescriptor) -> String {
    descriptor.lexical_field_names().iter().map(|name| format!("bm25({name})")).collect::<Vec<_>>().join(" + ")
}

fn embedding_similarity_expression(descriptor: &IndexDescriptor) -> String {
    descriptor
        .tensor_fields
        .iter()
        .map(|tf| format!("if (query({}) > 0, closeness(field, {}), 0)", tf.name, tf.embeddings_field()))
        .collect::<Vec<_>>()
        .join(" + ")
}

fn write_modifiers_function(out: &mut String) {
    let _ = writeln!(out, "        inputs {{");
    let _ = writeln!(out, "            query(marqo__mult_weights) tensor<float>(p{{}})");
    let _ = writeln!(out, "            query(marqo__add_weights) tensor<float>(p{{}})");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "        function mult_prod() {{");
    let _ = writeln!(
        out,
        "            expression: if (count(query(marqo__mult_weights)) == 0, 1, reduce(query(marqo__mult_weights) * attribute({SCORE_MODIFIERS_FIELD}), prod))"
    );
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "        function add_sum() {{");
    let _ = writeln!(
        out,
        "            expression: reduce(query(marqo__add_weights) * attribute({SCORE_MODIFIERS_FIELD}), sum)"
    );
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "        function modify(score) {{");
    let _ = writeln!(out, "            expression: (mult_prod * score) + add_sum");
    let _ = writeln!(out, "        }}");
}

fn write_rank_profiles(out: &mut String, descriptor: &IndexDescriptor) {
    let has_lexical = !descriptor.lexical_field_names().is_empty();
    let has_tensor = !descriptor.tensor_fields.is_empty();
    let has_modifiers = has_score_modifiers(descriptor);

    if has_lexical {
        let _ = writeln!(out, "    rank-profile bm25 {{");
        let _ = writeln!(out, "        first-phase {{");
        let _ = writeln!(out, "            expression: {}", bm25_expression(descriptor));
        let _ = writeln!(out, "        }}");
        let _ = writeln!(out, "    }}");
        out.push('\n');
    }

    if has_tensor {
        let _ = writeln!(out, "    rank-profile embedding_similarity {{");
        let _ = writeln!(out, "        first-phase {{");
        let _ = writeln!(out, "            expression: {}", embedding_similarity_expression(descriptor));
        let _ = writeln!(out, "        }}");
        let _ = writeln!(out, "    }}");
        out.push('\n');
    }

    if has_modifiers {
        let _ = writeln!(out, "    rank-profile modifiers {{");
        write_modifiers_function(out);
        let _ = writeln!(out, "    }}");
        out.push('\n');

        if has_lexical {
            let _ = writeln!(out, "    rank-profile bm25_modifiers inherits modifiers {{");
            let _ = writeln!(out, "        first-phase {{");
            let _ = writeln!(out, "            expression: modify({})", bm25_expression(descriptor));
            let _ = writeln!(out, "        }}");
            let _ = writeln!(out, "    }}");
            out.push('\n');
        }
        if has_tensor {
            let _ = writeln!(out, "    rank-profile embedding_similarity_modifiers inherits modifiers {{");
            let _ = writeln!(out, "        first-phase {{");
            let _ = writeln!(out, "            expression: modify({})", embedding_similarity_expression(descriptor));
            let _ = writeln!(out, "        }}");
            let _ = writeln!(out, "    }}");
            out.push('\n');
        }
    }

    if has_lexical && has_tensor {
        write_hybrid_profiles(out, descriptor, has_modifiers);
    }
}

fn write_hybrid_profiles(out: &mut String, descriptor: &IndexDescriptor, has_modifiers: bool) {
    let _ = writeln!(out, "    rank-profile hybrid_custom_searcher {{");
    let _ = writeln!(out, "        first-phase {{");
    let _ = writeln!(out, "            expression: {}", bm25_expression(descriptor));
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
    out.push('\n');

    for suffix in ["", "_modifiers"] {
        if suffix == "_modifiers" && !has_modifiers {
            continue;
        }
        let inherits = if suffix.is_empty() { String::new() } else { " inherits modifiers".to_string() };
        let _ = writeln!(out, "    rank-profile hybrid_rrf{suffix}{inherits} {{");
        let _ = writeln!(out, "        first-phase {{");
        let _ = writeln!(out, "            expression: reduce(1 / (query(rrf_k) + rank_tensor_score) + 1 / (query(rrf_k) + rank_lexical_score), sum)");
        let _ = writeln!(out, "        }}");
        let _ = writeln!(out, "    }}");
        out.push('\n');

        let _ = writeln!(out, "    rank-profile hybrid_normalize_linear{suffix}{inherits} {{");
        let _ = writeln!(out, "        first-phase {{");
        let _ = writeln!(out, "            expression: (query(alpha) * normalized_tensor_score) + ((1 - query(alpha)) * normalized_lexical_score)");
        let _ = writeln!(out, "        }}");
        let _ = writeln!(out, "    }}");
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DistanceMetric, FieldDescriptor, FieldFeature, FieldType, HnswConfig};
    use crate::index_descriptor::{IndexType, ModelSpec, TensorField};

    fn full_feature_descriptor() -> IndexDescriptor {
        IndexDescriptor::new(
            "idx",
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig { m: 16, ef_construction: 100 },
            vec![FieldDescriptor::new("t", FieldType::Text, [FieldFeature::LexicalSearch, FieldFeature::Filter]).unwrap()],
            vec![TensorField { name: "t".into(), model_dim: 3 }],
            0,
        )
        .unwrap()
    }

    #[test]
    fn schema_determinism_scenario() {
        let d = full_feature_descriptor();
        let schema = generate_schema(&d);
        assert!(schema.contains("field lexical_t"));
        assert!(schema.contains("field filter_t"));
        assert!(schema.contains("field chunks_t"));
        assert!(schema.contains("field embeddings_t type tensor<float>(p{}, x[3])"));
        assert!(schema.contains("rank-profile bm25"));
        assert!(schema.contains("rank-profile embedding_similarity"));
    }

    #[test]
    fn generator_is_byte_identical_across_runs() {
        let d = full_feature_descriptor();
        assert_eq!(generate_schema(&d), generate_schema(&d));
    }

    #[test]
    fn bm25_expression_sums_lexical_fields_in_descriptor_order() {
        let d = IndexDescriptor::new(
            "idx",
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            vec![
                FieldDescriptor::new("title", FieldType::Text, [FieldFeature::LexicalSearch]).unwrap(),
                FieldDescriptor::new("body", FieldType::Text, [FieldFeature::LexicalSearch]).unwrap(),
            ],
            vec![],
            0,
        )
        .unwrap();
        assert_eq!(bm25_expression(&d), "bm25(lexical_title) + bm25(lexical_body)");
    }

    #[test]
    fn omits_embedding_similarity_profile_when_no_tensor_fields() {
        let d = IndexDescriptor::new(
            "idx",
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            vec![FieldDescriptor::new("title", FieldType::Text, [FieldFeature::LexicalSearch]).unwrap()],
            vec![],
            0,
        )
        .unwrap();
        let schema = generate_schema(&d);
        assert!(!schema.contains("rank-profile embedding_similarity"));
    }

    #[test]
    fn emits_hybrid_profiles_only_when_both_modalities_present() {
        let d = full_feature_descriptor();
        let schema = generate_schema(&d);
        assert!(schema.contains("rank-profile hybrid_rrf"));
        assert!(schema.contains("rank-profile hybrid_normalize_linear"));
    }
}
