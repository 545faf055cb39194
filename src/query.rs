use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::filter::{Bound, FilterNode, FilterValue};
use crate::index_descriptor::IndexDescriptor;

/// Additive/multiplicative score-modifier weights, keyed by the numeric
/// field supplying the modifier value
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScoreModifiers {
    pub multiply: Vec<(String, f32)>,
    pub add: Vec<(String, f32)>,
}

#[derive(Clone, Debug)]
pub struct TensorQuery {
    pub vector: Vec<f32>,
    pub ef_search: Option<u32>,
    pub approximate: bool,
    pub searchable_attributes: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct LexicalQuery {
    pub or_phrases: Vec<String>,
    pub and_phrases: Vec<String>,
    pub searchable_attributes: Option<Vec<String>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetrievalMethod {
    LexicalThenTensor,
    TensorThenLexical,
    Parallel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankingMethod {
    Rrf,
    NormalizeLinear,
}

#[derive(Clone, Debug)]
pub struct HybridParams {
    pub retrieval_method: RetrievalMethod,
    pub ranking_method: RankingMethod,
    pub alpha: f32,
    pub rrf_k: u32,
    pub tensor_score_modifiers: Option<ScoreModifiers>,
    pub lexical_score_modifiers: Option<ScoreModifiers>,
}

#[derive(Clone, Debug)]
pub struct QueryCommon {
    pub index_name: String,
    pub limit: u32,
    pub offset: Option<u32>,
    pub attributes_to_retrieve: Option<Vec<String>>,
    pub filter: Option<FilterNode>,
    pub score_modifiers: Option<ScoreModifiers>,
    pub expose_facets: bool,
}

/// Logical query: a tagged variant over Tensor, Lexical, and Hybrid,
/// each carrying the common fields every variant shares.
#[derive(Clone, Debug)]
pub enum LogicalQuery {
    Tensor { common: QueryCommon, tensor: TensorQuery },
    Lexical { common: QueryCommon, lexical: LexicalQuery },
    Hybrid { common: QueryCommon, tensor: TensorQuery, lexical: LexicalQuery, hybrid: HybridParams },
}

/// Backend query document produced by the compiler: YQL text, rank-profile
/// selection, and query-feature inputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendQueryPlan {
    pub yql: String,
    pub rank_profile: String,
    pub hits: u32,
    pub offset: u32,
    pub attributes_to_retrieve: Option<Vec<String>>,
    pub query_features: BTreeMap<String, Value>,
    pub searchable_attributes: Option<Vec<String>>,
}

/// Translates a logical query plus its `IndexDescriptor` into a backend
/// query plan. Hybrid is matched first because its type is
/// a subtype of both tensor and lexical -- modeled here as a single
/// dispatch match rather than an inheritance hierarchy.
pub fn compile(query: &LogicalQuery, descriptor: &IndexDescriptor) -> Result<BackendQueryPlan> {
    match query {
        LogicalQuery::Hybrid { common, tensor, lexical, hybrid } => compile_hybrid(common, tensor, lexical, hybrid, descriptor),
        LogicalQuery::Tensor { common, tensor } => compile_tensor(common, tensor, descriptor),
        LogicalQuery::Lexical { common, lexical } => compile_lexical(common, lexical, descriptor),
    }
}

fn validate_attribute(descriptor: &IndexDescriptor, name: &str) -> Result<()> {
    if name == "id" {
        return Ok(());
    }
    if descriptor.field(name).is_some() || descriptor.tensor_field(name).is_some() {
        return Ok(());
    }
    if matches!(descriptor.index_type, crate::index_descriptor::IndexType::Unstructured) {
        return Ok(());
    }
    Err(CoreError::InvalidFieldName(format!("'{name}' is not a field of index '{}'", descriptor.name)))
}

/// Expands attributes-to-retrieve: always includes `id`; for each
/// retained tensor field also includes its chunk storage field.
fn expand_attributes(common: &QueryCommon, descriptor: &IndexDescriptor) -> Result<Option<Vec<String>>> {
    let Some(requested) = common.attributes_to_retrieve.clone() else {
        return Ok(None);
    };
    for name in &requested {
        validate_attribute(descriptor, name)?;
    }
    let mut out = Vec::with_capacity(requested.len() + 1 + descriptor.tensor_fields.len());
    out.push("id".to_string());
    for name in &requested {
        if name != "id" {
            out.push(name.clone());
        }
    }
    for tf in &descriptor.tensor_fields {
        if requested.iter().any(|r| r == &tf.name) {
            out.push(tf.chunks_field());
        }
    }
    Ok(Some(out))
}

fn filter_value_literal(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn range_bound_expr(field: &str, lo: &Bound, hi: &Bound) -> String {
    let lo_op = if lo.inclusive { ">=" } else { ">" };
    let hi_op = if hi.inclusive { "<=" } else { "<" };
    format!("({field} {lo_op} {} and {field} {hi_op} {})", lo.value, hi.value)
}

/// Serializes a filter tree to a YQL-flavored boolean expression. Not a
/// literal Vespa grammar reproduction -- the backend's actual grammar is an
/// external concern -- but deterministic and structurally faithful to the
/// tree it compiles from.
pub fn filter_to_yql(node: &FilterNode) -> String {
    match node {
        FilterNode::And(l, r) => format!("({} and {})", filter_to_yql(l), filter_to_yql(r)),
        FilterNode::Or(l, r) => format!("({} or {})", filter_to_yql(l), filter_to_yql(r)),
        FilterNode::Not(inner) => format!("!({})", filter_to_yql(inner)),
        FilterNode::Term { field, value } => match value {
            FilterValue::Equals(v) => format!("{field} contains {}", filter_value_literal(v)),
            FilterValue::Exists => format!("{field} matches \".*\""),
            FilterValue::Range { lo, hi } => range_bound_expr(field, lo, hi),
        },
    }
}

fn validate_filter_fields(descriptor: &IndexDescriptor, node: &FilterNode) -> Result<()> {
    match node {
        FilterNode::And(l, r) | FilterNode::Or(l, r) => {
            validate_filter_fields(descriptor, l)?;
            validate_filter_fields(descriptor, r)
        }
        FilterNode::Not(inner) => validate_filter_fields(descriptor, inner),
        FilterNode::Term { field, .. } => validate_attribute(descriptor, field),
    }
}

/// Merges `pairs` into the mapped tensor (`tensor<float>(p{})`, fed as a flat
/// JSON object of field name -> weight) already accumulated under `key`,
/// creating it on first use. Hybrid queries can call this twice for the same
/// key (tensor-side and lexical-side modifiers), so entries must merge rather
/// than overwrite.
fn merge_weight_map(features: &mut BTreeMap<String, Value>, key: &str, pairs: &[(String, f32)]) {
    let entry = features.entry(key.to_string()).or_insert_with(|| Value::Object(serde_json::Map::new()));
    let Value::Object(map) = entry else { unreachable!("query feature {key} is always inserted as an object") };
    for (field, weight) in pairs {
        map.insert(field.clone(), Value::from(*weight));
    }
}

fn apply_score_modifiers(features: &mut BTreeMap<String, Value>, modifiers: &ScoreModifiers) {
    if !modifiers.multiply.is_empty() {
        merge_weight_map(features, "query(marqo__mult_weights)", &modifiers.multiply);
    }
    if !modifiers.add.is_empty() {
        merge_weight_map(features, "query(marqo__add_weights)", &modifiers.add);
    }
}

fn base_where(source: &str, filter: &Option<FilterNode>, match_expr: &str) -> String {
    match filter {
        Some(f) => format!("select * from sources {source} where {match_expr} and {}", filter_to_yql(f)),
        None => format!("select * from sources {source} where {match_expr}"),
    }
}

/// Builds the synthetic existence-restriction filter a searchable-attributes
/// list compiles to: an OR of an existence clause per named attribute, so a
/// document only matches if at least one of the restricted attributes is
/// present on it.
fn attrs_restriction_filter(attrs: &[String]) -> Option<FilterNode> {
    attrs
        .iter()
        .cloned()
        .map(|field| FilterNode::Term { field, value: FilterValue::Exists })
        .reduce(FilterNode::or)
}

/// Lexical searchable attributes constrain the default fieldset (per the
/// compiler dispatch rules): with a restriction, the or-phrases are matched
/// against each restricted field's lexical storage name directly rather than
/// the schema-wide `default` fieldset.
fn or_phrases_match_expr(or_phrases: &[String], searchable_attributes: Option<&[String]>, descriptor: &IndexDescriptor) -> String {
    let phrase = or_phrases.join(" ");
    let Some(attrs) = searchable_attributes else {
        return "userInput(@query)".to_string();
    };
    let lexical_fields: Vec<String> = attrs
        .iter()
        .filter_map(|name| descriptor.field(name))
        .filter_map(|f| match f.storage_names() {
            crate::field::StorageNames::Lexical(n) => Some(n),
            crate::field::StorageNames::Both { lexical, .. } => Some(lexical),
            _ => None,
        })
        .collect();
    if lexical_fields.is_empty() {
        return "userInput(@query)".to_string();
    }
    let clauses: Vec<String> = lexical_fields.iter().map(|f| format!("{f} contains {}", filter_value_literal(&phrase))).collect();
    format!("({})", clauses.join(" or "))
}

fn compile_tensor(common: &QueryCommon, tensor: &TensorQuery, descriptor: &IndexDescriptor) -> Result<BackendQueryPlan> {
    if let Some(f) = &common.filter {
        validate_filter_fields(descriptor, f)?;
    }
    if let Some(attrs) = &tensor.searchable_attributes {
        for a in attrs {
            validate_attribute(descriptor, a)?;
        }
    }

    let selected: Vec<&str> = match &tensor.searchable_attributes {
        Some(attrs) => attrs.iter().map(String::as_str).collect(),
        None => descriptor.tensor_fields.iter().map(|tf| tf.name.as_str()).collect(),
    };

    let mut features: BTreeMap<String, Value> = BTreeMap::new();
    features.insert("query(embedding)".to_string(), Value::Array(tensor.vector.iter().map(|f| Value::from(*f)).collect()));
    for tf in &descriptor.tensor_fields {
        let weight = if selected.contains(&tf.name.as_str()) { 1.0 } else { 0.0 };
        features.insert(format!("query({})", tf.name), Value::from(weight));
    }
    if let Some(ef) = tensor.ef_search {
        features.insert("ranking.matching.approximateThreshold".to_string(), Value::from(ef));
    }
    if let Some(modifiers) = &common.score_modifiers {
        apply_score_modifiers(&mut features, modifiers);
    }

    let nn_clause = if tensor.approximate { "nearestNeighbor(embedding, embedding)" } else { "{approximate:false}nearestNeighbor(embedding, embedding)" };
    let attrs_filter = tensor.searchable_attributes.as_deref().and_then(attrs_restriction_filter);
    let combined_filter = crate::filter::wrap_with_attributes_filter(attrs_filter, common.filter.clone());
    let yql = base_where(&descriptor.schema_name, &combined_filter, nn_clause);
    let rank_profile = if common.score_modifiers.is_some() { "embedding_similarity_modifiers" } else { "embedding_similarity" };

    Ok(BackendQueryPlan {
        yql,
        rank_profile: rank_profile.to_string(),
        hits: common.limit + common.offset.unwrap_or(0),
        offset: common.offset.unwrap_or(0),
        attributes_to_retrieve: expand_attributes(common, descriptor)?,
        query_features: features,
        searchable_attributes: tensor.searchable_attributes.clone(),
    })
}

fn compile_lexical(common: &QueryCommon, lexical: &LexicalQuery, descriptor: &IndexDescriptor) -> Result<BackendQueryPlan> {
    if let Some(f) = &common.filter {
        validate_filter_fields(descriptor, f)?;
    }
    if let Some(attrs) = &lexical.searchable_attributes {
        for a in attrs {
            validate_attribute(descriptor, a)?;
        }
    }

    let mut features: BTreeMap<String, Value> = BTreeMap::new();
    if !lexical.or_phrases.is_empty() {
        features.insert("query".to_string(), Value::String(lexical.or_phrases.join(" ")));
    }
    if let Some(modifiers) = &common.score_modifiers {
        apply_score_modifiers(&mut features, modifiers);
    }

    let mut match_parts: Vec<String> = Vec::new();
    if !lexical.or_phrases.is_empty() {
        match_parts.push(or_phrases_match_expr(&lexical.or_phrases, lexical.searchable_attributes.as_deref(), descriptor));
    }
    for phrase in &lexical.and_phrases {
        match_parts.push(format!("default contains {}", filter_value_literal(phrase)));
    }
    let match_expr = if match_parts.is_empty() { "true".to_string() } else { match_parts.join(" and ") };

    let yql = base_where(&descriptor.schema_name, &common.filter, &match_expr);
    let rank_profile = if common.score_modifiers.is_some() { "bm25_modifiers" } else { "bm25" };

    Ok(BackendQueryPlan {
        yql,
        rank_profile: rank_profile.to_string(),
        hits: common.limit + common.offset.unwrap_or(0),
        offset: common.offset.unwrap_or(0),
        attributes_to_retrieve: expand_attributes(common, descriptor)?,
        query_features: features,
        searchable_attributes: lexical.searchable_attributes.clone(),
    })
}

fn compile_hybrid(common: &QueryCommon, tensor: &TensorQuery, lexical: &LexicalQuery, hybrid: &HybridParams, descriptor: &IndexDescriptor) -> Result<BackendQueryPlan> {
    if let Some(f) = &common.filter {
        validate_filter_fields(descriptor, f)?;
    }

    let mut features: BTreeMap<String, Value> = BTreeMap::new();
    features.insert("query(embedding)".to_string(), Value::Array(tensor.vector.iter().map(|f| Value::from(*f)).collect()));
    if !lexical.or_phrases.is_empty() {
        features.insert("query".to_string(), Value::String(lexical.or_phrases.join(" ")));
    }
    match hybrid.ranking_method {
        RankingMethod::Rrf => {
            features.insert("query(rrf_k)".to_string(), Value::from(hybrid.rrf_k));
        }
        RankingMethod::NormalizeLinear => {
            features.insert("query(alpha)".to_string(), Value::from(hybrid.alpha));
        }
    }
    if let Some(m) = &hybrid.tensor_score_modifiers {
        apply_score_modifiers(&mut features, m);
    }
    if let Some(m) = &hybrid.lexical_score_modifiers {
        apply_score_modifiers(&mut features, m);
    }

    let retrieval_marker = match hybrid.retrieval_method {
        RetrievalMethod::LexicalThenTensor => "lexical_then_tensor",
        RetrievalMethod::TensorThenLexical => "tensor_then_lexical",
        RetrievalMethod::Parallel => "parallel",
    };
    features.insert("hybrid.retrieval".to_string(), Value::String(retrieval_marker.to_string()));

    let match_expr = "userInput(@query) or {approximate:true}nearestNeighbor(embedding, embedding)";
    let yql = base_where(&descriptor.schema_name, &common.filter, match_expr);

    let modifiers_suffix = if hybrid.tensor_score_modifiers.is_some() || hybrid.lexical_score_modifiers.is_some() || common.score_modifiers.is_some() { "_modifiers" } else { "" };
    let rank_profile = match hybrid.ranking_method {
        RankingMethod::Rrf => format!("hybrid_rrf{modifiers_suffix}"),
        RankingMethod::NormalizeLinear => format!("hybrid_normalize_linear{modifiers_suffix}"),
    };

    Ok(BackendQueryPlan {
        yql,
        rank_profile,
        hits: common.limit + common.offset.unwrap_or(0),
        offset: common.offset.unwrap_or(0),
        attributes_to_retrieve: expand_attributes(common, descriptor)?,
        query_features: features,
        searchable_attributes: lexical.searchable_attributes.clone().or_else(|| tensor.searchable_attributes.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DistanceMetric, FieldDescriptor, FieldFeature, FieldType, HnswConfig};
    use crate::filter::parse;
    use crate::index_descriptor::{IndexType, ModelSpec, TensorField};

    fn descriptor() -> IndexDescriptor {
        IndexDescriptor::new(
            "products",
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            vec![FieldDescriptor::new("title", FieldType::Text, [FieldFeature::LexicalSearch, FieldFeature::Filter]).unwrap()],
            vec![TensorField { name: "title".into(), model_dim: 3 }],
            0,
        )
        .unwrap()
    }

    fn common() -> QueryCommon {
        QueryCommon { index_name: "products".into(), limit: 10, offset: Some(5), attributes_to_retrieve: None, filter: None, score_modifiers: None, expose_facets: false }
    }

    #[test]
    fn tensor_query_selects_embedding_similarity_profile() {
        let d = descriptor();
        let q = LogicalQuery::Tensor {
            common: common(),
            tensor: TensorQuery { vector: vec![0.1, 0.2, 0.3], ef_search: None, approximate: true, searchable_attributes: None },
        };
        let plan = compile(&q, &d).unwrap();
        assert_eq!(plan.rank_profile, "embedding_similarity");
        assert_eq!(plan.hits, 15);
        assert_eq!(plan.offset, 5);
        assert_eq!(plan.query_features.get("query(title)"), Some(&Value::from(1.0)));
    }

    #[test]
    fn lexical_query_selects_bm25_profile() {
        let d = descriptor();
        let q = LogicalQuery::Lexical {
            common: common(),
            lexical: LexicalQuery { or_phrases: vec!["running shoes".into()], and_phrases: vec![], searchable_attributes: None },
        };
        let plan = compile(&q, &d).unwrap();
        assert_eq!(plan.rank_profile, "bm25");
        assert!(plan.yql.contains("userInput"));
    }

    #[test]
    fn hybrid_rrf_sets_k_feature() {
        let d = descriptor();
        let q = LogicalQuery::Hybrid {
            common: common(),
            tensor: TensorQuery { vector: vec![0.1, 0.2, 0.3], ef_search: None, approximate: true, searchable_attributes: None },
            lexical: LexicalQuery { or_phrases: vec!["shoe".into()], and_phrases: vec![], searchable_attributes: None },
            hybrid: HybridParams { retrieval_method: RetrievalMethod::Parallel, ranking_method: RankingMethod::Rrf, alpha: 0.5, rrf_k: 60, tensor_score_modifiers: None, lexical_score_modifiers: None },
        };
        let plan = compile(&q, &d).unwrap();
        assert_eq!(plan.rank_profile, "hybrid_rrf");
        assert_eq!(plan.query_features.get("query(rrf_k)"), Some(&Value::from(60)));
    }

    #[test]
    fn score_modifiers_compile_to_mapped_weight_tensors() {
        let d = descriptor();
        let mut c = common();
        c.score_modifiers = Some(ScoreModifiers { multiply: vec![("title".into(), 2.0)], add: vec![("title".into(), 1.5)] });
        let q = LogicalQuery::Lexical { common: c, lexical: LexicalQuery { or_phrases: vec!["shoe".into()], ..Default::default() } };
        let plan = compile(&q, &d).unwrap();
        assert_eq!(plan.rank_profile, "bm25_modifiers");
        assert_eq!(
            plan.query_features.get("query(marqo__mult_weights)"),
            Some(&serde_json::json!({"title": 2.0}))
        );
        assert_eq!(
            plan.query_features.get("query(marqo__add_weights)"),
            Some(&serde_json::json!({"title": 1.5}))
        );
    }

    #[test]
    fn hybrid_score_modifiers_merge_tensor_and_lexical_sides() {
        let d = descriptor();
        let q = LogicalQuery::Hybrid {
            common: common(),
            tensor: TensorQuery { vector: vec![0.1, 0.2, 0.3], ef_search: None, approximate: true, searchable_attributes: None },
            lexical: LexicalQuery { or_phrases: vec!["shoe".into()], and_phrases: vec![], searchable_attributes: None },
            hybrid: HybridParams {
                retrieval_method: RetrievalMethod::Parallel,
                ranking_method: RankingMethod::Rrf,
                alpha: 0.5,
                rrf_k: 60,
                tensor_score_modifiers: Some(ScoreModifiers { multiply: vec![("title".into(), 2.0)], add: vec![] }),
                lexical_score_modifiers: Some(ScoreModifiers { multiply: vec![("brand".into(), 3.0)], add: vec![] }),
            },
        };
        let plan = compile(&q, &d).unwrap();
        assert_eq!(plan.rank_profile, "hybrid_rrf_modifiers");
        assert_eq!(
            plan.query_features.get("query(marqo__mult_weights)"),
            Some(&serde_json::json!({"title": 2.0, "brand": 3.0}))
        );
    }

    #[test]
    fn rejects_unknown_attribute() {
        let d = descriptor();
        let mut c = common();
        c.attributes_to_retrieve = Some(vec!["nonexistent".into()]);
        let q = LogicalQuery::Lexical { common: c, lexical: LexicalQuery::default() };
        let err = compile(&q, &d).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFieldName(_)));
    }

    #[test]
    fn attributes_to_retrieve_always_includes_id_and_chunk_field() {
        let d = descriptor();
        let mut c = common();
        c.attributes_to_retrieve = Some(vec!["title".into()]);
        let q = LogicalQuery::Lexical { common: c, lexical: LexicalQuery::default() };
        let plan = compile(&q, &d).unwrap();
        let attrs = plan.attributes_to_retrieve.unwrap();
        assert!(attrs.contains(&"id".to_string()));
        assert!(attrs.contains(&"chunks_title".to_string()));
    }

    #[test]
    fn filter_wraps_into_yql_where_clause() {
        let d = descriptor();
        let mut c = common();
        c.filter = Some(parse("title:shoe").unwrap());
        let q = LogicalQuery::Lexical { common: c, lexical: LexicalQuery { or_phrases: vec!["x".into()], ..Default::default() } };
        let plan = compile(&q, &d).unwrap();
        assert!(plan.yql.contains("title contains"));
    }

    #[test]
    fn tensor_query_with_searchable_attributes_ands_restriction_into_filter() {
        let d = descriptor();
        let mut c = common();
        c.filter = Some(parse("title:shoe").unwrap());
        let q = LogicalQuery::Tensor {
            common: c,
            tensor: TensorQuery { vector: vec![0.1, 0.2, 0.3], ef_search: None, approximate: true, searchable_attributes: Some(vec!["title".into()]) },
        };
        let plan = compile(&q, &d).unwrap();
        assert!(plan.yql.contains("title contains"));
        assert!(plan.yql.contains(" and "));
    }

    #[test]
    fn tensor_query_with_searchable_attributes_and_no_user_filter_still_restricts() {
        let d = descriptor();
        let q = LogicalQuery::Tensor {
            common: common(),
            tensor: TensorQuery { vector: vec![0.1, 0.2, 0.3], ef_search: None, approximate: true, searchable_attributes: Some(vec!["title".into()]) },
        };
        let plan = compile(&q, &d).unwrap();
        assert!(plan.yql.contains("title"));
    }

    #[test]
    fn lexical_query_with_searchable_attributes_matches_restricted_field_directly() {
        let d = descriptor();
        let q = LogicalQuery::Lexical {
            common: common(),
            lexical: LexicalQuery { or_phrases: vec!["running shoes".into()], and_phrases: vec![], searchable_attributes: Some(vec!["title".into()]) },
        };
        let plan = compile(&q, &d).unwrap();
        assert!(plan.yql.contains("title contains"));
        assert!(!plan.yql.contains("userInput"));
    }

    #[test]
    fn compile_is_deterministic() {
        let d = descriptor();
        let q = LogicalQuery::Tensor {
            common: common(),
            tensor: TensorQuery { vector: vec![0.1, 0.2, 0.3], ef_search: Some(100), approximate: true, searchable_attributes: None },
        };
        assert_eq!(compile(&q, &d).unwrap(), compile(&q, &d).unwrap());
    }
}
