use serde::{Deserialize, Serialize};

/// One side of a range bound. Inclusivity is carried by the bracket
/// character the user wrote (`[` / `]` inclusive, `{` / `}` exclusive).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub value: String,
    pub inclusive: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Equals(String),
    Range { lo: Bound, hi: Bound },
    Exists,
}

/// The evaluable filter tree produced by the Filter Parser and consumed by
/// the Query Compiler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FilterNode {
    And(Box<FilterNode>, Box<FilterNode>),
    Or(Box<FilterNode>, Box<FilterNode>),
    Not(Box<FilterNode>),
    Term { field: String, value: FilterValue },
}

impl FilterNode {
    pub fn and(self, other: FilterNode) -> FilterNode {
        FilterNode::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: FilterNode) -> FilterNode {
        FilterNode::Or(Box::new(self), Box::new(other))
    }
}
