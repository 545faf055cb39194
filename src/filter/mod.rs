pub mod parser;
pub mod tree;

pub use parser::{parse, FilterParseError};
pub use tree::{Bound, FilterNode, FilterValue};

/// Combines a searchable-attributes restriction with a user-supplied filter:
/// `(attrs_filter) AND (user_filter)`; when either side is absent the wrap
/// degenerates to the other side alone.
pub fn wrap_with_attributes_filter(attrs_filter: Option<FilterNode>, user_filter: Option<FilterNode>) -> Option<FilterNode> {
    match (attrs_filter, user_filter) {
        (Some(a), Some(u)) => Some(a.and(u)),
        (Some(a), None) => Some(a),
        (None, Some(u)) => Some(u),
        (None, None) => None,
    }
}
