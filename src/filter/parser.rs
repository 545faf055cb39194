use crate::error::{CoreError, Result};
use crate::filter::tree::{Bound, FilterNode, FilterValue};

/// Position-tagged parse failure. Carries a one-line message and the
/// character offset into the original input where parsing gave up.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParseError {
    pub position: usize,
    pub message: String,
}

impl std::fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "filter parse error at position {}: {}", self.position, self.message)
    }
}

impl From<FilterParseError> for CoreError {
    fn from(e: FilterParseError) -> Self {
        CoreError::InvalidArgument(e.to_string())
    }
}

/// Parses a filter string in a Lucene-flavored grammar: boolean AND/OR/NOT,
/// parenthesization, `field:value` equality,
/// `field:[lo TO hi]` ranges (bracket character carries inclusivity), and
/// `field:*` existence. Side-effect free and deterministic.
pub fn parse(input: &str) -> std::result::Result<FilterNode, FilterParseError> {
    let mut p = Parser { chars: input.chars().collect(), pos: 0 };
    p.skip_ws();
    if p.pos >= p.chars.len() {
        return Err(p.err("empty filter expression"));
    }
    let node = p.parse_or()?;
    p.skip_ws();
    if p.pos != p.chars.len() {
        return Err(p.err(&format!("unexpected trailing input '{}'", p.remainder_preview())));
    }
    Ok(node)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

const SPECIAL_CHARS: &[char] = &[':', '(', ')', '[', ']', '{', '}', '"'];

impl Parser {
    fn err(&self, message: &str) -> FilterParseError {
        FilterParseError { position: self.pos, message: message.to_string() }
    }

    fn remainder_preview(&self) -> String {
        self.chars[self.pos..].iter().take(20).collect()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn at_end_of_token(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) => c.is_whitespace() || c == ')',
        }
    }

    /// Consumes a bare keyword (AND/OR/NOT/TO) if it occurs at the current
    /// position followed by a word boundary. Does not consume on mismatch.
    fn try_keyword(&mut self, kw: &str) -> bool {
        let save = self.pos;
        self.skip_ws();
        let kw_chars: Vec<char> = kw.chars().collect();
        if self.pos + kw_chars.len() > self.chars.len() {
            self.pos = save;
            return false;
        }
        if self.chars[self.pos..self.pos + kw_chars.len()] != kw_chars[..] {
            self.pos = save;
            return false;
        }
        let after = self.pos + kw_chars.len();
        let boundary = match self.chars.get(after) {
            None => true,
            Some(c) => c.is_whitespace() || *c == '(' || *c == ')',
        };
        if !boundary {
            self.pos = save;
            return false;
        }
        self.pos = after;
        true
    }

    fn parse_or(&mut self) -> std::result::Result<FilterNode, FilterParseError> {
        let mut node = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.try_keyword("OR") {
                self.skip_ws();
                let rhs = self.parse_and()?;
                node = node.or(rhs);
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> std::result::Result<FilterNode, FilterParseError> {
        let mut node = self.parse_not()?;
        loop {
            self.skip_ws();
            if self.try_keyword("AND") {
                self.skip_ws();
                let rhs = self.parse_not()?;
                node = node.and(rhs);
            } else if matches!(self.peek(), Some(c) if c != ')' ) && !self.at_top_level_terminator() {
                // Rule (ii): implicit AND between adjacent clauses is rejected.
                return Err(self.err("implicit AND between clauses is not allowed; use AND/OR explicitly"));
            } else {
                break;
            }
        }
        Ok(node)
    }

    /// True when the next token is a closing paren, OR/AND keyword (handled by
    /// caller), or end of input -- i.e. nothing that would start a new clause.
    fn at_top_level_terminator(&mut self) -> bool {
        let save = self.pos;
        self.skip_ws();
        let is_term = self.peek().is_none() || self.peek() == Some(')');
        let is_or = self.try_keyword("OR");
        self.pos = save;
        is_term || is_or
    }

    fn parse_not(&mut self) -> std::result::Result<FilterNode, FilterParseError> {
        self.skip_ws();
        if self.try_keyword("NOT") {
            self.skip_ws();
            let inner = self.parse_not()?;
            return Ok(FilterNode::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> std::result::Result<FilterNode, FilterParseError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.err("expected a clause, found end of input")),
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.skip_ws();
                if self.peek() != Some(')') {
                    return Err(self.err("expected closing ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(')') => Err(self.err("unexpected ')'")),
            _ => self.parse_clause(),
        }
    }

    fn parse_clause(&mut self) -> std::result::Result<FilterNode, FilterParseError> {
        let field = self.parse_field_name()?;
        if self.peek() != Some(':') {
            return Err(self.err(&format!("expected ':' after field name '{field}'")));
        }
        self.pos += 1;
        let value = self.parse_value()?;
        Ok(FilterNode::Term { field, value })
    }

    fn parse_field_name(&mut self) -> std::result::Result<String, FilterParseError> {
        let start = self.pos;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' && self.pos + 1 < self.chars.len() {
                out.push(self.chars[self.pos + 1]);
                self.pos += 2;
                continue;
            }
            if c.is_whitespace() || c == ':' || c == '(' || c == ')' {
                break;
            }
            if SPECIAL_CHARS.contains(&c) {
                return Err(FilterParseError {
                    position: self.pos,
                    message: format!("unescaped special character '{c}' in field name; escape it with '\\'"),
                });
            }
            out.push(c);
            self.pos += 1;
        }
        if out.is_empty() {
            return Err(FilterParseError { position: start, message: "expected a field name".to_string() });
        }
        Ok(out)
    }

    fn parse_value(&mut self) -> std::result::Result<FilterValue, FilterParseError> {
        match self.peek() {
            Some('*') => {
                self.pos += 1;
                if !self.at_end_of_token() {
                    return Err(self.err("unexpected characters after '*' existence wildcard"));
                }
                Ok(FilterValue::Exists)
            }
            Some('[') | Some('{') => self.parse_range(),
            Some('"') => Ok(FilterValue::Equals(self.parse_quoted()?)),
            _ => Ok(FilterValue::Equals(self.parse_bare_token()?)),
        }
    }

    fn parse_range(&mut self) -> std::result::Result<FilterValue, FilterParseError> {
        let open = self.peek().unwrap();
        let lo_inclusive = open == '[';
        self.pos += 1;
        self.skip_ws();
        let lo = self.parse_range_bound()?;
        self.skip_ws();
        if !self.try_keyword("TO") {
            return Err(self.err("expected 'TO' in range expression"));
        }
        self.skip_ws();
        let hi = self.parse_range_bound()?;
        self.skip_ws();
        let close = self.peek();
        if close != Some(']') && close != Some('}') {
            return Err(self.err("expected closing ']' or '}' for range"));
        }
        let hi_inclusive = close == Some(']');
        self.pos += 1;
        Ok(FilterValue::Range {
            lo: Bound { value: lo, inclusive: lo_inclusive },
            hi: Bound { value: hi, inclusive: hi_inclusive },
        })
    }

    fn parse_range_bound(&mut self) -> std::result::Result<String, FilterParseError> {
        let start = self.pos;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ']' || c == '}' {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        if out.is_empty() {
            return Err(FilterParseError { position: start, message: "expected a range bound value".to_string() });
        }
        Ok(out)
    }

    fn parse_quoted(&mut self) -> std::result::Result<String, FilterParseError> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(FilterParseError { position: start, message: "unterminated string literal".to_string() }),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') if self.pos + 1 < self.chars.len() => {
                    out.push(self.chars[self.pos + 1]);
                    self.pos += 2;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(out)
    }

    /// Unquoted bare tokens are accepted only when they contain no whitespace
    /// or special characters (rule iii).
    fn parse_bare_token(&mut self) -> std::result::Result<String, FilterParseError> {
        let start = self.pos;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ')' {
                break;
            }
            if SPECIAL_CHARS.contains(&c) {
                return Err(FilterParseError {
                    position: self.pos,
                    message: format!("unquoted value contains special character '{c}'; quote it with \"\""),
                });
            }
            out.push(c);
            self.pos += 1;
        }
        if out.is_empty() {
            return Err(FilterParseError { position: start, message: "expected a value".to_string() });
        }
        Ok(out)
    }
}
