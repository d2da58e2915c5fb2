//! Recursive-descent filter parser.
//!
//! ```text
//! filter     = orExpr
//! orExpr     = andExpr { "or" andExpr }
//! andExpr    = notExpr { "and" notExpr }
//! notExpr    = "not" notExpr | "(" filter ")" | attrExpr
//! attrExpr   = attrPath "pr" | attrPath compareOp compValue | attrPath "[" filter "]"
//! attrPath   = [URN ":"] ATTRNAME ["." ATTRNAME]
//! compValue  = "true" | "false" | "null" | NUMBER | STRING
//! ```
//!
//! Keywords and operators are case-insensitive. Precedence is
//! `not` > `and` > `or`.

use super::ast::{CompareOp, FilterNode};
use crate::error::{ValidationError, ValidationResult};
use crate::schema::{AttributePath, TypedValue};

/// Maximum accepted filter length in bytes.
pub const MAX_FILTER_LENGTH: usize = 4096;

/// Maximum nesting of parentheses, `not` and brackets.
pub const MAX_FILTER_DEPTH: usize = 32;

/// Where a filter is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterContext {
    /// A search filter over whole resources
    Search,
    /// The inside of a patch `attr[...]` selector; only plain element
    /// sub-attribute names are allowed.
    Selector,
}

/// Parse a search filter.
pub fn parse_filter(input: &str) -> ValidationResult<FilterNode> {
    parse_with_context(input, FilterContext::Search)
}

/// Parse the element filter of a patch selector.
pub fn parse_selector(input: &str) -> ValidationResult<FilterNode> {
    parse_with_context(input, FilterContext::Selector)
}

pub fn parse_with_context(input: &str, context: FilterContext) -> ValidationResult<FilterNode> {
    if input.len() > MAX_FILTER_LENGTH {
        return Err(ValidationError::InvalidFilter {
            position: 0,
            message: format!(
                "filter exceeds maximum length ({} bytes, max {})",
                input.len(),
                MAX_FILTER_LENGTH
            ),
        });
    }

    let mut parser = Parser {
        input,
        position: 0,
        depth: 0,
        in_brackets: context == FilterContext::Selector,
        context,
    };
    parser.skip_whitespace();
    if parser.at_end() {
        return Err(parser.error("empty filter"));
    }
    let node = parser.parse_or()?;

    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.error(format!(
            "unexpected input '{}'",
            &parser.input[parser.position..]
        )));
    }
    Ok(node)
}

struct Parser<'a> {
    input: &'a str,
    position: usize,
    depth: usize,
    in_brackets: bool,
    context: FilterContext,
}

impl<'a> Parser<'a> {
    fn parse_or(&mut self) -> ValidationResult<FilterNode> {
        let mut left = self.parse_and()?;
        while self.try_keyword("or") {
            let right = self.parse_and()?;
            left = FilterNode::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ValidationResult<FilterNode> {
        let mut left = self.parse_not()?;
        while self.try_keyword("and") {
            let right = self.parse_not()?;
            left = FilterNode::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ValidationResult<FilterNode> {
        self.skip_whitespace();

        if self.try_keyword("not") {
            self.enter_scope()?;
            let inner = self.parse_not()?;
            self.exit_scope();
            return Ok(FilterNode::Not(Box::new(inner)));
        }

        if self.try_char('(') {
            self.enter_scope()?;
            let inner = self.parse_or()?;
            self.exit_scope();
            self.skip_whitespace();
            if !self.try_char(')') {
                return Err(self.error("expected ')'"));
            }
            return Ok(inner);
        }

        self.parse_attr_expr()
    }

    fn parse_attr_expr(&mut self) -> ValidationResult<FilterNode> {
        let start = self.position;
        let path = self.parse_attr_path()?;

        if self.peek() == Some('[') {
            return self.parse_value_path(start, path);
        }

        if self.try_keyword("pr") {
            return Ok(FilterNode::Present { path });
        }

        let op = self.parse_compare_op()?;
        let value = self.parse_value()?;
        Ok(FilterNode::Compare { path, op, value })
    }

    fn parse_value_path(
        &mut self,
        start: usize,
        path: AttributePath,
    ) -> ValidationResult<FilterNode> {
        if self.in_brackets {
            return Err(self.nested_selector(start));
        }
        if path.sub.is_some() {
            return Err(ValidationError::InvalidFilter {
                position: start,
                message: format!("value filter cannot follow sub-attribute '{}'", path),
            });
        }

        self.advance();
        self.enter_scope()?;
        self.in_brackets = true;
        let filter = self.parse_or()?;
        self.in_brackets = false;
        self.exit_scope();

        self.skip_whitespace();
        if !self.try_char(']') {
            return Err(self.error("expected ']' to close value filter"));
        }
        Ok(FilterNode::ValuePath {
            path,
            filter: Box::new(filter),
        })
    }

    fn parse_attr_path(&mut self) -> ValidationResult<AttributePath> {
        self.skip_whitespace();
        let start = self.position;

        if !self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(self.error("expected attribute name"));
        }
        while self
            .peek()
            .is_some_and(|c| !c.is_whitespace() && !matches!(c, '(' | ')' | '[' | ']' | '"'))
        {
            self.advance();
        }

        let text = &self.input[start..self.position];
        let path = AttributePath::parse(text).ok_or_else(|| ValidationError::InvalidFilter {
            position: start,
            message: format!("invalid attribute path '{}'", text),
        })?;

        if self.in_brackets && self.context == FilterContext::Selector && path.sub.is_some() {
            return Err(ValidationError::AmbiguousFilter {
                path: self.input.to_string(),
            });
        }
        Ok(path)
    }

    fn parse_compare_op(&mut self) -> ValidationResult<CompareOp> {
        self.skip_whitespace();
        let start = self.position;
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.advance();
        }

        let word = &self.input[start..self.position];
        if word.is_empty() {
            return Err(ValidationError::InvalidFilter {
                position: start,
                message: "expected comparison operator".to_string(),
            });
        }
        CompareOp::parse(word).ok_or_else(|| ValidationError::InvalidFilter {
            position: start,
            message: format!("unknown operator '{}'", word),
        })
    }

    fn parse_value(&mut self) -> ValidationResult<TypedValue> {
        self.skip_whitespace();

        if self.peek() == Some('"') {
            return self.parse_string();
        }
        if self.try_keyword("true") {
            return Ok(TypedValue::Boolean(true));
        }
        if self.try_keyword("false") {
            return Ok(TypedValue::Boolean(false));
        }
        if self.try_keyword("null") {
            return Ok(TypedValue::Null);
        }
        if self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+')
        {
            return self.parse_number();
        }

        Err(self.error("expected value (string, boolean, number, or null)"))
    }

    fn parse_string(&mut self) -> ValidationResult<TypedValue> {
        let start = self.position;
        self.advance();

        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(ValidationError::InvalidFilter {
                        position: start,
                        message: "unterminated string".to_string(),
                    });
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.peek() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        _ => return Err(self.error("invalid escape sequence")),
                    };
                    value.push(escaped);
                    self.advance();
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        Ok(TypedValue::Text(value))
    }

    /// Integer unless the literal has a fraction or exponent.
    fn parse_number(&mut self) -> ValidationResult<TypedValue> {
        let start = self.position;
        let mut decimal = false;

        if matches!(self.peek(), Some('-' | '+')) {
            self.advance();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') {
            decimal = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            decimal = true;
            self.advance();
            if matches!(self.peek(), Some('-' | '+')) {
                self.advance();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.input[start..self.position];
        let invalid = || ValidationError::InvalidFilter {
            position: start,
            message: format!("invalid number '{}'", text),
        };
        if decimal {
            text.parse::<f64>()
                .map(TypedValue::Decimal)
                .map_err(|_| invalid())
        } else {
            text.parse::<i64>()
                .map(TypedValue::Integer)
                .map_err(|_| invalid())
        }
    }

    fn nested_selector(&self, start: usize) -> ValidationError {
        match self.context {
            FilterContext::Selector => ValidationError::AmbiguousFilter {
                path: self.input.to_string(),
            },
            FilterContext::Search => ValidationError::InvalidFilter {
                position: start,
                message: "nested value filters are not supported".to_string(),
            },
        }
    }

    fn enter_scope(&mut self) -> ValidationResult<()> {
        self.depth += 1;
        if self.depth > MAX_FILTER_DEPTH {
            return Err(self.error(format!(
                "filter exceeds maximum nesting depth ({})",
                MAX_FILTER_DEPTH
            )));
        }
        Ok(())
    }

    fn exit_scope(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn error(&self, message: impl Into<String>) -> ValidationError {
        ValidationError::InvalidFilter {
            position: self.position,
            message: message.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.position += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn try_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn try_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let remaining = &self.input[self.position..];
        let Some(candidate) = remaining.get(..keyword.len()) else {
            return false;
        };
        if !candidate.eq_ignore_ascii_case(keyword) {
            return false;
        }
        let boundary = remaining[keyword.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '_' | '-' | '$')));
        if boundary {
            self.position += keyword.len();
        }
        boundary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare(node: &FilterNode) -> (&AttributePath, CompareOp, &TypedValue) {
        match node {
            FilterNode::Compare { path, op, value } => (path, *op, value),
            other => panic!("expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_equality() {
        let node = parse_filter("userName eq \"bjensen\"").unwrap();
        let (path, op, value) = compare(&node);
        assert_eq!(path.name, "userName");
        assert_eq!(op, CompareOp::Eq);
        assert_eq!(value, &TypedValue::Text("bjensen".into()));
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let node = parse_filter("title PR AND userType EQ \"Employee\"").unwrap();
        assert!(matches!(node, FilterNode::And(_, _)));
    }

    #[test]
    fn test_precedence_not_and_or() {
        let node = parse_filter("a eq 1 or b eq 2 and not c eq 3").unwrap();
        let FilterNode::Or(left, right) = node else {
            panic!("or must bind loosest");
        };
        assert!(matches!(*left, FilterNode::Compare { .. }));
        let FilterNode::And(_, negated) = *right else {
            panic!("and binds tighter than or");
        };
        assert!(matches!(*negated, FilterNode::Not(_)));
    }

    #[test]
    fn test_number_literal_typing() {
        let node = parse_filter("age gt 21").unwrap();
        assert_eq!(compare(&node).2, &TypedValue::Integer(21));
        let node = parse_filter("score le -5.5").unwrap();
        assert_eq!(compare(&node).2, &TypedValue::Decimal(-5.5));
    }

    #[test]
    fn test_value_path() {
        let node = parse_filter("emails[type eq \"work\" and value co \"@example.com\"]").unwrap();
        let FilterNode::ValuePath { path, filter } = node else {
            panic!("expected value path");
        };
        assert_eq!(path.name, "emails");
        assert!(matches!(*filter, FilterNode::And(_, _)));
    }

    #[test]
    fn test_urn_qualified_path() {
        let node = parse_filter(
            "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:employeeNumber eq \"701984\"",
        )
        .unwrap();
        let (path, _, _) = compare(&node);
        assert_eq!(path.name, "employeeNumber");
        assert!(path.schema.is_some());
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let err = parse_filter("userName eq").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFilter { position: 11, .. }));

        assert!(parse_filter("userName xx \"a\"").is_err());
        assert!(parse_filter("(userName eq \"a\"").is_err());
        assert!(parse_filter("userName eq \"a").is_err());
        assert!(parse_filter("").is_err());
        assert!(parse_filter("userName eq \"a\" junk").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}a eq 1{}", "(".repeat(40), ")".repeat(40));
        assert!(parse_filter(&deep).is_err());
    }

    #[test]
    fn test_selector_rejects_dotted_paths() {
        assert!(parse_selector("type eq \"work\"").is_ok());
        assert!(matches!(
            parse_selector("addresses.type eq \"work\" and addresses.locality eq \"x\""),
            Err(ValidationError::AmbiguousFilter { .. })
        ));
        assert!(matches!(
            parse_selector("a[b eq 1]"),
            Err(ValidationError::AmbiguousFilter { .. })
        ));
    }

    #[test]
    fn test_nested_value_filter_rejected_in_search() {
        assert!(matches!(
            parse_filter("emails[x[y eq 1]]"),
            Err(ValidationError::InvalidFilter { .. })
        ));
    }
}
