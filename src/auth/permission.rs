//! Permission entries carried by role groups.
//!
//! A role is a Group resource whose `permissions` attribute lists entries of
//! the form
//!
//! ```json
//! {
//!   "resourceType": "User",
//!   "operation": "read",
//!   "allowAttributes": "userName,emails",
//!   "matchMode": "ANY"
//! }
//! ```
//!
//! `allowAttributes` and `denyAttributes` are comma-separated token lists.
//! A token is `*`, a core attribute name, `schema-urn:*`, a schema URN, or a
//! URN-qualified attribute name.

use crate::filter::{FilterNode, parse_filter};
use crate::schema::{AttributePath, is_urn};

use log::warn;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Wildcard resource type in a permission entry.
pub const ANY_RESOURCE_TYPE: &str = "*";

/// Operation class a permission entry grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a permission entry applies to resources of its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Applies to every resource of the kind
    #[default]
    Any,
    /// Applies to resources that satisfy the entry's filter
    All,
    /// Deny-override: removes the attributes from every other grant
    None,
}

impl MatchMode {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "ANY" => Some(Self::Any),
            "ALL" => Some(Self::All),
            "NONE" => Some(Self::None),
            _ => None,
        }
    }
}

/// A set of attributes named by grant tokens.
///
/// Membership is tested with qualified names: `name` for core attributes and
/// `urn:name` for extension attributes, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    all: bool,
    /// Lowercased qualified attribute names, or whole-schema URNs
    names: HashSet<String>,
    /// Lowercased extension URNs granted through `urn:*`
    schemas: HashSet<String>,
    /// `true` when the set names every attribute except the listed ones
    complement: bool,
}

impl AttributeSet {
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a comma-separated token list.
    ///
    /// `core_schema` is the URN of the kind's core schema; tokens qualified
    /// with it are treated as bare core names.
    pub fn parse(tokens: &str, core_schema: &str) -> Self {
        let mut set = Self::empty();
        for token in tokens.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token == "*" {
                set.all = true;
                continue;
            }
            if let Some(urn) = token.strip_suffix(":*").filter(|urn| is_urn(urn)) {
                if urn.eq_ignore_ascii_case(core_schema) {
                    set.schemas.insert(String::new());
                } else {
                    set.schemas.insert(urn.to_ascii_lowercase());
                }
                continue;
            }
            if is_urn(token) && token.eq_ignore_ascii_case(core_schema) {
                set.schemas.insert(String::new());
                continue;
            }

            match AttributePath::parse(token) {
                Some(path) => {
                    let name = match path.schema {
                        Some(urn) if !urn.eq_ignore_ascii_case(core_schema) => {
                            format!("{}:{}", urn, path.name)
                        }
                        _ => path.name,
                    };
                    set.names.insert(name.to_ascii_lowercase());
                }
                None => warn!("Ignoring malformed attribute token '{}'", token),
            }
        }
        set
    }

    /// Every attribute except the ones named by `tokens`.
    pub fn all_except(tokens: &str, core_schema: &str) -> Self {
        let mut set = Self::parse(tokens, core_schema);
        set.complement = true;
        set
    }

    fn names(&self, extension: Option<&str>, name: &str) -> bool {
        if self.all {
            return true;
        }
        match extension {
            None => {
                self.schemas.contains("") || self.names.contains(&name.to_ascii_lowercase())
            }
            Some(urn) => {
                let urn = urn.to_ascii_lowercase();
                self.schemas.contains(&urn)
                    || self.names.contains(&urn)
                    || self
                        .names
                        .contains(&format!("{}:{}", urn, name.to_ascii_lowercase()))
            }
        }
    }

    /// Whether the attribute `name` (inside `extension`, if any) is in the set.
    pub fn contains(&self, extension: Option<&str>, name: &str) -> bool {
        self.names(extension, name) != self.complement
    }

    pub fn is_all(&self) -> bool {
        if self.complement {
            !self.all && self.names.is_empty() && self.schemas.is_empty()
        } else {
            self.all
        }
    }
}

/// Attribute tokens of one permission entry, before they are bound to a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeRule {
    Allow(String),
    Deny(String),
}

impl AttributeRule {
    pub fn bind(&self, core_schema: &str) -> AttributeSet {
        match self {
            AttributeRule::Allow(tokens) => AttributeSet::parse(tokens, core_schema),
            AttributeRule::Deny(tokens) => AttributeSet::all_except(tokens, core_schema),
        }
    }
}

/// One parsed element of a role group's `permissions` attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Permission {
    pub resource_type: String,
    pub operation: Operation,
    pub attributes: AttributeRule,
    pub match_mode: MatchMode,
    pub filter: Option<FilterNode>,
}

impl Permission {
    pub fn new(
        resource_type: impl Into<String>,
        operation: Operation,
        attributes: AttributeRule,
        match_mode: MatchMode,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            operation,
            attributes,
            match_mode,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.resource_type == ANY_RESOURCE_TYPE
    }

    pub fn applies_to_kind(&self, kind: &str) -> bool {
        self.resource_type.eq_ignore_ascii_case(kind)
    }

    /// Parse a stored permission element.
    ///
    /// Returns `None` for entries that cannot be interpreted; such entries
    /// grant nothing.
    pub fn from_value(value: &Value) -> Option<Self> {
        let text = |key: &str| value.get(key).and_then(Value::as_str);

        let resource_type = text("resourceType").unwrap_or(ANY_RESOURCE_TYPE).trim();
        let Some(operation) = text("operation").and_then(Operation::parse) else {
            warn!("Ignoring permission entry without a valid operation: {}", value);
            return None;
        };
        let match_mode = match text("matchMode") {
            None => MatchMode::Any,
            Some(mode) => match MatchMode::parse(mode) {
                Some(mode) => mode,
                None => {
                    warn!("Ignoring permission entry with matchMode '{}'", mode);
                    return None;
                }
            },
        };
        let attributes = match (text("allowAttributes"), text("denyAttributes")) {
            (Some(allow), _) => AttributeRule::Allow(allow.to_string()),
            (None, Some(deny)) => AttributeRule::Deny(deny.to_string()),
            (None, None) => AttributeRule::Allow("*".to_string()),
        };
        let filter = match text("filter").map(str::trim).filter(|f| !f.is_empty()) {
            Some(filter) => match parse_filter(filter) {
                Ok(node) => Some(node),
                Err(e) => {
                    warn!("Ignoring permission entry with invalid filter '{}': {}", filter, e);
                    return None;
                }
            },
            None => None,
        };

        Some(Self {
            resource_type: resource_type.to_string(),
            operation,
            attributes,
            match_mode,
            filter,
        })
    }
}
