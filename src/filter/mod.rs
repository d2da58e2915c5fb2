//! SCIM filter expressions (RFC 7644 §3.4.2.2).
//!
//! Filters are parsed once into a [`FilterNode`] tree, bound against a
//! resource type to surface literal/operator errors, then evaluated as a pure
//! predicate over resource representations.
//!
//! String comparisons (`eq ne co sw ew`) are case-insensitive. Ordering
//! comparisons are type-aware: lexicographic for strings, numeric for
//! integer/decimal and chronological for dateTime.
//!
//! ```rust
//! use scim_engine::filter::{FilterScope, bind, parse_filter};
//! use scim_engine::schema::SchemaRegistry;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SchemaRegistry::new()?;
//! let user = registry.require_resource_type("User")?;
//! let scope = FilterScope::new(&registry, user);
//!
//! let filter = parse_filter(r#"emails[type eq "work" and value co "@example.com"]"#)?;
//! bind(&filter, &scope)?;
//!
//! let resource = json!({"emails": [{"type": "work", "value": "bjensen@example.com"}]});
//! assert!(scope.matches(&filter, resource.as_object().unwrap()));
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod evaluator;
pub mod parser;

pub use ast::{CompareOp, FilterNode};
pub use evaluator::{FilterScope, bind, bind_element, matches_element};
pub use parser::{FilterContext, parse_filter, parse_selector};
