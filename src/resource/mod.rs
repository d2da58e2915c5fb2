//! Resource records, versions and request context.
//!
//! * [`Resource`] - the stored, versioned record of one SCIM resource
//! * [`RequestContext`] - request tracking for logging
//! * [`ListQuery`] - search paging, filter and attribute selection
//! * [`version`] - sequence versions, weak ETags and preconditions

pub mod context;
pub mod resource;
pub mod version;

pub use context::{ListQuery, RequestContext};
pub use resource::Resource;
pub use version::{
    HttpVersion, Preconditions, RawVersion, ScimVersion, VersionConflict, VersionError,
    VersionMatch,
};
