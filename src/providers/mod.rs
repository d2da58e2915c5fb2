//! Resource store coordination.
//!
//! * [`ResourceCoordinator`] - CRUD, search, versioning, access control and
//!   referential integrity over any [`StorageProvider`](crate::storage::StorageProvider)
//! * [`references`] - group membership and back-reference maintenance
//!
//! Operations take a [`RequestContext`](crate::resource::RequestContext)
//! carrying the request id and the authenticated subject.

pub mod references;
pub mod standard;

pub use standard::{ResourceCoordinator, ResourceResult, SearchResult};
