//! Builder utilities for operation handler types
//!
//! This module provides convenient builder methods for constructing
//! [`OperationRequest`](super::OperationRequest) values.

pub mod request;

// Builder implementations are available through impl blocks on core types
