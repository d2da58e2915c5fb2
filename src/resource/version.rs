//! Resource versions and conditional request checks.
//!
//! Versions are per-resource sequence numbers starting at 1 and advancing by
//! one on every committed change. Phantom format markers keep the two textual
//! forms apart at compile time:
//!
//! * [`RawVersion`] - internal form (`3`)
//! * [`HttpVersion`] - weak ETag form (`W/"3"`)
//!
//! ```rust
//! use scim_engine::resource::version::{HttpVersion, RawVersion};
//!
//! let v1 = RawVersion::initial();
//! let v2 = v1.next();
//! assert_eq!(HttpVersion::from(v2.clone()).to_string(), "W/\"2\"");
//!
//! let etag: HttpVersion = "W/\"2\"".parse().unwrap();
//! assert_eq!(v2, etag);
//! ```

use crate::error::{ScimError, ScimResult};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, marker::PhantomData, str::FromStr};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Http;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Raw;

/// Opaque version token with a compile-time format marker.
#[derive(Debug, Clone, Eq, Hash)]
pub struct ScimVersion<Format> {
    opaque: String,
    #[allow(dead_code)]
    _format: PhantomData<Format>,
}

/// Weak ETag format (`W/"3"`)
pub type HttpVersion = ScimVersion<Http>;

/// Internal format (`3`)
pub type RawVersion = ScimVersion<Raw>;

impl<Format> ScimVersion<Format> {
    /// Version of a freshly created resource.
    pub fn initial() -> RawVersion {
        Self::from_sequence(1)
    }

    pub fn from_sequence(sequence: u64) -> RawVersion {
        ScimVersion {
            opaque: sequence.to_string(),
            _format: PhantomData,
        }
    }

    /// The sequence number, when the token is one.
    pub fn sequence(&self) -> Option<u64> {
        self.opaque.parse().ok()
    }

    /// The version following this one.
    ///
    /// A token that is not a sequence number restarts the sequence at 1.
    pub fn next(&self) -> RawVersion {
        Self::from_sequence(self.sequence().map_or(1, |s| s.saturating_add(1)))
    }

    pub fn as_str(&self) -> &str {
        &self.opaque
    }
}

impl RawVersion {
    /// Accept a client token in either form: `W/"3"`, `"3"` or `3`.
    pub fn parse_token(token: &str) -> Result<Self, VersionError> {
        let trimmed = token.trim();
        if trimmed.starts_with("W/") || trimmed.starts_with('"') {
            return trimmed.parse::<HttpVersion>().map(Into::into);
        }
        trimmed.parse()
    }
}

impl fmt::Display for ScimVersion<Raw> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opaque)
    }
}

impl fmt::Display for ScimVersion<Http> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W/\"{}\"", self.opaque)
    }
}

impl FromStr for ScimVersion<Raw> {
    type Err = VersionError;

    fn from_str(version_str: &str) -> Result<Self, Self::Err> {
        let trimmed = version_str.trim();
        if trimmed.is_empty() {
            return Err(VersionError::ParseError(
                "Version string cannot be empty".to_string(),
            ));
        }
        Ok(ScimVersion {
            opaque: trimmed.to_string(),
            _format: PhantomData,
        })
    }
}

impl FromStr for ScimVersion<Http> {
    type Err = VersionError;

    fn from_str(etag_header: &str) -> Result<Self, Self::Err> {
        let trimmed = etag_header.trim();
        let etag_value = trimmed.strip_prefix("W/").unwrap_or(trimmed);

        let opaque = etag_value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .filter(|v| !v.is_empty())
            .ok_or_else(|| VersionError::InvalidEtagFormat(etag_header.to_string()))?;

        Ok(ScimVersion {
            opaque: opaque.to_string(),
            _format: PhantomData,
        })
    }
}

impl From<ScimVersion<Raw>> for ScimVersion<Http> {
    fn from(raw: ScimVersion<Raw>) -> Self {
        ScimVersion {
            opaque: raw.opaque,
            _format: PhantomData,
        }
    }
}

impl From<ScimVersion<Http>> for ScimVersion<Raw> {
    fn from(http: ScimVersion<Http>) -> Self {
        ScimVersion {
            opaque: http.opaque,
            _format: PhantomData,
        }
    }
}

// Versions are equal when their opaque strings match, whatever the format.
impl<F1, F2> PartialEq<ScimVersion<F2>> for ScimVersion<F1> {
    fn eq(&self, other: &ScimVersion<F2>) -> bool {
        self.opaque == other.opaque
    }
}

impl<Format> Serialize for ScimVersion<Format> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.opaque.serialize(serializer)
    }
}

impl<'de, Format> Deserialize<'de> for ScimVersion<Format> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opaque = String::deserialize(deserializer)?;
        Ok(ScimVersion {
            opaque,
            _format: PhantomData,
        })
    }
}

/// A version token from a conditional header; `*` matches any version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionMatch {
    Any,
    Exact(RawVersion),
}

impl VersionMatch {
    pub fn parse(token: &str) -> Result<Self, VersionError> {
        if token.trim() == "*" {
            return Ok(Self::Any);
        }
        RawVersion::parse_token(token).map(Self::Exact)
    }

    pub fn matches(&self, current: &RawVersion) -> bool {
        match self {
            VersionMatch::Any => true,
            VersionMatch::Exact(version) => version == current,
        }
    }
}

impl fmt::Display for VersionMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionMatch::Any => f.write_str("*"),
            VersionMatch::Exact(version) => write!(f, "{}", HttpVersion::from(version.clone())),
        }
    }
}

/// `ifMatch` / `ifNoneMatch` preconditions of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub if_match: Option<VersionMatch>,
    pub if_none_match: Option<VersionMatch>,
}

impl Preconditions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn if_match(version: impl Into<RawVersion>) -> Self {
        Self {
            if_match: Some(VersionMatch::Exact(version.into())),
            if_none_match: None,
        }
    }

    pub fn if_none_match(version: impl Into<RawVersion>) -> Self {
        Self {
            if_match: None,
            if_none_match: Some(VersionMatch::Exact(version.into())),
        }
    }

    /// Parse header-style tokens.
    pub fn from_tokens(if_match: Option<&str>, if_none_match: Option<&str>) -> Result<Self, VersionError> {
        Ok(Self {
            if_match: if_match.map(VersionMatch::parse).transpose()?,
            if_none_match: if_none_match.map(VersionMatch::parse).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.if_match.is_none() && self.if_none_match.is_none()
    }

    /// Read semantics: a matching `ifNoneMatch` means the caller's copy is
    /// current.
    pub fn check_read(&self, current: &RawVersion) -> ScimResult<()> {
        match &self.if_none_match {
            Some(token) if token.matches(current) => Err(ScimError::NotModified),
            _ => Ok(()),
        }
    }

    /// Write semantics: `ifMatch` must match and `ifNoneMatch` must not.
    pub fn check_write(&self, current: &RawVersion) -> ScimResult<()> {
        if let Some(token) = &self.if_match {
            if !token.matches(current) {
                return Err(ScimError::PreconditionFailed(VersionConflict::new(
                    token.to_string(),
                    current.clone(),
                    "Resource was modified by another client. Please refresh and try again.",
                )));
            }
        }
        if let Some(token) = &self.if_none_match {
            if token.matches(current) {
                return Err(ScimError::PreconditionFailed(VersionConflict::new(
                    token.to_string(),
                    current.clone(),
                    "Resource still has the version named by ifNoneMatch.",
                )));
            }
        }
        Ok(())
    }
}

/// Details of a failed precondition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionConflict {
    /// The token the client sent, as sent
    pub expected: String,
    /// The version the resource has now
    pub current: RawVersion,
    pub message: String,
}

impl VersionConflict {
    pub fn new(expected: impl Into<String>, current: impl Into<RawVersion>, message: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            current: current.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Version conflict: expected '{}', found '{}'. {}",
            self.expected,
            HttpVersion::from(self.current.clone()),
            self.message
        )
    }
}

impl std::error::Error for VersionConflict {}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VersionError {
    #[error("Invalid ETag format: {0}")]
    InvalidEtagFormat(String),

    #[error("Failed to parse version: {0}")]
    ParseError(String),
}
