//! Request context and query parameters.

use crate::auth::Subject;
use crate::projection::AttributeSelection;
use uuid::Uuid;

/// Per-request data threaded through every operation.
///
/// The request id tags log lines; the subject is the authenticated caller
/// whose grants apply. A context built without a subject is anonymous.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub subject: Subject,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            subject: Subject::anonymous(),
        }
    }

    pub fn with_generated_id() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// A fresh context acting as `subject`.
    pub fn for_subject(subject: Subject) -> Self {
        Self::with_generated_id().with_subject(subject)
    }

    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::with_generated_id()
    }
}

/// Search parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Maximum number of results to return
    pub count: Option<usize>,
    /// 1-based index of the first result
    pub start_index: Option<usize>,
    pub filter: Option<String>,
    pub attributes: Vec<String>,
    pub excluded_attributes: Vec<String>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_start_index(mut self, start_index: usize) -> Self {
        self.start_index = Some(start_index);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn with_excluded_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_attributes
            .extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn selection(&self) -> AttributeSelection {
        AttributeSelection::new()
            .with_attributes(&self.attributes)
            .excluding(&self.excluded_attributes)
    }

    /// Zero-based offset and page size, with `count` capped at `max_results`.
    ///
    /// A `startIndex` below 1 is treated as 1.
    pub fn page(&self, max_results: usize) -> (usize, usize) {
        let offset = self.start_index.unwrap_or(1).max(1) - 1;
        let limit = self.count.unwrap_or(max_results).min(max_results);
        (offset, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_differ() {
        let a = RequestContext::with_generated_id();
        let b = RequestContext::default();
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(RequestContext::new("req-1").request_id, "req-1");
        assert_eq!(a.subject, Subject::anonymous());
    }

    #[test]
    fn test_for_subject() {
        let context = RequestContext::for_subject(Subject::user("u-1"));
        assert_eq!(context.subject.id.as_deref(), Some("u-1"));
        assert!(RequestContext::for_subject(Subject::system()).subject.is_system());
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(ListQuery::new().page(100), (0, 100));
        assert_eq!(ListQuery::new().with_start_index(0).page(100), (0, 100));
        assert_eq!(
            ListQuery::new().with_start_index(11).with_count(500).page(100),
            (10, 100)
        );
        assert_eq!(ListQuery::new().with_count(0).page(100), (0, 0));
    }

    #[test]
    fn test_selection_from_query() {
        let query = ListQuery::new()
            .with_attributes(["userName,emails"])
            .with_excluded_attributes(["title"]);
        let selection = query.selection();
        assert_eq!(selection.attributes, vec!["userName", "emails"]);
        assert_eq!(selection.excluded_attributes, vec!["title"]);
    }
}
