//! Query filter and paging shapes for entity listing.

use chrono::{DateTime, Utc};

use crate::record::EntityRecord;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Filter accepted by [`super::StoreAdapter::query`] /
/// [`super::StoreAdapter::query_page`].
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub id_prefix: Option<String>,
    pub last_modified_from: Option<DateTime<Utc>>,
    pub last_modified_to: Option<DateTime<Utc>>,
    pub page_size: Option<usize>,
    pub include_state: bool,
    pub include_transient: bool,
    /// Opaque cursor returned by a previous page; callers must pass it
    /// back unmodified to continue. `None` starts from the beginning.
    pub continuation_token: Option<String>,
}

impl QueryFilter {
    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1)
    }

    /// Both `@stringstore` and `stringstore` are equivalent prefixes:
    /// normalize to the lower-cased, `@`-prefixed form a canonical
    /// `InstanceId` string always starts with.
    pub fn normalized_prefix(&self) -> Option<String> {
        self.id_prefix.as_ref().map(|p| {
            let stripped = p.strip_prefix('@').unwrap_or(p);
            format!("@{}", stripped.to_lowercase())
        })
    }

    /// Whether `canonical_id` (the `@name@key` string) matches this
    /// filter's prefix, last-modified range, and transient-visibility
    /// rules. Does not itself apply paging.
    pub fn matches(&self, canonical_id: &str, record: &EntityRecord) -> bool {
        if let Some(prefix) = self.normalized_prefix() {
            if !canonical_id.to_lowercase().starts_with(&prefix) {
                return false;
            }
        }
        if let Some(from) = self.last_modified_from {
            if record.last_modified < from {
                return false;
            }
        }
        if let Some(to) = self.last_modified_to {
            if record.last_modified > to {
                return false;
            }
        }
        if !self.include_transient && record.state.is_none() {
            return false;
        }
        true
    }
}

/// One page of query results, with an opaque continuation token when more
/// results remain.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<EntityRecord>,
    pub continuation_token: Option<String>,
}
