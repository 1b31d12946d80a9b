use crate::expression::{CompiledExpression, Condition, KeyQuery};
use crate::store::Segment;
use crate::types::Item;

/// Options for [`Collection::insert`](super::Collection::insert).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOptions {
    /// Write over an existing item at the same key instead of failing.
    pub allow_overwrite: bool,
}

impl InsertOptions {
    pub fn allow_overwrite(mut self, allow: bool) -> Self {
        self.allow_overwrite = allow;
        self
    }
}

/// Options for [`Collection::update`](super::Collection::update).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Extra condition the stored item must satisfy.
    pub condition: Condition,
}

impl UpdateOptions {
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }
}

/// Options for [`Collection::get`](super::Collection::get).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Overrides the collection's `consistent_reads` setting.
    pub consistent: Option<bool>,
}

impl GetOptions {
    pub fn consistent(mut self, consistent: bool) -> Self {
        self.consistent = Some(consistent);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// A key-range query over one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub key: KeyQuery,
    pub filter: Condition,
    pub limit: Option<usize>,
    pub sort: SortOrder,
    pub exclusive_start_key: Option<Item>,
    pub consistent: Option<bool>,
}

impl QueryOptions {
    pub fn new(key: KeyQuery) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Condition) -> Self {
        self.filter = filter;
        self
    }

    /// Maximum number of items evaluated (before the filter).
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Resume after the `last_evaluated_key` of a previous page.
    pub fn exclusive_start_key(mut self, key: Item) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }

    pub fn consistent(mut self, consistent: bool) -> Self {
        self.consistent = Some(consistent);
        self
    }
}

/// A filtered scan over one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOptions {
    pub filter: Condition,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    pub segment: Option<Segment>,
    pub consistent: Option<bool>,
}

impl ScanOptions {
    pub fn filter(mut self, filter: Condition) -> Self {
        self.filter = filter;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn exclusive_start_key(mut self, key: Item) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }

    /// Scan only segment `segment` of `total_segments`.
    pub fn segment(mut self, segment: u32, total_segments: u32) -> Self {
        self.segment = Some(Segment {
            segment,
            total_segments,
        });
        self
    }

    pub fn consistent(mut self, consistent: bool) -> Self {
        self.consistent = Some(consistent);
        self
    }
}

/// A page of entities from a query or scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub items: Vec<Item>,
    /// Pass to `exclusive_start_key` to fetch the next page.
    pub last_evaluated_key: Option<Item>,
}

/// A key condition supplied by an extension in place of the collection's
/// own, usually targeting a secondary index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKeyCondition {
    /// `None` keeps the query on the primary key.
    pub index_name: Option<String>,
    pub key_condition: CompiledExpression,
}
