//! Backing stores the behaviors read from and bulk-update.
//!
//! The algorithms only ever talk to [`BackingStore`]; [`DocumentStore`] keeps
//! JSON documents in memory and [`RelationalStore`] drives a SeaORM
//! connection.

mod document;
mod relational;

pub use document::DocumentStore;
pub use relational::RelationalStore;

use async_trait::async_trait;

use crate::error::BehaviorError;
use crate::traits::{row_value, Row};
use crate::value::FieldValue;

/// One predicate over a stored field. Predicates of a [`Filter`] are ANDed.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Equality; comparing against [`FieldValue::Null`] means `IS NULL`.
    Eq(String, FieldValue),
    /// Inequality; comparing against [`FieldValue::Null`] means `IS NOT NULL`.
    Ne(String, FieldValue),
    Gt(String, i64),
    Gte(String, i64),
    Lt(String, i64),
    Lte(String, i64),
    In(String, Vec<FieldValue>),
    NotIn(String, Vec<FieldValue>),
    /// `LIKE 'prefix%'` with the prefix taken literally.
    StartsWith(String, String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(Condition::Eq(field.into(), value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(Condition::Ne(field.into(), value.into()))
    }

    pub fn gt(self, field: impl Into<String>, value: i64) -> Self {
        self.with(Condition::Gt(field.into(), value))
    }

    pub fn gte(self, field: impl Into<String>, value: i64) -> Self {
        self.with(Condition::Gte(field.into(), value))
    }

    pub fn lt(self, field: impl Into<String>, value: i64) -> Self {
        self.with(Condition::Lt(field.into(), value))
    }

    pub fn lte(self, field: impl Into<String>, value: i64) -> Self {
        self.with(Condition::Lte(field.into(), value))
    }

    pub fn is_in(self, field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        self.with(Condition::In(field.into(), values))
    }

    /// Skips the predicate entirely when `values` is empty.
    pub fn not_in(self, field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        if values.is_empty() {
            self
        } else {
            self.with(Condition::NotIn(field.into(), values))
        }
    }

    pub fn starts_with(self, field: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.with(Condition::StartsWith(field.into(), prefix.into()))
    }

    /// Evaluate the filter against an in-memory row.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Eq(field, expected) => row_value(row, field) == *expected,
            Condition::Ne(field, expected) => row_value(row, field) != *expected,
            Condition::Gt(field, bound) => int_matches(row, field, |value| value > *bound),
            Condition::Gte(field, bound) => int_matches(row, field, |value| value >= *bound),
            Condition::Lt(field, bound) => int_matches(row, field, |value| value < *bound),
            Condition::Lte(field, bound) => int_matches(row, field, |value| value <= *bound),
            Condition::In(field, values) => values.contains(&row_value(row, field)),
            Condition::NotIn(field, values) => !values.contains(&row_value(row, field)),
            Condition::StartsWith(field, prefix) => row_value(row, field)
                .as_str()
                .is_some_and(|value| value.starts_with(prefix.as_str())),
        })
    }
}

fn int_matches(row: &Row, field: &str, predicate: impl Fn(i64) -> bool) -> bool {
    row_value(row, field).as_int().is_some_and(predicate)
}

/// Column update applied by [`BackingStore::update_where`].
#[derive(Clone, Debug, PartialEq)]
pub enum Assignment {
    Increment(String, i64),
    Set(String, FieldValue),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Query/update executor the behaviors run against.
///
/// Transactions are driven through `begin`/`commit`/`rollback`; while one is
/// open every other call goes through it.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn begin(&self) -> Result<(), BehaviorError>;

    async fn commit(&self) -> Result<(), BehaviorError>;

    async fn rollback(&self) -> Result<(), BehaviorError>;

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[Sort],
    ) -> Result<Vec<Row>, BehaviorError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, BehaviorError>;

    async fn max_value(
        &self,
        collection: &str,
        field: &str,
        filter: &Filter,
    ) -> Result<Option<i64>, BehaviorError>;

    async fn update_where(
        &self,
        collection: &str,
        filter: &Filter,
        assignments: &[Assignment],
    ) -> Result<u64, BehaviorError>;

    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<u64, BehaviorError>;

    async fn insert(&self, collection: &str, row: Row) -> Result<(), BehaviorError>;

    /// `field += delta` for every record matching `filter`.
    async fn bulk_shift(
        &self,
        collection: &str,
        field: &str,
        delta: i64,
        filter: &Filter,
    ) -> Result<u64, BehaviorError> {
        if delta == 0 {
            return Ok(0);
        }
        self.update_where(
            collection,
            filter,
            &[Assignment::Increment(field.to_owned(), delta)],
        )
        .await
    }

    /// Values of `field` starting with `prefix` within `scope`.
    async fn find_similar(
        &self,
        collection: &str,
        field: &str,
        prefix: &str,
        scope: &Filter,
    ) -> Result<Vec<String>, BehaviorError> {
        let filter = scope.clone().starts_with(field, prefix);
        let rows = self.find(collection, &filter, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row_value(row, field).as_str().map(str::to_owned))
            .collect())
    }
}
