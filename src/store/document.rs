use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{Assignment, BackingStore, Filter, Sort};
use crate::error::BehaviorError;
use crate::traits::{row_value, Row};

type Collections = BTreeMap<String, Vec<Row>>;

#[derive(Debug, Default)]
struct State {
    committed: Collections,
    pending: Option<Collections>,
}

/// In-memory document store.
///
/// Records are JSON objects grouped by collection. A transaction works on a
/// copy of every collection that replaces the committed state on commit.
#[derive(Debug, Default)]
pub struct DocumentStore {
    state: Mutex<State>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `collection` as the next query would see them.
    pub fn rows(&self, collection: &str) -> Result<Vec<Row>, BehaviorError> {
        self.with_collections(|collections| {
            collections.get(collection).cloned().unwrap_or_default()
        })
    }

    pub fn in_transaction(&self) -> Result<bool, BehaviorError> {
        Ok(self.lock()?.pending.is_some())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, BehaviorError> {
        self.state
            .lock()
            .map_err(|_| BehaviorError::store("document store lock poisoned"))
    }

    fn with_collections<R>(
        &self,
        apply: impl FnOnce(&mut Collections) -> R,
    ) -> Result<R, BehaviorError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let target = match state.pending.as_mut() {
            Some(pending) => pending,
            None => &mut state.committed,
        };
        Ok(apply(target))
    }
}

fn assign(row: &mut Row, assignment: &Assignment) -> Result<(), BehaviorError> {
    match assignment {
        Assignment::Increment(field, delta) => {
            let current = match row.get(field) {
                None | Some(JsonValue::Null) => 0,
                Some(value) => value.as_i64().ok_or_else(|| {
                    BehaviorError::store(format!("cannot increment non-integer field `{field}`"))
                })?,
            };
            row.insert(field.clone(), JsonValue::from(current + delta));
        }
        Assignment::Set(field, value) => {
            row.insert(field.clone(), value.to_json());
        }
    }
    Ok(())
}

fn compare(left: &Row, right: &Row, sort: &[Sort]) -> Ordering {
    for key in sort {
        let ordering = row_value(left, &key.field).cmp(&row_value(right, &key.field));
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl BackingStore for DocumentStore {
    async fn begin(&self) -> Result<(), BehaviorError> {
        let mut state = self.lock()?;
        if state.pending.is_some() {
            return Err(BehaviorError::store("a transaction is already open"));
        }
        state.pending = Some(state.committed.clone());
        Ok(())
    }

    async fn commit(&self) -> Result<(), BehaviorError> {
        let mut state = self.lock()?;
        let pending = state
            .pending
            .take()
            .ok_or_else(|| BehaviorError::store("no transaction to commit"))?;
        state.committed = pending;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), BehaviorError> {
        let mut state = self.lock()?;
        state.pending = None;
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[Sort],
    ) -> Result<Vec<Row>, BehaviorError> {
        let mut rows = self.with_collections(|collections| {
            collections
                .get(collection)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| filter.matches(row))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        })?;
        rows.sort_by(|left, right| compare(left, right, sort));
        Ok(rows)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, BehaviorError> {
        self.with_collections(|collections| {
            collections
                .get(collection)
                .map(|rows| rows.iter().filter(|row| filter.matches(row)).count() as u64)
                .unwrap_or(0)
        })
    }

    async fn max_value(
        &self,
        collection: &str,
        field: &str,
        filter: &Filter,
    ) -> Result<Option<i64>, BehaviorError> {
        self.with_collections(|collections| {
            collections.get(collection).and_then(|rows| {
                rows.iter()
                    .filter(|row| filter.matches(row))
                    .filter_map(|row| row_value(row, field).as_int())
                    .max()
            })
        })
    }

    async fn update_where(
        &self,
        collection: &str,
        filter: &Filter,
        assignments: &[Assignment],
    ) -> Result<u64, BehaviorError> {
        self.with_collections(|collections| {
            let mut affected = 0;
            if let Some(rows) = collections.get_mut(collection) {
                for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                    for assignment in assignments {
                        assign(row, assignment)?;
                    }
                    affected += 1;
                }
            }
            Ok(affected)
        })?
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<u64, BehaviorError> {
        self.with_collections(|collections| {
            let Some(rows) = collections.get_mut(collection) else {
                return 0;
            };
            let before = rows.len();
            rows.retain(|row| !filter.matches(row));
            (before - rows.len()) as u64
        })
    }

    async fn insert(&self, collection: &str, row: Row) -> Result<(), BehaviorError> {
        self.with_collections(|collections| {
            collections
                .entry(collection.to_owned())
                .or_default()
                .push(row);
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::value::FieldValue;

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(row) => row,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn rollback_discards_pending_changes() -> Result<(), Box<dyn std::error::Error>> {
        let store = DocumentStore::new();
        store
            .insert("items", row(json!({"id": 1, "position": 0})))
            .await?;

        store.begin().await?;
        store
            .bulk_shift("items", "position", 5, &Filter::new())
            .await?;
        assert_eq!(store.rows("items")?[0]["position"], json!(5));
        store.rollback().await?;

        assert_eq!(store.rows("items")?[0]["position"], json!(0));
        Ok(())
    }

    #[tokio::test]
    async fn null_equality_matches_missing_fields() -> Result<(), Box<dyn std::error::Error>> {
        let store = DocumentStore::new();
        store.insert("items", row(json!({"id": 1}))).await?;
        store
            .insert("items", row(json!({"id": 2, "category": "a"})))
            .await?;

        let rows = store
            .find("items", &Filter::new().eq("category", FieldValue::Null), &[])
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
        Ok(())
    }
}
