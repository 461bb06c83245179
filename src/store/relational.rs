use async_trait::async_trait;
use sea_orm::sea_query::{
    Alias, Asterisk, Cond, Expr, Func, LikeExpr, Order, Query, SimpleExpr,
};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, FromQueryResult, Statement,
    StatementBuilder, TransactionTrait,
};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use super::{Assignment, BackingStore, Condition, Filter, Sort};
use crate::error::BehaviorError;
use crate::traits::Row;

/// Store backed by a SeaORM connection.
///
/// Statements are built with sea-query and rendered for the connection's
/// backend; rows come back as JSON objects keyed by column name.
pub struct RelationalStore {
    db: DatabaseConnection,
    txn: Mutex<Option<DatabaseTransaction>>,
}

impl RelationalStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            txn: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn build<S: StatementBuilder>(&self, statement: &S) -> Statement {
        self.db.get_database_backend().build(statement)
    }

    async fn query_all(&self, statement: Statement) -> Result<Vec<JsonValue>, BehaviorError> {
        let txn = self.txn.lock().await;
        let rows = match txn.as_ref() {
            Some(txn) => JsonValue::find_by_statement(statement).all(txn).await?,
            None => JsonValue::find_by_statement(statement).all(&self.db).await?,
        };
        Ok(rows)
    }

    async fn execute(&self, statement: Statement) -> Result<u64, BehaviorError> {
        let txn = self.txn.lock().await;
        let result = match txn.as_ref() {
            Some(txn) => txn.execute(statement).await?,
            None => self.db.execute(statement).await?,
        };
        Ok(result.rows_affected())
    }

    async fn scalar(&self, statement: Statement) -> Result<Option<i64>, BehaviorError> {
        let rows = self.query_all(statement).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("value"))
            .and_then(JsonValue::as_i64))
    }
}

fn column(field: &str) -> Expr {
    Expr::col(Alias::new(field))
}

fn condition(filter: &Filter) -> Cond {
    let mut cond = Cond::all();
    for predicate in filter.conditions() {
        let expr: SimpleExpr = match predicate {
            Condition::Eq(field, value) => match value.to_sql() {
                Some(value) => column(field).eq(value),
                None => column(field).is_null(),
            },
            Condition::Ne(field, value) => match value.to_sql() {
                Some(value) => column(field).ne(value),
                None => column(field).is_not_null(),
            },
            Condition::Gt(field, bound) => column(field).gt(*bound),
            Condition::Gte(field, bound) => column(field).gte(*bound),
            Condition::Lt(field, bound) => column(field).lt(*bound),
            Condition::Lte(field, bound) => column(field).lte(*bound),
            Condition::In(field, values) => {
                column(field).is_in(values.iter().filter_map(|value| value.to_sql()))
            }
            Condition::NotIn(field, values) => {
                column(field).is_not_in(values.iter().filter_map(|value| value.to_sql()))
            }
            Condition::StartsWith(field, prefix) => column(field)
                .like(LikeExpr::new(format!("{}%", escape_like(prefix))).escape('\\')),
        };
        cond = cond.add(expr);
    }
    cond
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn json_to_sql(value: &JsonValue) -> Option<sea_orm::Value> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(value) => Some(sea_orm::Value::from(*value)),
        JsonValue::Number(number) => match number.as_i64() {
            Some(value) => Some(sea_orm::Value::from(value)),
            None => number.as_f64().map(sea_orm::Value::from),
        },
        JsonValue::String(value) => Some(sea_orm::Value::from(value.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Some(sea_orm::Value::from(value.clone())),
    }
}

#[async_trait]
impl BackingStore for RelationalStore {
    async fn begin(&self) -> Result<(), BehaviorError> {
        let mut txn = self.txn.lock().await;
        if txn.is_some() {
            return Err(BehaviorError::store("a transaction is already open"));
        }
        *txn = Some(self.db.begin().await?);
        Ok(())
    }

    async fn commit(&self) -> Result<(), BehaviorError> {
        let txn = self
            .txn
            .lock()
            .await
            .take()
            .ok_or_else(|| BehaviorError::store("no transaction to commit"))?;
        txn.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), BehaviorError> {
        let txn = self.txn.lock().await.take();
        if let Some(txn) = txn {
            txn.rollback().await?;
        }
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[Sort],
    ) -> Result<Vec<Row>, BehaviorError> {
        let mut select = Query::select();
        select
            .column(Asterisk)
            .from(Alias::new(collection))
            .cond_where(condition(filter));
        for key in sort {
            let order = if key.descending {
                Order::Desc
            } else {
                Order::Asc
            };
            select.order_by(Alias::new(key.field.as_str()), order);
        }

        let rows = self.query_all(self.build(&select)).await?;
        rows.into_iter()
            .map(|row| match row {
                JsonValue::Object(row) => Ok(row),
                other => Err(BehaviorError::store(format!(
                    "`{collection}` returned a non-object row: {other}"
                ))),
            })
            .collect()
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, BehaviorError> {
        let mut select = Query::select();
        select
            .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("value"))
            .from(Alias::new(collection))
            .cond_where(condition(filter));
        let count = self.scalar(self.build(&select)).await?.unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn max_value(
        &self,
        collection: &str,
        field: &str,
        filter: &Filter,
    ) -> Result<Option<i64>, BehaviorError> {
        let mut select = Query::select();
        select
            .expr_as(Func::max(column(field)), Alias::new("value"))
            .from(Alias::new(collection))
            .cond_where(condition(filter));
        self.scalar(self.build(&select)).await
    }

    async fn update_where(
        &self,
        collection: &str,
        filter: &Filter,
        assignments: &[Assignment],
    ) -> Result<u64, BehaviorError> {
        if assignments.is_empty() {
            return Ok(0);
        }
        let mut update = Query::update();
        update
            .table(Alias::new(collection))
            .cond_where(condition(filter));
        for assignment in assignments {
            match assignment {
                Assignment::Increment(field, delta) => {
                    update.value(Alias::new(field.as_str()), column(field).add(*delta));
                }
                Assignment::Set(field, value) => match value.to_sql() {
                    Some(value) => {
                        update.value(Alias::new(field.as_str()), value);
                    }
                    None => {
                        update.value(Alias::new(field.as_str()), Expr::cust("NULL"));
                    }
                },
            }
        }
        self.execute(self.build(&update)).await
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<u64, BehaviorError> {
        let mut delete = Query::delete();
        delete
            .from_table(Alias::new(collection))
            .cond_where(condition(filter));
        self.execute(self.build(&delete)).await
    }

    async fn insert(&self, collection: &str, row: Row) -> Result<(), BehaviorError> {
        let mut columns = Vec::with_capacity(row.len());
        let mut values: Vec<SimpleExpr> = Vec::with_capacity(row.len());
        for (name, value) in &row {
            if let Some(value) = json_to_sql(value) {
                columns.push(Alias::new(name.as_str()));
                values.push(value.into());
            }
        }

        let mut insert = Query::insert();
        insert.into_table(Alias::new(collection)).columns(columns);
        insert
            .values(values)
            .map_err(|err| BehaviorError::store(err.to_string()))?;
        self.execute(self.build(&insert)).await?;
        Ok(())
    }
}
