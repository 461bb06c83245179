use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::BehaviorError;
use crate::value::FieldValue;

/// A stored record as the backing stores see it.
pub type Row = Map<String, JsonValue>;

/// Typed accessor for one field of a managed model.
///
/// Tables of slots are produced by `#[derive(Managed)]` and resolved by name
/// once, when a listener is built from its configuration.
pub struct FieldSlot<M> {
    name: &'static str,
    get: fn(&M) -> FieldValue,
    set: fn(&mut M, FieldValue) -> Result<(), BehaviorError>,
}

impl<M> Clone for FieldSlot<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for FieldSlot<M> {}

impl<M> std::fmt::Debug for FieldSlot<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSlot").field("name", &self.name).finish()
    }
}

impl<M> FieldSlot<M> {
    pub const fn new(
        name: &'static str,
        get: fn(&M) -> FieldValue,
        set: fn(&mut M, FieldValue) -> Result<(), BehaviorError>,
    ) -> Self {
        Self { name, get, set }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn read(&self, model: &M) -> FieldValue {
        (self.get)(model)
    }

    pub fn write(&self, model: &mut M, value: FieldValue) -> Result<(), BehaviorError> {
        (self.set)(model, value)
    }

    /// Integer view of the field; null reads as `0`, which is also the
    /// placeholder for unplaced tree nodes.
    pub fn read_int(&self, model: &M) -> Result<i64, BehaviorError> {
        match self.read(model) {
            FieldValue::Null => Ok(0),
            FieldValue::Int(value) => Ok(value),
            other => Err(BehaviorError::unexpected(format!(
                "field `{}` holds {other:?} where an integer is expected",
                self.name
            ))),
        }
    }
}

/// A model whose state is tracked by a [`crate::Session`].
///
/// Implementations are normally provided by the `#[derive(Managed)]` macro.
pub trait Managed: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Table or document collection holding the records.
    fn collection() -> &'static str;

    fn identifier_field() -> &'static str;

    fn fields() -> &'static [FieldSlot<Self>];

    fn identifier(&self) -> FieldValue {
        Self::fields()
            .iter()
            .find(|slot| slot.name() == Self::identifier_field())
            .map(|slot| slot.read(self))
            .unwrap_or_default()
    }
}

/// Resolve a configured field name against the model's slot table.
pub fn resolve_field<M: Managed>(name: &str) -> Result<FieldSlot<M>, BehaviorError> {
    M::fields()
        .iter()
        .find(|slot| slot.name() == name)
        .copied()
        .ok_or_else(|| {
            BehaviorError::configuration(format!(
                "`{}` has no managed field named `{name}`",
                M::collection()
            ))
        })
}

pub fn resolve_optional_field<M: Managed>(
    name: Option<&str>,
) -> Result<Option<FieldSlot<M>>, BehaviorError> {
    name.map(resolve_field::<M>).transpose()
}

pub fn to_row<M: Managed>(model: &M) -> Result<Row, BehaviorError> {
    match serde_json::to_value(model)? {
        JsonValue::Object(row) => Ok(row),
        other => Err(BehaviorError::unexpected(format!(
            "`{}` does not serialize into a record: {other}",
            M::collection()
        ))),
    }
}

pub fn from_row<M: Managed>(row: Row) -> Result<M, BehaviorError> {
    Ok(serde_json::from_value(JsonValue::Object(row))?)
}

/// Read one column of a stored row.
pub fn row_value(row: &Row, field: &str) -> FieldValue {
    row.get(field)
        .and_then(FieldValue::from_json)
        .unwrap_or_default()
}

pub fn row_int(row: &Row, field: &str) -> i64 {
    row_value(row, field).as_int().unwrap_or(0)
}
