use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::context::FlushContext;
use crate::error::BehaviorError;
use crate::lock::LockedTransaction;
use crate::sluggable::SluggableListener;
use crate::sortable::SortableListener;
use crate::store::{Assignment, BackingStore, Filter, Sort};
use crate::traits::{from_row, resolve_field, row_value, to_row, FieldSlot, Managed};
use crate::tree::TreeListener;
use crate::value::FieldValue;

/// Old and new value of one changed field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub old: FieldValue,
    pub new: FieldValue,
}

/// Fields whose current value differs from the last persisted one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: BTreeMap<&'static str, Change>,
}

impl ChangeSet {
    pub fn contains(&self, field: &str) -> bool {
        self.changes.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Change> {
        self.changes.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Change)> {
        self.changes.iter().map(|(field, change)| (*field, change))
    }
}

/// Change-tracking collaborator the behaviors run against during a flush.
pub trait UnitOfWork<M: Managed>: Send {
    fn scheduled_insertions(&self) -> Vec<FieldValue>;

    /// Managed, persisted objects with a non-empty change set.
    fn scheduled_updates(&self) -> Vec<FieldValue>;

    fn scheduled_deletions(&self) -> Vec<FieldValue>;

    fn is_scheduled_for_insertion(&self, id: &FieldValue) -> bool;

    fn is_scheduled_for_deletion(&self, id: &FieldValue) -> bool;

    fn object(&self, id: &FieldValue) -> Option<&M>;

    fn object_mut(&mut self, id: &FieldValue) -> Option<&mut M>;

    fn change_set(&self, id: &FieldValue) -> ChangeSet;

    /// Record `value` as already persisted, so it is not written again.
    fn set_original(
        &mut self,
        id: &FieldValue,
        field: &str,
        value: FieldValue,
    ) -> Result<(), BehaviorError>;

    fn schedule_deletion(&mut self, id: FieldValue);

    /// Attach an object loaded from the store; an already managed instance wins.
    fn register(&mut self, object: M) -> FieldValue;

    fn detach(&mut self, id: &FieldValue);

    fn identities(&self) -> Vec<FieldValue>;
}

/// Write `value` into both the current and the persisted state of an object.
pub(crate) fn patch_field<M: Managed>(
    uow: &mut dyn UnitOfWork<M>,
    id: &FieldValue,
    slot: &FieldSlot<M>,
    value: FieldValue,
) -> Result<(), BehaviorError> {
    match uow.object_mut(id) {
        Some(object) => slot.write(object, value.clone())?,
        None => return Ok(()),
    }
    uow.set_original(id, slot.name(), value)
}

pub(crate) fn assign_field<M: Managed>(
    uow: &mut dyn UnitOfWork<M>,
    id: &FieldValue,
    slot: &FieldSlot<M>,
    value: FieldValue,
) -> Result<(), BehaviorError> {
    let object = uow
        .object_mut(id)
        .ok_or_else(|| BehaviorError::NotManaged(id.clone()))?;
    slot.write(object, value)
}

/// Managed instance of `id`, loading it from the store when needed.
pub(crate) async fn load_managed<M, S>(
    uow: &mut dyn UnitOfWork<M>,
    store: &S,
    id: &FieldValue,
) -> Result<Option<M>, BehaviorError>
where
    M: Managed,
    S: BackingStore + ?Sized,
{
    if let Some(object) = uow.object(id) {
        return Ok(Some(object.clone()));
    }
    let filter = Filter::new().eq(M::identifier_field(), id.clone());
    let Some(row) = store
        .find(M::collection(), &filter, &[])
        .await?
        .into_iter()
        .next()
    else {
        return Ok(None);
    };
    let object: M = from_row(row)?;
    uow.register(object.clone());
    Ok(Some(object))
}

pub(crate) async fn require_managed<M, S>(
    uow: &mut dyn UnitOfWork<M>,
    store: &S,
    id: &FieldValue,
) -> Result<M, BehaviorError>
where
    M: Managed,
    S: BackingStore + ?Sized,
{
    load_managed(uow, store, id)
        .await?
        .ok_or_else(|| BehaviorError::invalid_argument(format!("object [{id}] does not exist")))
}

/// Listeners run by [`Session::flush`], in sluggable, tree, sortable order.
pub struct Behaviors<M: Managed> {
    sluggable: Option<SluggableListener<M>>,
    tree: Option<TreeListener<M>>,
    sortable: Option<SortableListener<M>>,
}

impl<M: Managed> Default for Behaviors<M> {
    fn default() -> Self {
        Self {
            sluggable: None,
            tree: None,
            sortable: None,
        }
    }
}

impl<M: Managed> Behaviors<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sluggable(mut self, listener: SluggableListener<M>) -> Self {
        self.sluggable = Some(listener);
        self
    }

    pub fn with_tree(mut self, listener: TreeListener<M>) -> Self {
        self.tree = Some(listener);
        self
    }

    pub fn with_sortable(mut self, listener: SortableListener<M>) -> Self {
        self.sortable = Some(listener);
        self
    }

    pub fn sluggable(&self) -> Option<&SluggableListener<M>> {
        self.sluggable.as_ref()
    }

    pub fn tree(&self) -> Option<&TreeListener<M>> {
        self.tree.as_ref()
    }

    pub fn sortable(&self) -> Option<&SortableListener<M>> {
        self.sortable.as_ref()
    }
}

#[derive(Clone, Debug)]
struct Entry<M> {
    current: M,
    original: Option<M>,
}

/// Identity map and change tracker for one model type.
///
/// Objects carry caller-assigned identifiers. After a failed flush the
/// in-memory state may already hold shifted values; call [`Session::clear`]
/// before reusing the session.
#[derive(Clone, Debug)]
pub struct Session<M: Managed> {
    identity_map: BTreeMap<FieldValue, Entry<M>>,
    insertions: Vec<FieldValue>,
    deletions: Vec<FieldValue>,
}

impl<M: Managed> Default for Session<M> {
    fn default() -> Self {
        Self {
            identity_map: BTreeMap::new(),
            insertions: Vec::new(),
            deletions: Vec::new(),
        }
    }
}

impl<M: Managed> Session<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a new object for insertion, or replace the state of a managed one.
    pub fn persist(&mut self, object: M) -> Result<FieldValue, BehaviorError> {
        let id = object.identifier();
        if id.is_null() {
            return Err(BehaviorError::invalid_argument(format!(
                "cannot persist a `{}` without an identifier",
                M::collection()
            )));
        }
        match self.identity_map.get_mut(&id) {
            Some(entry) => entry.current = object,
            None => {
                self.identity_map.insert(
                    id.clone(),
                    Entry {
                        current: object,
                        original: None,
                    },
                );
                self.insertions.push(id.clone());
            }
        }
        Ok(id)
    }

    /// Schedule deletion. A pending insertion is simply forgotten.
    pub fn remove(&mut self, id: &FieldValue) {
        if let Some(slot) = self.insertions.iter().position(|pending| pending == id) {
            self.insertions.remove(slot);
            self.identity_map.remove(id);
            return;
        }
        if !self.deletions.contains(id) {
            self.deletions.push(id.clone());
        }
    }

    pub fn get(&self, id: &FieldValue) -> Option<&M> {
        self.identity_map.get(id).map(|entry| &entry.current)
    }

    pub fn get_mut(&mut self, id: &FieldValue) -> Option<&mut M> {
        self.identity_map.get_mut(id).map(|entry| &mut entry.current)
    }

    pub fn contains(&self, id: &FieldValue) -> bool {
        self.identity_map.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.identity_map.clear();
        self.insertions.clear();
        self.deletions.clear();
    }

    pub async fn find<S>(&mut self, store: &S, id: &FieldValue) -> Result<Option<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        load_managed(self, store, id).await
    }

    /// Load matching records, keeping managed instances over stored rows.
    pub async fn find_by<S>(
        &mut self,
        store: &S,
        filter: &Filter,
        sort: &[Sort],
    ) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let rows = store.find(M::collection(), filter, sort).await?;
        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row_value(&row, M::identifier_field());
            if let Some(object) = self.get(&id) {
                objects.push(object.clone());
                continue;
            }
            let object: M = from_row(row)?;
            self.register(object.clone());
            objects.push(object);
        }
        Ok(objects)
    }

    /// Run the behaviors and write every scheduled change in one transaction.
    pub async fn flush<S>(&mut self, store: &S, behaviors: &Behaviors<M>) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut ctx = FlushContext::new();
        debug!(
            collection = M::collection(),
            insertions = self.insertions.len(),
            deletions = self.deletions.len(),
            "flush started"
        );

        let guard = LockedTransaction::begin(store).await?;
        match self.flush_in(&mut ctx, store, behaviors).await {
            Ok(()) => {
                guard
                    .commit()
                    .await
                    .map_err(BehaviorError::transaction_failed)?;
                self.settle();
                debug!(collection = M::collection(), "flush committed");
                Ok(())
            }
            Err(err) => {
                warn!(collection = M::collection(), error = %err, "flush rolled back");
                let _ = guard.rollback().await;
                if err.is_store_failure() {
                    Err(BehaviorError::transaction_failed(err))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn flush_in<S>(
        &mut self,
        ctx: &mut FlushContext,
        store: &S,
        behaviors: &Behaviors<M>,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        if let Some(listener) = &behaviors.sluggable {
            listener.on_flush(ctx, self, store).await?;
        }
        if let Some(listener) = &behaviors.tree {
            listener.on_flush(ctx, self, store).await?;
        }
        if let Some(listener) = &behaviors.sortable {
            listener.on_flush(ctx, self, store).await?;
            listener.process_relocations(ctx, self, store).await?;
        }

        self.write(store).await?;

        if let Some(listener) = &behaviors.tree {
            listener.post_persist(ctx, self, store).await?;
        }
        Ok(())
    }

    async fn write<S>(&mut self, store: &S) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let collection = M::collection();
        let id_field = M::identifier_field();

        for id in &self.insertions {
            if self.deletions.contains(id) {
                continue;
            }
            if let Some(entry) = self.identity_map.get(id) {
                store.insert(collection, to_row(&entry.current)?).await?;
            }
        }

        for id in self.scheduled_updates() {
            let assignments: Vec<Assignment> = self
                .change_set(&id)
                .iter()
                .map(|(field, change)| Assignment::Set(field.to_owned(), change.new.clone()))
                .collect();
            let filter = Filter::new().eq(id_field, id.clone());
            store.update_where(collection, &filter, &assignments).await?;
        }

        for id in &self.deletions {
            let filter = Filter::new().eq(id_field, id.clone());
            store.delete_where(collection, &filter).await?;
        }
        Ok(())
    }

    fn settle(&mut self) {
        for id in self.deletions.drain(..) {
            self.identity_map.remove(&id);
        }
        self.insertions.clear();
        for entry in self.identity_map.values_mut() {
            entry.original = Some(entry.current.clone());
        }
    }
}

impl<M: Managed> UnitOfWork<M> for Session<M> {
    fn scheduled_insertions(&self) -> Vec<FieldValue> {
        self.insertions
            .iter()
            .filter(|id| !self.deletions.contains(id))
            .cloned()
            .collect()
    }

    fn scheduled_updates(&self) -> Vec<FieldValue> {
        self.identity_map
            .iter()
            .filter(|(id, entry)| entry.original.is_some() && !self.deletions.contains(id))
            .filter(|(id, _)| !self.change_set(id).is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn scheduled_deletions(&self) -> Vec<FieldValue> {
        self.deletions.clone()
    }

    fn is_scheduled_for_insertion(&self, id: &FieldValue) -> bool {
        self.insertions.contains(id) && !self.deletions.contains(id)
    }

    fn is_scheduled_for_deletion(&self, id: &FieldValue) -> bool {
        self.deletions.contains(id)
    }

    fn object(&self, id: &FieldValue) -> Option<&M> {
        self.get(id)
    }

    fn object_mut(&mut self, id: &FieldValue) -> Option<&mut M> {
        self.get_mut(id)
    }

    fn change_set(&self, id: &FieldValue) -> ChangeSet {
        let mut changes = BTreeMap::new();
        let Some(entry) = self.identity_map.get(id) else {
            return ChangeSet { changes };
        };
        for slot in M::fields() {
            let new = slot.read(&entry.current);
            let old = entry
                .original
                .as_ref()
                .map(|original| slot.read(original))
                .unwrap_or_default();
            if old != new {
                changes.insert(slot.name(), Change { old, new });
            }
        }
        ChangeSet { changes }
    }

    fn set_original(
        &mut self,
        id: &FieldValue,
        field: &str,
        value: FieldValue,
    ) -> Result<(), BehaviorError> {
        let slot = resolve_field::<M>(field)?;
        if let Some(original) = self
            .identity_map
            .get_mut(id)
            .and_then(|entry| entry.original.as_mut())
        {
            slot.write(original, value)?;
        }
        Ok(())
    }

    fn schedule_deletion(&mut self, id: FieldValue) {
        if !self.deletions.contains(&id) {
            self.deletions.push(id);
        }
    }

    fn register(&mut self, object: M) -> FieldValue {
        let id = object.identifier();
        self.identity_map.entry(id.clone()).or_insert_with(|| Entry {
            original: Some(object.clone()),
            current: object,
        });
        id
    }

    fn detach(&mut self, id: &FieldValue) {
        self.identity_map.remove(id);
        self.insertions.retain(|pending| pending != id);
        self.deletions.retain(|pending| pending != id);
    }

    fn identities(&self) -> Vec<FieldValue> {
        self.identity_map.keys().cloned().collect()
    }
}
