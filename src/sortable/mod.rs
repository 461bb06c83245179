//! Contiguous zero-based positions inside groups.
//!
//! Every insert, move and delete of a flush is translated into shifts on a
//! per-group [`Relocations`] ledger. Objects the flush writes itself follow the
//! ledger eagerly; every other record is shifted in bulk by
//! [`SortableListener::process_relocations`] once the structural work is done.

pub mod group;
pub mod ledger;

pub use group::GroupKey;
pub use ledger::{Delta, MaxPositions, RelocationBucket, RelocationScope, Relocations};

use tracing::debug;

use crate::config::SortableConfig;
use crate::context::FlushContext;
use crate::error::BehaviorError;
use crate::store::{BackingStore, Filter};
use crate::traits::{resolve_field, FieldSlot, Managed};
use crate::uow::{assign_field, patch_field, ChangeSet, UnitOfWork};
use crate::value::FieldValue;

pub struct SortableListener<M> {
    config: SortableConfig,
    position: FieldSlot<M>,
    groups: Vec<FieldSlot<M>>,
}

impl<M: Managed> SortableListener<M> {
    pub fn new(config: SortableConfig) -> Result<Self, BehaviorError> {
        let position = resolve_field::<M>(config.position_column())?;
        let groups = config
            .group_columns()
            .iter()
            .map(|name| resolve_field::<M>(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            position,
            groups,
        })
    }

    pub fn config(&self) -> &SortableConfig {
        &self.config
    }

    /// Compute positions for every scheduled change and queue the shifts they
    /// cause for the other members of the group.
    pub async fn on_flush<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        for id in uow.scheduled_deletions() {
            self.process_deletion(ctx, uow, store, &id).await?;
        }
        for id in uow.scheduled_updates() {
            self.process_update(ctx, uow, store, &id).await?;
        }
        for id in uow.scheduled_insertions() {
            self.process_insertion(ctx, uow, store, &id).await?;
        }
        Ok(())
    }

    /// Apply the queued shifts to the store and to loaded objects, then drop
    /// the ledger.
    pub async fn process_relocations<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let position = self.position.name();
        for bucket in ctx.relocations.buckets() {
            let peak = ctx.max_positions.peak(bucket.key()).unwrap_or(i64::MAX);
            for delta in bucket.deltas() {
                if delta.delta() == 0 || delta.start() > peak {
                    continue;
                }
                let mut filter = group_filter(bucket.groups()).gte(position, delta.start());
                if let Some(stop) = delta.stop() {
                    filter = filter.lt(position, stop);
                }
                let mut excluded: Vec<FieldValue> = bucket.touched().iter().cloned().collect();
                for id in delta.exclude() {
                    if !excluded.contains(id) {
                        excluded.push(id.clone());
                    }
                }
                filter = filter.not_in(M::identifier_field(), excluded);

                let affected = store
                    .bulk_shift(bucket.collection(), position, delta.delta(), &filter)
                    .await?;
                debug!(
                    group = %bucket.key(),
                    start = delta.start(),
                    stop = ?delta.stop(),
                    delta = delta.delta(),
                    affected,
                    "relocated positions"
                );
            }

            for id in uow.identities() {
                if bucket.is_touched(&id)
                    || uow.is_scheduled_for_deletion(&id)
                    || uow.is_scheduled_for_insertion(&id)
                    || uow.change_set(&id).contains(position)
                {
                    continue;
                }
                let Some(object) = uow.object(&id) else {
                    continue;
                };
                if self.current_groups(object) != bucket.groups() {
                    continue;
                }
                let current = self.position.read_int(object)?;
                let projected = bucket.project(current, &id);
                if projected != current {
                    patch_field(uow, &id, &self.position, FieldValue::Int(projected))?;
                }
            }
        }

        ctx.relocations.clear();
        ctx.max_positions.clear();
        Ok(())
    }

    async fn process_insertion<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let Some(object) = uow.object(id).cloned() else {
            return Ok(());
        };
        let scope = self.scope(self.current_groups(&object));
        let requested = self.requested_position(&self.position.read(&object))?;
        self.enter_group(ctx, uow, store, &scope, id, requested).await
    }

    async fn process_update<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let Some(object) = uow.object(id).cloned() else {
            return Ok(());
        };
        let changes = uow.change_set(id);
        let group_changed = self
            .groups
            .iter()
            .any(|slot| changes.contains(slot.name()));
        let position_change = changes.get(self.position.name()).cloned();
        if !group_changed && position_change.is_none() {
            return Ok(());
        }

        let stored = match &position_change {
            Some(change) => change.old.as_int(),
            None => self.position.read(&object).as_int(),
        };

        if group_changed {
            let old_scope = self.scope(self.original_groups(&object, &changes));
            if let Some(stored) = stored {
                let old_max = self.max_position(ctx, store, &old_scope).await?;
                let logical = ctx.relocations.project(&old_scope.key, stored, id);
                self.register(
                    ctx,
                    uow,
                    &old_scope,
                    Delta::new(logical + 1, Some(old_max + 1), -1).excluding(id.clone()),
                )?;
                ctx.relocations.bucket_mut(&old_scope).touch(id.clone());
                ctx.max_positions.adjust(&old_scope.key, -1);
            }

            let requested = match &position_change {
                Some(change) => self.requested_position(&change.new)?,
                None => -1,
            };
            let scope = self.scope(self.current_groups(&object));
            return self
                .enter_group(ctx, uow, store, &scope, id, requested)
                .await;
        }

        let scope = self.scope(self.current_groups(&object));
        let requested = match &position_change {
            Some(change) => self.requested_position(&change.new)?,
            None => -1,
        };
        let Some(stored) = stored else {
            return self
                .enter_group(ctx, uow, store, &scope, id, requested)
                .await;
        };
        let max = self.max_position(ctx, store, &scope).await?;
        let old = ctx.relocations.project(&scope.key, stored, id);
        let mut new = requested;
        if new < 0 {
            new = (new + max + 1).max(0);
        }
        if new > max {
            new = max;
        }

        if new < old {
            self.register(
                ctx,
                uow,
                &scope,
                Delta::new(new, Some(old), 1).excluding(id.clone()),
            )?;
        } else if new > old {
            self.register(
                ctx,
                uow,
                &scope,
                Delta::new(old + 1, Some(new + 1), -1).excluding(id.clone()),
            )?;
        }

        assign_field(uow, id, &self.position, FieldValue::Int(new))?;
        let bucket = ctx.relocations.bucket_mut(&scope);
        bucket.place(id.clone());
        bucket.touch(id.clone());
        Ok(())
    }

    async fn process_deletion<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let Some(object) = uow.object(id).cloned() else {
            return Ok(());
        };
        let changes = uow.change_set(id);
        let stored = match changes.get(self.position.name()) {
            Some(change) => change.old.as_int(),
            None => self.position.read(&object).as_int(),
        };
        let Some(stored) = stored else {
            return Ok(());
        };

        let scope = self.scope(self.original_groups(&object, &changes));
        self.max_position(ctx, store, &scope).await?;
        let logical = ctx.relocations.project(&scope.key, stored, id);
        self.register(
            ctx,
            uow,
            &scope,
            Delta::new(logical, None, -1).excluding(id.clone()),
        )?;
        ctx.relocations.bucket_mut(&scope).touch(id.clone());
        ctx.max_positions.adjust(&scope.key, -1);
        Ok(())
    }

    /// Place `id` at `requested` (negative counts from the end) in a group it
    /// was not part of.
    async fn enter_group<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        scope: &RelocationScope,
        id: &FieldValue,
        requested: i64,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let max = self.max_position(ctx, store, scope).await?;
        let mut position = requested;
        if position < 0 {
            position += max + 2;
        }
        let position = position.clamp(0, max + 1);

        self.register(
            ctx,
            uow,
            scope,
            Delta::new(position, None, 1).excluding(id.clone()),
        )?;
        assign_field(uow, id, &self.position, FieldValue::Int(position))?;

        let bucket = ctx.relocations.bucket_mut(scope);
        bucket.place(id.clone());
        bucket.touch(id.clone());
        ctx.max_positions.adjust(&scope.key, 1);
        Ok(())
    }

    /// Queue a shift and apply it right away to the objects already placed in
    /// this flush.
    fn register(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        scope: &RelocationScope,
        delta: Delta,
    ) -> Result<(), BehaviorError> {
        let bucket = ctx.relocations.bucket_mut(scope);
        for id in bucket.placed().to_vec() {
            let Some(object) = uow.object(&id) else {
                continue;
            };
            let current = self.position.read_int(object)?;
            if delta.applies_to(current, &id) {
                assign_field(
                    uow,
                    &id,
                    &self.position,
                    FieldValue::Int(current + delta.delta()),
                )?;
            }
        }
        bucket.add(delta);
        Ok(())
    }

    async fn max_position<S>(
        &self,
        ctx: &mut FlushContext,
        store: &S,
        scope: &RelocationScope,
    ) -> Result<i64, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        if let Some(max) = ctx.max_positions.get(&scope.key) {
            return Ok(max);
        }
        let max = store
            .max_value(
                M::collection(),
                self.position.name(),
                &group_filter(&scope.groups),
            )
            .await?
            .unwrap_or(-1);
        ctx.max_positions.seed(scope.key.clone(), max);
        Ok(max)
    }

    fn requested_position(&self, value: &FieldValue) -> Result<i64, BehaviorError> {
        match value {
            FieldValue::Null => Ok(-1),
            FieldValue::Int(position) => Ok(*position),
            other => Err(BehaviorError::unexpected(format!(
                "position `{}` holds {other:?}",
                self.position.name()
            ))),
        }
    }

    fn scope(&self, groups: Vec<(String, FieldValue)>) -> RelocationScope {
        RelocationScope {
            key: GroupKey::new(M::collection(), &groups),
            collection: M::collection().to_string(),
            position_field: self.position.name().to_string(),
            groups,
        }
    }

    fn current_groups(&self, object: &M) -> Vec<(String, FieldValue)> {
        self.groups
            .iter()
            .map(|slot| (slot.name().to_string(), slot.read(object)))
            .collect()
    }

    fn original_groups(&self, object: &M, changes: &ChangeSet) -> Vec<(String, FieldValue)> {
        self.groups
            .iter()
            .map(|slot| {
                let value = match changes.get(slot.name()) {
                    Some(change) => change.old.clone(),
                    None => slot.read(object),
                };
                (slot.name().to_string(), value)
            })
            .collect()
    }
}

fn group_filter(groups: &[(String, FieldValue)]) -> Filter {
    groups
        .iter()
        .fold(Filter::new(), |filter, (field, value)| {
            filter.eq(field.as_str(), value.clone())
        })
}
