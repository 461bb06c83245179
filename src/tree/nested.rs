//! Nested-set encoding: every node owns the interval `[left, right]` and the
//! intervals of its descendants nest strictly inside it.
//!
//! All structural changes go through two primitives, [`NestedSet::shift_rl`]
//! and [`NestedSet::shift_range_rl`], which update the store in bulk and
//! mirror the same predicate on the objects loaded in the unit of work.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::TreeConfig;
use crate::context::FlushContext;
use crate::error::BehaviorError;
use crate::store::{Assignment, BackingStore, Filter};
use crate::traits::{
    from_row, resolve_field, resolve_optional_field, row_value, FieldSlot, Managed,
};
use crate::tree::{Placement, Position};
use crate::uow::{assign_field, load_managed, patch_field, UnitOfWork};
use crate::value::FieldValue;

/// Interval bounds, level and root of one node as currently known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Bounds {
    pub left: i64,
    pub right: i64,
    pub level: i64,
    pub root: FieldValue,
    pub parent: FieldValue,
}

impl Bounds {
    pub fn size(&self) -> i64 {
        self.right - self.left + 1
    }

    pub fn is_unplaced(&self) -> bool {
        self.left == 0 && self.right == 0
    }
}

pub(crate) struct NestedSet<M> {
    pub(crate) left: FieldSlot<M>,
    pub(crate) right: FieldSlot<M>,
    pub(crate) level: Option<FieldSlot<M>>,
    pub(crate) root: Option<FieldSlot<M>>,
    pub(crate) parent: FieldSlot<M>,
    pub(crate) level_base: i64,
}

impl<M: Managed> NestedSet<M> {
    pub(crate) fn new(config: &TreeConfig) -> Result<Self, BehaviorError> {
        Ok(Self {
            left: resolve_field::<M>(config.left_column())?,
            right: resolve_field::<M>(config.right_column())?,
            level: resolve_optional_field::<M>(config.level_column())?,
            root: resolve_optional_field::<M>(config.root_column())?,
            parent: resolve_field::<M>(config.parent_column())?,
            level_base: config.level_base(),
        })
    }

    pub(crate) fn bounds(&self, node: &M) -> Result<Bounds, BehaviorError> {
        Ok(Bounds {
            left: self.left.read_int(node)?,
            right: self.right.read_int(node)?,
            level: match &self.level {
                Some(slot) => slot.read_int(node)?,
                None => 0,
            },
            root: self.root_of(node),
            parent: self.parent.read(node),
        })
    }

    /// Tree the node belongs to; always null without a root field.
    pub(crate) fn root_of(&self, node: &M) -> FieldValue {
        self.root
            .as_ref()
            .map(|slot| slot.read(node))
            .unwrap_or_default()
    }

    /// Restrict `filter` to one tree when trees are told apart by a root field.
    pub(crate) fn scoped(&self, filter: Filter, root: &FieldValue) -> Filter {
        match &self.root {
            Some(slot) => filter.eq(slot.name(), root.clone()),
            None => filter,
        }
    }

    pub(crate) async fn on_flush<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let insertions = uow.scheduled_insertions();
        for id in &insertions {
            assign_field(uow, id, &self.left, FieldValue::Int(0))?;
            assign_field(uow, id, &self.right, FieldValue::Int(0))?;
            if let Some(level) = &self.level {
                assign_field(uow, id, level, FieldValue::Int(self.level_base))?;
            }
            if let Some(root) = &self.root {
                assign_field(uow, id, root, FieldValue::Null)?;
            }
        }

        let mut updates = uow.scheduled_updates();
        let mut requested: Vec<FieldValue> = ctx.node_positions.keys().cloned().collect();
        requested.sort();
        for id in requested {
            if !updates.contains(&id)
                && !insertions.contains(&id)
                && !uow.is_scheduled_for_deletion(&id)
                && uow.object(&id).is_some()
            {
                updates.push(id);
            }
        }
        for id in updates {
            let moved = uow.change_set(&id).contains(self.parent.name())
                || ctx.node_positions.contains_key(&id);
            if moved {
                let placement = self.placement_for(ctx, uow, &id);
                self.schedule(ctx, uow, store, id, placement).await?;
            }
        }

        for id in uow.scheduled_deletions() {
            self.process_deletion(ctx, uow, store, &id).await?;
        }

        for id in insertions {
            if ctx.placed_nodes.contains(&id) {
                continue;
            }
            let placement = self.placement_for(ctx, uow, &id);
            self.schedule(ctx, uow, store, id, placement).await?;
        }

        if let Some((node, target)) = ctx.delayed_nodes.first_pending() {
            return Err(BehaviorError::invariant(format!(
                "node [{node}] is still waiting for [{target}] to be placed"
            )));
        }
        Ok(())
    }

    /// Explicit placement request, or first child of the parent field.
    fn placement_for(
        &self,
        ctx: &FlushContext,
        uow: &dyn UnitOfWork<M>,
        id: &FieldValue,
    ) -> Option<Placement> {
        if let Some(placement) = ctx.node_positions.get(id) {
            return Some(placement.clone());
        }
        let parent = uow.object(id).map(|node| self.parent.read(node))?;
        (!parent.is_null()).then(|| Placement::new(Position::FirstChild, parent))
    }

    /// Place `id` and then every node that was waiting on it.
    pub(crate) async fn schedule<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: FieldValue,
        placement: Option<Placement>,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut queue = VecDeque::from([(id, placement)]);
        while let Some((node, placement)) = queue.pop_front() {
            let is_new = uow.is_scheduled_for_insertion(&node);
            if self
                .update_node(ctx, uow, store, &node, placement, is_new)
                .await?
            {
                for (waiting, placement) in ctx.delayed_nodes.take(&node) {
                    queue.push_back((waiting, Some(placement)));
                }
            }
        }
        Ok(())
    }

    /// Move or insert one node. Returns `false` when the node was deferred
    /// because its target is not placed yet.
    pub(crate) async fn update_node<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
        placement: Option<Placement>,
        is_new: bool,
    ) -> Result<bool, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let node = uow
            .object(id)
            .cloned()
            .ok_or_else(|| BehaviorError::NotManaged(id.clone()))?;
        let current = self.bounds(&node)?;
        let tree_size = if is_new { 2 } else { current.size() };

        let (start, dest_root, parent, level) = match placement {
            Some(placement) => {
                if placement.target == *id {
                    return Err(BehaviorError::unexpected(format!(
                        "node [{id}] cannot be placed relative to itself"
                    )));
                }
                if ctx.is_removed(&placement.target) {
                    return Err(BehaviorError::invalid_argument(format!(
                        "node [{id}] cannot be placed next to removed node [{}]",
                        placement.target
                    )));
                }
                if uow.is_scheduled_for_insertion(&placement.target)
                    && !ctx.placed_nodes.contains(&placement.target)
                {
                    debug!(node = %id, target = %placement.target, "node placement delayed");
                    ctx.delayed_nodes.defer(id.clone(), placement);
                    return Ok(false);
                }
                let target = load_managed(uow, store, &placement.target)
                    .await?
                    .ok_or_else(|| {
                        BehaviorError::invalid_argument(format!(
                            "placement target [{}] of node [{id}] does not exist",
                            placement.target
                        ))
                    })?;
                let target = self.bounds(&target)?;

                if !is_new
                    && current.root == target.root
                    && target.left >= current.left
                    && target.right <= current.right
                {
                    return Err(BehaviorError::unexpected(format!(
                        "cannot move node [{id}] into its own subtree"
                    )));
                }

                match placement.position {
                    Position::FirstChild => (
                        target.left + 1,
                        target.root,
                        placement.target,
                        target.level + 1,
                    ),
                    Position::LastChild => (
                        target.right,
                        target.root,
                        placement.target,
                        target.level + 1,
                    ),
                    position => {
                        if self.root.is_some() && target.parent.is_null() {
                            return Err(BehaviorError::unexpected(format!(
                                "node [{id}] cannot become a sibling of root [{}]",
                                placement.target
                            )));
                        }
                        let start = if position == Position::PrevSibling {
                            target.left
                        } else {
                            target.right + 1
                        };
                        (start, target.root, target.parent, target.level)
                    }
                }
            }
            None if self.root.is_some() => (1, id.clone(), FieldValue::Null, self.level_base),
            None => {
                let edge = self.tree_edge(ctx, store).await?;
                (edge + 1, FieldValue::Null, FieldValue::Null, self.level_base)
            }
        };

        self.shift_rl(ctx, uow, store, start, tree_size, &dest_root)
            .await?;
        self.bump_edge(ctx, start + tree_size - 1);

        if is_new {
            assign_field(uow, id, &self.left, FieldValue::Int(start))?;
            assign_field(uow, id, &self.right, FieldValue::Int(start + 1))?;
            if let Some(slot) = &self.level {
                assign_field(uow, id, slot, FieldValue::Int(level))?;
            }
            if let Some(slot) = &self.root {
                assign_field(uow, id, slot, dest_root.clone())?;
            }
        } else {
            let moved = uow
                .object(id)
                .ok_or_else(|| BehaviorError::NotManaged(id.clone()))?;
            let moved = self.bounds(moved)?;
            self.shift_range_rl(
                ctx,
                uow,
                store,
                moved.left,
                moved.right,
                start - moved.left,
                &moved.root,
                &dest_root,
                level - moved.level,
            )
            .await?;
            self.shift_rl(ctx, uow, store, moved.left, -tree_size, &moved.root)
                .await?;
        }
        assign_field(uow, id, &self.parent, parent)?;

        ctx.placed_nodes.insert(id.clone());
        debug!(
            collection = M::collection(),
            node = %id,
            left = start,
            size = tree_size,
            "node placed"
        );
        Ok(true)
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
        if ctx.is_removed(id) {
            return Ok(());
        }
        let Some(node) = load_managed(uow, store, id).await? else {
            return Ok(());
        };
        let bounds = self.bounds(&node)?;
        if bounds.is_unplaced() {
            return Ok(());
        }

        let removed: Vec<FieldValue> = ctx.removed_nodes.iter().cloned().collect();
        let filter = self
            .scoped(Filter::new(), &bounds.root)
            .gt(self.left.name(), bounds.left)
            .lt(self.right.name(), bounds.right)
            .not_in(M::identifier_field(), removed);
        for row in store.find(M::collection(), &filter, &[]).await? {
            let descendant = row_value(&row, M::identifier_field());
            if uow.object(&descendant).is_none() {
                uow.register(from_row::<M>(row)?);
            }
            ctx.removed_nodes.insert(descendant.clone());
            uow.schedule_deletion(descendant);
        }
        ctx.removed_nodes.insert(id.clone());

        self.shift_rl(
            ctx,
            uow,
            store,
            bounds.right + 1,
            -bounds.size(),
            &bounds.root,
        )
        .await?;
        debug!(collection = M::collection(), node = %id, size = bounds.size(), "subtree removed");
        Ok(())
    }

    /// Add `delta` to every left and right bound `>= first` within `root`.
    pub(crate) async fn shift_rl<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        first: i64,
        delta: i64,
        root: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        for slot in [&self.left, &self.right] {
            let filter = self.scoped(Filter::new(), root).gte(slot.name(), first);
            store
                .bulk_shift(M::collection(), slot.name(), delta, &filter)
                .await?;
        }

        for id in uow.identities() {
            if ctx.is_removed(&id) {
                continue;
            }
            let Some(node) = uow.object(&id) else {
                continue;
            };
            if self.root.is_some() && self.root_of(node) != *root {
                continue;
            }
            let left = self.left.read_int(node)?;
            let right = self.right.read_int(node)?;
            if left >= first {
                patch_field(uow, &id, &self.left, FieldValue::Int(left + delta))?;
            }
            if right >= first {
                patch_field(uow, &id, &self.right, FieldValue::Int(right + delta))?;
            }
        }

        if self.root.is_none() {
            if let Some(edge) = ctx.tree_edges.get_mut(M::collection()) {
                if *edge >= first {
                    *edge += delta;
                }
            }
        }
        debug!(collection = M::collection(), first, delta, root = %root, "bounds shifted");
        Ok(())
    }

    /// Translate the nodes inside `[first, last]` by `delta`, moving them to
    /// `dest_root` and changing their level by `level_delta`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn shift_range_rl<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        first: i64,
        last: i64,
        delta: i64,
        root: &FieldValue,
        dest_root: &FieldValue,
        level_delta: i64,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut assignments = vec![
            Assignment::Increment(self.left.name().to_owned(), delta),
            Assignment::Increment(self.right.name().to_owned(), delta),
        ];
        if let Some(slot) = &self.level {
            if level_delta != 0 {
                assignments.push(Assignment::Increment(slot.name().to_owned(), level_delta));
            }
        }
        let reroot = self.root.as_ref().filter(|_| dest_root != root);
        if let Some(slot) = reroot {
            assignments.push(Assignment::Set(slot.name().to_owned(), dest_root.clone()));
        }
        let filter = self
            .scoped(Filter::new(), root)
            .gte(self.left.name(), first)
            .lte(self.right.name(), last);
        store
            .update_where(M::collection(), &filter, &assignments)
            .await?;

        for id in uow.identities() {
            if ctx.is_removed(&id) {
                continue;
            }
            let Some(node) = uow.object(&id) else {
                continue;
            };
            if self.root.is_some() && self.root_of(node) != *root {
                continue;
            }
            let bounds = self.bounds(node)?;
            if bounds.left < first || bounds.right > last || bounds.is_unplaced() {
                continue;
            }
            patch_field(uow, &id, &self.left, FieldValue::Int(bounds.left + delta))?;
            patch_field(uow, &id, &self.right, FieldValue::Int(bounds.right + delta))?;
            if let Some(slot) = &self.level {
                patch_field(uow, &id, slot, FieldValue::Int(bounds.level + level_delta))?;
            }
            if let Some(slot) = reroot {
                patch_field(uow, &id, slot, dest_root.clone())?;
            }
        }
        debug!(
            collection = M::collection(),
            first,
            last,
            delta,
            level_delta,
            "range shifted"
        );
        Ok(())
    }

    /// Greatest right bound of the collection, cached for the flush.
    pub(crate) async fn tree_edge<S>(
        &self,
        ctx: &mut FlushContext,
        store: &S,
    ) -> Result<i64, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        if let Some(edge) = ctx.tree_edges.get(M::collection()) {
            return Ok(*edge);
        }
        let edge = self.max_right(ctx, store, &FieldValue::Null).await?;
        ctx.tree_edges.insert(M::collection(), edge);
        Ok(edge)
    }

    /// Greatest right bound within `root`, ignoring nodes removed in this flush.
    pub(crate) async fn max_right<S>(
        &self,
        ctx: &FlushContext,
        store: &S,
        root: &FieldValue,
    ) -> Result<i64, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let removed: Vec<FieldValue> = ctx.removed_nodes.iter().cloned().collect();
        let filter = self
            .scoped(Filter::new(), root)
            .not_in(M::identifier_field(), removed);
        Ok(store
            .max_value(M::collection(), self.right.name(), &filter)
            .await?
            .unwrap_or(0))
    }

    fn bump_edge(&self, ctx: &mut FlushContext, right: i64) {
        if self.root.is_some() {
            return;
        }
        if let Some(edge) = ctx.tree_edges.get_mut(M::collection()) {
            *edge = (*edge).max(right);
        }
    }
}
