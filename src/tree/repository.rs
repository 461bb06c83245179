use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::context::FlushContext;
use crate::error::BehaviorError;
use crate::lock::LockedTransaction;
use crate::store::{Assignment, BackingStore, Filter, Sort};
use crate::traits::{from_row, row_int, row_value, Managed, Row};
use crate::tree::nested::NestedSet;
use crate::tree::{Placement, Position, Strategy, TreeListener};
use crate::uow::{patch_field, require_managed, Session, UnitOfWork};
use crate::value::FieldValue;

/// How far `move_up` / `move_down` go.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Steps {
    By(usize),
    All,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = BehaviorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            _ => Err(BehaviorError::invalid_argument(format!(
                "invalid sort direction `{value}`, expected ASC or DESC"
            ))),
        }
    }
}

/// Structural problems found by [`NestedTreeRepository::verify`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    errors: Vec<String>,
}

impl VerifyReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("tree is valid");
        }
        f.write_str(&self.errors.join("\n"))
    }
}

/// Caller-facing operations on a nested-set tree.
///
/// Mutating operations run in their own store transaction and keep the
/// objects loaded in the unit of work in step with the store.
pub struct NestedTreeRepository<'l, M: Managed> {
    listener: &'l TreeListener<M>,
    nested: &'l NestedSet<M>,
}

impl<'l, M: Managed> NestedTreeRepository<'l, M> {
    pub fn new(listener: &'l TreeListener<M>) -> Result<Self, BehaviorError> {
        match listener.strategy() {
            Strategy::Nested(nested) => Ok(Self { listener, nested }),
            _ => Err(BehaviorError::configuration(format!(
                "`{}` is not configured as a nested-set tree",
                M::collection()
            ))),
        }
    }

    pub fn persist_as_first_child_of(
        &self,
        session: &mut Session<M>,
        node: M,
        parent: &FieldValue,
    ) -> Result<FieldValue, BehaviorError> {
        self.persist_as(session, node, Position::FirstChild, parent)
    }

    pub fn persist_as_last_child_of(
        &self,
        session: &mut Session<M>,
        node: M,
        parent: &FieldValue,
    ) -> Result<FieldValue, BehaviorError> {
        self.persist_as(session, node, Position::LastChild, parent)
    }

    pub fn persist_as_prev_sibling_of(
        &self,
        session: &mut Session<M>,
        node: M,
        sibling: &FieldValue,
    ) -> Result<FieldValue, BehaviorError> {
        self.persist_as(session, node, Position::PrevSibling, sibling)
    }

    pub fn persist_as_next_sibling_of(
        &self,
        session: &mut Session<M>,
        node: M,
        sibling: &FieldValue,
    ) -> Result<FieldValue, BehaviorError> {
        self.persist_as(session, node, Position::NextSibling, sibling)
    }

    fn persist_as(
        &self,
        session: &mut Session<M>,
        node: M,
        position: Position,
        target: &FieldValue,
    ) -> Result<FieldValue, BehaviorError> {
        let id = session.persist(node)?;
        self.listener
            .place(id.clone(), Placement::new(position, target.clone()));
        Ok(id)
    }

    /// Direct children (or all descendants) of `node`; roots when `node` is
    /// `None` and `direct` is set, the whole collection otherwise.
    pub async fn children<S>(
        &self,
        store: &S,
        node: Option<&M>,
        direct: bool,
    ) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let filter = self.children_filter(node, direct)?;
        let rows = store
            .find(M::collection(), &filter, &self.tree_order())
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn child_count<S>(
        &self,
        store: &S,
        node: Option<&M>,
        direct: bool,
    ) -> Result<u64, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let filter = self.children_filter(node, direct)?;
        store.count(M::collection(), &filter).await
    }

    /// Ancestors of `node` from its root down to `node` itself.
    pub async fn path<S>(&self, store: &S, node: &M) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let bounds = self.nested.bounds(node)?;
        let filter = self
            .nested
            .scoped(Filter::new(), &bounds.root)
            .lte(self.nested.left.name(), bounds.left)
            .gte(self.nested.right.name(), bounds.right);
        let rows = store
            .find(M::collection(), &filter, &[Sort::asc(self.nested.left.name())])
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn roots<S>(&self, store: &S) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        self.children(store, None, true).await
    }

    pub async fn next_siblings<S>(&self, store: &S, node: &M) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let rows = self.sibling_rows(store, node, false).await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Previous siblings, nearest first.
    pub async fn prev_siblings<S>(&self, store: &S, node: &M) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let rows = self.sibling_rows(store, node, true).await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn move_up<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
        steps: Steps,
    ) -> Result<bool, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let guard = LockedTransaction::begin(store).await?;
        let mut ctx = FlushContext::new();
        let result = self.shift_among_siblings(&mut ctx, uow, store, id, steps, true).await;
        finish(guard, result).await
    }

    pub async fn move_down<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
        steps: Steps,
    ) -> Result<bool, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let guard = LockedTransaction::begin(store).await?;
        let mut ctx = FlushContext::new();
        let result = self.shift_among_siblings(&mut ctx, uow, store, id, steps, false).await;
        finish(guard, result).await
    }

    /// Delete a node but keep its descendants, which move up one level.
    pub async fn remove_from_tree<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let guard = LockedTransaction::begin(store).await?;
        let mut ctx = FlushContext::new();
        let result = self.remove_from_tree_in(&mut ctx, uow, store, id).await;
        finish(guard, result).await
    }

    /// Sort the children of `node` (every tree when `None`) by `field`,
    /// recursively. Returns `false` without touching anything when `verify`
    /// is set and the tree is broken.
    pub async fn reorder<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        node: Option<&FieldValue>,
        field: &str,
        direction: SortDirection,
        verify: bool,
    ) -> Result<bool, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        if verify && !self.verify(store).await?.is_valid() {
            return Ok(false);
        }
        let guard = LockedTransaction::begin(store).await?;
        let mut ctx = FlushContext::new();
        let result = self
            .reorder_in(&mut ctx, uow, store, node, field, direction)
            .await
            .map(|()| true);
        finish(guard, result).await
    }

    /// Check every tree of the collection.
    pub async fn verify<S>(&self, store: &S) -> Result<VerifyReport, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let rows = self.all_rows(store).await?;
        let by_id: HashMap<FieldValue, &Row> = rows
            .iter()
            .map(|row| (row_value(row, M::identifier_field()), row))
            .collect();
        let mut errors = Vec::new();

        for (root, scope) in self.scopes(&rows) {
            let suffix = match &self.nested.root {
                Some(_) => format!(" on tree root: {root}"),
                None => String::new(),
            };

            let mut seen: BTreeMap<i64, usize> = BTreeMap::new();
            for row in &scope {
                *seen.entry(self.left_of(row)).or_default() += 1;
                *seen.entry(self.right_of(row)).or_default() += 1;
            }
            for index in 1..=(scope.len() as i64 * 2) {
                match seen.get(&index).copied().unwrap_or(0) {
                    1 => {}
                    0 => errors.push(format!("index [{index}], missing{suffix}")),
                    _ => errors.push(format!("index [{index}], duplicate{suffix}")),
                }
            }

            for row in &scope {
                let id = row_value(row, M::identifier_field());
                let left = self.left_of(row);
                let right = self.right_of(row);
                if left >= right {
                    errors.push(format!("node [{id}], left is greater than right{suffix}"));
                }
                let parent_id = row_value(row, self.nested.parent.name());
                if parent_id.is_null() {
                    continue;
                }
                let Some(parent) = by_id.get(&parent_id) else {
                    errors.push(format!("node [{id}] has missing parent{suffix}"));
                    continue;
                };
                if left < self.left_of(parent) {
                    errors.push(format!(
                        "node [{id}] left is less than parent`s [{parent_id}] left value{suffix}"
                    ));
                }
                if right > self.right_of(parent) {
                    errors.push(format!(
                        "node [{id}] right is greater than parent`s [{parent_id}] right value{suffix}"
                    ));
                }
                if let Some(level) = &self.nested.level {
                    let expected = row_int(parent, level.name()) + 1;
                    let actual = row_int(row, level.name());
                    if expected != actual {
                        errors.push(format!(
                            "node [{id}] should be on level position [{expected}], but actually is on [{actual}]{suffix}"
                        ));
                    }
                }
            }
        }
        Ok(VerifyReport { errors })
    }

    /// Rebuild left, right and level of every tree from the parent field.
    /// Siblings keep their current relative order; nodes whose parent is
    /// missing become roots.
    pub async fn recover<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let guard = LockedTransaction::begin(store).await?;
        let result = self.recover_in(uow, store).await;
        finish(guard, result).await
    }

    async fn shift_among_siblings<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
        steps: Steps,
        upwards: bool,
    ) -> Result<bool, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let node = require_managed(uow, store, id).await?;
        let siblings = self.sibling_rows(store, &node, upwards).await?;
        let index = match steps {
            Steps::By(0) => return Ok(false),
            Steps::By(count) => count.min(siblings.len()),
            Steps::All => siblings.len(),
        };
        let Some(target) = index.checked_sub(1).and_then(|index| siblings.get(index)) else {
            return Ok(false);
        };
        let position = if upwards {
            Position::PrevSibling
        } else {
            Position::NextSibling
        };
        let placement = Placement::new(position, row_value(target, M::identifier_field()));
        self.nested
            .update_node(ctx, uow, store, id, Some(placement), false)
            .await?;
        self.persist_parent(uow, store, id).await?;
        Ok(true)
    }

    async fn remove_from_tree_in<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let node = require_managed(uow, store, id).await?;
        let bounds = self.nested.bounds(&node)?;
        let by_id = Filter::new().eq(M::identifier_field(), id.clone());

        if bounds.right == bounds.left + 1 {
            store.delete_where(M::collection(), &by_id).await?;
            ctx.removed_nodes.insert(id.clone());
            self.nested
                .shift_rl(ctx, uow, store, bounds.right, -2, &bounds.root)
                .await?;
            uow.detach(id);
            debug!(collection = M::collection(), node = %id, "leaf removed from tree");
            return Ok(());
        }

        let children_filter = Filter::new().eq(self.nested.parent.name(), id.clone());
        let children = store
            .find(
                M::collection(),
                &children_filter,
                &[Sort::asc(self.nested.left.name())],
            )
            .await?;

        if self.nested.root.is_some() && bounds.parent.is_null() {
            for child in &children {
                let child_id = row_value(child, M::identifier_field());
                let left = self.left_of(child);
                let right = self.right_of(child);
                self.nested
                    .shift_range_rl(
                        ctx,
                        uow,
                        store,
                        left,
                        right,
                        -(left - 1),
                        &bounds.root,
                        &child_id,
                        -1,
                    )
                    .await?;
            }
            self.reparent_children(uow, store, id, &FieldValue::Null)
                .await?;
        } else {
            self.reparent_children(uow, store, id, &bounds.parent)
                .await?;
            self.nested
                .shift_range_rl(
                    ctx,
                    uow,
                    store,
                    bounds.left,
                    bounds.right,
                    -1,
                    &bounds.root,
                    &bounds.root,
                    -1,
                )
                .await?;
            ctx.removed_nodes.insert(id.clone());
            self.nested
                .shift_rl(ctx, uow, store, bounds.right, -2, &bounds.root)
                .await?;
        }

        store.delete_where(M::collection(), &by_id).await?;
        uow.detach(id);
        debug!(
            collection = M::collection(),
            node = %id,
            children = children.len(),
            "node removed from tree"
        );
        Ok(())
    }

    async fn reparent_children<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
        parent: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let slot = &self.nested.parent;
        store
            .update_where(
                M::collection(),
                &Filter::new().eq(slot.name(), id.clone()),
                &[Assignment::Set(slot.name().to_owned(), parent.clone())],
            )
            .await?;
        for managed in uow.identities() {
            let is_child = uow
                .object(&managed)
                .is_some_and(|object| slot.read(object) == *id);
            if is_child {
                patch_field(uow, &managed, slot, parent.clone())?;
            }
        }
        Ok(())
    }

    /// Write the parent chosen by a sibling move straight to the store.
    async fn persist_parent<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let slot = &self.nested.parent;
        let Some(parent) = uow.object(id).map(|node| slot.read(node)) else {
            return Ok(());
        };
        store
            .update_where(
                M::collection(),
                &Filter::new().eq(M::identifier_field(), id.clone()),
                &[Assignment::Set(slot.name().to_owned(), parent.clone())],
            )
            .await?;
        patch_field(uow, id, slot, parent)
    }

    async fn reorder_in<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        node: Option<&FieldValue>,
        field: &str,
        direction: SortDirection,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut pending: Vec<FieldValue> = match node {
            Some(id) => vec![id.clone()],
            None => {
                let roots = Filter::new().eq(self.nested.parent.name(), FieldValue::Null);
                store
                    .find(M::collection(), &roots, &self.tree_order())
                    .await?
                    .iter()
                    .map(|row| row_value(row, M::identifier_field()))
                    .collect()
            }
        };
        let order = match direction {
            SortDirection::Asc => Sort::asc(field),
            SortDirection::Desc => Sort::desc(field),
        };

        while let Some(parent) = pending.pop() {
            let filter = Filter::new().eq(self.nested.parent.name(), parent.clone());
            let children = store
                .find(M::collection(), &filter, &[order.clone()])
                .await?;
            for child in &children {
                let child_id = row_value(child, M::identifier_field());
                self.shift_among_siblings(ctx, uow, store, &child_id, Steps::All, false)
                    .await?;
                if self.right_of(child) - self.left_of(child) > 1 {
                    pending.push(child_id);
                }
            }
            debug!(collection = M::collection(), parent = %parent, "children reordered");
        }
        Ok(())
    }

    async fn recover_in<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let rows = self.all_rows(store).await?;
        let mut repaired = 0usize;

        for (_, scope) in self.scopes(&rows) {
            let ids: BTreeSet<FieldValue> = scope
                .iter()
                .map(|row| row_value(row, M::identifier_field()))
                .collect();
            let mut roots = Vec::new();
            let mut children: HashMap<FieldValue, Vec<FieldValue>> = HashMap::new();
            let mut current: HashMap<FieldValue, (i64, i64, i64)> = HashMap::new();
            for row in &scope {
                let id = row_value(row, M::identifier_field());
                let parent = row_value(row, self.nested.parent.name());
                let level = self
                    .nested
                    .level
                    .as_ref()
                    .map(|slot| row_int(row, slot.name()))
                    .unwrap_or(0);
                current.insert(id.clone(), (self.left_of(row), self.right_of(row), level));
                if parent.is_null() || !ids.contains(&parent) || parent == id {
                    roots.push(id);
                } else {
                    children.entry(parent).or_default().push(id);
                }
            }

            let mut counter = 1;
            let mut computed: Vec<(FieldValue, i64, i64, i64)> = Vec::new();
            let mut stack: Vec<(FieldValue, i64, Option<usize>)> = roots
                .into_iter()
                .rev()
                .map(|id| (id, self.nested.level_base, None))
                .collect();
            while let Some((id, level, slot)) = stack.pop() {
                match slot {
                    None => {
                        computed.push((id.clone(), counter, 0, level));
                        let index = computed.len() - 1;
                        counter += 1;
                        stack.push((id.clone(), level, Some(index)));
                        if let Some(kids) = children.get(&id) {
                            for kid in kids.iter().rev() {
                                stack.push((kid.clone(), level + 1, None));
                            }
                        }
                    }
                    Some(index) => {
                        computed[index].2 = counter;
                        counter += 1;
                    }
                }
            }

            for (id, left, right, level) in computed {
                if current.get(&id) == Some(&(left, right, level)) {
                    continue;
                }
                self.write_bounds(uow, store, &id, left, right, level).await?;
                repaired += 1;
            }
        }
        debug!(collection = M::collection(), repaired, "tree recovered");
        Ok(())
    }

    async fn write_bounds<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
        left: i64,
        right: i64,
        level: i64,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut assignments = vec![
            Assignment::Set(self.nested.left.name().to_owned(), FieldValue::Int(left)),
            Assignment::Set(self.nested.right.name().to_owned(), FieldValue::Int(right)),
        ];
        if let Some(slot) = &self.nested.level {
            assignments.push(Assignment::Set(slot.name().to_owned(), FieldValue::Int(level)));
        }
        store
            .update_where(
                M::collection(),
                &Filter::new().eq(M::identifier_field(), id.clone()),
                &assignments,
            )
            .await?;

        patch_field(uow, id, &self.nested.left, FieldValue::Int(left))?;
        patch_field(uow, id, &self.nested.right, FieldValue::Int(right))?;
        if let Some(slot) = &self.nested.level {
            patch_field(uow, id, slot, FieldValue::Int(level))?;
        }
        Ok(())
    }

    fn children_filter(&self, node: Option<&M>, direct: bool) -> Result<Filter, BehaviorError> {
        let parent = self.nested.parent.name();
        let Some(node) = node else {
            return Ok(if direct {
                Filter::new().eq(parent, FieldValue::Null)
            } else {
                Filter::new()
            });
        };
        if direct {
            return Ok(Filter::new().eq(parent, node.identifier()));
        }
        let bounds = self.nested.bounds(node)?;
        Ok(self
            .nested
            .scoped(Filter::new(), &bounds.root)
            .gt(self.nested.left.name(), bounds.left)
            .lt(self.nested.right.name(), bounds.right))
    }

    /// Siblings of `node` on the `before` (or after) side, nearest first.
    /// Roots have no siblings when every root owns its own tree.
    async fn sibling_rows<S>(
        &self,
        store: &S,
        node: &M,
        before: bool,
    ) -> Result<Vec<Row>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let bounds = self.nested.bounds(node)?;
        if self.nested.root.is_some() && bounds.parent.is_null() {
            return Ok(Vec::new());
        }
        let left = self.nested.left.name();
        let filter = self
            .nested
            .scoped(Filter::new(), &bounds.root)
            .eq(self.nested.parent.name(), bounds.parent.clone());
        let (filter, order) = if before {
            (filter.lt(left, bounds.left), Sort::desc(left))
        } else {
            (filter.gt(left, bounds.right), Sort::asc(left))
        };
        store.find(M::collection(), &filter, &[order]).await
    }

    async fn all_rows<S>(&self, store: &S) -> Result<Vec<Row>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        store
            .find(M::collection(), &Filter::new(), &self.tree_order())
            .await
    }

    /// Rows grouped by tree, in first-seen order.
    fn scopes<'r>(&self, rows: &'r [Row]) -> Vec<(FieldValue, Vec<&'r Row>)> {
        let mut scopes: Vec<(FieldValue, Vec<&'r Row>)> = Vec::new();
        for row in rows {
            let root = match &self.nested.root {
                Some(slot) => row_value(row, slot.name()),
                None => FieldValue::Null,
            };
            match scopes.iter_mut().find(|(key, _)| *key == root) {
                Some((_, members)) => members.push(row),
                None => scopes.push((root, vec![row])),
            }
        }
        scopes
    }

    fn tree_order(&self) -> Vec<Sort> {
        let mut order = Vec::with_capacity(3);
        if let Some(slot) = &self.nested.root {
            order.push(Sort::asc(slot.name()));
        }
        order.push(Sort::asc(self.nested.left.name()));
        order.push(Sort::asc(M::identifier_field()));
        order
    }

    fn left_of(&self, row: &Row) -> i64 {
        row_int(row, self.nested.left.name())
    }

    fn right_of(&self, row: &Row) -> i64 {
        row_int(row, self.nested.right.name())
    }
}

/// Commit on success; roll back and wrap the cause otherwise.
pub(crate) async fn finish<S, T>(
    guard: LockedTransaction<'_, S>,
    result: Result<T, BehaviorError>,
) -> Result<T, BehaviorError>
where
    S: BackingStore + ?Sized,
{
    match result {
        Ok(value) => {
            guard
                .commit()
                .await
                .map_err(BehaviorError::transaction_failed)?;
            Ok(value)
        }
        Err(err) => {
            warn!(error = %err, "tree operation rolled back");
            let _ = guard.rollback().await;
            Err(BehaviorError::transaction_failed(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_direction_parses_case_insensitively() {
        assert_eq!("asc".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert_eq!("DESC".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert!(matches!(
            "sideways".parse::<SortDirection>(),
            Err(BehaviorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn report_lists_errors_line_by_line() {
        let report = VerifyReport {
            errors: vec!["index [3], missing".into(), "index [4], duplicate".into()],
        };
        assert!(!report.is_valid());
        assert_eq!(report.to_string(), "index [3], missing\nindex [4], duplicate");
        assert_eq!(VerifyReport::default().to_string(), "tree is valid");
    }
}
