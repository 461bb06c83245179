//! Closure-table encoding: one `(ancestor, descendant, generations)` row per
//! pair of related nodes, including the zero-generation self row.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::TreeConfig;
use crate::context::{FlushContext, PendingHierarchy};
use crate::error::BehaviorError;
use crate::store::{Assignment, BackingStore, Filter, Sort};
use crate::traits::{
    from_row, resolve_field, resolve_optional_field, row_int, row_value, FieldSlot, Managed, Row,
};
use crate::tree::{Strategy, TreeListener};
use crate::uow::{load_managed, patch_field, UnitOfWork};
use crate::value::FieldValue;

pub(crate) struct ClosureTable<M> {
    parent: FieldSlot<M>,
    level: Option<FieldSlot<M>>,
    level_base: i64,
    table: String,
    ancestor: String,
    descendant: String,
    generations: String,
}

impl<M: Managed> ClosureTable<M> {
    pub(crate) fn new(config: &TreeConfig) -> Result<Self, BehaviorError> {
        Ok(Self {
            parent: resolve_field::<M>(config.parent_column())?,
            level: resolve_optional_field::<M>(config.level_column())?,
            level_base: config.level_base(),
            table: config.hierarchy_table(M::collection()),
            ancestor: config.ancestor_column().to_owned(),
            descendant: config.descendant_column().to_owned(),
            generations: config.generations_column().to_owned(),
        })
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
        for id in uow.scheduled_insertions() {
            let Some(parent) = uow.object(&id).map(|node| self.parent.read(node)) else {
                continue;
            };
            if let Some(slot) = &self.level {
                let level = self.level_under(uow, store, &id, &parent).await?;
                patch_field(uow, &id, slot, FieldValue::Int(level))?;
            }
            ctx.pending_hierarchy.push(PendingHierarchy::Insert {
                node: id,
                parent: (!parent.is_null()).then_some(parent),
            });
        }

        for id in uow.scheduled_updates() {
            let Some(change) = uow.change_set(&id).get(self.parent.name()).cloned() else {
                continue;
            };
            self.process_move(ctx, uow, store, &id, &change.new).await?;
        }

        for id in uow.scheduled_deletions() {
            let subtree = self.subtree(store, &id).await?;
            let members: Vec<FieldValue> = subtree.iter().map(|(node, _)| node.clone()).collect();
            for (node, generations) in subtree {
                if generations == 0 || uow.is_scheduled_for_deletion(&node) {
                    continue;
                }
                load_managed(uow, store, &node).await?;
                uow.schedule_deletion(node);
            }
            store
                .delete_where(&self.table, &Filter::new().is_in(&self.descendant, members))
                .await?;
            debug!(collection = M::collection(), node = %id, "hierarchy rows removed");
        }
        Ok(())
    }

    async fn process_move<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
        parent: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let pending_parent = !parent.is_null() && uow.is_scheduled_for_insertion(parent);
        if !parent.is_null() && !pending_parent && self.is_ancestor(store, id, parent).await? {
            return Err(BehaviorError::unexpected(format!(
                "cannot move node [{id}] under its own descendant [{parent}]"
            )));
        }

        if let Some(slot) = &self.level {
            let old = uow
                .object(id)
                .map(|node| slot.read_int(node))
                .transpose()?
                .unwrap_or(self.level_base);
            let new = self.level_under(uow, store, id, parent).await?;
            if new != old {
                self.shift_levels(uow, store, id, new - old).await?;
            }
        }

        if pending_parent {
            ctx.pending_hierarchy.push(PendingHierarchy::Move {
                node: id.clone(),
                parent: parent.clone(),
            });
        } else {
            let parent = (!parent.is_null()).then_some(parent);
            self.move_rows(store, id, parent).await?;
        }
        Ok(())
    }

    /// Write the rows that need the node rows of this flush.
    pub(crate) async fn post_persist<S>(
        &self,
        ctx: &mut FlushContext,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut inserts = Vec::new();
        let mut moves = Vec::new();
        for pending in std::mem::take(&mut ctx.pending_hierarchy) {
            match pending {
                PendingHierarchy::Insert { node, parent } => inserts.push((node, parent)),
                PendingHierarchy::Move { node, parent } => moves.push((node, parent)),
            }
        }

        while !inserts.is_empty() {
            let unwritten: BTreeSet<FieldValue> =
                inserts.iter().map(|(node, _)| node.clone()).collect();
            let (ready, blocked): (Vec<_>, Vec<_>) = inserts
                .into_iter()
                .partition(|(_, parent)| parent.as_ref().map_or(true, |p| !unwritten.contains(p)));
            if ready.is_empty() {
                return Err(BehaviorError::invariant(format!(
                    "hierarchy of `{}` contains a parent cycle",
                    M::collection()
                )));
            }
            for (node, parent) in ready {
                self.insert_rows(store, &node, parent.as_ref()).await?;
            }
            inserts = blocked;
        }

        for (node, parent) in moves {
            self.move_rows(store, &node, Some(&parent)).await?;
        }
        Ok(())
    }

    async fn insert_rows<S>(
        &self,
        store: &S,
        node: &FieldValue,
        parent: Option<&FieldValue>,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut rows = vec![self.hierarchy_row(node, node, 0)];
        if let Some(parent) = parent {
            for ancestor in self.ancestor_rows(store, parent).await? {
                rows.push(self.hierarchy_row(
                    &row_value(&ancestor, &self.ancestor),
                    node,
                    row_int(&ancestor, &self.generations) + 1,
                ));
            }
        }
        let count = rows.len();
        for row in rows {
            store.insert(&self.table, row).await?;
        }
        debug!(collection = M::collection(), node = %node, rows = count, "hierarchy rows inserted");
        Ok(())
    }

    /// Detach the subtree of `node` from its old ancestors and link it below
    /// `parent`.
    async fn move_rows<S>(
        &self,
        store: &S,
        node: &FieldValue,
        parent: Option<&FieldValue>,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut subtree = self.subtree(store, node).await?;
        if subtree.is_empty() {
            subtree.push((node.clone(), 0));
        }
        let members: Vec<FieldValue> = subtree.iter().map(|(id, _)| id.clone()).collect();

        let outside = Filter::new()
            .is_in(&self.descendant, members.clone())
            .not_in(&self.ancestor, members);
        store.delete_where(&self.table, &outside).await?;

        if let Some(parent) = parent {
            for ancestor in self.ancestor_rows(store, parent).await? {
                let ancestor_id = row_value(&ancestor, &self.ancestor);
                let base = row_int(&ancestor, &self.generations) + 1;
                for (descendant, generations) in &subtree {
                    store
                        .insert(
                            &self.table,
                            self.hierarchy_row(&ancestor_id, descendant, base + generations),
                        )
                        .await?;
                }
            }
        }
        debug!(collection = M::collection(), node = %node, parent = ?parent, "subtree relinked");
        Ok(())
    }

    async fn shift_levels<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        node: &FieldValue,
        delta: i64,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let Some(slot) = &self.level else {
            return Ok(());
        };
        let mut members: Vec<FieldValue> = self
            .subtree(store, node)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        if !members.contains(node) {
            members.push(node.clone());
        }
        store
            .update_where(
                M::collection(),
                &Filter::new().is_in(M::identifier_field(), members.clone()),
                &[Assignment::Increment(slot.name().to_owned(), delta)],
            )
            .await?;
        for id in members {
            let Some(level) = uow.object(&id).map(|object| slot.read_int(object)).transpose()? else {
                continue;
            };
            patch_field(uow, &id, slot, FieldValue::Int(level + delta))?;
        }
        Ok(())
    }

    /// Level a node gets under `parent`, walking parents through the unit of
    /// work so pending nodes count too.
    async fn level_under<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        node: &FieldValue,
        parent: &FieldValue,
    ) -> Result<i64, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut level = self.level_base;
        let mut visited = BTreeSet::from([node.clone()]);
        let mut current = parent.clone();
        while !current.is_null() {
            if !visited.insert(current.clone()) {
                return Err(BehaviorError::unexpected(format!(
                    "node [{node}] would become its own ancestor"
                )));
            }
            let ancestor = load_managed(uow, store, &current).await?.ok_or_else(|| {
                BehaviorError::invalid_argument(format!("parent [{current}] does not exist"))
            })?;
            level += 1;
            current = self.parent.read(&ancestor);
        }
        Ok(level)
    }

    async fn is_ancestor<S>(
        &self,
        store: &S,
        ancestor: &FieldValue,
        descendant: &FieldValue,
    ) -> Result<bool, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        if ancestor == descendant {
            return Ok(true);
        }
        let filter = Filter::new()
            .eq(&self.ancestor, ancestor.clone())
            .eq(&self.descendant, descendant.clone());
        Ok(store.count(&self.table, &filter).await? > 0)
    }

    /// `(descendant, generations)` of every node below `node`, itself included.
    async fn subtree<S>(
        &self,
        store: &S,
        node: &FieldValue,
    ) -> Result<Vec<(FieldValue, i64)>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let rows = store
            .find(
                &self.table,
                &Filter::new().eq(&self.ancestor, node.clone()),
                &[Sort::asc(&self.generations)],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    row_value(row, &self.descendant),
                    row_int(row, &self.generations),
                )
            })
            .collect())
    }

    async fn ancestor_rows<S>(&self, store: &S, node: &FieldValue) -> Result<Vec<Row>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        store
            .find(
                &self.table,
                &Filter::new().eq(&self.descendant, node.clone()),
                &[Sort::asc(&self.generations)],
            )
            .await
    }

    fn hierarchy_row(&self, ancestor: &FieldValue, descendant: &FieldValue, generations: i64) -> Row {
        let mut row = Row::new();
        row.insert(self.ancestor.clone(), ancestor.to_json());
        row.insert(self.descendant.clone(), descendant.to_json());
        row.insert(self.generations.clone(), JsonValue::from(generations));
        row
    }
}

/// Read access to a closure-table tree.
pub struct ClosureTreeRepository<'l, M: Managed> {
    closure: &'l ClosureTable<M>,
}

impl<'l, M: Managed> ClosureTreeRepository<'l, M> {
    pub fn new(listener: &'l TreeListener<M>) -> Result<Self, BehaviorError> {
        match listener.strategy() {
            Strategy::Closure(closure) => Ok(Self { closure }),
            _ => Err(BehaviorError::configuration(format!(
                "`{}` is not configured as a closure-table tree",
                M::collection()
            ))),
        }
    }

    pub fn hierarchy_table(&self) -> &str {
        &self.closure.table
    }

    pub async fn parent<S>(&self, store: &S, model: &M) -> Result<Option<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let parent_id = self.closure.parent.read(model);
        if parent_id.is_null() {
            return Ok(None);
        }
        let filter = Filter::new().eq(M::identifier_field(), parent_id);
        match store.find(M::collection(), &filter, &[]).await?.into_iter().next() {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn children<S>(&self, store: &S, model: &M) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let filter = Filter::new().eq(self.closure.parent.name(), model.identifier());
        let rows = store
            .find(M::collection(), &filter, &[Sort::asc(M::identifier_field())])
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn child_count<S>(&self, store: &S, model: &M) -> Result<u64, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let filter = Filter::new().eq(self.closure.parent.name(), model.identifier());
        store.count(M::collection(), &filter).await
    }

    pub async fn roots<S>(&self, store: &S) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let filter = Filter::new().eq(self.closure.parent.name(), FieldValue::Null);
        let rows = store
            .find(M::collection(), &filter, &[Sort::asc(M::identifier_field())])
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Every node below `model`, nearest generation first.
    pub async fn descendants<S>(&self, store: &S, model: &M) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let related = self
            .closure
            .subtree(store, &model.identifier())
            .await?
            .into_iter()
            .filter(|(_, generations)| *generations > 0)
            .collect();
        self.load_ordered(store, related).await
    }

    pub async fn self_and_descendants<S>(
        &self,
        store: &S,
        model: &M,
    ) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut nodes = vec![model.clone()];
        nodes.extend(self.descendants(store, model).await?);
        Ok(nodes)
    }

    /// Every node above `model`, parent first.
    pub async fn ancestors<S>(&self, store: &S, model: &M) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let related = self
            .closure
            .ancestor_rows(store, &model.identifier())
            .await?
            .iter()
            .map(|row| {
                (
                    row_value(row, &self.closure.ancestor),
                    row_int(row, &self.closure.generations),
                )
            })
            .filter(|(_, generations)| *generations > 0)
            .collect();
        self.load_ordered(store, related).await
    }

    async fn load_ordered<S>(
        &self,
        store: &S,
        related: Vec<(FieldValue, i64)>,
    ) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        if related.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<FieldValue> = related.iter().map(|(id, _)| id.clone()).collect();
        let distance: HashMap<FieldValue, i64> = related.into_iter().collect();
        let rows = store
            .find(
                M::collection(),
                &Filter::new().is_in(M::identifier_field(), ids),
                &[Sort::asc(M::identifier_field())],
            )
            .await?;
        let mut models = rows
            .into_iter()
            .map(|row| {
                let id = row_value(&row, M::identifier_field());
                from_row::<M>(row).map(|model| (distance.get(&id).copied().unwrap_or(0), model))
            })
            .collect::<Result<Vec<_>, _>>()?;
        models.sort_by_key(|(generations, _)| *generations);
        Ok(models.into_iter().map(|(_, model)| model).collect())
    }
}
