//! Materialized-path encoding: each node stores the delimited chain of
//! segments leading from its root to itself.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::TreeConfig;
use crate::context::FlushContext;
use crate::error::BehaviorError;
use crate::lock::RootLock;
use crate::store::{Assignment, BackingStore, Filter, Sort};
use crate::traits::{
    from_row, resolve_field, resolve_optional_field, row_int, row_value, FieldSlot, Managed,
};
use crate::tree::{Strategy, TreeListener};
use crate::uow::{assign_field, load_managed, patch_field, UnitOfWork};
use crate::value::FieldValue;

pub(crate) struct MaterializedPath<M> {
    path: FieldSlot<M>,
    source: FieldSlot<M>,
    parent: FieldSlot<M>,
    level: Option<FieldSlot<M>>,
    level_base: i64,
    separator: String,
    append_id: bool,
    starts_with_separator: bool,
    ends_with_separator: bool,
    lock: Option<RootLock<M>>,
}

impl<M: Managed> MaterializedPath<M> {
    pub(crate) fn new(config: &TreeConfig) -> Result<Self, BehaviorError> {
        if config.path_separator().is_empty() {
            return Err(BehaviorError::configuration(format!(
                "path separator of `{}` must not be empty",
                M::collection()
            )));
        }
        let source_name = config
            .path_source_column()
            .unwrap_or(M::identifier_field());
        let source = resolve_field::<M>(source_name)?;
        let append_id = config
            .path_append_id()
            .unwrap_or(source_name != M::identifier_field());
        let lock = resolve_optional_field::<M>(config.lock_time_column())?
            .map(|slot| RootLock::new(slot, config.lock_timeout_secs()));
        Ok(Self {
            path: resolve_field::<M>(config.path_column())?,
            source,
            parent: resolve_field::<M>(config.parent_column())?,
            level: resolve_optional_field::<M>(config.level_column())?,
            level_base: config.level_base(),
            separator: config.path_separator().to_owned(),
            append_id,
            starts_with_separator: config.path_starts_with_separator(),
            ends_with_separator: config.path_ends_with_separator(),
            lock,
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
        let mut pending = uow.scheduled_insertions();
        while !pending.is_empty() {
            let unresolved: BTreeSet<FieldValue> = pending.iter().cloned().collect();
            let mut blocked = Vec::new();
            for id in pending {
                let parent = uow
                    .object(&id)
                    .map(|node| self.parent.read(node))
                    .unwrap_or_default();
                if parent != id && unresolved.contains(&parent) {
                    blocked.push(id);
                    continue;
                }
                self.assign_path(uow, store, &id).await?;
            }
            if blocked.len() == unresolved.len() {
                return Err(BehaviorError::invariant(format!(
                    "parents of `{}` nodes form a cycle",
                    M::collection()
                )));
            }
            pending = blocked;
        }

        for id in uow.scheduled_updates() {
            let changes = uow.change_set(&id);
            if changes.contains(self.parent.name()) || changes.contains(self.source.name()) {
                self.process_update(ctx, uow, store, &id).await?;
            }
        }

        for id in uow.scheduled_deletions() {
            self.process_deletion(ctx, uow, store, &id).await?;
        }
        Ok(())
    }

    pub(crate) async fn post_persist<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        match &self.lock {
            Some(lock) => lock.release_all(ctx, uow, store).await,
            None => Ok(()),
        }
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
        let Some(node) = uow.object(id).cloned() else {
            return Ok(());
        };
        if let Some(lock) = &self.lock {
            let original_parent = uow
                .change_set(id)
                .get(self.parent.name())
                .map(|change| change.old.clone())
                .unwrap_or_else(|| self.parent.read(&node));
            let root = self.root_of(uow, store, id, &original_parent).await?;
            lock.acquire(ctx, uow, store, &root).await?;
        }

        let old_path = self.path_of(&node);
        let old_level = self.level_of(&node)?;
        let prefix = self.subtree_prefix(&old_path);

        let parent = self.parent.read(&node);
        if !parent.is_null() {
            if parent == *id {
                return Err(BehaviorError::unexpected(format!(
                    "node [{id}] cannot be its own parent"
                )));
            }
            let parent_path = load_managed(uow, store, &parent)
                .await?
                .map(|parent| self.path_of(&parent))
                .unwrap_or_default();
            if !old_path.is_empty() && parent_path.starts_with(&prefix) {
                return Err(BehaviorError::unexpected(format!(
                    "cannot move node [{id}] under its own descendant [{parent}]"
                )));
            }
        }

        let (new_path, new_level) = self.assign_path(uow, store, id).await?;
        if old_path.is_empty() || (new_path == old_path && new_level == old_level) {
            return Ok(());
        }
        let new_prefix = self.subtree_prefix(&new_path);
        let level_delta = new_level - old_level;

        let mut subtree: BTreeMap<FieldValue, (String, i64)> = BTreeMap::new();
        let filter = Filter::new()
            .starts_with(self.path.name(), prefix.clone())
            .ne(M::identifier_field(), id.clone());
        for row in store.find(M::collection(), &filter, &[]).await? {
            let level = match &self.level {
                Some(slot) => row_int(&row, slot.name()),
                None => self.level_base,
            };
            subtree.insert(
                row_value(&row, M::identifier_field()),
                (row_value(&row, self.path.name()).to_string(), level),
            );
        }
        for managed in uow.identities() {
            if managed == *id {
                continue;
            }
            let Some(object) = uow.object(&managed) else {
                continue;
            };
            let path = self.path_of(object);
            if path.starts_with(&prefix) {
                let level = self.level_of(object)?;
                subtree.insert(managed, (path, level));
            }
        }

        for (descendant, (path, level)) in &subtree {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let rewritten = FieldValue::Text(format!("{new_prefix}{rest}"));
            let level = FieldValue::Int(level + level_delta);
            if !uow.is_scheduled_for_insertion(descendant) {
                let mut assignments =
                    vec![Assignment::Set(self.path.name().to_owned(), rewritten.clone())];
                if let Some(slot) = &self.level {
                    assignments.push(Assignment::Set(slot.name().to_owned(), level.clone()));
                }
                store
                    .update_where(
                        M::collection(),
                        &Filter::new().eq(M::identifier_field(), descendant.clone()),
                        &assignments,
                    )
                    .await?;
            }
            patch_field(uow, descendant, &self.path, rewritten)?;
            if let Some(slot) = &self.level {
                patch_field(uow, descendant, slot, level)?;
            }
        }
        debug!(
            collection = M::collection(),
            node = %id,
            path = %new_path,
            descendants = subtree.len(),
            "subtree path rewritten"
        );
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
        let Some(node) = load_managed(uow, store, id).await? else {
            return Ok(());
        };
        if let Some(lock) = &self.lock {
            let parent = self.parent.read(&node);
            let root = self.root_of(uow, store, id, &parent).await?;
            lock.acquire(ctx, uow, store, &root).await?;
        }

        let path = self.path_of(&node);
        if path.is_empty() {
            return Ok(());
        }
        let filter = Filter::new()
            .starts_with(self.path.name(), self.subtree_prefix(&path))
            .ne(M::identifier_field(), id.clone());
        for row in store.find(M::collection(), &filter, &[]).await? {
            let descendant = row_value(&row, M::identifier_field());
            if uow.is_scheduled_for_deletion(&descendant) {
                continue;
            }
            if uow.object(&descendant).is_none() {
                uow.register(from_row::<M>(row)?);
            }
            ctx.removed_nodes.insert(descendant.clone());
            uow.schedule_deletion(descendant);
        }
        ctx.removed_nodes.insert(id.clone());
        Ok(())
    }

    /// Compute and assign path and level of `id` from its parent.
    async fn assign_path<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
    ) -> Result<(String, i64), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let node = uow
            .object(id)
            .cloned()
            .ok_or_else(|| BehaviorError::NotManaged(id.clone()))?;
        let segment = self.segment(&node, id)?;
        let parent_id = self.parent.read(&node);

        let (path, level) = if parent_id.is_null() {
            (self.compose(None, &segment), self.level_base)
        } else {
            let parent = load_managed(uow, store, &parent_id).await?.ok_or_else(|| {
                BehaviorError::invalid_argument(format!(
                    "parent [{parent_id}] of node [{id}] does not exist"
                ))
            })?;
            let parent_path = self.path_of(&parent);
            let level = self.level_of(&parent)? + 1;
            (self.compose(Some(&parent_path), &segment), level)
        };

        assign_field(uow, id, &self.path, FieldValue::Text(path.clone()))?;
        if let Some(slot) = &self.level {
            assign_field(uow, id, slot, FieldValue::Int(level))?;
        }
        Ok((path, level))
    }

    fn segment(&self, node: &M, id: &FieldValue) -> Result<String, BehaviorError> {
        let source = self.source.read(node);
        if source.is_null() {
            return Err(BehaviorError::unexpected(format!(
                "path source `{}` of node [{id}] is empty",
                self.source.name()
            )));
        }
        let source = source.to_string();
        if source.contains(&self.separator) {
            return Err(BehaviorError::unexpected(format!(
                "path source `{}` of node [{id}] contains the separator `{}`",
                self.source.name(),
                self.separator
            )));
        }
        Ok(if self.append_id {
            format!("{source}-{id}")
        } else {
            source
        })
    }

    pub(crate) fn compose(&self, parent_path: Option<&str>, segment: &str) -> String {
        let mut path = match parent_path {
            Some(parent) => {
                let mut path = parent.to_owned();
                if !path.ends_with(&self.separator) {
                    path.push_str(&self.separator);
                }
                path
            }
            None if self.starts_with_separator => self.separator.clone(),
            None => String::new(),
        };
        path.push_str(segment);
        if self.ends_with_separator {
            path.push_str(&self.separator);
        }
        path
    }

    /// Prefix shared by `path` and every path below it.
    pub(crate) fn subtree_prefix(&self, path: &str) -> String {
        if path.ends_with(&self.separator) {
            path.to_owned()
        } else {
            format!("{path}{}", self.separator)
        }
    }

    fn path_of(&self, node: &M) -> String {
        self.path.read(node).as_str().unwrap_or_default().to_owned()
    }

    fn level_of(&self, node: &M) -> Result<i64, BehaviorError> {
        match &self.level {
            Some(slot) => Ok(slot.read(node).as_int().unwrap_or(self.level_base)),
            None => Ok(self.level_base),
        }
    }

    /// Topmost ancestor reached from `parent`, or `id` itself for a root.
    async fn root_of<S>(
        &self,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
        parent: &FieldValue,
    ) -> Result<FieldValue, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut root = id.clone();
        let mut current = parent.clone();
        let mut visited = BTreeSet::from([id.clone()]);
        while !current.is_null() && visited.insert(current.clone()) {
            let Some(node) = load_managed(uow, store, &current).await? else {
                break;
            };
            root = current;
            current = self.parent.read(&node);
        }
        Ok(root)
    }
}

/// Read access to a materialized-path tree.
pub struct MaterializedPathRepository<'l, M: Managed> {
    tree: &'l MaterializedPath<M>,
}

impl<'l, M: Managed> MaterializedPathRepository<'l, M> {
    pub fn new(listener: &'l TreeListener<M>) -> Result<Self, BehaviorError> {
        match listener.strategy() {
            Strategy::Path(tree) => Ok(Self { tree }),
            _ => Err(BehaviorError::configuration(format!(
                "`{}` is not configured as a materialized-path tree",
                M::collection()
            ))),
        }
    }

    /// Direct children of `node`, or its whole subtree when `direct` is off.
    /// `None` stands for the roots.
    pub async fn children<S>(
        &self,
        store: &S,
        node: Option<&M>,
        direct: bool,
    ) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let filter = match (node, direct) {
            (None, true) => Filter::new().eq(self.tree.parent.name(), FieldValue::Null),
            (None, false) => Filter::new(),
            (Some(node), true) => Filter::new().eq(self.tree.parent.name(), node.identifier()),
            (Some(node), false) => {
                let path = self.tree.path_of(node);
                Filter::new()
                    .starts_with(self.tree.path.name(), self.tree.subtree_prefix(&path))
                    .ne(M::identifier_field(), node.identifier())
            }
        };
        let rows = store
            .find(M::collection(), &filter, &[Sort::asc(self.tree.path.name())])
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn descendants<S>(&self, store: &S, node: &M) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        self.children(store, Some(node), false).await
    }

    pub async fn roots<S>(&self, store: &S) -> Result<Vec<M>, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        self.children(store, None, true).await
    }
}
