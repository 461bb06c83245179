use std::collections::{BTreeSet, HashMap};

use crate::sortable::ledger::{MaxPositions, Relocations};
use crate::tree::{DelayQueue, Placement};
use crate::value::FieldValue;

/// Slug written earlier in the same flush and not yet visible in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PersistedSlug {
    pub collection: &'static str,
    pub slug: String,
    pub base: FieldValue,
}

/// Hierarchy rows still to be written once the node row exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PendingHierarchy {
    Insert {
        node: FieldValue,
        parent: Option<FieldValue>,
    },
    Move {
        node: FieldValue,
        parent: FieldValue,
    },
}

/// State shared by the behaviors during one flush.
///
/// Built when the flush starts and dropped when it ends, whether it commits
/// or rolls back.
#[derive(Debug, Default)]
pub struct FlushContext {
    pub(crate) relocations: Relocations,
    pub(crate) max_positions: MaxPositions,
    pub(crate) persisted_slugs: Vec<PersistedSlug>,
    pub(crate) tree_edges: HashMap<&'static str, i64>,
    pub(crate) node_positions: HashMap<FieldValue, Placement>,
    pub(crate) delayed_nodes: DelayQueue,
    pub(crate) removed_nodes: BTreeSet<FieldValue>,
    pub(crate) placed_nodes: BTreeSet<FieldValue>,
    pub(crate) pending_hierarchy: Vec<PendingHierarchy>,
    pub(crate) held_locks: Vec<FieldValue>,
}

impl FlushContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn is_removed(&self, id: &FieldValue) -> bool {
        self.removed_nodes.contains(id)
    }
}
