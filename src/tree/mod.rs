//! Hierarchical structures maintained during the flush.
//!
//! Three encodings are supported and selected through
//! [`TreeConfig::strategy`](crate::config::TreeConfig::strategy):
//!
//! * nested set: `left`/`right` interval bounds, optional `level` and `root`;
//! * closure table: one `(ancestor, descendant, generations)` row per pair;
//! * materialized path: a delimited path column rebuilt on moves.

pub mod closure;
pub mod nested;
pub mod path;
pub mod repository;

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

pub use closure::ClosureTreeRepository;
pub use path::MaterializedPathRepository;
pub use repository::{NestedTreeRepository, SortDirection, Steps, VerifyReport};

use crate::config::{TreeConfig, TreeStrategyKind};
use crate::context::FlushContext;
use crate::error::BehaviorError;
use crate::store::BackingStore;
use crate::traits::Managed;
use crate::uow::UnitOfWork;
use crate::value::FieldValue;

use closure::ClosureTable;
use nested::NestedSet;
use path::MaterializedPath;

/// Where a node goes relative to its placement target.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Position {
    #[default]
    FirstChild,
    LastChild,
    PrevSibling,
    NextSibling,
}

impl FromStr for Position {
    type Err = BehaviorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "FirstChild" | "firstChild" | "first_child" => Ok(Self::FirstChild),
            "LastChild" | "lastChild" | "last_child" => Ok(Self::LastChild),
            "PrevSibling" | "prevSibling" | "prev_sibling" => Ok(Self::PrevSibling),
            "NextSibling" | "nextSibling" | "next_sibling" => Ok(Self::NextSibling),
            other => Err(BehaviorError::invalid_argument(format!(
                "unknown node position `{other}`"
            ))),
        }
    }
}

impl Position {
    pub fn is_sibling(self) -> bool {
        matches!(self, Position::PrevSibling | Position::NextSibling)
    }
}

/// Placement request for one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub position: Position,
    pub target: FieldValue,
}

impl Placement {
    pub fn new(position: Position, target: impl Into<FieldValue>) -> Self {
        Self {
            position,
            target: target.into(),
        }
    }
}

/// Nodes whose placement target has not been placed yet, keyed by target.
#[derive(Debug, Default)]
pub struct DelayQueue {
    waiting: BTreeMap<FieldValue, Vec<(FieldValue, Placement)>>,
}

impl DelayQueue {
    pub fn defer(&mut self, node: FieldValue, placement: Placement) {
        self.waiting
            .entry(placement.target.clone())
            .or_default()
            .push((node, placement));
    }

    /// Remove and return every node waiting on `target`, in deferral order.
    pub fn take(&mut self, target: &FieldValue) -> Vec<(FieldValue, Placement)> {
        self.waiting.remove(target).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Some waiting node and the target it waits on.
    pub fn first_pending(&self) -> Option<(&FieldValue, &FieldValue)> {
        self.waiting
            .iter()
            .find_map(|(target, nodes)| nodes.first().map(|(node, _)| (node, target)))
    }
}

pub(crate) enum Strategy<M> {
    Nested(NestedSet<M>),
    Closure(ClosureTable<M>),
    Path(MaterializedPath<M>),
}

/// Flush listener keeping the configured tree encoding consistent.
pub struct TreeListener<M> {
    config: TreeConfig,
    strategy: Strategy<M>,
    placements: Mutex<HashMap<FieldValue, Placement>>,
}

impl<M: Managed> TreeListener<M> {
    pub fn new(config: TreeConfig) -> Result<Self, BehaviorError> {
        let strategy = match config.strategy() {
            TreeStrategyKind::Nested => Strategy::Nested(NestedSet::new(&config)?),
            TreeStrategyKind::Closure => Strategy::Closure(ClosureTable::new(&config)?),
            TreeStrategyKind::MaterializedPath => {
                Strategy::Path(MaterializedPath::new(&config)?)
            }
        };
        Ok(Self {
            config,
            strategy,
            placements: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Remember where `node` goes on the next flush.
    pub(crate) fn place(&self, node: FieldValue, placement: Placement) {
        self.placements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node, placement);
    }

    fn take_placements(&self) -> HashMap<FieldValue, Placement> {
        std::mem::take(
            &mut *self
                .placements
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub(crate) fn strategy(&self) -> &Strategy<M> {
        &self.strategy
    }

    pub async fn on_flush<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        ctx.node_positions.extend(self.take_placements());
        match &self.strategy {
            Strategy::Nested(nested) => nested.on_flush(ctx, uow, store).await,
            Strategy::Closure(closure) => closure.on_flush(ctx, uow, store).await,
            Strategy::Path(path) => path.on_flush(ctx, uow, store).await,
        }
    }

    /// Work that needs the rows written by the flush.
    pub async fn post_persist<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        match &self.strategy {
            Strategy::Nested(_) => Ok(()),
            Strategy::Closure(closure) => closure.post_persist(ctx, store).await,
            Strategy::Path(path) => path.post_persist(ctx, uow, store).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_queue_releases_in_deferral_order() {
        let mut queue = DelayQueue::default();
        queue.defer(FieldValue::Int(2), Placement::new(Position::FirstChild, FieldValue::Int(1)));
        queue.defer(FieldValue::Int(3), Placement::new(Position::LastChild, FieldValue::Int(1)));
        queue.defer(FieldValue::Int(4), Placement::new(Position::FirstChild, FieldValue::Int(3)));

        let released: Vec<FieldValue> = queue
            .take(&FieldValue::Int(1))
            .into_iter()
            .map(|(node, _)| node)
            .collect();
        assert_eq!(released, vec![FieldValue::Int(2), FieldValue::Int(3)]);
        assert_eq!(
            queue.first_pending(),
            Some((&FieldValue::Int(4), &FieldValue::Int(3)))
        );
        assert!(queue.take(&FieldValue::Int(3)).len() == 1 && queue.is_empty());
    }

    #[test]
    fn positions_parse_from_mapping_names() {
        assert_eq!("lastChild".parse::<Position>().unwrap(), Position::LastChild);
        assert_eq!("NextSibling".parse::<Position>().unwrap(), Position::NextSibling);
        assert!("middle".parse::<Position>().is_err());
    }
}
