use std::collections::{BTreeSet, HashMap};

use super::group::GroupKey;
use crate::value::FieldValue;

/// One pending shift: `position += delta` for `start <= position < stop`.
///
/// Positions are expressed in the coordinates left behind by every earlier
/// delta of the same bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta {
    start: i64,
    stop: Option<i64>,
    delta: i64,
    exclude: Vec<FieldValue>,
}

impl Delta {
    /// `stop = None` leaves the window unbounded.
    pub fn new(start: i64, stop: Option<i64>, delta: i64) -> Self {
        Self {
            start,
            stop,
            delta,
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, id: FieldValue) -> Self {
        if !self.exclude.contains(&id) {
            self.exclude.push(id);
        }
        self
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn stop(&self) -> Option<i64> {
        self.stop
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn exclude(&self) -> &[FieldValue] {
        &self.exclude
    }

    pub fn covers(&self, position: i64) -> bool {
        position >= self.start && self.stop.map_or(true, |stop| position < stop)
    }

    pub fn applies_to(&self, position: i64, id: &FieldValue) -> bool {
        self.covers(position) && !self.exclude.contains(id)
    }

    fn same_window(&self, other: &Delta) -> bool {
        self.start == other.start && self.stop == other.stop
    }
}

/// Everything one flush knows about one group.
#[derive(Clone, Debug)]
pub struct RelocationBucket {
    key: GroupKey,
    collection: String,
    position_field: String,
    groups: Vec<(String, FieldValue)>,
    deltas: Vec<Delta>,
    placed: Vec<FieldValue>,
    touched: BTreeSet<FieldValue>,
}

impl RelocationBucket {
    fn new(scope: &RelocationScope) -> Self {
        Self {
            key: scope.key.clone(),
            collection: scope.collection.clone(),
            position_field: scope.position_field.clone(),
            groups: scope.groups.clone(),
            deltas: Vec::new(),
            placed: Vec::new(),
            touched: BTreeSet::new(),
        }
    }

    /// Register a shift. A window equal to the one of the most recent entry is
    /// merged into it; the merged entry stays even when its delta nets to zero.
    /// Entries replay in registration order and each window is computed after
    /// the earlier shifts, so only the trailing entry can absorb a new one.
    pub fn add(&mut self, delta: Delta) {
        if let Some(last) = self.deltas.last_mut() {
            if last.same_window(&delta) {
                last.delta += delta.delta;
                for id in delta.exclude {
                    if !last.exclude.contains(&id) {
                        last.exclude.push(id);
                    }
                }
                return;
            }
        }
        self.deltas.push(delta);
    }

    /// Replay the queued deltas over a stored position.
    pub fn project(&self, position: i64, id: &FieldValue) -> i64 {
        self.deltas.iter().fold(position, |current, delta| {
            if delta.applies_to(current, id) {
                current + delta.delta
            } else {
                current
            }
        })
    }

    /// Objects whose in-memory position already reflects this flush and must
    /// follow later deltas eagerly.
    pub fn place(&mut self, id: FieldValue) {
        if !self.placed.contains(&id) {
            self.placed.push(id);
        }
    }

    /// Objects excluded from the bulk update because the flush writes them itself.
    pub fn touch(&mut self, id: FieldValue) {
        self.touched.insert(id);
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn position_field(&self) -> &str {
        &self.position_field
    }

    pub fn groups(&self) -> &[(String, FieldValue)] {
        &self.groups
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    pub fn placed(&self) -> &[FieldValue] {
        &self.placed
    }

    pub fn touched(&self) -> &BTreeSet<FieldValue> {
        &self.touched
    }

    pub fn is_touched(&self, id: &FieldValue) -> bool {
        self.touched.contains(id)
    }
}

/// Where a relocation lands.
#[derive(Clone, Debug)]
pub struct RelocationScope {
    pub key: GroupKey,
    pub collection: String,
    pub position_field: String,
    pub groups: Vec<(String, FieldValue)>,
}

/// Per-flush ledger of relocations, one bucket per group, in registration order.
#[derive(Clone, Debug, Default)]
pub struct Relocations {
    buckets: Vec<RelocationBucket>,
    index: HashMap<GroupKey, usize>,
}

impl Relocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_mut(&mut self, scope: &RelocationScope) -> &mut RelocationBucket {
        let slot = match self.index.get(&scope.key) {
            Some(slot) => *slot,
            None => {
                self.buckets.push(RelocationBucket::new(scope));
                let slot = self.buckets.len() - 1;
                self.index.insert(scope.key.clone(), slot);
                slot
            }
        };
        &mut self.buckets[slot]
    }

    pub fn bucket(&self, key: &GroupKey) -> Option<&RelocationBucket> {
        self.index.get(key).map(|slot| &self.buckets[*slot])
    }

    pub fn add_relocation(&mut self, scope: &RelocationScope, delta: Delta) {
        self.bucket_mut(scope).add(delta);
    }

    pub fn project(&self, key: &GroupKey, position: i64, id: &FieldValue) -> i64 {
        self.bucket(key)
            .map_or(position, |bucket| bucket.project(position, id))
    }

    pub fn buckets(&self) -> &[RelocationBucket] {
        &self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.index.clear();
    }
}

#[derive(Clone, Copy, Debug)]
struct MaxPosition {
    current: i64,
    peak: i64,
}

/// Highest occupied position per group, seeded from the store once per flush.
#[derive(Clone, Debug, Default)]
pub struct MaxPositions {
    entries: HashMap<GroupKey, MaxPosition>,
}

impl MaxPositions {
    pub fn get(&self, key: &GroupKey) -> Option<i64> {
        self.entries.get(key).map(|entry| entry.current)
    }

    /// Highest value the group reached during the flush.
    pub fn peak(&self, key: &GroupKey) -> Option<i64> {
        self.entries.get(key).map(|entry| entry.peak)
    }

    pub fn seed(&mut self, key: GroupKey, max: i64) {
        self.entries.insert(
            key,
            MaxPosition {
                current: max,
                peak: max,
            },
        );
    }

    pub fn adjust(&mut self, key: &GroupKey, by: i64) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.current += by;
            entry.peak = entry.peak.max(entry.current);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> RelocationScope {
        let groups = vec![("category".to_string(), FieldValue::from("books"))];
        RelocationScope {
            key: GroupKey::new("items", &groups),
            collection: "items".to_string(),
            position_field: "position".to_string(),
            groups,
        }
    }

    #[test]
    fn trailing_window_merges_and_keeps_zero() {
        let scope = scope();
        let mut ledger = Relocations::new();
        ledger.add_relocation(&scope, Delta::new(2, None, 1).excluding(FieldValue::Int(1)));
        ledger.add_relocation(&scope, Delta::new(2, None, -1).excluding(FieldValue::Int(2)));

        let bucket = ledger.bucket(&scope.key).unwrap();
        assert_eq!(bucket.deltas().len(), 1);
        assert_eq!(bucket.deltas()[0].delta(), 0);
        assert_eq!(
            bucket.deltas()[0].exclude(),
            [FieldValue::Int(1), FieldValue::Int(2)]
        );
    }

    #[test]
    fn earlier_windows_are_not_merged_across_later_ones() {
        let scope = scope();
        let mut ledger = Relocations::new();
        ledger.add_relocation(&scope, Delta::new(0, None, 1));
        ledger.add_relocation(&scope, Delta::new(2, Some(4), -1));
        ledger.add_relocation(&scope, Delta::new(0, None, 1));

        let bucket = ledger.bucket(&scope.key).unwrap();
        assert_eq!(bucket.deltas().len(), 3);
        // 2 -> 3 -> 2 -> 3 sequentially; merging the first and last would give 4.
        assert_eq!(bucket.project(2, &FieldValue::Int(9)), 3);
    }

    #[test]
    fn projection_skips_excluded_objects() {
        let scope = scope();
        let mut ledger = Relocations::new();
        ledger.add_relocation(&scope, Delta::new(2, Some(4), -1).excluding(FieldValue::Int(2)));

        assert_eq!(ledger.project(&scope.key, 3, &FieldValue::Int(4)), 2);
        assert_eq!(ledger.project(&scope.key, 3, &FieldValue::Int(2)), 3);
        assert_eq!(ledger.project(&scope.key, 4, &FieldValue::Int(4)), 4);
    }

    #[test]
    fn peak_survives_decrements() {
        let key = scope().key;
        let mut max = MaxPositions::default();
        max.seed(key.clone(), 3);
        max.adjust(&key, 1);
        max.adjust(&key, -1);
        max.adjust(&key, -1);
        assert_eq!(max.get(&key), Some(2));
        assert_eq!(max.peak(&key), Some(4));
    }
}
