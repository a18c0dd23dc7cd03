//! src/storage.rs
//!
//! Per-peer persistent state. A `Peer` owns a bag of
//! named buckets, each a `Box<dyn Store>`, so services can keep their own
//! state (message bodies, sync indices, block DAGs) without the peer
//! runtime knowing their shape.

use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;

use crate::peer::PeerId;

/// A single stored item plus how many times `add` has seen it, used by
/// duplicate-suppression in gossip.
#[derive(Clone, Debug)]
struct Entry {
    data: String,
    times_seen: u64,
}

/// Common interface for the peer's storage buckets. Kept as a plain trait
/// (not generic over the stored type) because a `Peer` holds a
/// heterogeneous `IndexMap<String, Box<dyn Store>>` of them.
pub trait Store: std::fmt::Debug + Send {
    /// Record `data` under `id`. A repeat `id` only bumps `times_seen`.
    /// Returns `true` the first time `id` is seen.
    fn add(&mut self, id: &str, data: String) -> bool;

    fn get(&self, id: &str) -> Option<&str>;

    fn remove(&mut self, id: &str) -> bool;

    fn clear_all(&mut self);

    fn known_ids(&self) -> Vec<String>;

    fn times_seen(&self, id: &str) -> u64;

    fn get_by_prefix(&self, prefix: &str) -> Vec<(String, &str)>;

    fn batch_add(&mut self, items: Vec<(String, String)>) -> Vec<bool> {
        items.into_iter().map(|(id, data)| self.add(&id, data)).collect()
    }

    /// Lets a caller holding `&dyn Store` recover a concrete store kind,
    /// e.g. the ranged pull-gossip service reaching for `RangedStore`'s
    /// `holes`/`pre_add`.
    fn as_any(&self) -> &dyn std::any::Any;

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Flat key/value storage, as used by plain gossip.
#[derive(Debug, Default)]
pub struct SimpleStore {
    items: IndexMap<String, Entry>,
}

impl SimpleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for SimpleStore {
    fn add(&mut self, id: &str, data: String) -> bool {
        match self.items.get_mut(id) {
            Some(entry) => {
                entry.times_seen += 1;
                false
            }
            None => {
                self.items.insert(id.to_string(), Entry { data, times_seen: 1 });
                true
            }
        }
    }

    fn get(&self, id: &str) -> Option<&str> {
        self.items.get(id).map(|e| e.data.as_str())
    }

    fn remove(&mut self, id: &str) -> bool {
        self.items.shift_remove(id).is_some()
    }

    fn clear_all(&mut self) {
        self.items.clear();
    }

    fn known_ids(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    fn times_seen(&self, id: &str) -> u64 {
        self.items.get(id).map(|e| e.times_seen).unwrap_or(0)
    }

    fn get_by_prefix(&self, prefix: &str) -> Vec<(String, &str)> {
        self.items
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, e)| (id.clone(), e.data.as_str()))
            .collect()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Per-origin hole-tracking, for the ranged pull-gossip variant. Item
/// ids are `"{origin}_{seq}"`; each origin tracks the
/// highest contiguous `seq` seen (`last`) and any gaps below it (`holes`).
#[derive(Debug, Default)]
pub struct RangedStore {
    inner: SimpleStore,
    index: IndexMap<PeerId, OriginIndex>,
}

#[derive(Debug, Default, Clone)]
struct OriginIndex {
    last: u64,
    holes: BTreeSet<u64>,
}

impl RangedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `"{origin}_{seq}"` into its parts. Returns `None` if `id`
    /// isn't in the expected shape.
    fn parse_id(id: &str) -> Option<(PeerId, u64)> {
        let (origin, seq) = id.rsplit_once('_')?;
        Some((PeerId(origin.parse().ok()?), seq.parse().ok()?))
    }

    /// Marks every sequence number between the origin's current `last` and
    /// `seq` (exclusive of `last`, inclusive of `seq`) as a hole, then
    /// records `seq` itself as no longer missing if it's within range.
    pub fn pre_add(&mut self, origin: PeerId, seq: u64) {
        let entry = self.index.entry(origin).or_default();
        for k in (entry.last + 1)..=seq {
            entry.holes.insert(k);
        }
    }

    pub fn last(&self, origin: PeerId) -> u64 {
        self.index.get(&origin).map(|e| e.last).unwrap_or(0)
    }

    pub fn holes(&self, origin: PeerId) -> Vec<u64> {
        self.index.get(&origin).map(|e| e.holes.iter().copied().collect()).unwrap_or_default()
    }

    pub fn get_all_last(&self) -> IndexMap<PeerId, u64> {
        self.index.iter().map(|(k, v)| (*k, v.last)).collect()
    }
}

impl Store for RangedStore {
    fn add(&mut self, id: &str, data: String) -> bool {
        if let Some((origin, seq)) = Self::parse_id(id) {
            self.pre_add(origin, seq);
            let entry = self.index.entry(origin).or_default();
            if seq > entry.last {
                entry.last = seq;
            }
            entry.holes.remove(&seq);
        }
        self.inner.add(id, data)
    }

    fn get(&self, id: &str) -> Option<&str> {
        self.inner.get(id)
    }

    fn remove(&mut self, id: &str) -> bool {
        self.inner.remove(id)
    }

    fn clear_all(&mut self) {
        self.inner.clear_all();
        self.index.clear();
    }

    fn known_ids(&self) -> Vec<String> {
        self.inner.known_ids()
    }

    fn times_seen(&self, id: &str) -> u64 {
        self.inner.times_seen(id)
    }

    fn get_by_prefix(&self, prefix: &str) -> Vec<(String, &str)> {
        self.inner.get_by_prefix(prefix)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Block/transaction DAG storage for consensus-style services. Each
/// item names its own parent; `get_longest_chains` repeatedly
/// peels off the current longest path, so a caller can drain the DAG in
/// order of decreasing chain length.
#[derive(Debug, Default)]
pub struct DagStore {
    nodes: IndexMap<String, String>,
    parents: IndexMap<String, String>,
    children: IndexMap<String, IndexSet<String>>,
}

impl DagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: &str, parent_id: &str, data: String) {
        self.nodes.entry(id.to_string()).or_insert_with(|| data.clone());
        self.nodes.insert(id.to_string(), data);
        self.parents.insert(id.to_string(), parent_id.to_string());
        self.children.entry(parent_id.to_string()).or_default().insert(id.to_string());
    }

    pub fn get(&self, id: &str) -> Option<(&str, &str)> {
        self.parents.get(id).map(|p| (p.as_str(), self.nodes.get(id).map(String::as_str).unwrap_or("")))
    }

    /// Longest root-to-leaf chains, longest first, each one removed from a
    /// working copy before the next is computed (mirrors the original's
    /// destructive `networkx.dag_longest_path` loop).
    pub fn get_longest_chains(&self) -> Vec<Vec<String>> {
        let mut remaining: IndexSet<String> = self.nodes.keys().cloned().collect();
        let mut chains = Vec::new();

        loop {
            let path = self.longest_path(&remaining);
            if path.is_empty() {
                break;
            }
            remaining.shift_remove(&path[0]);
            chains.push(path);
        }
        chains
    }

    fn longest_path(&self, remaining: &IndexSet<String>) -> Vec<String> {
        // Longest path in a DAG restricted to `remaining`, via memoized DFS
        // from every root (a node with no surviving parent).
        let mut memo: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut best: Vec<String> = Vec::new();

        for node in remaining {
            let path = self.longest_from(node, remaining, &mut memo);
            if path.len() > best.len() {
                best = path;
            }
        }
        best
    }

    fn longest_from(
        &self,
        node: &str,
        remaining: &IndexSet<String>,
        memo: &mut IndexMap<String, Vec<String>>,
    ) -> Vec<String> {
        if let Some(cached) = memo.get(node) {
            return cached.clone();
        }
        let mut best: Vec<String> = Vec::new();
        if let Some(kids) = self.children.get(node) {
            for child in kids {
                if !remaining.contains(child) {
                    continue;
                }
                let path = self.longest_from(child, remaining, memo);
                if path.len() > best.len() {
                    best = path;
                }
            }
        }
        let mut result = vec![node.to_string()];
        result.extend(best);
        memo.insert(node.to_string(), result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_store_counts_repeats() {
        let mut s = SimpleStore::new();
        assert!(s.add("a", "x".into()));
        assert!(!s.add("a", "y".into()));
        assert_eq!(s.times_seen("a"), 2);
        assert_eq!(s.get("a"), Some("x"));
    }

    #[test]
    fn simple_store_prefix_lookup() {
        let mut s = SimpleStore::new();
        s.add("block_1", "a".into());
        s.add("block_2", "b".into());
        s.add("tx_1", "c".into());
        let mut found = s.get_by_prefix("block_");
        found.sort();
        assert_eq!(found, vec![("block_1".to_string(), "a"), ("block_2".to_string(), "b")]);
    }

    #[test]
    fn ranged_store_tracks_holes() {
        let mut s = RangedStore::new();
        let origin = PeerId(1);
        s.add("1_1", "a".into());
        s.add("1_5", "b".into());
        assert_eq!(s.last(origin), 5);
        let mut holes = s.holes(origin);
        holes.sort();
        assert_eq!(holes, vec![2, 3, 4]);
        s.add("1_3", "c".into());
        let mut holes = s.holes(origin);
        holes.sort();
        assert_eq!(holes, vec![2, 4]);
    }

    #[test]
    fn dag_store_longest_chain_first() {
        let mut d = DagStore::new();
        d.add("genesis", "", "g".into());
        d.add("a", "genesis", "a".into());
        d.add("b", "a", "b".into());
        d.add("c", "genesis", "c".into());

        let chains = d.get_longest_chains();
        assert_eq!(chains[0], vec!["genesis", "a", "b"]);
    }
}
