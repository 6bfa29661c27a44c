//! # Disjoint Set Union over Provisional Labels
//!
//! Union-find keyed by [`LabelKey`] with union by rank and path halving.
//! Each set root also carries the smallest entity id seen in the set, which
//! becomes the canonical region id once reconciliation converges.
//!
//! A partition's DSU holds its own labels plus every foreign label it has been
//! told about; two local labels joined through the same foreign key end up in
//! one set even when they never touch locally.

use crate::model::{EntityId, LabelKey};
use rustc_hash::FxHashMap;

/// Outcome of a union or minimum update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnionOutcome {
    /// Two distinct sets were joined.
    pub merged: bool,
    /// The surviving set's minimum entity decreased.
    pub lowered: bool,
}

impl UnionOutcome {
    pub fn changed(self) -> bool {
        self.merged || self.lowered
    }
}

/// Disjoint sets of label keys with per-set minimum entity tracking.
#[derive(Debug, Clone, Default)]
pub struct LabelDsu {
    /// Parent array for Union-Find
    parent: FxHashMap<LabelKey, LabelKey>,
    /// Rank array for union by rank
    rank: FxHashMap<LabelKey, u32>,
    /// Smallest member entity, valid on roots only
    min_entity: FxHashMap<LabelKey, EntityId>,
    /// Current number of sets
    set_count: usize,
}

impl LabelDsu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key as a singleton set if absent. Returns true when inserted.
    pub fn add_label(&mut self, key: LabelKey, min_entity: EntityId) -> bool {
        if self.parent.contains_key(&key) {
            return false;
        }
        self.parent.insert(key, key);
        self.rank.insert(key, 0);
        self.min_entity.insert(key, min_entity);
        self.set_count += 1;
        true
    }

    /// Find the root of a key (with path compression via path halving).
    /// Untracked keys are their own root.
    pub fn find(&mut self, key: LabelKey) -> LabelKey {
        let Some(&initial_parent) = self.parent.get(&key) else {
            return key;
        };
        if initial_parent == key {
            return key;
        }

        let mut current = key;
        let mut parent = initial_parent;
        loop {
            let grandparent = self.parent.get(&parent).copied().unwrap_or(parent);
            if grandparent == parent {
                break;
            }
            // Point current to grandparent (skip parent)
            self.parent.insert(current, grandparent);
            current = grandparent;
            parent = self.parent.get(&current).copied().unwrap_or(current);
            if parent == current {
                break;
            }
        }
        parent
    }

    /// Smallest entity id in the set containing `key`.
    pub fn class_min(&mut self, key: LabelKey) -> Option<EntityId> {
        let root = self.find(key);
        self.min_entity.get(&root).copied()
    }

    /// Lower the minimum of `key`'s set to `candidate` if smaller.
    pub fn lower_min(&mut self, key: LabelKey, candidate: EntityId) -> bool {
        let root = self.find(key);
        match self.min_entity.get_mut(&root) {
            Some(current) if candidate < *current => {
                *current = candidate;
                true
            }
            Some(_) => false,
            None => {
                self.min_entity.insert(root, candidate);
                true
            }
        }
    }

    /// Join the sets of `a` and `b`; missing keys are added with `min_hint`.
    pub fn union(&mut self, a: LabelKey, b: LabelKey, min_hint: EntityId) -> UnionOutcome {
        self.add_label(a, min_hint);
        self.add_label(b, min_hint);

        let root_a = self.find(a);
        let root_b = self.find(b);
        let min_a = self.min_entity.get(&root_a).copied().unwrap_or(min_hint);
        let min_b = self.min_entity.get(&root_b).copied().unwrap_or(min_hint);
        let before = min_a.min(min_b);

        let mut outcome = UnionOutcome::default();
        let root = if root_a == root_b {
            root_a
        } else {
            outcome.merged = true;
            self.link(root_a, root_b)
        };

        let combined = before.min(min_hint);
        self.min_entity.insert(root, combined);
        outcome.lowered = combined < before;
        outcome
    }

    /// Union by rank. Returns the surviving root.
    fn link(&mut self, a: LabelKey, b: LabelKey) -> LabelKey {
        let rank_a = self.rank.get(&a).copied().unwrap_or(0);
        let rank_b = self.rank.get(&b).copied().unwrap_or(0);

        let (child, root) = if rank_a < rank_b {
            (a, b)
        } else if rank_a > rank_b {
            (b, a)
        } else {
            self.rank.insert(b, rank_b + 1);
            (a, b)
        };
        self.parent.insert(child, root);
        self.min_entity.remove(&child);
        self.set_count = self.set_count.saturating_sub(1);
        root
    }

    /// Number of disjoint sets, foreign keys included.
    pub fn set_count(&self) -> usize {
        self.set_count
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

#[cfg(test)]
impl LabelDsu {
    fn same_set(&mut self, a: LabelKey, b: LabelKey) -> bool {
        self.find(a) == self.find(b)
    }
}
