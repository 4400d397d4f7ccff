//! Commit-graph queries the merge engine needs: best common ancestors,
//! ancestry containment, and the candidate-merge search used for submodules.

use crate::error::MergeResult;
use crate::hash::Oid;
use crate::store::ObjectStore;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

bitflags! {
    #[derive(Default)]
    struct NodeFlags: u8 {
        const PARENT1 = 1 << 0;
        const PARENT2 = 1 << 1;
        const RESULT = 1 << 2;
        const STALE = 1 << 3;
    }
}

#[derive(Debug)]
struct CommitNode {
    oid: Oid,
    time: i64,
    index: usize,
}

impl PartialOrd for CommitNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CommitNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CommitNode {}

impl Ord for CommitNode {
    // we want this cmp to suit a maxheap: the most recent (largest timestamp)
    // commit is the greatest, ties broken towards the smallest index
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| other.index.cmp(&self.index))
            .then_with(|| bug!("index should be unique"))
    }
}

struct MergeBaseCtxt<'a> {
    store: &'a dyn ObjectStore,
    candidates: Vec<Oid>,
    pqueue: BinaryHeap<CommitNode>,
    node_flags: FxHashMap<Oid, NodeFlags>,
    index: usize,
}

impl<'a> MergeBaseCtxt<'a> {
    fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            candidates: Default::default(),
            pqueue: Default::default(),
            node_flags: Default::default(),
            index: Default::default(),
        }
    }

    fn still_interesting(&self) -> bool {
        // interesting if the pqueue still contains any non-stale nodes,
        // otherwise everything will be stale from here on so we can stop
        self.pqueue.iter().any(|node| !self.node_flags[&node.oid].contains(NodeFlags::STALE))
    }

    fn mk_node(&mut self, oid: Oid) -> MergeResult<CommitNode> {
        let index = self.index;
        self.index += 1;
        let time = self.store.read_commit(oid)?.committer.time;
        Ok(CommitNode { oid, time, index })
    }

    fn merge_bases_all(mut self, a: Oid, b: Oid) -> MergeResult<Vec<Oid>> {
        self.build_candidates(a, b)?;
        let node_flags = &self.node_flags;
        self.candidates.retain(|oid| !node_flags[oid].contains(NodeFlags::STALE));
        Ok(self.candidates)
    }

    fn build_candidates(&mut self, a: Oid, b: Oid) -> MergeResult<()> {
        for (commit, flags) in [(a, NodeFlags::PARENT1), (b, NodeFlags::PARENT2)] {
            let node = self.mk_node(commit)?;
            self.node_flags.entry(node.oid).or_default().insert(flags);
            self.pqueue.push(node);
        }

        while self.still_interesting() {
            let node = match self.pqueue.pop() {
                Some(node) => node,
                None => break,
            };

            let flags = self.node_flags.get_mut(&node.oid).unwrap();
            // unset the result bit, as we don't want to propagate it
            let mut parent_flags = *flags & !NodeFlags::RESULT;

            if flags.contains(NodeFlags::PARENT1 | NodeFlags::PARENT2) {
                // parents of a potential result node are stale and can be
                // ruled out of the candidate set
                parent_flags.insert(NodeFlags::STALE);
                if !flags.intersects(NodeFlags::RESULT | NodeFlags::STALE) {
                    flags.insert(NodeFlags::RESULT);
                    self.candidates.push(node.oid);
                }
            }

            let parents = self.store.read_commit(node.oid)?.parents;
            for &parent in &parents {
                let pflags = self.node_flags.entry(parent).or_default();
                if *pflags == parent_flags {
                    continue;
                }
                *pflags |= parent_flags;
                let parent_node = self.mk_node(parent)?;
                self.pqueue.push(parent_node);
            }
        }
        Ok(())
    }
}

/// Best common ancestors of `a` and `b`, most recent first.
pub fn get_merge_bases(store: &dyn ObjectStore, a: Oid, b: Oid) -> MergeResult<Vec<Oid>> {
    debug!("get_merge_bases({}, {})", a, b);
    MergeBaseCtxt::new(store).merge_bases_all(a, b)
}

/// Is `ancestor` an ancestor of (or equal to) `descendant`?
pub fn in_merge_bases(store: &dyn ObjectStore, ancestor: Oid, descendant: Oid) -> MergeResult<bool> {
    let mut seen = FxHashSet::default();
    let mut queue = vec![descendant];
    while let Some(oid) = queue.pop() {
        if oid == ancestor {
            return Ok(true);
        }
        if !seen.insert(oid) {
            continue;
        }
        queue.extend(store.read_commit(oid)?.parents);
    }
    Ok(false)
}

/// All merge commits in the store that contain both `a` and `b`, pruned so
/// that no returned merge contains another; ordered oldest first.
pub fn find_first_merges(store: &dyn ObjectStore, a: Oid, b: Oid) -> MergeResult<Vec<Oid>> {
    let mut merges = vec![];
    for oid in store.commits() {
        let commit = store.read_commit(oid)?;
        if commit.is_merge()
            && oid != a
            && oid != b
            && in_merge_bases(store, a, oid)?
            && in_merge_bases(store, b, oid)?
        {
            merges.push((commit.committer.time, oid));
        }
    }
    merges.sort();

    let mut result = vec![];
    'outer: for &(_, m1) in &merges {
        for &(_, m2) in &merges {
            if m1 != m2 && in_merge_bases(store, m2, m1)? {
                continue 'outer;
            }
        }
        result.push(m1);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemOdb;
    use crate::test_utils::commit;

    /// a - b - c - i - j
    ///      \      /
    ///       d - e - f
    ///        \
    ///         g - h
    #[test]
    fn best_common_ancestors() -> MergeResult<()> {
        let odb = MemOdb::new();
        let a = commit(&odb, &[], 1);
        let b = commit(&odb, &[a], 2);
        let c = commit(&odb, &[b], 3);
        let d = commit(&odb, &[b], 4);
        let e = commit(&odb, &[d], 5);
        let _f = commit(&odb, &[e], 6);
        let g = commit(&odb, &[d], 7);
        let h = commit(&odb, &[g], 8);
        let i = commit(&odb, &[c, e], 9);
        let j = commit(&odb, &[i], 10);

        assert_eq!(get_merge_bases(&odb, h, j)?, vec![d]);
        assert!(in_merge_bases(&odb, a, j)?);
        assert!(!in_merge_bases(&odb, h, j)?);
        Ok(())
    }

    // a - c
    //   X
    // b - d
    #[test]
    fn criss_cross_merge_bases() -> MergeResult<()> {
        let odb = MemOdb::new();
        let a = commit(&odb, &[], 1);
        let b = commit(&odb, &[], 2);
        let c = commit(&odb, &[a, b], 3);
        let d = commit(&odb, &[a, b], 4);

        let mut bases = get_merge_bases(&odb, c, d)?;
        bases.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(bases, expected);
        Ok(())
    }

    #[test]
    fn first_merges() -> MergeResult<()> {
        let odb = MemOdb::new();
        let root = commit(&odb, &[], 1);
        let a = commit(&odb, &[root], 2);
        let b = commit(&odb, &[root], 3);
        let m = commit(&odb, &[a, b], 4);
        let later = commit(&odb, &[m, b], 5);

        // `later` contains `m`, so only `m` survives the pruning
        let _ = later;
        assert_eq!(find_first_merges(&odb, a, b)?, vec![m]);
        Ok(())
    }
}
