//! A minimal in-memory index with merge stages, the landing zone for
//! `merge_switch_to_result`. Tracks one tree's flattened content at stage 0
//! plus higher-stage entries for conflicted paths; nothing is persisted.

use crate::error::MergeResult;
use crate::hash::Oid;
use crate::obj::FileMode;
use crate::path::TreePath;
use crate::store::ObjectStore;
use num_enum::TryFromPrimitive;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum MergeStage {
    None = 0,
    Base = 1,
    Ours = 2,
    Theirs = 3,
}

impl MergeStage {
    pub fn from_stage_index(index: usize) -> Self {
        Self::try_from(index as u8 + 1).unwrap()
    }
}

impl Display for MergeStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: TreePath,
    pub oid: Oid,
    pub mode: FileMode,
    pub stage: MergeStage,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Index {
    /// sorted by path then stage, the on-disk index entry ordering
    entries: BTreeMap<(TreePath, MergeStage), IndexEntry>,
    /// tree produced by the last merge switched onto this index
    auto_merge: Option<Oid>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConflictType {
    BothModified,
    ModifyDelete,
    DeleteModify,
    BothAdded,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: TreePath,
    pub conflict_type: ConflictType,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, entry: IndexEntry) {
        self.entries.insert((entry.path, entry.stage), entry);
    }

    pub fn find_entry(&self, path: TreePath, stage: MergeStage) -> Option<IndexEntry> {
        self.entries.get(&(path, stage)).copied()
    }

    pub fn remove_entry(&mut self, path: TreePath, stage: MergeStage) {
        self.entries.remove(&(path, stage));
    }

    pub fn remove_all_stages(&mut self, path: TreePath) {
        self.entries.retain(|&(entry_path, _), _| entry_path != path);
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn auto_merge(&self) -> Option<Oid> {
        self.auto_merge
    }

    pub fn set_auto_merge(&mut self, tree: Oid) {
        self.auto_merge = Some(tree);
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.keys().any(|&(_, stage)| stage != MergeStage::None)
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        let mut conflicts = vec![];
        let mut last: Option<(TreePath, [bool; 4])> = None;
        for &(path, stage) in self.entries.keys() {
            match &mut last {
                Some((current, stages)) if *current == path => stages[stage as usize] = true,
                other => {
                    if let Some(conflict) = other.take().and_then(classify) {
                        conflicts.push(conflict);
                    }
                    let mut stages = [false; 4];
                    stages[stage as usize] = true;
                    last = Some((path, stages));
                }
            }
        }
        if let Some(conflict) = last.and_then(classify) {
            conflicts.push(conflict);
        }
        conflicts
    }

    /// flatten `tree` into stage-0 entries, replacing the current content
    pub fn read_tree(&mut self, store: &dyn ObjectStore, tree: Oid) -> MergeResult<()> {
        self.entries.clear();
        self.read_tree_into(store, tree, TreePath::ROOT)
    }

    /// apply the `prev` -> `next` tree difference to the stage-0 entries,
    /// leaving unrelated entries alone
    pub fn apply_tree_diff(
        &mut self,
        store: &dyn ObjectStore,
        prev: Oid,
        next: Oid,
    ) -> MergeResult<()> {
        let mut prev_flat = Index::new();
        prev_flat.read_tree_into(store, prev, TreePath::ROOT)?;
        let mut next_flat = Index::new();
        next_flat.read_tree_into(store, next, TreePath::ROOT)?;

        for entry in prev_flat.entries() {
            if next_flat.find_entry(entry.path, MergeStage::None).is_none() {
                self.remove_entry(entry.path, MergeStage::None);
            }
        }
        for &entry in next_flat.entries() {
            if prev_flat.find_entry(entry.path, MergeStage::None) != Some(entry) {
                self.add_entry(entry);
            }
        }
        Ok(())
    }

    fn read_tree_into(
        &mut self,
        store: &dyn ObjectStore,
        tree: Oid,
        prefix: TreePath,
    ) -> MergeResult<()> {
        for entry in store.read_tree(tree)?.entries {
            let path = prefix.join(entry.path.as_str());
            if entry.mode.is_tree() {
                self.read_tree_into(store, entry.oid, path)?;
            } else {
                self.add_entry(IndexEntry {
                    path,
                    oid: entry.oid,
                    mode: entry.mode,
                    stage: MergeStage::None,
                });
            }
        }
        Ok(())
    }
}

fn classify((path, stages): (TreePath, [bool; 4])) -> Option<Conflict> {
    let [_, base, ours, theirs] = stages;
    let conflict_type = match (base, ours, theirs) {
        (true, true, true) => ConflictType::BothModified,
        (true, true, false) => ConflictType::ModifyDelete,
        (true, false, true) => ConflictType::DeleteModify,
        (false, true, true) => ConflictType::BothAdded,
        _ => return None,
    };
    Some(Conflict { path, conflict_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, stage: MergeStage) -> IndexEntry {
        IndexEntry {
            path: TreePath::intern(path),
            oid: Oid::EMPTY_BLOB,
            mode: FileMode::REG,
            stage,
        }
    }

    #[test]
    fn conflict_classification() {
        let mut index = Index::new();
        index.add_entry(entry("clean", MergeStage::None));
        index.add_entry(entry("both", MergeStage::Base));
        index.add_entry(entry("both", MergeStage::Ours));
        index.add_entry(entry("both", MergeStage::Theirs));
        index.add_entry(entry("gone-theirs", MergeStage::Base));
        index.add_entry(entry("gone-theirs", MergeStage::Ours));
        index.add_entry(entry("added", MergeStage::Ours));
        index.add_entry(entry("added", MergeStage::Theirs));

        assert!(index.has_conflicts());
        assert_eq!(
            index.conflicts(),
            vec![
                Conflict {
                    path: TreePath::intern("added"),
                    conflict_type: ConflictType::BothAdded
                },
                Conflict {
                    path: TreePath::intern("both"),
                    conflict_type: ConflictType::BothModified
                },
                Conflict {
                    path: TreePath::intern("gone-theirs"),
                    conflict_type: ConflictType::ModifyDelete
                },
            ]
        );
    }
}
