//! The three-way tree merge engine: orchestration, options, and outcome.
//!
//! A merge runs in four strictly ordered phases over shared per-path state:
//! tree collection, rename detection and application, entry processing, and
//! tree writing. The phases live in the submodules; this module sequences
//! them, handles recursion over multiple merge bases, and owns the public
//! entry points.

mod collect;
mod process;
mod rename;
mod state;
mod writer;

#[cfg(test)]
mod tests;

pub use state::{ConflictInfo, MergedInfo, PathInfo, PathState, Version};

use crate::ancestry;
use crate::attrs::AttrIndex;
use crate::error::MergeResult;
use crate::hash::Oid;
use crate::index::{Index, IndexEntry, MergeStage};
use crate::obj::{Commit, FileMode, Signature, TreeEntry};
use crate::path::TreePath;
use crate::store::ObjectStore;
use crate::xdiff::{ConflictStyle, MergeVariant, XdlFlags, MAX_SIMILARITY_SCORE};
use rename::RenameInfo;
use std::io::Write;

/// how inferred directory renames are applied to paths added inside a
/// renamed directory
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DirectoryRenames {
    /// ignore directory renames entirely
    Disabled,
    /// reroute the path but flag it as a conflict for the user to confirm
    Conflict,
    /// silently reroute affected paths
    Enabled,
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// label shown for the merge base in conflict markers; required for
    /// non-recursive merges, computed for recursive ones
    pub ancestor: Option<String>,
    pub branch1: String,
    pub branch2: String,
    pub detect_renames: bool,
    pub detect_directory_renames: DirectoryRenames,
    /// soft cap on rename candidates; 0 means the built-in default
    pub rename_limit: usize,
    /// minimum similarity for a rename pair, out of [`MAX_SIMILARITY_SCORE`]
    pub rename_score: u32,
    /// tiebreaker for symlinks and unresolvable content
    pub recursive_variant: MergeVariant,
    /// run attribute-defined normalization before comparing content
    pub renormalize: bool,
    /// re-root the base and side2 trees under this prefix before merging
    pub subtree_shift: Option<String>,
    pub conflict_style: ConflictStyle,
    /// diff algorithm flags; histogram by default
    pub xdl_opts: XdlFlags,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            ancestor: None,
            branch1: "HEAD".to_owned(),
            branch2: "other".to_owned(),
            detect_renames: true,
            detect_directory_renames: DirectoryRenames::Conflict,
            rename_limit: 0,
            rename_score: crate::xdiff::DEFAULT_RENAME_SCORE,
            recursive_variant: MergeVariant::Normal,
            renormalize: false,
            subtree_shift: None,
            conflict_style: ConflictStyle::Merge,
            xdl_opts: XdlFlags::default(),
        }
    }
}

/// The result of one in-core merge. Holds the engine's internal state until
/// [`merge_finalize`] (or a switch to the result) releases it; passing the
/// outcome back into the next merge lets a rebase or cherry-pick sequence
/// reuse rename detection work.
#[derive(Debug)]
pub struct MergeOutcome {
    /// no path ended up conflicted
    pub clean: bool,
    /// the merged result tree
    pub tree: Oid,
    pub(crate) state: Option<Box<MergeState>>,
}

impl MergeOutcome {
    /// paths with conflicted records, sorted
    pub fn unmerged_paths(&self) -> Vec<TreePath> {
        let state = self.state_ref();
        let mut paths: Vec<_> = state.paths.unmerged.iter().copied().collect();
        paths.sort();
        paths
    }

    pub fn path_info(&self, path: impl AsRef<str>) -> Option<&PathInfo> {
        self.state_ref().paths.get(TreePath::intern(path))
    }

    /// advisory messages accumulated during the merge, sorted by path
    pub fn messages(&self) -> Vec<(TreePath, &str)> {
        self.state_ref().paths.output_sorted()
    }

    pub fn message_for(&self, path: impl AsRef<str>) -> Option<&str> {
        self.state_ref().paths.message_for(TreePath::intern(path))
    }

    pub fn needed_rename_limit(&self) -> usize {
        self.state_ref().needed_rename_limit
    }

    fn state_ref(&self) -> &MergeState {
        self.state.as_ref().expect("merge outcome already finalized")
    }
}

#[derive(Debug)]
pub(crate) struct MergeState {
    pub paths: PathState,
    pub renames: RenameInfo,
    pub attr_index: Option<AttrIndex>,
    pub attr_index_initialized: bool,
    pub call_depth: u32,
    pub needed_rename_limit: usize,
}

impl MergeState {
    fn new() -> Self {
        Self {
            paths: PathState::default(),
            renames: RenameInfo::new(),
            attr_index: None,
            attr_index_initialized: false,
            call_depth: 0,
            needed_rename_limit: 0,
        }
    }

    /// clear per-merge state between recursion levels or for the post-rename
    /// redo, preserving rename caches for any still-valid side
    pub(crate) fn reinit(&mut self) {
        self.paths.reinit();
        self.renames.reinit();
        self.attr_index = None;
        self.attr_index_initialized = false;
    }
}

pub(crate) struct MergeCtxt<'a> {
    pub store: &'a dyn ObjectStore,
    pub opts: MergeOptions,
    pub state: Box<MergeState>,
}

impl<'a> MergeCtxt<'a> {
    fn start(
        store: &'a dyn ObjectStore,
        mut opts: MergeOptions,
        reuse: Option<MergeOutcome>,
        trees: Option<(Oid, Oid, Oid)>,
    ) -> Self {
        // option validation failures are caller bugs, not merge errors
        assert!(!opts.branch1.is_empty() && !opts.branch2.is_empty());
        assert!(opts.rename_score <= MAX_SIMILARITY_SCORE);

        // hardcode the histogram diff for now
        opts.xdl_opts.insert(XdlFlags::HISTOGRAM_DIFF);

        let state = match reuse {
            Some(outcome) => {
                let prev_tree = outcome.tree;
                let mut state = outcome.state.expect("merge outcome already finalized");
                assert_eq!(state.call_depth, 0);
                if let Some((merge_base, side1, side2)) = trees {
                    merge_check_renames_reusable(&mut state, prev_tree, merge_base, side1, side2);
                }
                state.reinit();
                state
            }
            None => Box::new(MergeState::new()),
        };

        Self { store, opts, state }
    }

    fn into_outcome(self, tree: Oid, clean: bool) -> MergeOutcome {
        MergeOutcome { clean, tree, state: Some(self.state) }
    }

    fn merge_trees_internal(
        &mut self,
        merge_base: Oid,
        side1: Oid,
        side2: Oid,
    ) -> MergeResult<(Oid, bool)> {
        debug!(
            "MergeCtxt::merge_trees_internal({}, {}, {}) at depth {}",
            merge_base, side1, side2, self.state.call_depth
        );

        let (merge_base, side2) = match self.opts.subtree_shift.clone() {
            Some(prefix) => {
                (shift_tree(self.store, merge_base, &prefix)?, shift_tree(self.store, side2, &prefix)?)
            }
            None => (merge_base, side2),
        };

        loop {
            self.collect_merge_info(merge_base, side1, side2)?;
            let clean = self.detect_and_process_renames()?;
            if self.state.renames.redo_after_renames == 2 {
                // rename results are now cached; repeating collection lets the
                // trivial-directory resolution actually fire
                debug!("MergeCtxt::merge_trees_internal: redoing collection with cached renames");
                self.state.reinit();
                continue;
            }
            let tree = self.process_entries()?;
            let clean = clean && self.state.paths.unmerged.is_empty();
            return Ok((tree, clean));
        }
    }

    fn merge_recursive_internal(
        &mut self,
        merge_bases: Vec<Oid>,
        h1: Oid,
        h2: Oid,
    ) -> MergeResult<(Oid, bool)> {
        let merge_bases = if merge_bases.is_empty() {
            let mut bases = ancestry::get_merge_bases(self.store, h1, h2)?;
            // merge oldest bases first
            bases.reverse();
            bases
        } else {
            merge_bases
        };

        let mut iter = merge_bases.into_iter();
        let first = iter.next();
        let remaining: Vec<Oid> = iter.collect();

        let (mut merged_base, ancestor_name) = match first {
            None => {
                // no common ancestor; merge against an empty tree
                let empty = self.store.write_tree(vec![])?;
                let virt = make_virtual_commit(self.store, empty, "ancestor", &[])?;
                (virt, "empty tree".to_owned())
            }
            Some(base) => {
                let name = match &self.opts.ancestor {
                    Some(ancestor) if self.state.call_depth == 0 => ancestor.clone(),
                    _ if !remaining.is_empty() => "merged common ancestors".to_owned(),
                    _ => base.short(),
                };
                (base, name)
            }
        };

        for other_base in remaining {
            let prev = merged_base;
            self.state.call_depth += 1;
            let saved_branches = (self.opts.branch1.clone(), self.opts.branch2.clone());
            self.opts.branch1 = "Temporary merge branch 1".to_owned();
            self.opts.branch2 = "Temporary merge branch 2".to_owned();
            let (tree, _clean) = self.merge_recursive_internal(vec![], prev, other_base)?;
            self.opts.branch1 = saved_branches.0;
            self.opts.branch2 = saved_branches.1;
            self.state.call_depth -= 1;

            merged_base =
                make_virtual_commit(self.store, tree, "merged tree", &[prev, other_base])?;
            self.state.reinit();
        }

        self.opts.ancestor = Some(ancestor_name);
        let base_tree = self.store.read_commit(merged_base)?.tree;
        let tree1 = self.store.read_commit(h1)?.tree;
        let tree2 = self.store.read_commit(h2)?.tree;
        let result = self.merge_trees_internal(base_tree, tree1, tree2);
        // avoid accidental reuse of the computed label
        self.opts.ancestor = None;
        result
    }
}

/// Three-way merge of `side1` and `side2` against the given base tree.
/// `reuse` threads the previous outcome of a cherry-pick/rebase sequence back
/// in so rename detection can be skipped where its inputs are unchanged.
pub fn merge_incore_nonrecursive(
    store: &dyn ObjectStore,
    opts: &MergeOptions,
    merge_base: Oid,
    side1: Oid,
    side2: Oid,
    reuse: Option<MergeOutcome>,
) -> MergeResult<MergeOutcome> {
    assert!(opts.ancestor.is_some(), "non-recursive merges must label the merge base");
    let mut ctxt = MergeCtxt::start(store, opts.clone(), reuse, Some((merge_base, side1, side2)));
    // record the trees used, so a subsequent merge in a cherry-pick or rebase
    // sequence can tell whether the rename cache still applies
    ctxt.state.renames.merge_trees = [merge_base, side1, side2];
    let (tree, clean) = ctxt.merge_trees_internal(merge_base, side1, side2)?;
    Ok(ctxt.into_outcome(tree, clean))
}

/// Merge two commits, recursively merging multiple merge bases into a
/// synthetic ancestor first. `merge_bases` overrides ancestor discovery when
/// non-empty (oldest first).
pub fn merge_incore_recursive(
    store: &dyn ObjectStore,
    opts: &MergeOptions,
    merge_bases: &[Oid],
    side1: Oid,
    side2: Oid,
) -> MergeResult<MergeOutcome> {
    assert!(opts.ancestor.is_none(), "the recursive merge computes its own ancestor label");
    let mut ctxt = MergeCtxt::start(store, opts.clone(), None, None);
    let (tree, clean) = ctxt.merge_recursive_internal(merge_bases.to_vec(), side1, side2)?;
    Ok(ctxt.into_outcome(tree, clean))
}

/// Move the index onto the merge result: refresh stage-0 entries for the
/// `prev_tree` -> result difference, replace unmerged paths with their
/// stage-1/2/3 entries, record the auto-merge marker, and print accumulated
/// advisories. Consumes (finalizes) the outcome.
pub fn merge_switch_to_result(
    store: &dyn ObjectStore,
    opts: &MergeOptions,
    index: &mut Index,
    prev_tree: Oid,
    outcome: MergeOutcome,
    update_index: bool,
    display_update_msgs: bool,
    out: &mut dyn Write,
) -> MergeResult<()> {
    let state = outcome.state.as_ref().expect("merge outcome already finalized");

    if update_index {
        index.apply_tree_diff(store, prev_tree, outcome.tree)?;
        for path in outcome.unmerged_paths() {
            let ci = match state.paths.get(path).and_then(PathInfo::as_conflict) {
                Some(ci) => ci,
                None => bug!("unmerged path `{}` has no conflict record", path),
            };
            index.remove_all_stages(path);
            for stage in 0..3 {
                if ci.filemask & (1 << stage) == 0 {
                    continue;
                }
                index.add_entry(IndexEntry {
                    path,
                    oid: ci.stages[stage].oid,
                    mode: ci.stages[stage].mode,
                    stage: MergeStage::from_stage_index(stage),
                });
            }
        }
        index.set_auto_merge(outcome.tree);
    }

    if display_update_msgs {
        for (_, msg) in state.paths.output_sorted() {
            write!(out, "{}", msg)?;
        }
        if opts.detect_renames && state.needed_rename_limit > 0 {
            writeln!(
                out,
                "warning: inexact rename detection was skipped due to too many files; \
                 consider a rename limit of at least {}",
                state.needed_rename_limit
            )?;
        }
    }

    merge_finalize(outcome);
    Ok(())
}

/// Release the merge's internal state.
pub fn merge_finalize(outcome: MergeOutcome) {
    drop(outcome);
}

fn merge_check_renames_reusable(
    state: &mut MergeState,
    prev_tree: Oid,
    merge_base: Oid,
    side1: Oid,
    side2: Oid,
) {
    let merge_trees = state.renames.merge_trees;

    // the cache carries over only when this merge looks like the next step of
    // a linear cherry-pick/rebase: the previous result becomes one side and
    // the previous side tree becomes the base
    if merge_base == merge_trees[2] && side1 == prev_tree {
        state.renames.cached_pairs_valid_side = 1;
    } else if merge_base == merge_trees[1] && side2 == prev_tree {
        state.renames.cached_pairs_valid_side = 2;
    } else {
        state.renames.cached_pairs_valid_side = 0;
    }
    debug!(
        "merge_check_renames_reusable: cached_pairs_valid_side = {}",
        state.renames.cached_pairs_valid_side
    );
}

/// Re-root `tree` under `prefix`, building one tree object per component.
fn shift_tree(store: &dyn ObjectStore, tree: Oid, prefix: &str) -> MergeResult<Oid> {
    let mut shifted = tree;
    for component in prefix.rsplit('/').filter(|component| !component.is_empty()) {
        shifted = store.write_tree(vec![TreeEntry {
            mode: FileMode::TREE,
            path: TreePath::intern(component),
            oid: shifted,
        }])?;
    }
    Ok(shifted)
}

fn make_virtual_commit(
    store: &dyn ObjectStore,
    tree: Oid,
    comment: &str,
    parents: &[Oid],
) -> MergeResult<Oid> {
    let mut time = 0;
    for &parent in parents {
        time = std::cmp::max(time, store.read_commit(parent)?.committer.time + 1);
    }
    let signature = Signature::new("virtual", "virtual", time);
    store.write_commit(Commit {
        tree,
        parents: parents.iter().copied().collect(),
        author: signature.clone(),
        committer: signature,
        message: comment.to_owned(),
    })
}
