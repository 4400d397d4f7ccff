//! A small rebase driver: replay a linear run of commits onto a new base by
//! looping the in-core merge, threading each outcome back into the next step
//! so rename detection gets reused instead of recomputed.

use crate::error::MergeResult;
use crate::hash::Oid;
use crate::merge::{merge_finalize, merge_incore_nonrecursive, MergeOptions, MergeOutcome};
use crate::obj::Commit;
use crate::store::ObjectStore;
use rustc_hash::FxHashSet;

#[derive(Debug)]
pub struct RebaseOutcome {
    /// tip of the rebased chain (== `onto` when there was nothing to do)
    pub new_tip: Oid,
    /// commits created, oldest first
    pub picked: Vec<Oid>,
    /// the first commit whose replay conflicted, along with the conflicted
    /// merge, when the rebase could not complete
    pub stopped_at: Option<(Oid, MergeOutcome)>,
}

/// Replay `upstream..branch` onto `onto`. Stops at the first conflict rather
/// than attempting any resolution.
pub fn fast_rebase(
    store: &dyn ObjectStore,
    opts: &MergeOptions,
    onto: Oid,
    upstream: Oid,
    branch: Oid,
) -> MergeResult<RebaseOutcome> {
    let to_replay = commits_to_replay(store, upstream, branch)?;
    debug!("fast_rebase: replaying {} commits onto {}", to_replay.len(), onto);

    let mut result_tree = store.read_commit(onto)?.tree;
    let mut last_commit = onto;
    let mut picked = vec![];
    let mut reusable: Option<MergeOutcome> = None;

    for oid in to_replay {
        let commit = store.read_commit(oid)?;
        let base = commit.parents[0];
        let base_tree = store.read_commit(base)?.tree;

        let mut step_opts = opts.clone();
        step_opts.branch1 = "HEAD".to_owned();
        step_opts.branch2 = oid.short();
        step_opts.ancestor = Some(format!("parent of {}", oid.short()));

        let outcome = merge_incore_nonrecursive(
            store,
            &step_opts,
            base_tree,
            result_tree,
            commit.tree,
            reusable.take(),
        )?;

        if !outcome.clean {
            return Ok(RebaseOutcome { new_tip: last_commit, picked, stopped_at: Some((oid, outcome)) });
        }

        result_tree = outcome.tree;
        last_commit = create_commit(store, result_tree, &commit, last_commit)?;
        picked.push(last_commit);
        reusable = Some(outcome);
    }

    if let Some(outcome) = reusable {
        merge_finalize(outcome);
    }
    Ok(RebaseOutcome { new_tip: last_commit, picked, stopped_at: None })
}

/// commits of `upstream..branch`, oldest first; merges are not replayable
fn commits_to_replay(store: &dyn ObjectStore, upstream: Oid, branch: Oid) -> MergeResult<Vec<Oid>> {
    let mut excluded = FxHashSet::default();
    let mut queue = vec![upstream];
    while let Some(oid) = queue.pop() {
        if excluded.insert(oid) {
            queue.extend(store.read_commit(oid)?.parents);
        }
    }

    let mut commits = vec![];
    let mut current = branch;
    while !excluded.contains(&current) {
        let commit = store.read_commit(current)?;
        ensure!(commit.parents.len() == 1, "cannot replay merge commit `{}`", current);
        commits.push(current);
        current = commit.parents[0];
    }
    commits.reverse();
    Ok(commits)
}

/// a new commit with `based_on`'s author and message on top of `parent`
fn create_commit(
    store: &dyn ObjectStore,
    tree: Oid,
    based_on: &Commit,
    parent: Oid,
) -> MergeResult<Oid> {
    let parent_time = store.read_commit(parent)?.committer.time;
    let mut committer = based_on.committer.clone();
    committer.time = std::cmp::max(committer.time, parent_time + 1);
    store.write_commit(Commit {
        tree,
        parents: smallvec![parent],
        author: based_on.author.clone(),
        committer,
        message: based_on.message.clone(),
    })
}
