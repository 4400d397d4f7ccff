//! Tri-tree collection: a synchronized walk of the base and both side trees
//! that materializes the per-path state, primes rename detection, and defers
//! subtrees that look like trivial one-side merges.

use super::state::{ConflictInfo, MergedInfo, PathInfo, Version};
use super::MergeCtxt;
use crate::error::MergeResult;
use crate::hash::Oid;
use crate::path::TreePath;
use std::collections::BTreeMap;

fn masks(versions: &[Version; 3]) -> (u8, u8) {
    let mut mask = 0;
    let mut dirmask = 0;
    for (index, version) in versions.iter().enumerate() {
        if version.is_present() {
            mask |= 1 << index;
        }
        if version.mode.is_tree() {
            dirmask |= 1 << index;
        }
    }
    (mask, dirmask)
}

impl MergeCtxt<'_> {
    pub(super) fn collect_merge_info(
        &mut self,
        merge_base: Oid,
        side1: Oid,
        side2: Oid,
    ) -> MergeResult<()> {
        debug!("MergeCtxt::collect_merge_info({}, {}, {})", merge_base, side1, side2);
        let tree_version = |oid| Version::new(oid, crate::obj::FileMode::TREE);
        self.collect_tree(
            TreePath::ROOT,
            [tree_version(merge_base), tree_version(side1), tree_version(side2)],
        )?;
        self.handle_deferred_entries()
    }

    /// walk one directory level of the three trees, aligning entries by name
    fn collect_tree(&mut self, dirname: TreePath, dir_versions: [Version; 3]) -> MergeResult<()> {
        let mut aligned: BTreeMap<TreePath, [Version; 3]> = BTreeMap::new();
        for (index, version) in dir_versions.iter().enumerate() {
            if !version.mode.is_tree() {
                continue;
            }
            let tree = self.store.read_tree(version.oid)?;
            for entry in tree.entries {
                aligned.entry(entry.path).or_insert([Version::ABSENT; 3])[index] =
                    Version::new(entry.oid, entry.mode);
            }
        }

        if matches!(self.state.renames.dir_rename_mask, 2 | 4) {
            // the ignore-unchanged-rename-source optimization is only valid if
            // we account for every file in this directory before descending
            // into any subdirectory: a file added on the side that still has
            // the directory forces full rename detection underneath
            for versions in aligned.values() {
                let (mask, dirmask) = masks(versions);
                if mask & !dirmask == self.state.renames.dir_rename_mask {
                    self.state.renames.dir_rename_mask = 0x07;
                    break;
                }
            }
        }

        for (name, versions) in aligned {
            self.collect_entry(dirname, name, versions)?;
        }
        Ok(())
    }

    fn collect_entry(
        &mut self,
        dirname: TreePath,
        name: TreePath,
        names: [Version; 3],
    ) -> MergeResult<()> {
        let (mask, dirmask) = masks(&names);
        let filemask = mask & !dirmask;
        let prev_dir_rename_mask = self.state.renames.dir_rename_mask;

        let mbase_null = mask & 1 == 0;
        let side1_null = mask & 2 == 0;
        let side2_null = mask & 4 == 0;
        let side1_matches_mbase = !side1_null && !mbase_null && names[0] == names[1];
        let side2_matches_mbase = !side2_null && !mbase_null && names[0] == names[2];
        let sides_match = !side1_null && !side2_null && names[1] == names[2];

        // only files get df_conflict. directories stay where they are while
        // files move out of the way, so a parent directory's D/F conflict is
        // not this entry's problem
        let df_conflict = filemask != 0 && dirmask != 0;

        debug_assert!(mask > 0 && mask < 8);
        debug_assert_eq!(mask, dirmask | filemask);

        let match_mask = if side1_matches_mbase {
            if side2_matches_mbase { 7 } else { 3 }
        } else if side2_matches_mbase {
            5
        } else if sides_match {
            6
        } else {
            0
        };

        let fullpath = dirname.join(name.as_str());
        trace!(
            "MergeCtxt::collect_entry({}): mask={}, dirmask={}, match_mask={}",
            fullpath, mask, dirmask, match_mask
        );

        // if base, side1, and side2 all match we can resolve early; even if
        // these are trees there are no renames or anything else underneath
        if side1_matches_mbase && side2_matches_mbase {
            self.setup_resolved_path(fullpath, dirname, names[0], mbase_null);
            return Ok(());
        }

        // if all three are files there will be no renames for or under this
        // path; matching sides can resolve to either side
        if filemask == 7 && sides_match {
            self.setup_resolved_path(fullpath, dirname, names[1], false);
            return Ok(());
        }

        // even sources that match one side go through rename bookkeeping:
        // exact renames are cheap and can remove both a source and a
        // destination; unneeded sources are culled later
        self.state.renames.collect_rename_info(
            names, dirname, fullpath, filemask, dirmask, match_mask,
        );

        // a file matching the base on one side resolves to the other side;
        // trees cannot take this shortcut, they may hold rename targets
        if side1_matches_mbase && filemask == 0x07 {
            self.setup_resolved_path(fullpath, dirname, names[2], false);
            return Ok(());
        }
        if side2_matches_mbase && filemask == 0x07 {
            self.setup_resolved_path(fullpath, dirname, names[1], false);
            return Ok(());
        }

        // provisional conflict; rename detection may still unconflict it
        let mut ci = ConflictInfo::new(dirname, fullpath);
        ci.stages = names;
        ci.filemask = filemask;
        ci.dirmask = dirmask;
        ci.df_conflict = df_conflict;
        ci.match_mask = match_mask;

        if dirmask != 0 {
            // the side that does NOT match the base is the one that might
            // hold a rename target we still need to find
            let mut side = if side1_matches_mbase {
                2
            } else if side2_matches_mbase {
                1
            } else {
                0
            };
            if filemask == 0 && (dirmask == 2 || dirmask == 4) {
                // a directory new on exactly one side; the other two stages
                // agree (on absence), making it a trivial-merge candidate
                ci.match_mask = 7 - dirmask;
                side = (dirmask / 2) as usize;
            }

            let renames = &mut self.state.renames;
            if renames.dir_rename_mask != 0x07
                && side != 0
                && renames.trivial_merges_okay[side]
                && !renames.target_dirs[side].contains(&fullpath)
            {
                renames.possible_trivial_merges[side].insert(fullpath, renames.dir_rename_mask);
                renames.dir_rename_mask = prev_dir_rename_mask;
                self.state.paths.put(fullpath, PathInfo::Conflicted(ci));
                return Ok(());
            }

            ci.match_mask &= ci.filemask;
            self.state.paths.put(fullpath, PathInfo::Conflicted(ci));

            let mut subtrees = [Version::ABSENT; 3];
            for (index, version) in names.iter().enumerate() {
                if version.mode.is_tree() {
                    subtrees[index] = *version;
                }
            }
            self.collect_tree(fullpath, subtrees)?;
            self.state.renames.dir_rename_mask = prev_dir_rename_mask;
        } else {
            self.state.paths.put(fullpath, PathInfo::Conflicted(ci));
        }

        Ok(())
    }

    fn setup_resolved_path(
        &mut self,
        fullpath: TreePath,
        dirname: TreePath,
        version: Version,
        is_null: bool,
    ) {
        debug_assert!(!is_null || version.is_absent());
        let mut merged = MergedInfo::new(dirname);
        merged.result = version;
        merged.is_null = is_null;
        self.state.paths.put(fullpath, PathInfo::Resolved(merged));
    }

    /// Second pass after the main traversal: decide the fate of every
    /// deferred subtree, either collapsing it to the side that has it or
    /// recursing now that rename-target directories are known.
    fn handle_deferred_entries(&mut self) -> MergeResult<()> {
        let path_count_before = self.state.paths.len();
        let mut path_count_after = 0;

        for side in 1..=2usize {
            let mut optimization_okay = true;

            // every relevant source must have a cached rename resolution, and
            // every cached rename target must be reachable, for the trivial
            // resolution of deferred directories to be sound
            let mut relevant: Vec<TreePath> =
                self.state.renames.relevant_sources[side].keys().copied().collect();
            relevant.sort();
            for source in relevant {
                let renames = &mut self.state.renames;
                if renames.cached_irrelevant[side].contains(&source) {
                    continue;
                }
                let target = match renames.cached_pairs[side].get(&source) {
                    None => {
                        optimization_okay = false;
                        break;
                    }
                    // a cached delete is already enough information
                    Some(None) => continue,
                    Some(&Some(target)) => target,
                };
                if self.state.paths.contains(target) {
                    continue;
                }
                // make sure later recursion descends into every directory
                // leading to this rename target
                for dir in target.ancestors() {
                    if !self.state.renames.target_dirs[side].insert(dir) {
                        break;
                    }
                }
            }
            self.state.renames.trivial_merges_okay[side] = optimization_okay;

            let mut deferred: Vec<(TreePath, u8)> =
                self.state.renames.possible_trivial_merges[side].drain().collect();
            deferred.sort();
            for (path, dir_rename_mask) in deferred {
                if optimization_okay && !self.state.renames.target_dirs[side].contains(&path) {
                    self.resolve_trivial_directory_merge(path, side);
                    continue;
                }

                let ci = match self.state.paths.get_mut(path) {
                    Some(PathInfo::Conflicted(ci)) => {
                        ci.match_mask &= ci.filemask;
                        *ci
                    }
                    _ => bug!("deferred directory `{}` lost its record", path),
                };

                let mut subtrees = [Version::ABSENT; 3];
                for (index, version) in ci.stages.iter().enumerate() {
                    if version.mode.is_tree() {
                        subtrees[index] = *version;
                    }
                }
                self.state.renames.dir_rename_mask = dir_rename_mask;
                self.collect_tree(path, subtrees)?;
            }

            // anything deferred while recursing above is trivially resolvable
            let mut leftover: Vec<TreePath> =
                self.state.renames.possible_trivial_merges[side].drain().map(|(path, _)| path).collect();
            leftover.sort();
            for path in leftover {
                debug_assert!(
                    self.state.renames.trivial_merges_okay[side]
                        && !self.state.renames.target_dirs[side].contains(&path)
                );
                self.resolve_trivial_directory_merge(path, side);
            }

            if !optimization_okay || path_count_after != 0 {
                path_count_after = self.state.paths.len();
            }
        }

        if path_count_after != 0 {
            // if recursing into the deferred directories ballooned the number
            // of paths, rename results are worth caching so a repeat
            // collection can skip the recursion entirely. the cutoff is a
            // tunable; the code is correct for any value
            const WANTED_FACTOR: usize = 10;

            debug_assert_eq!(self.state.renames.redo_after_renames, 0);
            if path_count_after / path_count_before.max(1) > WANTED_FACTOR {
                debug!(
                    "handle_deferred_entries: arming redo ({} -> {} paths)",
                    path_count_before, path_count_after
                );
                self.state.renames.redo_after_renames = 1;
                self.state.renames.cached_pairs_valid_side = -1;
            }
        } else if self.state.renames.redo_after_renames == 2 {
            self.state.renames.redo_after_renames = 0;
        }
        Ok(())
    }

    fn resolve_trivial_directory_merge(&mut self, path: TreePath, side: usize) {
        let info = match self.state.paths.get_mut(path) {
            Some(info) => info,
            None => bug!("trivial directory merge for unknown path `{}`", path),
        };
        let ci = match info {
            PathInfo::Conflicted(ci) => ci,
            PathInfo::Resolved(..) => bug!("trivial directory merge for resolved `{}`", path),
        };
        debug_assert!(
            (side == 1 && ci.match_mask == 5) || (side == 2 && ci.match_mask == 3),
            "match_mask {} for side {}",
            ci.match_mask,
            side
        );
        let mut merged = ci.merged;
        merged.result = ci.stages[side];
        merged.is_null = ci.stages[side].oid.is_unknown();
        *info = PathInfo::Resolved(merged);
    }
}
