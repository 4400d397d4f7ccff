//! Per-entry resolution: given the collected (and rename-adjusted) state of a
//! path, decide its merged content and mode, performing content merges and
//! splitting paths apart where the two sides disagree about what the path is.

use super::state::{PathInfo, Version};
use super::writer::DirectoryVersions;
use super::MergeCtxt;
use crate::ancestry;
use crate::attrs::AttrIndex;
use crate::error::MergeResult;
use crate::hash::Oid;
use crate::obj::FileKind;
use crate::path::TreePath;
use crate::xdiff::{self, LlMergeOpts, MergeVariant};

impl MergeCtxt<'_> {
    /// Decide the merged version of one conflicted path. Runs while the tree
    /// writer walks the reverse-sorted path list, which guarantees that a
    /// directory's subtree has already been written (and its result recorded)
    /// by the time the file conflicting with it is processed.
    pub(super) fn process_entry(
        &mut self,
        path: TreePath,
        dir_metadata: &mut DirectoryVersions,
    ) -> MergeResult<()> {
        let mut ci = match self.state.paths.get(path) {
            Some(PathInfo::Conflicted(ci)) => *ci,
            _ => bug!("process_entry on resolved or missing path `{}`", path),
        };
        let mut path = path;
        debug_assert!(ci.filemask <= 7);

        if ci.filemask == 0 {
            // placeholder for a directory that was recursed into; the tree
            // writer has already dealt with it
            return Ok(());
        }

        let mut df_file_index = 0usize;
        if ci.df_conflict && ci.merged.result.mode.is_absent() {
            // the competing directory merged to nothing after all; drop the
            // directory half of the records and handle a plain file below
            ci.df_conflict = false;
            debug_assert_ne!(ci.filemask, 0);
            ci.merged.is_null = false;
            ci.match_mask &= !ci.dirmask;
            ci.dirmask = 0;
            for stage in 0..3 {
                if ci.filemask & (1 << stage) == 0 {
                    ci.stages[stage] = Version::ABSENT;
                }
            }
        } else if ci.df_conflict && !ci.merged.result.mode.is_absent() {
            // the directory survived the merge (the tree writer filled in its
            // result), so the file has to move out of its way
            debug_assert!(ci.merged.result.mode.is_tree());

            if ci.filemask == 1 {
                // the file was deleted on both sides; don't resurrect it, and
                // keep the directory's result on this record
                ci.filemask = 0;
                self.state.paths.put(path, PathInfo::Conflicted(ci));
                return Ok(());
            }

            let mut new_ci = ci;
            new_ci.match_mask &= !new_ci.dirmask;
            new_ci.dirmask = 0;
            new_ci.merged.result = Version::ABSENT;
            new_ci.merged.is_null = false;
            for stage in 0..3 {
                if new_ci.filemask & (1 << stage) == 0 {
                    new_ci.stages[stage] = Version::ABSENT;
                }
            }

            // renames can bring filemask back to 7, so the directory side
            // tells us which side the file belongs to
            df_file_index = if ci.dirmask & (1 << 1) != 0 { 2 } else { 1 };
            let branch =
                if df_file_index == 1 { self.opts.branch1.clone() } else { self.opts.branch2.clone() };
            let old_path = path;
            path = self.state.paths.unique_path(path, &branch);
            self.state.paths.put(path, PathInfo::Conflicted(new_ci));
            self.state.paths.path_msg(
                path,
                format!(
                    "CONFLICT (file/directory): directory in the way of {} from {}; moving it \
                     to {} instead.",
                    old_path, branch, path
                ),
            );

            // the old record stays behind as a bare directory placeholder
            ci.filemask = 0;
            self.state.paths.put(old_path, PathInfo::Conflicted(ci));
            ci = new_ci;
        }

        let final_clean;
        if ci.match_mask != 0 {
            // two or three stages agree; take the side that isn't the lone
            // dissenter
            final_clean = true;
            if ci.match_mask == 6 {
                ci.merged.result = ci.stages[1];
                ci.merged.is_null = false;
            } else {
                let othermask = 7 & !ci.match_mask;
                let side = if othermask == 4 { 2 } else { 1 };
                debug_assert!(othermask == 2 || othermask == 4);
                ci.merged.is_null = ci.filemask == ci.match_mask;
                ci.merged.result = ci.stages[side];
                debug_assert_eq!(ci.merged.is_null, ci.merged.result.mode.is_absent());
            }
        } else if ci.filemask >= 6 && ci.stages[1].mode.kind() != ci.stages[2].mode.kind() {
            // two different items from (file/submodule/symlink)
            if self.state.call_depth > 0 {
                // in a virtual-ancestor merge just take the base version
                ci.merged.result = ci.stages[0];
                ci.merged.is_null = ci.merged.result.mode.is_absent();
                final_clean = false;
            } else {
                // rename one (or both, if neither is a regular file) into
                // unique paths so each version can be recorded somewhere
                let o_kind = ci.stages[0].mode.kind();
                let a_kind = ci.stages[1].mode.kind();
                let b_kind = ci.stages[2].mode.kind();
                // a regular file keeps the path; the other kind moves aside.
                // with no regular file in sight, both move
                let (rename_a, rename_b) = if a_kind == FileKind::Regular && b_kind != FileKind::Regular {
                    (false, true)
                } else if b_kind == FileKind::Regular && a_kind != FileKind::Regular {
                    (true, false)
                } else {
                    (true, true)
                };

                self.state.paths.path_msg(
                    path,
                    format!(
                        "CONFLICT (distinct types): {} had different types on each side; \
                         renamed {} of them so each can be recorded somewhere.",
                        path,
                        if rename_a && rename_b { "both" } else { "one" }
                    ),
                );

                final_clean = false;
                let mut new_ci = ci;

                // put b into new_ci, removing a from its stages
                new_ci.merged.result = ci.stages[2];
                new_ci.merged.is_null = false;
                new_ci.stages[1] = Version::ABSENT;
                new_ci.filemask = 5;
                if b_kind != o_kind {
                    new_ci.stages[0] = Version::ABSENT;
                    new_ci.filemask = 4;
                }

                // leave only a in ci, fixing stages
                ci.merged.result = ci.stages[1];
                ci.merged.is_null = false;
                ci.stages[2] = Version::ABSENT;
                ci.filemask = 3;
                if a_kind != o_kind {
                    ci.stages[0] = Version::ABSENT;
                    ci.filemask = 2;
                }

                debug_assert!(rename_a || rename_b);
                let mut a_path = path;
                if rename_a {
                    // insert a's record before picking b's name, so the
                    // uniqueness check can see it
                    a_path = self.state.paths.unique_path(path, &self.opts.branch1.clone());
                    self.state.paths.put(a_path, PathInfo::Conflicted(ci));
                }
                let b_path = if rename_b {
                    self.state.paths.unique_path(path, &self.opts.branch2.clone())
                } else {
                    path
                };
                self.state.paths.put(b_path, PathInfo::Conflicted(new_ci));
                if rename_a && rename_b {
                    self.state.paths.remove(path);
                }

                // b_path will not come around again; finish it here
                self.state.paths.unmerged.insert(b_path);
                self.record_entry_for_tree(dir_metadata, b_path, &PathInfo::Conflicted(new_ci));

                // the rest of this entry's handling is about a's path
                path = a_path;
            }
        } else if ci.filemask >= 6 {
            // both sides present with the same kind: content merge (two-way
            // when the base is a different kind)
            let (merged_file, content_clean) = self.handle_content_merge(
                path,
                ci.stages[0],
                ci.stages[1],
                ci.stages[2],
                ci.pathnames,
                2 * self.state.call_depth as usize,
            )?;
            final_clean = content_clean && !ci.df_conflict && !ci.path_conflict;
            ci.merged.result = merged_file;
            ci.merged.is_null = merged_file.mode.is_absent();
            if content_clean && ci.df_conflict {
                // content resolved but the file had to dodge a directory;
                // restage it on the side it came from
                debug_assert!(df_file_index == 1 || df_file_index == 2);
                ci.filemask = 1 << df_file_index;
                ci.stages[df_file_index] = merged_file;
            }
            if !content_clean {
                let reason = if merged_file.mode.is_gitlink() {
                    "submodule"
                } else if ci.filemask == 6 {
                    "add/add"
                } else {
                    "content"
                };
                self.state
                    .paths
                    .path_msg(path, format!("CONFLICT ({}): Merge conflict in {}", reason, path));
            }
        } else if ci.filemask == 3 || ci.filemask == 5 {
            // modify/delete
            let side = if ci.filemask == 5 { 2 } else { 1 };
            let index = if self.state.call_depth > 0 { 0 } else { side };

            ci.merged.result = ci.stages[index];
            ci.merged.is_null = false;

            let (modify_branch, delete_branch) = if side == 1 {
                (self.opts.branch1.clone(), self.opts.branch2.clone())
            } else {
                (self.opts.branch2.clone(), self.opts.branch1.clone())
            };

            if self.opts.renormalize
                && self.blob_unchanged(ci.stages[0], ci.stages[side], path)?
            {
                // the "modification" disappears under renormalization, so the
                // deletion wins after all
                ci.merged.result = Version::ABSENT;
                ci.merged.is_null = true;
                final_clean = true;
            } else if ci.path_conflict && ci.stages[0].oid == ci.stages[side].oid {
                // this came from a rename/delete; the advisory for that
                // already names both paths, so stay quiet here
                final_clean = false;
            } else {
                final_clean = false;
                self.state.paths.path_msg(
                    path,
                    format!(
                        "CONFLICT (modify/delete): {} deleted in {} and modified in {}.  \
                         Version {} of {} left in tree.",
                        path, delete_branch, modify_branch, modify_branch, path
                    ),
                );
            }
        } else if ci.filemask == 2 || ci.filemask == 4 {
            // added on one side
            let side = if ci.filemask == 4 { 2 } else { 1 };
            ci.merged.result = ci.stages[side];
            ci.merged.is_null = false;
            final_clean = !ci.df_conflict && !ci.path_conflict;
        } else if ci.filemask == 1 {
            // deleted on both sides
            ci.merged.result = Version::ABSENT;
            ci.merged.is_null = true;
            final_clean = !ci.path_conflict;
        } else {
            bug!("unhandled filemask {} for `{}`", ci.filemask, path);
        }

        let record = if final_clean {
            PathInfo::Resolved(ci.merged)
        } else {
            self.state.paths.unmerged.insert(path);
            PathInfo::Conflicted(ci)
        };
        self.state.paths.put(path, record);
        self.record_entry_for_tree(dir_metadata, path, &record);
        Ok(())
    }

    /// Merge the content and mode of two same-kind versions against the base
    /// (two-way if the base changed kind). Returns the merged version and
    /// whether it was conflict-free.
    pub(super) fn handle_content_merge(
        &mut self,
        path: TreePath,
        o: Version,
        a: Version,
        b: Version,
        pathnames: [TreePath; 3],
        extra_marker_size: usize,
    ) -> MergeResult<(Version, bool)> {
        debug_assert_eq!(a.mode.kind(), b.mode.kind());
        let mut clean = true;
        let mut result = Version::ABSENT;

        // merge modes; differing file modes is the 100644/100755 case
        if a.mode == b.mode || a.mode == o.mode {
            result.mode = b.mode;
        } else {
            debug_assert!(a.mode.is_file());
            result.mode = a.mode;
            clean = b.mode == o.mode;
        }

        let two_way = o.mode.kind() != a.mode.kind();

        if a.oid == b.oid || a.oid == o.oid {
            result.oid = b.oid;
        } else if b.oid == o.oid {
            result.oid = a.oid;
        } else if a.mode.is_file() {
            let (bytes, merge_clean) = self.merge_blobs(
                path,
                if two_way { Version::ABSENT } else { o },
                a,
                b,
                pathnames,
                extra_marker_size,
            )?;
            result.oid = self.store.write_blob(bytes)?;
            clean &= merge_clean;
            self.state.paths.path_msg(path, format!("Auto-merging {}", path));
        } else if a.mode.is_gitlink() {
            let (oid, submodule_clean) = self.merge_submodule(
                pathnames[0],
                if two_way { Oid::UNKNOWN } else { o.oid },
                a.oid,
                b.oid,
            )?;
            result.oid = oid;
            clean &= submodule_clean;
            if self.state.call_depth > 0 && two_way && !submodule_clean {
                result = o;
            }
        } else if a.mode.is_link() {
            if self.state.call_depth > 0 {
                clean = false;
                result = o;
            } else {
                match self.opts.recursive_variant {
                    MergeVariant::Normal => {
                        clean = false;
                        result.oid = a.oid;
                    }
                    MergeVariant::Ours => result.oid = a.oid,
                    MergeVariant::Theirs => result.oid = b.oid,
                }
            }
        } else {
            bug!("unsupported object type in the tree: {} for {}", a.mode, path);
        }

        Ok((result, clean))
    }

    fn merge_blobs(
        &mut self,
        path: TreePath,
        o: Version,
        a: Version,
        b: Version,
        pathnames: [TreePath; 3],
        extra_marker_size: usize,
    ) -> MergeResult<(Vec<u8>, bool)> {
        self.initialize_attr_index()?;

        let ancestor = match &self.opts.ancestor {
            Some(ancestor) => ancestor.clone(),
            None => bug!("content merge without an ancestor label"),
        };
        // markers carry just the branch names unless renames moved content
        // between differently named paths
        let (label_base, label_a, label_b) =
            if pathnames[0] == pathnames[1] && pathnames[1] == pathnames[2] {
                (ancestor, self.opts.branch1.clone(), self.opts.branch2.clone())
            } else {
                (
                    format!("{}:{}", ancestor, pathnames[0]),
                    format!("{}:{}", self.opts.branch1, pathnames[1]),
                    format!("{}:{}", self.opts.branch2, pathnames[2]),
                )
            };

        let read = |version: Version| -> MergeResult<Vec<u8>> {
            if version.is_absent() { Ok(vec![]) } else { self.store.read_blob(version.oid) }
        };
        let orig = read(o)?;
        let src1 = read(a)?;
        let src2 = read(b)?;

        let ll_opts = LlMergeOpts {
            renormalize: self.opts.renormalize,
            extra_marker_size,
            variant: if self.state.call_depth > 0 {
                MergeVariant::Normal
            } else {
                self.opts.recursive_variant
            },
            style: self.opts.conflict_style,
            virtual_ancestor: self.state.call_depth > 0,
            attrs: self.state.attr_index.as_ref(),
            path: path.as_str(),
        };
        let (bytes, merge_clean) =
            xdiff::ll_merge(&ll_opts, &orig, &label_base, &src1, &label_a, &src2, &label_b);
        Ok((bytes, merge_clean))
    }

    /// Submodule merge via ancestry: fast-forward when one side contains the
    /// other, otherwise look for existing commits that merge both and leave
    /// the choice to the user.
    fn merge_submodule(
        &mut self,
        path: TreePath,
        o: Oid,
        a: Oid,
        b: Oid,
    ) -> MergeResult<(Oid, bool)> {
        let fallback = if self.state.call_depth > 0 { o } else { a };
        let search = self.state.call_depth == 0;

        // deletion conflicts cannot be handled here
        if o.is_unknown() || a.is_unknown() || b.is_unknown() {
            return Ok((fallback, false));
        }

        let commits_present = [o, a, b]
            .iter()
            .all(|&oid| self.store.read_commit(oid).is_ok());
        if !commits_present {
            self.state
                .paths
                .path_msg(path, format!("Failed to merge submodule {} (commits not present)", path));
            return Ok((fallback, false));
        }

        // both changes must be forward relative to the merge base
        if !ancestry::in_merge_bases(self.store, o, a)?
            || !ancestry::in_merge_bases(self.store, o, b)?
        {
            self.state.paths.path_msg(
                path,
                format!("Failed to merge submodule {} (commits don't follow merge-base)", path),
            );
            return Ok((fallback, false));
        }

        if ancestry::in_merge_bases(self.store, a, b)? {
            self.state
                .paths
                .path_msg(path, format!("Note: Fast-forwarding submodule {} to {}", path, b));
            return Ok((b, true));
        }
        if ancestry::in_merge_bases(self.store, b, a)? {
            self.state
                .paths
                .path_msg(path, format!("Note: Fast-forwarding submodule {} to {}", path, a));
            return Ok((a, true));
        }

        if !search {
            return Ok((fallback, false));
        }

        let merges = ancestry::find_first_merges(self.store, a, b)?;
        match merges.len() {
            0 => self.state.paths.path_msg(path, format!("Failed to merge submodule {}", path)),
            1 => {
                let suggestion = self.format_commit(merges[0])?;
                self.state.paths.path_msg(
                    path,
                    format!(
                        "Failed to merge submodule {}, but a possible merge resolution \
                         exists:\n    {}\nif this is correct, add it to the index to accept \
                         this suggestion.",
                        path, suggestion
                    ),
                );
            }
            _ => {
                let mut listing = String::new();
                for &merge in &merges {
                    listing.push_str("\n    ");
                    listing.push_str(&self.format_commit(merge)?);
                }
                self.state.paths.path_msg(
                    path,
                    format!(
                        "Failed to merge submodule {}, but multiple possible merges exist:{}",
                        path, listing
                    ),
                );
            }
        }
        Ok((fallback, false))
    }

    fn format_commit(&self, oid: Oid) -> MergeResult<String> {
        let commit = self.store.read_commit(oid)?;
        Ok(format!("{} {}", oid.short(), commit.subject()))
    }

    /// does the "modified" side match the base once renormalization is
    /// applied to both?
    fn blob_unchanged(&mut self, base: Version, side: Version, path: TreePath) -> MergeResult<bool> {
        use std::borrow::Cow;

        if base.mode != side.mode {
            return Ok(false);
        }
        if base.oid == side.oid {
            return Ok(true);
        }
        // only blobs can be renormalized; anything else stays "changed"
        if !base.mode.is_blob() {
            return Ok(false);
        }

        self.initialize_attr_index()?;
        let base_bytes = self.store.read_blob(base.oid)?;
        let side_bytes = self.store.read_blob(side.oid)?;
        let attrs = self.state.attr_index.as_ref();
        let base_norm = crate::attrs::renormalize(attrs, path.as_str(), true, &base_bytes);
        let side_norm = crate::attrs::renormalize(attrs, path.as_str(), true, &side_bytes);

        // if neither buffer changed, the differing hashes already settled it
        if matches!(base_norm, Cow::Borrowed(_)) && matches!(side_norm, Cow::Borrowed(_)) {
            return Ok(false);
        }
        Ok(base_norm == side_norm)
    }

    /// Renormalization needs attributes; build a throwaway attribute index
    /// from the `.gitattributes` at the root of the trees being merged.
    fn initialize_attr_index(&mut self) -> MergeResult<()> {
        if !self.opts.renormalize || self.state.attr_index_initialized {
            return Ok(());
        }
        self.state.attr_index_initialized = true;

        let info = match self.state.paths.get(TreePath::GITATTRIBUTES) {
            Some(info) => *info,
            None => return Ok(()),
        };

        let mut content = vec![];
        match info {
            PathInfo::Resolved(merged) => {
                if merged.result.mode.is_blob() {
                    content.extend(self.store.read_blob(merged.result.oid)?);
                }
            }
            PathInfo::Conflicted(ci) => {
                for stage in 0..3 {
                    if ci.filemask & (1 << stage) != 0 && ci.stages[stage].mode.is_blob() {
                        content.extend(self.store.read_blob(ci.stages[stage].oid)?);
                        content.push(b'\n');
                    }
                }
            }
        }
        if !content.is_empty() {
            self.state.attr_index = Some(AttrIndex::parse(&content));
        }
        Ok(())
    }
}
