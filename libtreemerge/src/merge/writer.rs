//! Tree reconstruction: walk the processed paths in an order that puts each
//! directory immediately before its contents, emit tree objects bottom-up,
//! and hand back the root tree id.

use super::state::{PathInfo, Version};
use super::MergeCtxt;
use crate::error::MergeResult;
use crate::hash::Oid;
use crate::obj::{FileMode, TreeEntry};
use crate::path::TreePath;

/// Bookkeeping for the bottom-up tree writing: a flat list of finished
/// versions and a stack of (directory, offset) frames marking where each
/// still-open directory's entries start.
pub(super) struct DirectoryVersions {
    versions: Vec<(TreePath, Version)>,
    offsets: Vec<(TreePath, usize)>,
    last_directory: Option<TreePath>,
}

impl DirectoryVersions {
    fn new() -> Self {
        Self { versions: vec![], offsets: vec![], last_directory: None }
    }
}

impl MergeCtxt<'_> {
    /// Process all paths and write the result tree. Entries are visited in
    /// reverse sorted order so every path below a directory is handled before
    /// the directory itself, and conflicted entries run through the entry
    /// processor on the way.
    pub(super) fn process_entries(&mut self) -> MergeResult<Oid> {
        if self.state.paths.is_empty() {
            return self.store.write_tree(vec![]);
        }

        let mut plist: Vec<TreePath> = self.state.paths.iter().map(|(path, _)| path).collect();
        plist.sort_by(|a, b| TreePath::cmp_dirs_next_to_children(a, b));

        let mut dir_metadata = DirectoryVersions::new();
        for &path in plist.iter().rev() {
            let info = match self.state.paths.get(path) {
                Some(info) => *info,
                None => bug!("path `{}` vanished while writing trees", path),
            };
            self.write_completed_directories(info.merged().directory_name, &mut dir_metadata)?;
            match info {
                PathInfo::Resolved(..) => self.record_entry_for_tree(&mut dir_metadata, path, &info),
                PathInfo::Conflicted(..) => self.process_entry(path, &mut dir_metadata)?,
            }
        }

        if dir_metadata.offsets.len() != 1 || dir_metadata.offsets[0].1 != 0 {
            bug!("directory metadata accounting is off: {:?}", dir_metadata.offsets);
        }
        self.write_tree_object(&mut dir_metadata.versions, 0)
    }

    /// record the final version of `path` in its directory's pending entries
    pub(super) fn record_entry_for_tree(
        &mut self,
        dir_metadata: &mut DirectoryVersions,
        path: TreePath,
        info: &PathInfo,
    ) {
        let merged = info.merged();
        if merged.is_null {
            // resolved by removal; contributes nothing
            return;
        }
        if let PathInfo::Conflicted(ci) = info {
            // conflicted directory placeholders were already entered by
            // write_completed_directories
            if ci.filemask == 0 {
                return;
            }
        }
        let basename = &path.as_str()[merged.basename_offset..];
        debug_assert!(!basename.contains('/'));
        dir_metadata.versions.push((TreePath::intern(basename), merged.result));
    }

    /// Called before each entry with its containing directory. When the walk
    /// leaves a directory, pop its frame, write its accumulated entries as a
    /// tree object, and record that tree in the parent's frame. Relies on
    /// interning: directory names compare by pointer.
    fn write_completed_directories(
        &mut self,
        new_directory_name: TreePath,
        info: &mut DirectoryVersions,
    ) -> MergeResult<()> {
        if Some(new_directory_name) == info.last_directory {
            return Ok(());
        }

        // either we are just starting, or we moved deeper: open a new frame
        // and record where this directory's entries begin
        let is_deeper = match info.last_directory {
            None => true,
            Some(last) => new_directory_name.as_str().starts_with(last.as_str()),
        };
        if is_deeper {
            info.offsets.push((new_directory_name, info.versions.len()));
            info.last_directory = Some(new_directory_name);
            return Ok(());
        }

        // the next entry lives outside last_directory, so all of that
        // directory's entries are known: write its tree
        let last_directory = match info.last_directory {
            Some(last) => last,
            None => bug!("leaving a directory before entering one"),
        };
        let (_, offset) = *info.offsets.last().unwrap();

        let dir_version = if offset == info.versions.len() {
            // an empty directory collapses into nothing on its parent
            None
        } else {
            let oid = self.write_tree_object(&mut info.versions, offset)?;
            Some(Version::new(oid, FileMode::TREE))
        };

        // store the result on the directory's own record; a file fighting
        // with this directory finds it there when it gets processed
        match self.state.paths.get_mut(last_directory) {
            Some(record) => {
                let merged = record.merged_mut();
                match dir_version {
                    Some(version) => merged.result = version,
                    None => merged.is_null = true,
                }
            }
            None => bug!("no record for completed directory `{}`", last_directory),
        }

        info.offsets.pop();

        // open the parent's frame unless it is already on top of the stack
        let prev_dir = info.offsets.last().map(|&(dir, _)| dir);
        if prev_dir != Some(new_directory_name) {
            info.offsets.push((new_directory_name, info.versions.len()));
        }

        // finally the finished directory becomes an entry of its parent
        if let Some(version) = dir_version {
            let basename = last_directory.file_name();
            info.versions.push((TreePath::intern(basename), version));
        }
        info.last_directory = Some(new_directory_name);
        Ok(())
    }

    /// write the versions from `offset` onward as one tree object, shrinking
    /// the list back to `offset`
    fn write_tree_object(
        &self,
        versions: &mut Vec<(TreePath, Version)>,
        offset: usize,
    ) -> MergeResult<Oid> {
        let entries: Vec<TreeEntry> = versions
            .drain(offset..)
            .map(|(basename, version)| TreeEntry {
                mode: version.mode,
                path: basename,
                oid: version.oid,
            })
            .collect();
        // the store canonicalizes entry order before hashing
        self.store.write_tree(entries)
    }
}
