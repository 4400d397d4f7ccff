//! Per-path merge records and the store that holds them for one merge.

use crate::hash::Oid;
use crate::obj::FileMode;
use crate::path::TreePath;
use rustc_hash::{FxHashMap, FxHashSet};

/// a (content, mode) pair; mode [`FileMode::ABSENT`] marks an empty stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub oid: Oid,
    pub mode: FileMode,
}

impl Version {
    pub const ABSENT: Self = Self { oid: Oid::UNKNOWN, mode: FileMode::ABSENT };

    pub fn new(oid: Oid, mode: FileMode) -> Self {
        Self { oid, mode }
    }

    pub fn is_absent(self) -> bool {
        self.mode.is_absent()
    }

    pub fn is_present(self) -> bool {
        !self.is_absent()
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::ABSENT
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MergedInfo {
    pub result: Version,
    pub is_null: bool,
    /// Containing directory name. Interning guarantees that equal directory
    /// strings are pointer-identical, so the tree writer can compare these
    /// without walking bytes.
    pub directory_name: TreePath,
    /// offset of the basename within the full path
    pub basename_offset: usize,
}

impl MergedInfo {
    pub fn new(directory_name: TreePath) -> Self {
        Self {
            result: Version::ABSENT,
            is_null: false,
            directory_name,
            basename_offset: if directory_name.is_root() { 0 } else { directory_name.len() + 1 },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictInfo {
    pub merged: MergedInfo,
    /// base, side1, side2
    pub stages: [Version; 3],
    /// where each stage's content originally lived (renames make these differ)
    pub pathnames: [TreePath; 3],
    pub df_conflict: bool,
    pub path_conflict: bool,
    /// bit i set iff stage i is a file
    pub filemask: u8,
    /// bit i set iff stage i is a directory
    pub dirmask: u8,
    /// which stages are byte-identical to at least one other stage
    pub match_mask: u8,
}

impl ConflictInfo {
    pub fn new(directory_name: TreePath, fullpath: TreePath) -> Self {
        Self {
            merged: MergedInfo::new(directory_name),
            stages: [Version::ABSENT; 3],
            pathnames: [fullpath; 3],
            df_conflict: false,
            path_conflict: false,
            filemask: 0,
            dirmask: 0,
            match_mask: 0,
        }
    }
}

/// A per-path record: either fully resolved or carrying the three staged
/// versions of a (potential) conflict. The variant is the `clean` bit.
#[derive(Debug, Clone, Copy)]
pub enum PathInfo {
    Resolved(MergedInfo),
    Conflicted(ConflictInfo),
}

impl PathInfo {
    pub fn is_clean(&self) -> bool {
        matches!(self, PathInfo::Resolved(..))
    }

    pub fn merged(&self) -> &MergedInfo {
        match self {
            PathInfo::Resolved(merged) => merged,
            PathInfo::Conflicted(ci) => &ci.merged,
        }
    }

    pub fn merged_mut(&mut self) -> &mut MergedInfo {
        match self {
            PathInfo::Resolved(merged) => merged,
            PathInfo::Conflicted(ci) => &mut ci.merged,
        }
    }

    pub fn as_conflict(&self) -> Option<&ConflictInfo> {
        match self {
            PathInfo::Resolved(..) => None,
            PathInfo::Conflicted(ci) => Some(ci),
        }
    }
}

/// All per-path state of a single merge: the path records themselves, the
/// set of paths left unmerged, and the advisory output keyed by path.
#[derive(Debug, Default)]
pub struct PathState {
    paths: FxHashMap<TreePath, PathInfo>,
    pub unmerged: FxHashSet<TreePath>,
    output: FxHashMap<TreePath, String>,
}

impl PathState {
    pub fn put(&mut self, path: TreePath, info: PathInfo) {
        self.paths.insert(path, info);
    }

    pub fn get(&self, path: TreePath) -> Option<&PathInfo> {
        self.paths.get(&path)
    }

    pub fn get_mut(&mut self, path: TreePath) -> Option<&mut PathInfo> {
        self.paths.get_mut(&path)
    }

    pub fn remove(&mut self, path: TreePath) {
        self.paths.remove(&path);
    }

    pub fn contains(&self, path: TreePath) -> bool {
        self.paths.contains_key(&path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TreePath, &PathInfo)> {
        self.paths.iter().map(|(&path, info)| (path, info))
    }

    /// `"{path}~{branch}"` with `/` flattened to `_`, suffixed `_N` until the
    /// name is unused; for moving files aside on path collisions
    pub fn unique_path(&self, path: TreePath, branch: &str) -> TreePath {
        let base = format!("{}~{}", path, branch.replace('/', "_"));
        let mut candidate = TreePath::intern(&base);
        let mut suffix = 0;
        while self.contains(candidate) {
            candidate = TreePath::intern(format!("{}_{}", base, suffix));
            suffix += 1;
        }
        candidate
    }

    /// append an advisory line for `path`
    pub fn path_msg(&mut self, path: TreePath, msg: impl AsRef<str>) {
        let buf = self.output.entry(path).or_default();
        buf.push_str(msg.as_ref());
        buf.push('\n');
    }

    pub fn message_for(&self, path: TreePath) -> Option<&str> {
        self.output.get(&path).map(String::as_str)
    }

    /// advisory messages sorted by path
    pub fn output_sorted(&self) -> Vec<(TreePath, &str)> {
        let mut out: Vec<_> =
            self.output.iter().map(|(&path, msg)| (path, msg.as_str())).collect();
        out.sort_by_key(|&(path, _)| path);
        out
    }

    /// drop per-path records between merges, keeping accumulated output
    pub fn reinit(&mut self) {
        self.paths.clear();
        self.unmerged.clear();
    }
}
