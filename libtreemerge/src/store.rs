use crate::error::{MergeError, MergeResult};
use crate::hash::Oid;
use crate::obj::{Blob, Commit, ObjKind, ObjType, Tree, TreeEntry, WritableObject};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// The object store surface the merge engine consumes. Objects are immutable
/// and content-addressed; implementations are responsible for their own
/// synchronization (reads and writes may be issued from the engine at any
/// point of a merge).
pub trait ObjectStore {
    fn read_obj(&self, oid: Oid) -> MergeResult<ObjKind>;

    fn write_obj(&self, obj: ObjKind) -> MergeResult<Oid>;

    fn contains(&self, oid: Oid) -> bool;

    /// every commit object currently in the store; the submodule merge
    /// resolution search walks these in lieu of refs
    fn commits(&self) -> Vec<Oid>;

    fn read_blob(&self, oid: Oid) -> MergeResult<Vec<u8>> {
        let obj = self.read_obj(oid)?;
        let found = obj.obj_type();
        obj.into_blob()
            .map(Blob::into_bytes)
            .ok_or_else(|| anyhow!(MergeError::ExpectedType { oid, expected: ObjType::Blob, found }))
    }

    fn read_tree(&self, oid: Oid) -> MergeResult<Tree> {
        if oid == Oid::EMPTY_TREE && !self.contains(oid) {
            return Ok(Tree::default());
        }
        let obj = self.read_obj(oid)?;
        let found = obj.obj_type();
        obj.into_tree()
            .ok_or_else(|| anyhow!(MergeError::ExpectedType { oid, expected: ObjType::Tree, found }))
    }

    fn read_commit(&self, oid: Oid) -> MergeResult<Commit> {
        let obj = self.read_obj(oid)?;
        let found = obj.obj_type();
        obj.into_commit().ok_or_else(|| {
            anyhow!(MergeError::ExpectedType { oid, expected: ObjType::Commit, found })
        })
    }

    fn write_blob(&self, bytes: Vec<u8>) -> MergeResult<Oid> {
        self.write_obj(ObjKind::Blob(Blob::new(bytes)))
    }

    /// entries are canonicalized (sorted treating directory names as if
    /// slash-terminated) before the raw tree is hashed
    fn write_tree(&self, entries: Vec<TreeEntry>) -> MergeResult<Oid> {
        self.write_obj(ObjKind::Tree(Tree::new(entries)))
    }

    fn write_commit(&self, commit: Commit) -> MergeResult<Oid> {
        self.write_obj(ObjKind::Commit(commit))
    }
}

/// In-memory object database. All merge inputs and outputs live here; nothing
/// ever touches disk.
#[derive(Default)]
pub struct MemOdb {
    objects: RwLock<FxHashMap<Oid, ObjKind>>,
}

impl MemOdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemOdb {
    fn read_obj(&self, oid: Oid) -> MergeResult<ObjKind> {
        self.objects
            .read()
            .get(&oid)
            .cloned()
            .ok_or_else(|| anyhow!(MergeError::ObjectNotFound(oid)))
    }

    fn write_obj(&self, obj: ObjKind) -> MergeResult<Oid> {
        let bytes = obj.serialize_with_headers()?;
        let oid = Oid::hash_of(&bytes);
        trace!("MemOdb::write_obj({}, {})", obj.obj_type(), oid);
        self.objects.write().entry(oid).or_insert(obj);
        Ok(oid)
    }

    fn contains(&self, oid: Oid) -> bool {
        self.objects.read().contains_key(&oid)
    }

    fn commits(&self) -> Vec<Oid> {
        self.objects
            .read()
            .iter()
            .filter(|(_, obj)| obj.obj_type() == ObjType::Commit)
            .map(|(&oid, _)| oid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MergeResultExt;
    use crate::obj::FileMode;
    use crate::path::TreePath;

    #[test]
    fn blob_roundtrip() -> MergeResult<()> {
        let odb = MemOdb::new();
        let oid = odb.write_blob(b"hello\n".to_vec())?;
        assert_eq!(odb.read_blob(oid)?, b"hello\n");
        assert!(odb.read_blob(Oid::EMPTY_TREE).is_not_found_err());
        Ok(())
    }

    #[test]
    fn tree_writes_are_canonical() -> MergeResult<()> {
        let odb = MemOdb::new();
        let blob = odb.write_blob(b"x".to_vec())?;
        let entry = |name: &str, mode| TreeEntry { mode, path: TreePath::intern(name), oid: blob };
        let a = odb.write_tree(vec![entry("a", FileMode::REG), entry("b", FileMode::REG)])?;
        let b = odb.write_tree(vec![entry("b", FileMode::REG), entry("a", FileMode::REG)])?;
        assert_eq!(a, b);

        // re-reading and re-writing an emitted tree yields the same oid
        let reread = odb.read_tree(a)?;
        assert_eq!(odb.write_tree(reread.entries)?, a);
        Ok(())
    }

    #[test]
    fn empty_tree_is_readable_without_write() -> MergeResult<()> {
        let odb = MemOdb::new();
        assert!(odb.read_tree(Oid::EMPTY_TREE)?.entries.is_empty());
        assert_eq!(odb.write_tree(vec![])?, Oid::EMPTY_TREE);
        Ok(())
    }

    #[test]
    fn type_mismatch_is_reported() -> MergeResult<()> {
        use crate::error::MergeErrorExt;
        let odb = MemOdb::new();
        let blob = odb.write_blob(b"not a tree".to_vec())?;
        let err = odb.read_tree(blob).unwrap_err().try_into_merge_error()?;
        assert_eq!(
            err,
            MergeError::ExpectedType { oid: blob, expected: ObjType::Tree, found: ObjType::Blob }
        );
        Ok(())
    }
}
