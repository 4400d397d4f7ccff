use super::{FileMode, ObjType, Serialize, WritableObject};
use crate::error::MergeResult;
use crate::hash::{Oid, OID_SIZE};
use crate::path::TreePath;
use std::cmp::Ordering;
use std::io::Write;

#[derive(PartialEq, Debug, Default, Clone)]
pub struct Tree {
    /// sorted by [`TreeEntry::entry_cmp`] (directories as if slash-terminated)
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(TreeEntry::entry_cmp);
        Self { entries }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct TreeEntry {
    pub mode: FileMode,
    /// entry name relative to the containing tree
    pub path: TreePath,
    pub oid: Oid,
}

impl TreeEntry {
    // we must have files sorted before directories with the same prefix,
    // i.e. `index.rs` < `index/`, but the trailing slash is not stored in the
    // entry name, so the comparison pads it back on
    pub fn entry_cmp(a: &Self, b: &Self) -> Ordering {
        TreePath::path_cmp_explicit(a.path, a.mode.is_tree(), b.path, b.mode.is_tree())
    }
}

impl Serialize for Tree {
    fn serialize(&self, writer: &mut dyn Write) -> MergeResult<()> {
        for entry in &self.entries {
            entry.serialize(writer)?;
        }
        Ok(())
    }
}

impl Serialize for TreeEntry {
    fn serialize(&self, writer: &mut dyn Write) -> MergeResult<()> {
        // the alternate display impl does not zero-pad the mode
        write!(writer, "{:#} {}\0", self.mode, self.path)?;
        writer.write_all(self.oid.as_ref())?;
        Ok(())
    }
}

impl Tree {
    pub fn deserialize(bytes: &[u8]) -> MergeResult<Self> {
        let mut entries = vec![];
        let mut rest = bytes;
        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| anyhow!("malformed tree entry: missing mode terminator"))?;
            let mode = FileMode::new(u32::from_str_radix(std::str::from_utf8(&rest[..space])?, 8)?);
            rest = &rest[space + 1..];

            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| anyhow!("malformed tree entry: missing name terminator"))?;
            let path = TreePath::intern(std::str::from_utf8(&rest[..nul])?);
            rest = &rest[nul + 1..];

            ensure!(rest.len() >= OID_SIZE, "malformed tree entry: truncated oid");
            let mut oid_bytes = [0; OID_SIZE];
            oid_bytes.copy_from_slice(&rest[..OID_SIZE]);
            rest = &rest[OID_SIZE..];

            entries.push(TreeEntry { mode, path, oid: Oid::new(oid_bytes) });
        }
        Ok(Self { entries })
    }
}

impl WritableObject for Tree {
    fn obj_ty(&self) -> ObjType {
        ObjType::Tree
    }
}
