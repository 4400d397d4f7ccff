mod blob;
mod commit;
mod tree;

pub use blob::*;
pub use commit::*;
pub use tree::*;

use crate::error::{MergeGenericError, MergeResult};
use num_enum::TryFromPrimitive;
use std::convert::TryFrom;
use std::fmt::{self, Debug, Display, Formatter};
use std::io::Write;
use std::str::FromStr;

#[derive(Copy, PartialEq, Eq, Clone, Hash, TryFromPrimitive)]
#[repr(u32)]
#[allow(non_camel_case_types)]
pub enum FileMode {
    /// mode zero marks an absent stage; it never appears inside a tree object
    ABSENT  = 0,
    TREE    = 0o40000,
    REG     = 0o100644,
    EXEC    = 0o100755,
    LINK    = 0o120000,
    GITLINK = 0o160000,
}

/// the logical kind of an entry; entries of different kinds never
/// content-merge directly
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FileKind {
    Absent,
    Regular,
    Symlink,
    Directory,
    Submodule,
}

impl Display for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let n = self.as_u32();
        if f.alternate() { write!(f, "{:o}", n) } else { write!(f, "{:06o}", n) }
    }
}

impl Debug for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FileMode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_absent(self) -> bool {
        matches!(self, FileMode::ABSENT)
    }

    pub fn is_link(self) -> bool {
        matches!(self, FileMode::LINK)
    }

    pub fn is_file(self) -> bool {
        matches!(self, FileMode::EXEC | FileMode::REG)
    }

    pub fn is_blob(self) -> bool {
        matches!(self, FileMode::EXEC | FileMode::REG | FileMode::LINK)
    }

    pub fn is_tree(self) -> bool {
        matches!(self, FileMode::TREE)
    }

    pub fn is_gitlink(self) -> bool {
        matches!(self, FileMode::GITLINK)
    }

    pub fn kind(self) -> FileKind {
        match self {
            FileMode::ABSENT => FileKind::Absent,
            FileMode::TREE => FileKind::Directory,
            FileMode::REG | FileMode::EXEC => FileKind::Regular,
            FileMode::LINK => FileKind::Symlink,
            FileMode::GITLINK => FileKind::Submodule,
        }
    }

    pub fn new(u: u32) -> Self {
        Self::try_from(u).unwrap_or_else(|_| panic!("invalid filemode `{:06o}`", u))
    }

    pub fn infer_obj_type(self) -> ObjType {
        match self {
            Self::TREE => ObjType::Tree,
            Self::EXEC | Self::REG | Self::LINK => ObjType::Blob,
            _ => unreachable!("invalid filemode for obj `{}`", self),
        }
    }
}

impl FromStr for FileMode {
    type Err = MergeGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(u32::from_str_radix(s, 8)?))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ObjType {
    Commit,
    Tree,
    Blob,
}

impl Display for ObjType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjType::Commit => "commit",
            ObjType::Tree => "tree",
            ObjType::Blob => "blob",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ObjType {
    type Err = MergeGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(ObjType::Commit),
            "tree" => Ok(ObjType::Tree),
            "blob" => Ok(ObjType::Blob),
            _ => bail!("unknown object type `{}`", s),
        }
    }
}

pub trait Serialize {
    fn serialize(&self, writer: &mut dyn Write) -> MergeResult<()>;
}

pub trait WritableObject: Serialize {
    fn obj_ty(&self) -> ObjType;

    /// serialize the object with its `<type> <size>\0` header; the content
    /// hash is computed over exactly these bytes
    fn serialize_with_headers(&self) -> MergeResult<Vec<u8>> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        let mut buf = vec![];
        write!(buf, "{} {}\0", self.obj_ty(), bytes.len())?;
        buf.extend_from_slice(&bytes);
        Ok(buf)
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum ObjKind {
    Blob(Blob),
    Commit(Commit),
    Tree(Tree),
}

impl ObjKind {
    pub fn obj_type(&self) -> ObjType {
        match self {
            ObjKind::Blob(_) => ObjType::Blob,
            ObjKind::Commit(_) => ObjType::Commit,
            ObjKind::Tree(_) => ObjType::Tree,
        }
    }

    pub fn into_blob(self) -> Option<Blob> {
        match self {
            ObjKind::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    pub fn into_tree(self) -> Option<Tree> {
        match self {
            ObjKind::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn into_commit(self) -> Option<Commit> {
        match self {
            ObjKind::Commit(commit) => Some(commit),
            _ => None,
        }
    }
}

impl Serialize for ObjKind {
    fn serialize(&self, writer: &mut dyn Write) -> MergeResult<()> {
        match self {
            ObjKind::Blob(blob) => blob.serialize(writer),
            ObjKind::Commit(commit) => commit.serialize(writer),
            ObjKind::Tree(tree) => tree.serialize(writer),
        }
    }
}

impl WritableObject for ObjKind {
    fn obj_ty(&self) -> ObjType {
        self.obj_type()
    }
}
