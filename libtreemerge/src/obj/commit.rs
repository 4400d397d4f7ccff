use super::{ObjType, Serialize, WritableObject};
use crate::error::MergeResult;
use crate::hash::Oid;
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};
use std::io::Write;
use std::str::FromStr;

#[derive(PartialEq, Debug, Clone)]
pub struct Commit {
    pub tree: Oid,
    pub parents: SmallVec<[Oid; 2]>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// seconds since the epoch; drives the merge-base priority queue
    pub time: i64,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, time: i64) -> Self {
        Self { name: name.into(), email: email.into(), time }
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {} +0000", self.name, self.email, self.time)
    }
}

impl FromStr for Signature {
    type Err = crate::error::MergeGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lt = s.find('<').ok_or_else(|| anyhow!("malformed signature `{}`", s))?;
        let gt = s.find('>').ok_or_else(|| anyhow!("malformed signature `{}`", s))?;
        let name = s[..lt].trim_end().to_owned();
        let email = s[lt + 1..gt].to_owned();
        let time = s[gt + 1..]
            .trim_start()
            .split(' ')
            .next()
            .ok_or_else(|| anyhow!("signature missing timestamp"))?
            .parse()?;
        Ok(Self { name, email, time })
    }
}

impl Commit {
    /// first line of the commit message
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn deserialize(bytes: &[u8]) -> MergeResult<Self> {
        let text = std::str::from_utf8(bytes)?;
        let (headers, message) = text
            .split_once("\n\n")
            .ok_or_else(|| anyhow!("malformed commit: missing message separator"))?;

        let mut tree = None;
        let mut parents = SmallVec::new();
        let mut author = None;
        let mut committer = None;
        for line in headers.lines() {
            let (key, value) =
                line.split_once(' ').ok_or_else(|| anyhow!("malformed commit header `{}`", line))?;
            match key {
                "tree" => tree = Some(Oid::from_str(value)?),
                "parent" => parents.push(Oid::from_str(value)?),
                "author" => author = Some(Signature::from_str(value)?),
                "committer" => committer = Some(Signature::from_str(value)?),
                _ => bail!("unknown commit header `{}`", key),
            }
        }

        Ok(Self {
            tree: tree.ok_or_else(|| anyhow!("commit missing tree header"))?,
            parents,
            author: author.ok_or_else(|| anyhow!("commit missing author"))?,
            committer: committer.ok_or_else(|| anyhow!("commit missing committer"))?,
            message: message.to_owned(),
        })
    }
}

impl Serialize for Commit {
    fn serialize(&self, writer: &mut dyn Write) -> MergeResult<()> {
        writeln!(writer, "tree {}", self.tree)?;
        for parent in &self.parents {
            writeln!(writer, "parent {}", parent)?;
        }
        writeln!(writer, "author {}", self.author)?;
        writeln!(writer, "committer {}", self.committer)?;
        writeln!(writer)?;
        write!(writer, "{}", self.message)?;
        Ok(())
    }
}

impl WritableObject for Commit {
    fn obj_ty(&self) -> ObjType {
        ObjType::Commit
    }
}
