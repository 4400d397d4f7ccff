//! Approximate cherry-pick/revert detection: a plain text scan of commit
//! messages for the trailers `git cherry-pick -x` and `git revert` leave
//! behind. "Approximate" because nothing stops a user from writing (or
//! deleting) such lines by hand.

use crate::error::MergeResult;
use crate::hash::Oid;
use crate::store::ObjectStore;
use std::str::FromStr;

const CHERRY_MSG: &str = "cherry picked from commit ";
const REVERT_MSG: &str = "This reverts commit ";
const REVERT_MSG_BASE: &str = "reversing\nchanges made to ";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PickKind {
    CherryPick,
    Revert,
}

/// What a commit message claims the commit to be a replay of.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MessagePick {
    pub kind: PickKind,
    /// the commit this one claims to pick or revert
    pub pick_of: Oid,
    /// the ancestor the replay was computed against (the picked commit's
    /// parent, or the named base for a revert of a merge)
    pub base: Option<Oid>,
}

/// Scan `commit`'s message for a cherry-pick or revert claim. Returns None
/// when the message makes no claim, the claimed oid does not parse or does
/// not exist, or the claim is self-contradictory (e.g. a cherry-pick of a
/// merge commit without saying which parent to replay against).
pub fn get_message_pick(store: &dyn ObjectStore, commit: Oid) -> MergeResult<Option<MessagePick>> {
    let message = store.read_commit(commit)?.message;

    let (kind, pick_of, mut base) = if let Some(rest) = find_after(&message, CHERRY_MSG) {
        let pick_of = match parse_oid_prefix(rest) {
            Some(oid) => oid,
            None => return Ok(None),
        };
        (PickKind::CherryPick, pick_of, None)
    } else if let Some(rest) = find_after(&message, REVERT_MSG) {
        let pick_of = match parse_oid_prefix(rest) {
            Some(oid) => oid,
            None => return Ok(None),
        };
        let base = match find_after(&message, REVERT_MSG_BASE) {
            // revert relative to an explicitly named base
            Some(rest) => match parse_oid_prefix(rest) {
                Some(oid) => Some(oid),
                None => return Ok(None),
            },
            None => None,
        };
        (PickKind::Revert, pick_of, base)
    } else {
        return Ok(None);
    };

    // the claim only counts if the referenced commit actually exists here
    let picked = match store.read_commit(pick_of) {
        Ok(picked) => picked,
        Err(..) => return Ok(None),
    };

    if base.is_none() {
        base = match picked.parents.len() {
            0 => None,
            1 => Some(picked.parents[0]),
            // a revert of a merge without naming the parent, or a pick of a
            // merge, which makes no sense
            _ => return Ok(None),
        };
    }

    Ok(Some(MessagePick { kind, pick_of, base }))
}

fn find_after<'a>(message: &'a str, needle: &str) -> Option<&'a str> {
    message.find(needle).map(|idx| &message[idx + needle.len()..])
}

fn parse_oid_prefix(rest: &str) -> Option<Oid> {
    let hex: String = rest.chars().take_while(char::is_ascii_hexdigit).collect();
    Oid::from_str(&hex).ok()
}
