//! In-memory three-way merge of commit trees for a content-addressed store.
//!
//! The engine takes a merge base tree and two side trees, walks all three in
//! lockstep, detects file and directory renames, content-merges what it can,
//! and writes a new result tree back to the object store. Conflicted paths are
//! reported through per-path records and advisory messages rather than
//! aborting the merge. This is the machinery behind merge, cherry-pick,
//! rebase, and revert.

#![deny(rust_2018_idioms)]

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate log;

#[macro_use]
extern crate smallvec;

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

#[macro_use]
mod macros;

#[cfg(test)]
#[macro_use]
pub mod test_utils;

pub mod ancestry;
pub mod attrs;
pub mod error;
pub mod hash;
pub mod index;
pub mod merge;
pub mod obj;
pub mod path;
pub mod picks;
pub mod rebase;
pub mod store;
pub mod xdiff;

mod interner;
