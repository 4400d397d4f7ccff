use crate::hash::Oid;
use crate::obj::{Commit, FileMode, Signature, TreeEntry};
use crate::path::TreePath;
use crate::store::ObjectStore;
use quickcheck::Arbitrary;
use std::collections::BTreeMap;

pub fn file_entry(store: &dyn ObjectStore, name: &str, content: &str) -> TreeEntry {
    let oid = store.write_blob(content.as_bytes().to_vec()).unwrap();
    TreeEntry { mode: FileMode::REG, path: TreePath::intern(name), oid }
}

pub fn link_entry(store: &dyn ObjectStore, name: &str, target: &str) -> TreeEntry {
    let oid = store.write_blob(target.as_bytes().to_vec()).unwrap();
    TreeEntry { mode: FileMode::LINK, path: TreePath::intern(name), oid }
}

pub fn dir_entry(name: &str, tree: Oid) -> TreeEntry {
    TreeEntry { mode: FileMode::TREE, path: TreePath::intern(name), oid: tree }
}

pub fn commit_with_tree(store: &dyn ObjectStore, tree: Oid, parents: &[Oid], time: i64) -> Oid {
    let signature = Signature::new("test", "test@example.com", time);
    store
        .write_commit(Commit {
            tree,
            parents: parents.iter().copied().collect(),
            author: signature.clone(),
            committer: signature,
            message: format!("generated commit {}\n", time),
        })
        .unwrap()
}

pub fn commit(store: &dyn ObjectStore, parents: &[Oid], time: i64) -> Oid {
    let tree = store.write_tree(vec![]).unwrap();
    commit_with_tree(store, tree, parents, time)
}

/// recursively flatten a tree into full path -> (mode, content)
pub fn tree_contents(store: &dyn ObjectStore, tree: Oid) -> BTreeMap<String, (FileMode, Vec<u8>)> {
    fn walk(
        store: &dyn ObjectStore,
        tree: Oid,
        prefix: &str,
        out: &mut BTreeMap<String, (FileMode, Vec<u8>)>,
    ) {
        for entry in store.read_tree(tree).unwrap().entries {
            let path = if prefix.is_empty() {
                entry.path.as_str().to_owned()
            } else {
                format!("{}/{}", prefix, entry.path)
            };
            if entry.mode.is_tree() {
                walk(store, entry.oid, &path, out);
            } else {
                out.insert(path, (entry.mode, store.read_blob(entry.oid).unwrap()));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(store, tree, "", &mut out);
    out
}

/// `RUST_LOG=trace cargo test <name>` to watch a merge walk its phases
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn arbitrary_oid(g: &mut quickcheck::Gen) -> Oid {
    let mut bytes = [0u8; 20];
    for byte in &mut bytes {
        *byte = u8::arbitrary(g);
    }
    Oid::new(bytes)
}

macro_rules! p {
    ($path:expr) => {
        $crate::path::TreePath::intern($path)
    };
}

// grammar, in the spirit of the usual tree-literal macros:
//   <tree>  ::= { <entry>* }
//   <entry> ::= <name> < <content>     regular file
//             | <name> -> <target>     symlink
//             | <name> <tree>          subdirectory
//   <name>  ::= <ident> | <literal>
// writes all objects to the given store and evaluates to the tree oid
macro_rules! tree_entries_in {
    ($odb:expr; [ $($entries:expr,)* ] $next:ident { $($sub:tt)* } $($rest:tt)*) => {
        tree_entries_in!($odb; [ $($entries,)*
            $crate::test_utils::dir_entry(stringify!($next), tree!($odb => { $($sub)* })), ] $($rest)*)
    };
    ($odb:expr; [ $($entries:expr,)* ] $next:literal { $($sub:tt)* } $($rest:tt)*) => {
        tree_entries_in!($odb; [ $($entries,)*
            $crate::test_utils::dir_entry($next, tree!($odb => { $($sub)* })), ] $($rest)*)
    };
    ($odb:expr; [ $($entries:expr,)* ] $next:ident < $content:literal $($rest:tt)*) => {
        tree_entries_in!($odb; [ $($entries,)*
            $crate::test_utils::file_entry($odb, stringify!($next), $content), ] $($rest)*)
    };
    ($odb:expr; [ $($entries:expr,)* ] $next:literal < $content:literal $($rest:tt)*) => {
        tree_entries_in!($odb; [ $($entries,)*
            $crate::test_utils::file_entry($odb, $next, $content), ] $($rest)*)
    };
    ($odb:expr; [ $($entries:expr,)* ] $next:ident -> $target:literal $($rest:tt)*) => {
        tree_entries_in!($odb; [ $($entries,)*
            $crate::test_utils::link_entry($odb, stringify!($next), $target), ] $($rest)*)
    };
    ($odb:expr; [ $($entries:expr,)* ] $next:literal -> $target:literal $($rest:tt)*) => {
        tree_entries_in!($odb; [ $($entries,)*
            $crate::test_utils::link_entry($odb, $next, $target), ] $($rest)*)
    };
    ($odb:expr; [ $($entries:expr,)* ]) => {
        vec![$($entries,)*]
    };
}

macro_rules! tree {
    ($odb:expr => { $($tt:tt)* }) => {{
        let entries = tree_entries_in!($odb; [] $($tt)*);
        $crate::store::ObjectStore::write_tree($odb, entries).unwrap()
    }};
}
