use crate::path::TreePath;
use bumpalo::Bump as Arena;
use rustc_hash::FxHashMap;
use std::cell::RefCell;

// The interner guarantees that any two equal path strings handed out as
// `TreePath` share a single allocation, so pointer equality can stand in for
// string equality. The tree writer and the per-path records lean on this.
#[derive(Default)]
pub(crate) struct Interner {
    arena: Arena,
    map: FxHashMap<&'static str, TreePath>,
}

impl Interner {
    fn prefill(init: &[TreePath]) -> Self {
        Self {
            arena: Default::default(),
            map: init.iter().map(|&path| (path.as_str(), path)).collect(),
        }
    }

    pub fn intern_path(&mut self, s: &str) -> TreePath {
        if let Some(&path) = self.map.get(s) {
            return path;
        }
        let ptr = self.arena.alloc_str(s);
        // SAFETY: only accessed while the thread-local arena in `self` is alive
        let interned = unsafe { &*(ptr as *const str) };
        let path = TreePath::new(interned);
        self.map.insert(interned, path);
        path
    }
}

thread_local! {
    static INTERNER: RefCell<Interner> = RefCell::new(Interner::prefill(&[
        TreePath::ROOT,
        TreePath::GITATTRIBUTES,
    ]));
}

pub(crate) fn with_path_interner<R>(f: impl FnOnce(&mut Interner) -> R) -> R {
    INTERNER.with(|interner| f(&mut *interner.borrow_mut()))
}
