//! Rename detection and application: regular renames per side via content
//! similarity, directory renames by majority vote over them, collision
//! handling, and the rewriting of the per-path state that makes the entry
//! processor see renamed content at its final location. Also home to the
//! cross-merge rename cache used by cherry-pick and rebase sequences.

use super::state::{ConflictInfo, PathInfo, Version};
use super::{DirectoryRenames, MergeCtxt};
use crate::error::MergeResult;
use crate::hash::Oid;
use crate::path::TreePath;
use crate::xdiff::{self, DEFAULT_RENAME_LIMIT, DEFAULT_RENAME_SCORE, MAX_SIMILARITY_SCORE};
use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};

/// why a rename source must be looked at: its content changed on the other
/// side (a three-way content merge will need the blob at its new location),
/// or its directory may have been renamed (its vote is needed). Content
/// trumps location when both apply. `NoMore` marks a source whose detection
/// ran and settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SourceRelevance {
    NoMore,
    Content,
    Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PairStatus {
    Added,
    Deleted,
    Renamed,
}

/// one candidate or detected rename pair; `one` is the source (base) side,
/// `two` the destination side
#[derive(Debug, Clone, Copy)]
pub(super) struct DiffPair {
    pub one: Version,
    pub one_path: TreePath,
    pub two: Version,
    pub two_path: TreePath,
    pub status: PairStatus,
    pub score: u32,
}

#[derive(Debug, Default)]
struct CollisionInfo {
    source_files: Vec<TreePath>,
    reported_already: bool,
}

/// All rename-detection state of one merge. Indexed by side (1 or 2); the 0th
/// slot of each array is unused.
#[derive(Debug)]
pub(crate) struct RenameInfo {
    pub(super) pairs: [Vec<DiffPair>; 3],
    pub(super) relevant_sources: [FxHashMap<TreePath, SourceRelevance>; 3],
    /// directories absent on the side; value 2 marks a parent directory that
    /// gained files while rename sources must be kept
    pub(super) dirs_removed: [FxHashMap<TreePath, u8>; 3],
    pub(super) dir_rename_count: [FxHashMap<TreePath, FxHashMap<TreePath, usize>>; 3],
    /// deferred one-side subtrees, with the dir_rename_mask to resume with
    pub(super) possible_trivial_merges: [FxHashMap<TreePath, u8>; 3],
    pub(super) target_dirs: [FxHashSet<TreePath>; 3],
    pub(super) trivial_merges_okay: [bool; 3],
    /// 0: skipping unchanged rename sources is fine; 2 or 4: fine once all
    /// files of the directory have been seen; 7: sources must be kept for
    /// directory rename detection
    pub(super) dir_rename_mask: u8,

    /// trees of this merge, recorded for the next merge's reuse check
    pub(super) merge_trees: [Oid; 3],
    /// side whose caches survived from the previous merge (-1: keep both)
    pub(super) cached_pairs_valid_side: i8,
    /// source -> rename target, or None for a plain deletion
    pub(super) cached_pairs: [FxHashMap<TreePath, Option<TreePath>>; 3],
    pub(super) cached_irrelevant: [FxHashSet<TreePath>; 3],
    pub(super) cached_target_names: [FxHashSet<TreePath>; 3],
    /// 0: don't, 1: scheduled, 2: rename results cached, redo collection
    pub(super) redo_after_renames: u8,
}

impl RenameInfo {
    pub(crate) fn new() -> Self {
        Self {
            pairs: Default::default(),
            relevant_sources: Default::default(),
            dirs_removed: Default::default(),
            dir_rename_count: Default::default(),
            possible_trivial_merges: Default::default(),
            target_dirs: Default::default(),
            trivial_merges_okay: [true; 3],
            dir_rename_mask: 0,
            merge_trees: [Oid::UNKNOWN; 3],
            cached_pairs_valid_side: 0,
            cached_pairs: Default::default(),
            cached_irrelevant: Default::default(),
            cached_target_names: Default::default(),
            redo_after_renames: 0,
        }
    }

    /// clear per-merge state, retaining the caches of any side the caller
    /// validated (or of both, for the in-merge redo)
    pub(crate) fn reinit(&mut self) {
        for side in 1..=2usize {
            self.pairs[side].clear();
            self.relevant_sources[side].clear();
            self.dirs_removed[side].clear();
            self.possible_trivial_merges[side].clear();
            self.target_dirs[side].clear();
            self.trivial_merges_okay[side] = true;
            if side as i8 != self.cached_pairs_valid_side && self.cached_pairs_valid_side != -1 {
                self.cached_pairs[side].clear();
                self.cached_irrelevant[side].clear();
                self.cached_target_names[side].clear();
                self.dir_rename_count[side].clear();
            }
        }
        self.cached_pairs_valid_side = 0;
        self.dir_rename_mask = 0;
    }

    fn possible_uncached_renames(&self, side: usize) -> bool {
        !self.pairs[side].is_empty() && !self.relevant_sources[side].is_empty()
    }

    fn possible_renames(&self) -> bool {
        self.possible_uncached_renames(1)
            || self.possible_uncached_renames(2)
            || !self.cached_pairs[1].is_empty()
            || !self.cached_pairs[2].is_empty()
    }

    /// bookkeeping for one collected entry: directory-rename-mask
    /// transitions, removed-directory tracking, and source/target pair
    /// queuing for the sides that deleted or added the path
    pub(super) fn collect_rename_info(
        &mut self,
        names: [Version; 3],
        dirname: TreePath,
        fullname: TreePath,
        filemask: u8,
        dirmask: u8,
        match_mask: u8,
    ) {
        // a file whose content matches the base on one side and is missing on
        // the other usually doesn't need its rename detected (nothing to
        // merge into it), unless its whole directory may have moved. the mask
        // tracks when that exception can apply: the directory must exist in
        // the base and on exactly one side
        if self.dir_rename_mask != 0x07 && (dirmask == 3 || dirmask == 5) {
            debug_assert!(self.dir_rename_mask == 0 || self.dir_rename_mask == (dirmask & !1));
            self.dir_rename_mask = dirmask & !1;
        }

        if dirmask == 1 || dirmask == 3 || dirmask == 5 {
            let sides = (0x07 - dirmask) / 2;
            let drd = (self.dir_rename_mask == 0x07) as u8;
            if sides & 1 != 0 {
                self.dirs_removed[1].insert(fullname, drd);
            }
            if sides & 2 != 0 {
                self.dirs_removed[2].insert(fullname, drd);
            }
        }

        if self.dir_rename_mask == 0x07 && (filemask == 2 || filemask == 4) {
            // an addition inside this tree needs the parent directory's
            // rename detected on the other side of history
            let side = (3 - (filemask >> 1)) as usize;
            self.dirs_removed[side].insert(dirname, 2);
        }

        if filemask == 0 || filemask == 7 {
            return;
        }

        for side in 1..=2usize {
            let side_mask = 1 << side;
            if filemask & 1 != 0 && filemask & side_mask == 0 {
                self.add_pair(names, fullname, side, false, match_mask & filemask);
            }
            if filemask & 1 == 0 && filemask & side_mask != 0 {
                self.add_pair(names, fullname, side, true, match_mask & filemask);
            }
        }
    }

    fn add_pair(
        &mut self,
        names: [Version; 3],
        pathname: TreePath,
        side: usize,
        is_add: bool,
        match_mask: u8,
    ) {
        let names_idx = if is_add { side } else { 0 };

        if is_add {
            debug_assert!(match_mask == 0 || match_mask == 6);
            if self.cached_target_names[side].contains(&pathname) {
                return;
            }
        } else {
            let content_relevant = match_mask == 0;
            let location_relevant = self.dir_rename_mask == 0x07;
            debug_assert!(matches!(match_mask, 0 | 3 | 5));

            // a source cached as irrelevant by a previous pick becomes
            // interesting again once its content is
            if content_relevant {
                self.cached_irrelevant[side].remove(&pathname);
            }

            if content_relevant || location_relevant {
                let relevance =
                    if content_relevant { SourceRelevance::Content } else { SourceRelevance::Location };
                self.relevant_sources[side].insert(pathname, relevance);
            }

            // no pair needed when the rename outcome is already cached
            if self.cached_pairs[side].contains_key(&pathname)
                || self.cached_irrelevant[side].contains(&pathname)
            {
                return;
            }
        }

        let version = names[names_idx];
        let pair = if is_add {
            DiffPair {
                one: Version::ABSENT,
                one_path: pathname,
                two: version,
                two_path: pathname,
                status: PairStatus::Added,
                score: 0,
            }
        } else {
            DiffPair {
                one: version,
                one_path: pathname,
                two: Version::ABSENT,
                two_path: pathname,
                status: PairStatus::Deleted,
                score: 0,
            }
        };
        self.pairs[side].push(pair);
    }

    fn prune_cached_from_relevant(&mut self, side: usize) {
        let cached_pairs = &self.cached_pairs[side];
        let cached_irrelevant = &self.cached_irrelevant[side];
        self.relevant_sources[side]
            .retain(|path, _| !cached_pairs.contains_key(path) && !cached_irrelevant.contains(path));
    }

    fn use_cached_pairs(&mut self, side: usize) {
        // only filenames and statuses matter here; content was dealt with
        // when the pair was first detected
        let mut cached: Vec<(TreePath, Option<TreePath>)> =
            self.cached_pairs[side].iter().map(|(&old, &new)| (old, new)).collect();
        cached.sort();
        for (old_name, new_name) in cached {
            self.pairs[side].push(DiffPair {
                one: Version::ABSENT,
                one_path: old_name,
                two: Version::ABSENT,
                two_path: new_name.unwrap_or(old_name),
                status: if new_name.is_some() { PairStatus::Renamed } else { PairStatus::Deleted },
                score: 0,
            });
        }
    }

    fn possibly_cache_new_pair(&mut self, side: usize, pair: &DiffPair, new_path: Option<TreePath>) {
        if new_path.is_none() {
            match self.relevant_sources[side].get(&pair.one_path) {
                // a source we never needed teaches us nothing worth caching
                None => return,
                Some(SourceRelevance::NoMore) => {
                    debug_assert_eq!(pair.status, PairStatus::Deleted);
                    self.cached_irrelevant[side].insert(pair.one_path);
                    return;
                }
                Some(_) => {}
            }
        }
        match pair.status {
            PairStatus::Deleted => {
                self.cached_pairs[side].insert(pair.one_path, None);
            }
            PairStatus::Renamed => {
                let target = new_path.unwrap_or(pair.two_path);
                self.cached_pairs[side].insert(pair.one_path, Some(target));
                self.cached_target_names[side].insert(target);
            }
            PairStatus::Added => {
                if let Some(target) = new_path {
                    self.cached_pairs[side].insert(pair.two_path, Some(target));
                    self.cached_target_names[side].insert(target);
                }
            }
        }
    }

    fn update_dir_rename_counts(&mut self, side: usize, src: TreePath, dst: TreePath) {
        let mut old = src;
        let mut new = dst;
        let mut first = true;
        loop {
            let old_dir = old.parent();
            let new_dir = new.parent();
            if old_dir == new_dir {
                break;
            }
            // beyond the immediate directory, only matching trailing
            // components let a rename vote propagate upward
            if !first && old.file_name() != new.file_name() {
                break;
            }
            // a directory that still exists was not renamed
            if !self.dirs_removed[side].contains_key(&old_dir) {
                break;
            }
            *self.dir_rename_count[side]
                .entry(old_dir)
                .or_default()
                .entry(new_dir)
                .or_default() += 1;
            first = false;
            old = old_dir;
            new = new_dir;
        }
    }
}

impl MergeCtxt<'_> {
    pub(super) fn detect_and_process_renames(&mut self) -> MergeResult<bool> {
        let mut clean = true;

        if !self.opts.detect_renames || !self.state.renames.possible_renames() {
            for side in 1..=2usize {
                self.state.renames.pairs[side].clear();
            }
            return Ok(clean);
        }

        let mut detection_run = false;
        detection_run |= self.detect_regular_renames(1)?;
        detection_run |= self.detect_regular_renames(2)?;
        if self.state.renames.redo_after_renames != 0 && detection_run {
            // rename results are cached now; the caller redoes collection and
            // comes back through here with nothing left to detect
            for side in 1..=2usize {
                self.state.renames.pairs[side].clear();
            }
            return Ok(clean);
        }
        self.state.renames.use_cached_pairs(1);
        self.state.renames.use_cached_pairs(2);

        let need_dir_renames = self.state.call_depth == 0
            && self.opts.detect_directory_renames != DirectoryRenames::Disabled;

        let mut dir_renames: [FxHashMap<TreePath, TreePath>; 3] = Default::default();
        if need_dir_renames {
            for side in 1..=2usize {
                dir_renames[side] = self.get_directory_renames(side, &mut clean);
            }
            self.handle_directory_level_conflicts(&mut dir_renames);
        }

        let mut combined: Vec<(DiffPair, usize)> = vec![];
        let side1_renames = dir_renames[1].clone();
        let side2_renames = dir_renames[2].clone();
        clean &= self.collect_renames(&mut combined, 1, &side2_renames, &side1_renames)?;
        clean &= self.collect_renames(&mut combined, 2, &side1_renames, &side2_renames)?;
        combined.sort_by(|(a, a_side), (b, b_side)| {
            a.one_path.cmp(&b.one_path).then(a_side.cmp(b_side))
        });

        clean &= self.process_renames(&combined)?;
        Ok(clean)
    }

    /// run the similarity detector over one side's queued pairs, converting
    /// matched delete/add pairs into renames
    fn detect_regular_renames(&mut self, side: usize) -> MergeResult<bool> {
        self.state.renames.prune_cached_from_relevant(side);
        if !self.state.renames.possible_uncached_renames(side) {
            // no detection needed for this side; the queued adds are still
            // wanted in case the other side had directory renames
            return Ok(false);
        }
        debug!("MergeCtxt::detect_regular_renames(side: {})", side);

        self.state.renames.dir_rename_count[side].clear();
        let pairs = std::mem::take(&mut self.state.renames.pairs[side]);
        let mut sources = vec![];
        let mut dests = vec![];
        for pair in pairs {
            match pair.status {
                PairStatus::Deleted => sources.push(pair),
                PairStatus::Added => dests.push(pair),
                PairStatus::Renamed => bug!("rename pair queued before detection"),
            }
        }

        let mut source_match: Vec<Option<usize>> = vec![None; sources.len()];
        let mut dest_used: Vec<bool> = vec![false; dests.len()];

        // exact content matches are cheap, so they are taken for every
        // source, relevant or not; empty blobs never participate
        let mut dests_by_oid: FxHashMap<Oid, Vec<usize>> = Default::default();
        for (dest_index, dest) in dests.iter().enumerate() {
            if dest.two.oid != Oid::EMPTY_BLOB {
                dests_by_oid.entry(dest.two.oid).or_default().push(dest_index);
            }
        }
        for (source_index, source) in sources.iter().enumerate() {
            if source.one.oid == Oid::EMPTY_BLOB {
                continue;
            }
            if let Some(candidates) = dests_by_oid.get(&source.one.oid) {
                if let Some(&dest_index) = candidates.iter().find(|&&index| {
                    !dest_used[index] && dests[index].two.mode.kind() == source.one.mode.kind()
                }) {
                    source_match[source_index] = Some(dest_index);
                    dest_used[dest_index] = true;
                }
            }
        }

        // inexact detection is restricted to relevant sources and bounded by
        // the rename limit
        let relevant_sources: Vec<usize> = (0..sources.len())
            .filter(|&index| {
                source_match[index].is_none()
                    && matches!(
                        self.state.renames.relevant_sources[side].get(&sources[index].one_path),
                        Some(SourceRelevance::Content) | Some(SourceRelevance::Location)
                    )
            })
            .collect();
        let open_dests: Vec<usize> = (0..dests.len()).filter(|&index| !dest_used[index]).collect();

        let limit = if self.opts.rename_limit == 0 { DEFAULT_RENAME_LIMIT } else { self.opts.rename_limit };
        let min_score =
            if self.opts.rename_score == 0 { DEFAULT_RENAME_SCORE } else { self.opts.rename_score };

        if relevant_sources.len() * open_dests.len() > limit * limit {
            let needed = std::cmp::max(relevant_sources.len(), open_dests.len());
            self.state.needed_rename_limit = std::cmp::max(self.state.needed_rename_limit, needed);
            debug!("detect_regular_renames: skipping inexact detection, needed limit {}", needed);
        } else {
            let mut scored: Vec<(u32, usize, usize)> = vec![];
            for &source_index in &relevant_sources {
                let source = &sources[source_index];
                if !source.one.mode.is_blob() {
                    continue;
                }
                let source_bytes = self.store.read_blob(source.one.oid)?;
                if source_bytes.is_empty() {
                    continue;
                }
                for &dest_index in &open_dests {
                    let dest = &dests[dest_index];
                    if dest.two.mode.kind() != source.one.mode.kind() {
                        continue;
                    }
                    let dest_bytes = self.store.read_blob(dest.two.oid)?;
                    if dest_bytes.is_empty() {
                        continue;
                    }
                    let score = xdiff::estimate_similarity(&source_bytes, &dest_bytes);
                    if score >= min_score {
                        scored.push((score, source_index, dest_index));
                    }
                }
            }
            // highest similarity wins; ties break towards earlier paths so
            // repeated merges pick the same pairs
            scored.sort_by(|&(score_a, src_a, dst_a), &(score_b, src_b, dst_b)| {
                score_b.cmp(&score_a).then_with(|| {
                    (sources[src_a].one_path, dests[dst_a].two_path)
                        .cmp(&(sources[src_b].one_path, dests[dst_b].two_path))
                })
            });
            for (score, source_index, dest_index) in scored {
                if source_match[source_index].is_some() || dest_used[dest_index] {
                    continue;
                }
                source_match[source_index] = Some(dest_index);
                dest_used[dest_index] = true;
                sources[source_index].score = score;
            }
        }

        // rebuild the pair list: matched pairs become renames, the rest keep
        // their delete/add statuses
        let mut rebuilt = vec![];
        for (source_index, source) in sources.iter().enumerate() {
            match source_match[source_index] {
                Some(dest_index) => {
                    let dest = &dests[dest_index];
                    let score = if source.score == 0 { MAX_SIMILARITY_SCORE } else { source.score };
                    let pair = DiffPair {
                        one: source.one,
                        one_path: source.one_path,
                        two: dest.two,
                        two_path: dest.two_path,
                        status: PairStatus::Renamed,
                        score,
                    };
                    self.state.renames.update_dir_rename_counts(
                        side,
                        source.one_path,
                        dest.two_path,
                    );
                    rebuilt.push(pair);
                }
                None => {
                    // a location-only source with no counterpart has cast its
                    // (empty) vote; later merges need not revisit it
                    if self.state.renames.relevant_sources[side].get(&source.one_path)
                        == Some(&SourceRelevance::Location)
                    {
                        self.state.renames.relevant_sources[side]
                            .insert(source.one_path, SourceRelevance::NoMore);
                    }
                    rebuilt.push(*source);
                }
            }
        }
        for (dest_index, dest) in dests.iter().enumerate() {
            if !dest_used[dest_index] {
                rebuilt.push(*dest);
            }
        }
        self.state.renames.pairs[side] = rebuilt;

        if self.state.renames.redo_after_renames != 0 {
            self.state.renames.redo_after_renames = 2;
            let pairs: Vec<DiffPair> = self.state.renames.pairs[side].clone();
            for pair in &pairs {
                self.state.renames.possibly_cache_new_pair(side, pair, None);
            }
        }
        Ok(true)
    }

    /// collapse `dir_rename_count` to each source directory's best target;
    /// ties produce a conflict and no rename
    fn get_directory_renames(&mut self, side: usize, clean: &mut bool) -> FxHashMap<TreePath, TreePath> {
        let mut dir_renames = FxHashMap::default();
        let counts: Vec<(TreePath, Vec<(TreePath, usize)>)> = self.state.renames.dir_rename_count
            [side]
            .iter()
            .map(|(&source_dir, targets)| {
                let mut targets: Vec<_> = targets.iter().map(|(&dir, &count)| (dir, count)).collect();
                targets.sort();
                (source_dir, targets)
            })
            .sorted()
            .collect();

        for (source_dir, targets) in counts {
            let mut max = 0;
            let mut bad_max = 0;
            let mut best = None;
            for (target_dir, count) in targets {
                if count == max {
                    bad_max = max;
                } else if count > max {
                    max = count;
                    best = Some(target_dir);
                }
            }
            if max == 0 {
                continue;
            }
            if bad_max == max {
                self.state.paths.path_msg(
                    source_dir,
                    format!(
                        "CONFLICT (directory rename split): Unclear where to rename {} to; it \
                         was renamed to multiple other directories, with no destination getting \
                         a majority of the files.",
                        source_dir
                    ),
                );
                *clean = false;
            } else {
                dir_renames.insert(source_dir, best.unwrap());
            }
        }
        dir_renames
    }

    fn handle_directory_level_conflicts(
        &mut self,
        dir_renames: &mut [FxHashMap<TreePath, TreePath>; 3],
    ) {
        // a directory renamed on both sides is no longer implicit on either
        let duplicated: Vec<TreePath> = dir_renames[1]
            .keys()
            .filter(|source| dir_renames[2].contains_key(*source))
            .copied()
            .collect();
        for source in duplicated {
            dir_renames[1].remove(&source);
            dir_renames[2].remove(&source);
        }

        for side in 1..=2usize {
            let side_mask = 1 << side;
            let paths = &self.state.paths;
            dir_renames[side].retain(|&source, _| match paths.get(source) {
                // the source directory vanished from our records: it was
                // unchanged on the other side and needs no rename handling
                None => false,
                // cleanly resolved during (re)collection, nothing to reroute
                Some(PathInfo::Resolved(..)) => false,
                // "rename" is not real if the source still exists on the side
                Some(PathInfo::Conflicted(ci)) => ci.dirmask & side_mask == 0,
            });
        }
    }

    /// deepest ancestor directory of `path` that was renamed
    fn check_dir_renamed(
        path: TreePath,
        dir_renames: &FxHashMap<TreePath, TreePath>,
    ) -> Option<(TreePath, TreePath)> {
        path.ancestors()
            .find_map(|dir| dir_renames.get(&dir).map(|&new_dir| (dir, new_dir)))
    }

    fn apply_dir_rename(old_dir: TreePath, new_dir: TreePath, old_path: TreePath) -> TreePath {
        // a rename into the root directory must not leave a leading slash
        let suffix = &old_path.as_str()[old_dir.len()..];
        if new_dir.is_root() {
            TreePath::intern(&suffix[1..])
        } else {
            TreePath::intern(format!("{}{}", new_dir, suffix))
        }
    }

    /// Multiple files can land on one path when the other side of history
    /// merged directories together; collect those ahead of time so each
    /// affected rename can be reported once and skipped.
    fn compute_collisions(
        dir_renames: &FxHashMap<TreePath, TreePath>,
        pairs: &[DiffPair],
    ) -> FxHashMap<TreePath, CollisionInfo> {
        let mut collisions: FxHashMap<TreePath, CollisionInfo> = Default::default();
        if dir_renames.is_empty() {
            return collisions;
        }
        for pair in pairs {
            if !matches!(pair.status, PairStatus::Added | PairStatus::Renamed) {
                continue;
            }
            let (old_dir, new_dir) = match Self::check_dir_renamed(pair.two_path, dir_renames) {
                Some(rename) => rename,
                None => continue,
            };
            let new_path = Self::apply_dir_rename(old_dir, new_dir, pair.two_path);
            collisions.entry(new_path).or_default().source_files.push(pair.two_path);
        }
        collisions
    }

    fn path_in_way(&self, path: TreePath, side_mask: u8) -> bool {
        match self.state.paths.get(path) {
            None => false,
            Some(PathInfo::Resolved(..)) => true,
            Some(PathInfo::Conflicted(ci)) => side_mask & (ci.filemask | ci.dirmask) != 0,
        }
    }

    /// apply a directory rename to `path` if there is one and the renamed
    /// location is conflict-free; otherwise report and return None
    fn check_for_directory_rename(
        &mut self,
        path: TreePath,
        side: usize,
        dir_renames: &FxHashMap<TreePath, TreePath>,
        rename_exclusions: &FxHashMap<TreePath, TreePath>,
        collisions: &mut FxHashMap<TreePath, CollisionInfo>,
        clean: &mut bool,
    ) -> Option<TreePath> {
        let (old_dir, new_dir) = Self::check_dir_renamed(path, dir_renames)?;

        // never do an implicit rename into a directory this side itself
        // renamed away; transitive renames through it would manufacture
        // spurious rename/rename conflicts
        if rename_exclusions.contains_key(&new_dir) {
            self.state.paths.path_msg(
                old_dir,
                format!(
                    "WARNING: Avoiding applying {} -> {} rename to {}, because {} itself was \
                     renamed.",
                    old_dir, new_dir, path, new_dir
                ),
            );
            return None;
        }

        let new_path = Self::apply_dir_rename(old_dir, new_dir, path);
        let collision_info = match collisions.get_mut(&new_path) {
            Some(collision_info) => collision_info,
            None => bug!("no collision info computed for `{}`", new_path),
        };

        let mut okay = true;
        if collision_info.reported_already {
            okay = false;
        } else if self.path_in_way(new_path, 1 << side) {
            collision_info.reported_already = true;
            let source_list = collision_info.source_files.iter().join(", ");
            self.state.paths.path_msg(
                new_path,
                format!(
                    "CONFLICT (implicit dir rename): Existing file/dir at {} in the way of \
                     implicit directory rename(s) putting the following path(s) there: {}.",
                    new_path, source_list
                ),
            );
            okay = false;
        } else if collision_info.source_files.len() > 1 {
            collision_info.reported_already = true;
            let source_list = collision_info.source_files.iter().join(", ");
            self.state.paths.path_msg(
                new_path,
                format!(
                    "CONFLICT (implicit dir rename): Cannot map more than one path to {}; \
                     implicit directory renames tried to put these paths there: {}",
                    new_path, source_list
                ),
            );
            okay = false;
        }

        if okay {
            Some(new_path)
        } else {
            *clean = false;
            None
        }
    }

    /// move the path-state record for a directory-renamed path to its new
    /// location, creating any missing parent directory records along the way
    fn apply_directory_rename_modifications(
        &mut self,
        pair: DiffPair,
        new_path: TreePath,
    ) -> MergeResult<DiffPair> {
        let old_path = pair.two_path;
        let mut ci = match self.state.paths.get(old_path) {
            Some(PathInfo::Conflicted(ci)) => *ci,
            _ => bug!("directory rename source `{}` has no conflict record", old_path),
        };
        debug_assert!(ci.filemask == 2 || ci.filemask == 4);
        debug_assert_eq!(ci.dirmask, 0);

        // find parent directories missing from the path state, then insert
        // them topmost-first so each record sees its parent's interned name
        let mut dirs_to_insert = vec![];
        let mut parent_name = new_path.parent();
        while !parent_name.is_root() && !self.state.paths.contains(parent_name) {
            dirs_to_insert.push(parent_name);
            parent_name = parent_name.parent();
        }
        for &dir in dirs_to_insert.iter().rev() {
            let mut dir_ci = ConflictInfo::new(parent_name, dir);
            dir_ci.dirmask = ci.filemask;
            self.state.paths.put(dir, PathInfo::Conflicted(dir_ci));
            parent_name = dir;
        }

        self.state.paths.remove(old_path);

        let (branch_with_new_path, branch_with_dir_rename) = if ci.filemask == 2 {
            (self.opts.branch1.clone(), self.opts.branch2.clone())
        } else {
            (self.opts.branch2.clone(), self.opts.branch1.clone())
        };

        ci.merged.directory_name = parent_name;
        ci.merged.basename_offset =
            if parent_name.is_root() { 0 } else { parent_name.len() + 1 };

        let mut merged_ci = match self.state.paths.get(new_path) {
            None => ci,
            Some(PathInfo::Conflicted(new_ci)) => {
                let mut new_ci = *new_ci;
                debug_assert_eq!(new_ci.filemask & ci.filemask, 0);
                new_ci.filemask |= ci.filemask;
                if new_ci.dirmask != 0 {
                    new_ci.df_conflict = true;
                }
                let index = (ci.filemask >> 1) as usize;
                new_ci.pathnames[index] = ci.pathnames[index];
                new_ci.stages[index] = ci.stages[index];
                new_ci
            }
            Some(PathInfo::Resolved(..)) =>
                bug!("directory rename target `{}` already resolved", new_path),
        };

        if self.opts.detect_directory_renames == DirectoryRenames::Enabled {
            let msg = match pair.status {
                PairStatus::Added => format!(
                    "Path updated: {} added in {} inside a directory that was renamed in {}; \
                     moving it to {}.",
                    old_path, branch_with_new_path, branch_with_dir_rename, new_path
                ),
                _ => format!(
                    "Path updated: {} renamed to {} in {}, inside a directory that was renamed \
                     in {}; moving it to {}.",
                    pair.one_path, old_path, branch_with_new_path, branch_with_dir_rename, new_path
                ),
            };
            self.state.paths.path_msg(new_path, msg);
        } else {
            merged_ci.path_conflict = true;
            let msg = match pair.status {
                PairStatus::Added => format!(
                    "CONFLICT (file location): {} added in {} inside a directory that was \
                     renamed in {}, suggesting it should perhaps be moved to {}.",
                    old_path, branch_with_new_path, branch_with_dir_rename, new_path
                ),
                _ => format!(
                    "CONFLICT (file location): {} renamed to {} in {}, inside a directory that \
                     was renamed in {}, suggesting it should perhaps be moved to {}.",
                    pair.one_path, old_path, branch_with_new_path, branch_with_dir_rename, new_path
                ),
            };
            self.state.paths.path_msg(new_path, msg);
        }

        self.state.paths.put(new_path, PathInfo::Conflicted(merged_ci));

        Ok(DiffPair { two_path: new_path, ..pair })
    }

    /// run every pair of one side through directory-rename rerouting, caching
    /// results and queueing the add/rename pairs for `process_renames`
    fn collect_renames(
        &mut self,
        combined: &mut Vec<(DiffPair, usize)>,
        side: usize,
        dir_renames_for_side: &FxHashMap<TreePath, TreePath>,
        rename_exclusions: &FxHashMap<TreePath, TreePath>,
    ) -> MergeResult<bool> {
        let mut clean = true;
        let pairs = std::mem::take(&mut self.state.renames.pairs[side]);
        let mut collisions = Self::compute_collisions(dir_renames_for_side, &pairs);

        for pair in pairs {
            self.state.renames.possibly_cache_new_pair(side, &pair, None);
            if !matches!(pair.status, PairStatus::Added | PairStatus::Renamed) {
                continue;
            }
            let new_path = self.check_for_directory_rename(
                pair.two_path,
                side,
                dir_renames_for_side,
                rename_exclusions,
                &mut collisions,
                &mut clean,
            );
            if pair.status != PairStatus::Renamed && new_path.is_none() {
                continue;
            }
            let pair = match new_path {
                Some(new_path) => {
                    self.state.renames.possibly_cache_new_pair(side, &pair, Some(new_path));
                    self.apply_directory_rename_modifications(pair, new_path)?
                }
                None => pair,
            };
            combined.push((pair, side));
        }
        Ok(clean)
    }

    /// update the path state for every final rename pair; this is where
    /// rename conflicts get their shape
    fn process_renames(&mut self, renames_list: &[(DiffPair, usize)]) -> MergeResult<bool> {
        let mut clean_merge = true;
        let mut i = 0;

        while i < renames_list.len() {
            let (pair, side) = renames_list[i];
            i += 1;
            let oldpath = pair.one_path;
            let newpath = pair.two_path;

            // if oldpath dropped out of the path state then a parent
            // directory was resolved and the rename is moot; if it resolved
            // cleanly the other side had no changes to it
            let oldinfo = match self.state.paths.get(oldpath) {
                Some(PathInfo::Conflicted(ci)) => *ci,
                _ => continue,
            };

            if i < renames_list.len() && renames_list[i].0.one_path == oldpath {
                // both sides renamed the same source
                let (other_pair, _) = renames_list[i];
                i += 1;
                let pathnames = [oldpath, newpath, other_pair.two_path];

                if pathnames[1] == pathnames[2] {
                    // rename/rename(1to1): same target; stitch the base stage
                    // onto the target and resolve the source by removal
                    let mut target = match self.state.paths.get(pathnames[1]) {
                        Some(PathInfo::Conflicted(ci)) => *ci,
                        _ => bug!("rename target `{}` has no conflict record", pathnames[1]),
                    };
                    target.stages[0] = oldinfo.stages[0];
                    target.filemask |= 1 << 0;
                    self.state.paths.put(pathnames[1], PathInfo::Conflicted(target));
                    self.resolve_by_removal(oldpath, &oldinfo);
                    continue;
                }

                // rename/rename(1to2): merge the content against both sides
                // and park the (possibly conflicted) result on both targets
                let mut side1_ci = match self.state.paths.get(pathnames[1]) {
                    Some(PathInfo::Conflicted(ci)) => *ci,
                    _ => bug!("rename target `{}` has no conflict record", pathnames[1]),
                };
                let mut side2_ci = match self.state.paths.get(pathnames[2]) {
                    Some(PathInfo::Conflicted(ci)) => *ci,
                    _ => bug!("rename target `{}` has no conflict record", pathnames[2]),
                };

                let (mut merged, content_clean) = self.handle_content_merge(
                    oldpath,
                    oldinfo.stages[0],
                    side1_ci.stages[1],
                    side2_ci.stages[2],
                    pathnames,
                    1 + 2 * self.state.call_depth as usize,
                )?;
                clean_merge &= content_clean;
                let was_binary_blob = !content_clean && merged == side1_ci.stages[1];

                side1_ci.stages[1] = merged;
                if was_binary_blob {
                    // an unmergeable blob resolves to one side's content; do
                    // not copy that content onto the other side's target too
                    merged = side2_ci.stages[2];
                }
                side2_ci.stages[2] = merged;

                side1_ci.path_conflict = true;
                side2_ci.path_conflict = true;
                self.state.paths.put(pathnames[1], PathInfo::Conflicted(side1_ci));
                self.state.paths.put(pathnames[2], PathInfo::Conflicted(side2_ci));

                // the original path keeps its stage-0 entry (and the conflict
                // flag) so the collision is visible at all three names
                let mut base_ci = oldinfo;
                base_ci.path_conflict = true;
                self.state.paths.put(oldpath, PathInfo::Conflicted(base_ci));
                self.state.paths.path_msg(
                    oldpath,
                    format!(
                        "CONFLICT (rename/rename): {} renamed to {} in {} and to {} in {}.",
                        pathnames[0], pathnames[1], self.opts.branch1, pathnames[2], self.opts.branch2
                    ),
                );
                continue;
            }

            let mut newinfo = match self.state.paths.get(newpath) {
                Some(PathInfo::Conflicted(ci)) => *ci,
                _ => bug!("rename target `{}` has no conflict record", newpath),
            };

            let target_index = side;
            let other_source_index = 3 - side;
            let old_sidemask = (1 << other_source_index) as u8;
            let source_deleted = oldinfo.filemask == 1;
            let mut collision = newinfo.filemask & old_sidemask != 0;
            let type_changed = !source_deleted
                && oldinfo.stages[other_source_index].mode.is_file()
                    != newinfo.stages[target_index].mode.is_file();
            if type_changed && collision {
                // a colliding entry of a different type is really the other
                // half of a double rename that exact/inexact detection could
                // not see; treat it as a plain rename and let the entry
                // processor split the types apart
                collision = false;
            }
            let (rename_branch, delete_branch) = if target_index == 1 {
                (&self.opts.branch1, &self.opts.branch2)
            } else {
                (&self.opts.branch2, &self.opts.branch1)
            };
            let (rename_branch, delete_branch) = (rename_branch.clone(), delete_branch.clone());

            debug_assert!(source_deleted || oldinfo.filemask & old_sidemask != 0);

            if !type_changed {
                // mark the original as resolved by removal
                self.resolve_by_removal(oldpath, &oldinfo);
            }

            if collision && !source_deleted {
                // rename/add or rename/rename(2to1): merge content at the
                // collision path; the entry processor finishes the add/add
                let mut pathnames = [oldpath; 3];
                pathnames[target_index] = newpath;

                let stage = |index: usize| {
                    if pathnames[index] == newpath { newinfo.stages[index] } else { oldinfo.stages[index] }
                };
                let (base, side1, side2) = (stage(0), stage(1), stage(2));
                let (merged, content_clean) = self.handle_content_merge(
                    oldpath,
                    base,
                    side1,
                    side2,
                    pathnames,
                    1 + 2 * self.state.call_depth as usize,
                )?;
                newinfo.stages[target_index] = merged;
                if !content_clean {
                    self.state.paths.path_msg(
                        newpath,
                        format!(
                            "CONFLICT (rename involved in collision): rename of {} -> {} has \
                             content conflicts AND collides with another path; this may result \
                             in nested conflict markers.",
                            oldpath, newpath
                        ),
                    );
                }
            } else if collision && source_deleted {
                // rename/add/delete: the deleted source leaves nothing to
                // content-merge; what remains looks like add/add
                newinfo.path_conflict = true;
                self.state.paths.path_msg(
                    newpath,
                    format!(
                        "CONFLICT (rename/delete): {} renamed to {} in {}, but deleted in {}.",
                        oldpath, newpath, rename_branch, delete_branch
                    ),
                );
            } else {
                // normal rename or rename/delete: move the surviving stages
                // over to the new name
                newinfo.stages[0] = oldinfo.stages[0];
                newinfo.filemask |= 1 << 0;
                newinfo.pathnames[0] = oldpath;

                if type_changed {
                    // the old path keeps only its side entries; the entry
                    // processor will handle the distinct types there
                    let mut old_ci = oldinfo;
                    old_ci.stages[0] = Version::ABSENT;
                    old_ci.filemask &= 0x06;
                    self.state.paths.put(oldpath, PathInfo::Conflicted(old_ci));
                } else if source_deleted {
                    newinfo.path_conflict = true;
                    self.state.paths.path_msg(
                        newpath,
                        format!(
                            "CONFLICT (rename/delete): {} renamed to {} in {}, but deleted in {}.",
                            oldpath, newpath, rename_branch, delete_branch
                        ),
                    );
                } else {
                    newinfo.stages[other_source_index] = oldinfo.stages[other_source_index];
                    newinfo.filemask |= 1 << other_source_index;
                    newinfo.pathnames[other_source_index] = oldpath;
                }
            }
            self.state.paths.put(newpath, PathInfo::Conflicted(newinfo));
        }

        Ok(clean_merge)
    }

    fn resolve_by_removal(&mut self, path: TreePath, ci: &ConflictInfo) {
        let mut merged = ci.merged;
        merged.result = Version::ABSENT;
        merged.is_null = true;
        self.state.paths.put(path, PathInfo::Resolved(merged));
    }
}
