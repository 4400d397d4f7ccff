//! Low-level three-way text merge and content similarity scoring.
//!
//! The hunk-level merge itself comes from `diffy`; this module dresses it up
//! for the engine: branch-labelled conflict markers, marker growth for nested
//! (recursive) merges, `ours`/`theirs` favoring, and renormalization of the
//! inputs. It also provides the similarity estimate driving rename detection.

use crate::attrs::AttrIndex;

pub type ConflictStyle = diffy::ConflictStyle;

/// similarity scores are scaled to this maximum ("100%")
pub const MAX_SIMILARITY_SCORE: u32 = 60000;
/// default minimum similarity for a rename pair ("50%")
pub const DEFAULT_RENAME_SCORE: u32 = 30000;
/// soft cap on candidate sources/destinations for inexact rename detection
pub const DEFAULT_RENAME_LIMIT: usize = 1000;

const BASE_MARKER_SIZE: usize = 7;

bitflags! {
    pub struct XdlFlags: u32 {
        const HISTOGRAM_DIFF = 1 << 0;
        const PATIENCE_DIFF = 1 << 1;
        const IGNORE_WHITESPACE = 1 << 2;
    }
}

impl Default for XdlFlags {
    fn default() -> Self {
        XdlFlags::HISTOGRAM_DIFF
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MergeVariant {
    Normal,
    /// auto-resolve conflicting hunks to side 1
    Ours,
    /// auto-resolve conflicting hunks to side 2
    Theirs,
}

impl Default for MergeVariant {
    fn default() -> Self {
        MergeVariant::Normal
    }
}

pub struct LlMergeOpts<'a> {
    pub renormalize: bool,
    /// markers grow by this much beyond the standard 7 characters so nested
    /// conflicts stay distinguishable
    pub extra_marker_size: usize,
    pub variant: MergeVariant,
    pub style: ConflictStyle,
    /// merging against a synthesized ancestor; base content is shown in
    /// conflicts so the inner merge stays reviewable
    pub virtual_ancestor: bool,
    pub attrs: Option<&'a AttrIndex>,
    /// target path, used for attribute lookups
    pub path: &'a str,
}

/// Three-way text merge. Returns the merged bytes and whether the merge was
/// conflict-free (favored variants count as clean).
pub fn ll_merge(
    opts: &LlMergeOpts<'_>,
    orig: &[u8],
    label_base: &str,
    a: &[u8],
    label_a: &str,
    b: &[u8],
    label_b: &str,
) -> (Vec<u8>, bool) {
    let marker_len = BASE_MARKER_SIZE + opts.extra_marker_size;

    let orig = crate::attrs::renormalize(opts.attrs, opts.path, opts.renormalize, orig);
    let a = crate::attrs::renormalize(opts.attrs, opts.path, opts.renormalize, a);
    let b = crate::attrs::renormalize(opts.attrs, opts.path, opts.renormalize, b);

    let style = if opts.virtual_ancestor { ConflictStyle::Diff3 } else { opts.style };
    let merged = diffy::MergeOptions::new()
        .set_conflict_style(style)
        .set_conflict_marker_length(marker_len)
        .merge_bytes(orig.as_ref(), a.as_ref(), b.as_ref());

    match merged {
        Ok(bytes) => (bytes, true),
        Err(conflicted) => {
            // diffy hardcodes its marker labels; rewrite them so the markers
            // carry the branch names the caller chose
            let labelled =
                relabel_markers(&conflicted, marker_len, label_base, label_a, label_b);
            match opts.variant {
                MergeVariant::Normal => (labelled, false),
                MergeVariant::Ours => (resolve_conflict_blocks(&labelled, marker_len, true), true),
                MergeVariant::Theirs =>
                    (resolve_conflict_blocks(&labelled, marker_len, false), true),
            }
        }
    }
}

#[derive(PartialEq, Clone, Copy)]
enum MarkerKind {
    Ours,
    Base,
    Separator,
    Theirs,
}

fn classify_marker(line: &[u8], marker_len: usize) -> Option<MarkerKind> {
    let trimmed = match line.strip_suffix(b"\n") {
        Some(rest) => rest.strip_suffix(b"\r").unwrap_or(rest),
        None => line,
    };
    if trimmed.len() < marker_len {
        return None;
    }
    let (run, rest) = trimmed.split_at(marker_len);
    if !rest.is_empty() && rest[0] != b' ' {
        return None;
    }
    let kind = match run[0] {
        b'<' => MarkerKind::Ours,
        b'|' => MarkerKind::Base,
        b'=' => MarkerKind::Separator,
        b'>' => MarkerKind::Theirs,
        _ => return None,
    };
    run.iter().all(|&c| c == run[0]).then(|| kind)
}

fn relabel_markers(
    bytes: &[u8],
    marker_len: usize,
    label_base: &str,
    label_a: &str,
    label_b: &str,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for line in split_lines(bytes) {
        let (marker_char, label) = match classify_marker(line, marker_len) {
            Some(MarkerKind::Ours) => (b'<', Some(label_a)),
            Some(MarkerKind::Base) => (b'|', Some(label_base)),
            Some(MarkerKind::Theirs) => (b'>', Some(label_b)),
            Some(MarkerKind::Separator) | None => {
                out.extend_from_slice(line);
                continue;
            }
        };
        out.extend(std::iter::repeat(marker_char).take(marker_len));
        if let Some(label) = label {
            out.push(b' ');
            out.extend_from_slice(label.as_bytes());
        }
        out.push(b'\n');
    }
    out
}

/// Collapse every conflict block to one side, as the `ours`/`theirs` merge
/// variants require.
fn resolve_conflict_blocks(bytes: &[u8], marker_len: usize, keep_ours: bool) -> Vec<u8> {
    #[derive(PartialEq)]
    enum Section {
        Common,
        Ours,
        Base,
        Theirs,
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut section = Section::Common;
    for line in split_lines(bytes) {
        match classify_marker(line, marker_len) {
            Some(MarkerKind::Ours) => section = Section::Ours,
            Some(MarkerKind::Base) => section = Section::Base,
            Some(MarkerKind::Separator) if section != Section::Common => {
                section = Section::Theirs
            }
            Some(MarkerKind::Theirs) => section = Section::Common,
            _ => match section {
                Section::Common => out.extend_from_slice(line),
                Section::Ours if keep_ours => out.extend_from_slice(line),
                Section::Theirs if !keep_ours => out.extend_from_slice(line),
                _ => {}
            },
        }
    }
    out
}

fn split_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = bytes;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None => rest.len(),
        };
        let (line, tail) = rest.split_at(end);
        rest = tail;
        Some(line)
    })
}

/// Content similarity of two blobs, scaled to [`MAX_SIMILARITY_SCORE`].
/// Counts bytes of common lines (as a multiset) against the larger side, the
/// usual cheap stand-in for a minimal diff.
pub fn estimate_similarity(src: &[u8], dst: &[u8]) -> u32 {
    if src.is_empty() || dst.is_empty() {
        return 0;
    }
    if src == dst {
        return MAX_SIMILARITY_SCORE;
    }

    let mut src_lines: rustc_hash::FxHashMap<&[u8], u32> = Default::default();
    for line in split_lines(src) {
        *src_lines.entry(line).or_default() += 1;
    }

    let mut common_bytes = 0u64;
    for line in split_lines(dst) {
        if let Some(count) = src_lines.get_mut(line) {
            if *count > 0 {
                *count -= 1;
                common_bytes += line.len() as u64;
            }
        }
    }

    let denominator = std::cmp::max(src.len(), dst.len()) as u64;
    ((common_bytes * MAX_SIMILARITY_SCORE as u64) / denominator) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts<'a>() -> LlMergeOpts<'a> {
        LlMergeOpts {
            renormalize: false,
            extra_marker_size: 0,
            variant: MergeVariant::Normal,
            style: ConflictStyle::Merge,
            virtual_ancestor: false,
            attrs: None,
            path: "file",
        }
    }

    #[test]
    fn clean_merge_of_disjoint_edits() {
        let base = b"a\nb\nc\nd\ne\n";
        let ours = b"A\nb\nc\nd\ne\n";
        let theirs = b"a\nb\nc\nd\nE\n";
        let (merged, clean) = ll_merge(&opts(), base, "base", ours, "left", theirs, "right");
        assert!(clean);
        assert_eq!(merged, b"A\nb\nc\nd\nE\n");
    }

    #[test]
    fn conflict_markers_carry_branch_labels() {
        let base = b"x\n";
        let ours = b"left side\n";
        let theirs = b"right side\n";
        let (merged, clean) = ll_merge(&opts(), base, "base", ours, "left", theirs, "right");
        assert!(!clean);
        let text = String::from_utf8(merged).unwrap();
        assert!(text.contains("<<<<<<< left\n"), "got: {}", text);
        assert!(text.contains(">>>>>>> right\n"), "got: {}", text);
        assert!(!text.contains("ours"));
    }

    #[test]
    fn nested_markers_grow() {
        let mut o = opts();
        o.extra_marker_size = 2;
        let (merged, clean) = ll_merge(&o, b"x\n", "base", b"l\n", "left", b"r\n", "right");
        assert!(!clean);
        let text = String::from_utf8(merged).unwrap();
        assert!(text.contains("<<<<<<<<< left\n"), "got: {}", text);
    }

    #[test]
    fn favored_variants_resolve_cleanly() {
        let mut o = opts();
        o.variant = MergeVariant::Ours;
        let (merged, clean) =
            ll_merge(&o, b"x\ny\n", "base", b"l\ny\n", "left", b"r\ny\n", "right");
        assert!(clean);
        assert_eq!(merged, b"l\ny\n");

        o.variant = MergeVariant::Theirs;
        let (merged, clean) =
            ll_merge(&o, b"x\ny\n", "base", b"l\ny\n", "left", b"r\ny\n", "right");
        assert!(clean);
        assert_eq!(merged, b"r\ny\n");
    }

    #[test]
    fn similarity_scores() {
        assert_eq!(estimate_similarity(b"a\nb\n", b"a\nb\n"), MAX_SIMILARITY_SCORE);
        assert_eq!(estimate_similarity(b"", b"a\n"), 0);
        assert_eq!(estimate_similarity(b"a\nb\n", b"c\nd\n"), 0);
        let score = estimate_similarity(b"one\ntwo\nthree\nfour\n", b"one\ntwo\nthree\nFOUR\n");
        assert!(score > DEFAULT_RENAME_SCORE, "score = {}", score);
        assert!(score < MAX_SIMILARITY_SCORE);
    }
}
