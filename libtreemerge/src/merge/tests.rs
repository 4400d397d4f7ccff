use super::*;
use crate::error::MergeResult;
use crate::store::MemOdb;
use crate::test_utils::{commit_with_tree, init_logging, link_entry, tree_contents};

fn opts() -> MergeOptions {
    MergeOptions {
        ancestor: Some("base".to_owned()),
        branch1: "ours".to_owned(),
        branch2: "theirs".to_owned(),
        ..Default::default()
    }
}

fn merge(odb: &MemOdb, base: Oid, side1: Oid, side2: Oid) -> MergeOutcome {
    init_logging();
    merge_incore_nonrecursive(odb, &opts(), base, side1, side2, None).unwrap()
}

fn paths_of(odb: &MemOdb, tree: Oid) -> Vec<String> {
    tree_contents(odb, tree).keys().cloned().collect()
}

fn content_of(odb: &MemOdb, tree: Oid, path: &str) -> Vec<u8> {
    tree_contents(odb, tree).remove(path).map(|(_, content)| content).unwrap()
}

#[test]
fn merging_identical_trees_is_identity() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => {
        file < "contents\n"
        dir {
            nested < "more\n"
        }
    });

    let outcome = merge(&odb, base, base, base);
    assert!(outcome.clean);
    assert_eq!(outcome.tree, base);
    assert!(outcome.unmerged_paths().is_empty());
    Ok(())
}

#[test]
fn one_changed_side_wins() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { a < "x\n" });
    let changed = tree!(&odb => { a < "y\n" dir { b < "new\n" } });

    let outcome = merge(&odb, base, changed, base);
    assert!(outcome.clean);
    assert_eq!(outcome.tree, changed);

    let outcome = merge(&odb, base, base, changed);
    assert!(outcome.clean);
    assert_eq!(outcome.tree, changed);
    Ok(())
}

#[test]
fn trivial_same_side_modify() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { a < "x" });
    let side1 = tree!(&odb => { a < "y" });
    let side2 = tree!(&odb => { a < "x" });

    let outcome = merge(&odb, base, side1, side2);
    assert!(outcome.clean);
    assert_eq!(content_of(&odb, outcome.tree, "a"), b"y");
    Ok(())
}

#[test]
fn cleanness_is_commutative() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { f < "base\n" g < "same\n" });
    let side1 = tree!(&odb => { f < "ours\n" g < "same\n" });
    let side2 = tree!(&odb => { f < "theirs\n" g < "edited\n" });

    let forward = merge(&odb, base, side1, side2);
    let backward = merge(&odb, base, side2, side1);
    assert_eq!(forward.clean, backward.clean);
    assert!(!forward.clean);

    let clean_fwd = merge(&odb, base, side1, base);
    let clean_bwd = merge(&odb, base, base, side1);
    assert_eq!(clean_fwd.clean, clean_bwd.clean);
    assert!(clean_fwd.clean);
    Ok(())
}

#[test]
fn both_sides_modify_conflicts_with_labelled_markers() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { f < "base line\n" });
    let side1 = tree!(&odb => { f < "our line\n" });
    let side2 = tree!(&odb => { f < "their line\n" });

    let outcome = merge(&odb, base, side1, side2);
    assert!(!outcome.clean);
    assert_eq!(outcome.unmerged_paths(), vec![p!("f")]);

    let merged = content_of(&odb, outcome.tree, "f");
    let text = String::from_utf8(merged).unwrap();
    assert!(text.contains("<<<<<<< ours\n"), "got: {}", text);
    assert!(text.contains(">>>>>>> theirs\n"), "got: {}", text);
    assert!(outcome.message_for("f").unwrap().contains("CONFLICT (content)"));

    match outcome.path_info("f") {
        Some(PathInfo::Conflicted(ci)) => {
            assert_eq!(ci.filemask, 7);
            assert_eq!(ci.match_mask, 0);
        }
        other => panic!("expected conflict record, got {:?}", other),
    }
    Ok(())
}

#[test]
fn rename_plus_edit_merges_content_at_new_location() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { old < "line1\nline2\n" });
    let side1 = tree!(&odb => { new < "line1\nline2\n" });
    let side2 = tree!(&odb => { old < "line1\nCHANGED\n" });

    let outcome = merge(&odb, base, side1, side2);
    assert!(outcome.clean, "messages: {:?}", outcome.messages());
    assert_eq!(paths_of(&odb, outcome.tree), vec!["new"]);
    assert_eq!(content_of(&odb, outcome.tree, "new"), b"line1\nCHANGED\n");
    Ok(())
}

#[test]
fn rename_rename_one_to_two() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { f < "x" });
    let side1 = tree!(&odb => { a < "x" });
    let side2 = tree!(&odb => { b < "x" });

    let outcome = merge(&odb, base, side1, side2);
    assert!(!outcome.clean);
    assert_eq!(outcome.unmerged_paths(), vec![p!("a"), p!("b"), p!("f")]);

    // the original path keeps its base stage and the conflict flag; each
    // target carries the content on its own side
    match outcome.path_info("f") {
        Some(PathInfo::Conflicted(ci)) => {
            assert!(ci.path_conflict);
            assert_eq!(ci.filemask, 1);
        }
        other => panic!("expected conflict record for f, got {:?}", other),
    }
    for (path, stage) in [("a", 1), ("b", 2)] {
        match outcome.path_info(path) {
            Some(PathInfo::Conflicted(ci)) => {
                assert!(ci.path_conflict);
                assert_eq!(odb.read_blob(ci.stages[stage].oid)?, b"x");
            }
            other => panic!("expected conflict record for {}, got {:?}", path, other),
        }
    }

    assert!(outcome.message_for("f").unwrap().contains("CONFLICT (rename/rename)"));
    // the result tree carries both targets but not the vacated source
    assert_eq!(paths_of(&odb, outcome.tree), vec!["a", "b"]);
    Ok(())
}

#[test]
fn directory_rename_pulls_new_files_along() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { src { a < "1" b < "2" } });
    let side1 = tree!(&odb => { dst { a < "1" b < "2" } });
    let side2 = tree!(&odb => { src { a < "1" b < "2" c < "3" } });

    let mut options = opts();
    options.detect_directory_renames = DirectoryRenames::Enabled;
    let outcome = merge_incore_nonrecursive(&odb, &options, base, side1, side2, None)?;

    assert!(outcome.clean, "messages: {:?}", outcome.messages());
    assert_eq!(paths_of(&odb, outcome.tree), vec!["dst/a", "dst/b", "dst/c"]);
    let advisory = outcome.message_for("dst/c").unwrap();
    assert!(advisory.contains("src/c"), "got: {}", advisory);
    assert!(advisory.contains("dst/c"), "got: {}", advisory);
    Ok(())
}

#[test]
fn directory_rename_conflict_variant_flags_the_moved_path() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { src { a < "1" b < "2" } });
    let side1 = tree!(&odb => { dst { a < "1" b < "2" } });
    let side2 = tree!(&odb => { src { a < "1" b < "2" c < "3" } });

    let outcome = merge(&odb, base, side1, side2);
    assert!(!outcome.clean);
    assert_eq!(outcome.unmerged_paths(), vec![p!("dst/c")]);
    assert!(outcome.message_for("dst/c").unwrap().contains("CONFLICT (file location)"));
    // the file still lands at the renamed location in the tree
    assert_eq!(paths_of(&odb, outcome.tree), vec!["dst/a", "dst/b", "dst/c"]);
    Ok(())
}

#[test]
fn directory_rename_split_falls_back_to_original_location() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { d { a < "1" b < "2" } });
    let side1 = tree!(&odb => { e { a < "1" } f { b < "2" } });
    let side2 = tree!(&odb => { d { a < "1" b < "2" c < "3" } });

    let mut options = opts();
    options.detect_directory_renames = DirectoryRenames::Enabled;
    let outcome = merge_incore_nonrecursive(&odb, &options, base, side1, side2, None)?;

    assert!(!outcome.clean);
    let (_, split_msg) = outcome
        .messages()
        .into_iter()
        .find(|(path, _)| *path == p!("d"))
        .expect("split advisory for d");
    assert!(split_msg.contains("directory rename split"), "got: {}", split_msg);
    // no majority, so the added file stays where it was
    assert_eq!(paths_of(&odb, outcome.tree), vec!["d/c", "e/a", "f/b"]);
    Ok(())
}

#[test]
fn modify_delete_keeps_the_modification_unclean() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { p < "x" });
    let side1 = tree!(&odb => { p < "y" });
    let side2 = tree!(&odb => {});

    let outcome = merge(&odb, base, side1, side2);
    assert!(!outcome.clean);
    assert_eq!(outcome.unmerged_paths(), vec![p!("p")]);
    assert_eq!(content_of(&odb, outcome.tree, "p"), b"y");

    match outcome.path_info("p") {
        Some(PathInfo::Conflicted(ci)) => {
            assert_eq!(ci.filemask, 3);
            assert_eq!(odb.read_blob(ci.stages[1].oid)?, b"y");
        }
        other => panic!("expected conflict record, got {:?}", other),
    }
    let advisory = outcome.message_for("p").unwrap();
    assert!(advisory.contains("modify/delete"));
    assert!(advisory.contains("ours") && advisory.contains("theirs"), "got: {}", advisory);
    Ok(())
}

#[test]
fn distinct_types_split_into_two_paths() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { p < "x" });
    let side1_tree = {
        let entries = vec![link_entry(&odb, "p", "t")];
        odb.write_tree(entries)?
    };
    let side2 = tree!(&odb => { p < "y" });

    let outcome = merge(&odb, base, side1_tree, side2);
    assert!(!outcome.clean);
    // the symlink moves aside; the regular file keeps the path
    assert_eq!(outcome.unmerged_paths(), vec![p!("p"), p!("p~ours")]);

    let contents = tree_contents(&odb, outcome.tree);
    assert_eq!(contents["p"].1, b"y");
    assert!(contents["p"].0.is_file());
    assert_eq!(contents["p~ours"].1, b"t");
    assert!(contents["p~ours"].0.is_link());

    assert!(outcome.message_for("p").unwrap().contains("distinct types"));
    Ok(())
}

#[test]
fn empty_sides_never_crash() -> MergeResult<()> {
    let odb = MemOdb::new();
    let empty = odb.write_tree(vec![])?;
    let full = tree!(&odb => { a < "1" d { b < "2" } });

    // add only
    let outcome = merge(&odb, empty, full, empty);
    assert!(outcome.clean);
    assert_eq!(outcome.tree, full);

    // deletions on both sides
    let outcome = merge(&odb, full, empty, empty);
    assert!(outcome.clean);
    assert_eq!(outcome.tree, empty);

    // everything empty
    let outcome = merge(&odb, empty, empty, empty);
    assert!(outcome.clean);
    assert_eq!(outcome.tree, empty);
    Ok(())
}

#[test]
fn file_directory_collision_moves_the_file_aside() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => {});
    let side1 = tree!(&odb => { p < "x" });
    let side2 = tree!(&odb => { p { q < "y" } });

    let outcome = merge(&odb, base, side1, side2);
    assert!(!outcome.clean);
    assert_eq!(paths_of(&odb, outcome.tree), vec!["p/q", "p~ours"]);
    assert_eq!(content_of(&odb, outcome.tree, "p~ours"), b"x");
    assert!(outcome.message_for("p~ours").unwrap().contains("CONFLICT (file/directory)"));
    Ok(())
}

#[test]
fn deleted_file_loses_to_directory_silently() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { p < "x" keep < "k" });
    let side1 = tree!(&odb => { p { q < "y" } keep < "k" });
    let side2 = tree!(&odb => { keep < "k" });

    let outcome = merge(&odb, base, side1, side2);
    assert!(outcome.clean, "messages: {:?}", outcome.messages());
    assert_eq!(paths_of(&odb, outcome.tree), vec!["keep", "p/q"]);
    Ok(())
}

#[test]
fn renames_disabled_turn_renames_into_delete_and_add() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { old < "line1\nline2\n" });
    let side1 = tree!(&odb => { new < "line1\nline2\n" });
    let side2 = tree!(&odb => { old < "line1\nCHANGED\n" });

    let mut options = opts();
    options.detect_renames = false;
    let outcome = merge_incore_nonrecursive(&odb, &options, base, side1, side2, None)?;

    assert!(!outcome.clean);
    assert_eq!(outcome.unmerged_paths(), vec![p!("old")]);
    assert_eq!(paths_of(&odb, outcome.tree), vec!["new", "old"]);
    Ok(())
}

#[test]
fn renormalization_suppresses_spurious_modify_delete() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => {
        ".gitattributes" < "*.txt text\n"
        "a.txt" < "one\r\ntwo\r\n"
    });
    let side1 = tree!(&odb => {
        ".gitattributes" < "*.txt text\n"
        "a.txt" < "one\ntwo\n"
    });
    let side2 = tree!(&odb => { ".gitattributes" < "*.txt text\n" });

    let mut options = opts();
    options.renormalize = true;
    let outcome = merge_incore_nonrecursive(&odb, &options, base, side1, side2, None)?;

    assert!(outcome.clean, "messages: {:?}", outcome.messages());
    assert_eq!(paths_of(&odb, outcome.tree), vec![".gitattributes"]);
    Ok(())
}

#[test]
fn submodules_fast_forward_when_one_side_contains_the_other() -> MergeResult<()> {
    use crate::obj::{FileMode, TreeEntry};
    use crate::test_utils::commit;

    let odb = MemOdb::new();
    let sub_base = commit(&odb, &[], 1);
    let sub_ours = commit(&odb, &[sub_base], 2);
    let sub_theirs = commit(&odb, &[sub_ours], 3);

    let gitlink = |oid| TreeEntry { mode: FileMode::GITLINK, path: p!("sub"), oid };
    let base = odb.write_tree(vec![gitlink(sub_base)])?;
    let side1 = odb.write_tree(vec![gitlink(sub_ours)])?;
    let side2 = odb.write_tree(vec![gitlink(sub_theirs)])?;

    let outcome = merge(&odb, base, side1, side2);
    assert!(outcome.clean, "messages: {:?}", outcome.messages());
    let result = odb.read_tree(outcome.tree)?;
    assert_eq!(result.entries[0].oid, sub_theirs);
    assert_eq!(result.entries[0].mode, FileMode::GITLINK);
    Ok(())
}

#[test]
fn unrelated_submodule_tips_conflict() -> MergeResult<()> {
    use crate::obj::{FileMode, TreeEntry};
    use crate::test_utils::commit;

    let odb = MemOdb::new();
    let sub_base = commit(&odb, &[], 1);
    let sub_ours = commit(&odb, &[sub_base], 2);
    let sub_theirs = commit(&odb, &[sub_base], 3);

    let gitlink = |oid| TreeEntry { mode: FileMode::GITLINK, path: p!("sub"), oid };
    let base = odb.write_tree(vec![gitlink(sub_base)])?;
    let side1 = odb.write_tree(vec![gitlink(sub_ours)])?;
    let side2 = odb.write_tree(vec![gitlink(sub_theirs)])?;

    let outcome = merge(&odb, base, side1, side2);
    assert!(!outcome.clean);
    assert!(outcome.message_for("sub").unwrap().contains("CONFLICT (submodule)"));
    Ok(())
}

#[test]
fn recursive_merge_builds_a_virtual_ancestor() -> MergeResult<()> {
    let odb = MemOdb::new();

    let t_root = tree!(&odb => { f < "0\n" });
    let root = commit_with_tree(&odb, t_root, &[], 1);
    let t1 = tree!(&odb => { f < "1\n" });
    let c1 = commit_with_tree(&odb, t1, &[root], 2);
    let t2 = tree!(&odb => { f < "0\n" g < "1\n" });
    let c2 = commit_with_tree(&odb, t2, &[root], 3);

    // criss-cross: x and y both merge c1 and c2 (cleanly)
    let t_merged = tree!(&odb => { f < "1\n" g < "1\n" });
    let x = commit_with_tree(&odb, t_merged, &[c1, c2], 4);
    let y = commit_with_tree(&odb, t_merged, &[c2, c1], 5);

    // both tips then diverge again
    let t_x = tree!(&odb => { f < "1\n" g < "1\n" h < "x\n" });
    let x2 = commit_with_tree(&odb, t_x, &[x], 6);
    let t_y = tree!(&odb => { f < "1\n" g < "1\n" i < "y\n" });
    let y2 = commit_with_tree(&odb, t_y, &[y], 7);

    let mut options = opts();
    options.ancestor = None;
    let outcome = merge_incore_recursive(&odb, &options, &[], x2, y2)?;
    assert!(outcome.clean, "messages: {:?}", outcome.messages());
    assert_eq!(paths_of(&odb, outcome.tree), vec!["f", "g", "h", "i"]);
    Ok(())
}

#[test]
fn subtree_shift_reroots_the_other_side() -> MergeResult<()> {
    let odb = MemOdb::new();
    // our tree carries the subproject under vendor/lib
    let side1 = tree!(&odb => { vendor { lib { f < "1\n" } } app < "more code\n" });
    // their history tracks the bare subproject
    let base_sub = tree!(&odb => { f < "1\n" });
    let side2_sub = tree!(&odb => { f < "2\n" });

    let mut options = opts();
    options.subtree_shift = Some("vendor/lib".to_owned());
    // shift applies to the base and side2
    let outcome = merge_incore_nonrecursive(&odb, &options, base_sub, side1, side2_sub, None)?;
    assert!(outcome.clean, "messages: {:?}", outcome.messages());
    let contents = tree_contents(&odb, outcome.tree);
    assert_eq!(contents["vendor/lib/f"].1, b"2\n");
    assert_eq!(contents["app"].1, b"more code\n");
    Ok(())
}

#[test]
fn repeated_merge_reuses_the_rename_cache() -> MergeResult<()> {
    let odb = MemOdb::new();
    // a cherry-pick sequence: each step's base is the previous step's side2
    // tree and each step's side1 is the previous result, which is exactly the
    // shape the rename cache carries over
    let base0 = tree!(&odb => { dir { old < "line1\nline2\nline3\n" } });
    let onto = tree!(&odb => { dir { renamed < "line1\nline2\nline3\n" } });
    let pick1 = tree!(&odb => { dir { old < "line1\nline2 changed\nline3\n" } });
    let pick2 = tree!(&odb => { dir { old < "line1\nline2 changed\nline3 changed\n" } });

    let first = merge(&odb, base0, onto, pick1);
    assert!(first.clean, "messages: {:?}", first.messages());
    let first_tree = first.tree;
    assert_eq!(content_of(&odb, first_tree, "dir/renamed"), b"line1\nline2 changed\nline3\n");

    // white box: priming a context from the previous outcome must validate
    // side 1 and keep its cached pairs across the state reset
    let ctxt = MergeCtxt::start(&odb, opts(), Some(first), Some((pick1, first_tree, pick2)));
    assert!(
        ctxt.state.renames.cached_pairs[1].contains_key(&p!("dir/old")),
        "cached pairs: {:?}",
        ctxt.state.renames.cached_pairs
    );

    // the cached second step must agree with an uncached run of the same
    // merge, tree oid and all
    let first_again = merge(&odb, base0, onto, pick1);
    let second_cached =
        merge_incore_nonrecursive(&odb, &opts(), pick1, first_tree, pick2, Some(first_again))?;
    let second_fresh = merge_incore_nonrecursive(&odb, &opts(), pick1, first_tree, pick2, None)?;
    assert!(second_cached.clean);
    assert_eq!(second_cached.tree, second_fresh.tree);
    assert_eq!(
        content_of(&odb, second_cached.tree, "dir/renamed"),
        b"line1\nline2 changed\nline3 changed\n"
    );
    Ok(())
}

#[test]
fn sibling_records_share_directory_name_pointers() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { d { a < "1" b < "2" } e { c < "3" } });
    let side1 = tree!(&odb => { d { a < "1x" b < "2" } e { c < "3" } });
    let side2 = tree!(&odb => { d { a < "1" b < "2y" } e { c < "3z" } });

    let outcome = merge(&odb, base, side1, side2);
    assert!(outcome.clean);

    let state = outcome.state.as_ref().unwrap();
    let records: Vec<_> = state.paths.iter().collect();
    for (path_a, info_a) in &records {
        for (path_b, info_b) in &records {
            let dir_a = info_a.merged().directory_name;
            let dir_b = info_b.merged().directory_name;
            // pointer identity iff string equality
            assert_eq!(
                dir_a.as_str().as_ptr() == dir_b.as_str().as_ptr(),
                dir_a.as_str() == dir_b.as_str(),
                "directory names for {} and {}",
                path_a,
                path_b
            );
        }
    }
    Ok(())
}

#[test]
fn resolved_records_keep_null_and_mode_consistent() -> MergeResult<()> {
    let odb = MemOdb::new();
    let base = tree!(&odb => { gone < "x" kept < "y" dir { f < "z" } });
    let side1 = tree!(&odb => { kept < "y" dir { f < "z" } });
    let side2 = tree!(&odb => { gone < "x" kept < "y2" dir { f < "z" } });

    let outcome = merge(&odb, base, side1, side2);
    assert!(outcome.clean);

    let state = outcome.state.as_ref().unwrap();
    for (path, info) in state.paths.iter() {
        if let PathInfo::Resolved(merged) = info {
            assert_eq!(
                merged.is_null,
                merged.result.mode.is_absent(),
                "record for {} out of sync",
                path
            );
        }
    }
    Ok(())
}

#[test]
fn switch_to_result_stages_conflicts_into_the_index() -> MergeResult<()> {
    use crate::index::{ConflictType, Index, MergeStage};

    let odb = MemOdb::new();
    let base = tree!(&odb => { p < "x" q < "same" });
    let side1 = tree!(&odb => { p < "y" q < "same" });
    let side2 = tree!(&odb => { p < "z" q < "same" });

    let outcome = merge(&odb, base, side1, side2);
    assert!(!outcome.clean);
    let result_tree = outcome.tree;

    let mut index = Index::new();
    index.read_tree(&odb, side1)?;
    let mut output = vec![];
    merge_switch_to_result(&odb, &opts(), &mut index, side1, outcome, true, true, &mut output)?;

    let printed = String::from_utf8(output).unwrap();
    assert!(printed.contains("CONFLICT (content)"), "got: {}", printed);

    assert_eq!(index.auto_merge(), Some(result_tree));
    assert!(index.has_conflicts());
    let conflicts = index.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].path, p!("p"));
    assert_eq!(conflicts[0].conflict_type, ConflictType::BothModified);

    // stage 0 for the conflicted path was replaced by the three stages
    assert!(index.find_entry(p!("p"), MergeStage::None).is_none());
    assert!(index.find_entry(p!("p"), MergeStage::Base).is_some());
    assert!(index.find_entry(p!("p"), MergeStage::Ours).is_some());
    assert!(index.find_entry(p!("p"), MergeStage::Theirs).is_some());
    // the clean path is still a normal stage-0 entry
    assert!(index.find_entry(p!("q"), MergeStage::None).is_some());
    Ok(())
}
