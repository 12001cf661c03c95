//! End-to-end scenarios against the group store, replace, statistics cache
//! and extraction, using the fixture plan node in `common.rs`.

mod common;

use pretty_assertions::assert_eq;

use common::{filter, join, project, scan, self_join};
use planmemo::{CounterIdAllocator, Estimate, Memo, MemoError, PlanNode};

fn new_memo(root: common::TestNode) -> Memo<common::TestNode, CounterIdAllocator> {
    Memo::new(CounterIdAllocator::default(), root).expect("construction should succeed")
}

#[test]
fn construction_interns_every_node_into_its_own_group() {
    let root = project(scan("t", [1, 2, 3]), [1, 2]);
    let memo = new_memo(root);
    // scan + project = 2 groups.
    assert_eq!(memo.group_count(), 2);
    memo.assert_invariants().unwrap();
}

#[test]
fn extract_round_trips_through_a_fresh_memo() {
    let root = project(filter(scan("orders", [1, 2, 3])), [1, 2]);
    let memo = new_memo(root);
    let extracted_once = memo.extract().unwrap();

    let memo2 = new_memo(extracted_once.clone());
    let extracted_twice = memo2.extract().unwrap();

    assert_eq!(extracted_once, extracted_twice);
}

#[test]
fn replace_noop_preserves_observable_tree_and_group_count() {
    let root = project(scan("t", [1, 2]), [1]);
    let mut memo = new_memo(root);
    let g = memo.root_group();
    let before_count = memo.group_count();
    let before = memo.extract().unwrap();

    let current = memo.get_node(g).unwrap().clone();
    memo.replace(g, current, "noop").unwrap();

    assert_eq!(memo.group_count(), before_count);
    assert_eq!(memo.extract().unwrap(), before);
    memo.assert_invariants().unwrap();
}

#[test]
fn replace_with_same_columns_swaps_the_member_and_rewires_children() {
    let root = project(scan("t", [1, 2, 3]), [1, 2]);
    let mut memo = new_memo(root);
    let g = memo.root_group();

    // Same output columns (1, 2), different shape: project directly over a
    // fresh scan instead of the original child.
    let replacement = project(scan("t", [1, 2, 3]), [1, 2]);
    memo.replace(g, replacement, "rewrite").unwrap();

    memo.assert_invariants().unwrap();
    let extracted = memo.extract().unwrap();
    assert_eq!(extracted.output_columns(), [1, 2].into_iter().collect());
}

#[test]
fn replace_rejects_a_change_in_output_columns() {
    let root = project(scan("t", [1, 2, 3]), [1, 2]);
    let mut memo = new_memo(root);
    let g = memo.root_group();

    let bad = project(scan("t", [1, 2, 3]), [1, 2, 3]);
    let err = memo.replace(g, bad, "widen").unwrap_err();
    assert!(matches!(err, MemoError::OutputColumnsChanged { .. }));
}

#[test]
fn replacing_the_only_parent_of_a_child_collects_the_orphaned_group() {
    let root = project(scan("t", [1, 2]), [1]);
    let mut memo = new_memo(root);
    let g = memo.root_group();
    let before = memo.group_count();

    // Replace the project with a bare scan: the old scan child it used to
    // point at becomes unreachable and must be collected.
    memo.replace(g, scan("u", [1]), "drop child").unwrap();

    assert!(memo.group_count() < before);
    memo.assert_invariants().unwrap();
}

#[test]
fn shared_child_survives_while_any_parent_still_references_it() {
    let shared = scan("t", [1, 2]);
    let root_node = join(filter(shared.clone()), project(shared, [1]));
    let mut memo = new_memo(root_node);
    let g_root = memo.root_group();

    // scan, filter, project, join = 4 groups.
    assert_eq!(memo.group_count(), 4);

    // Reuse the existing project branch verbatim (it still points at the
    // shared scan group) while swapping the filter branch for something
    // unrelated. Output columns are unchanged: {1, 2} either way.
    let project_branch = memo.get_node(g_root).unwrap().children()[1].clone();
    let replacement = join(filter(scan("u", [1, 2])), project_branch);
    memo.replace(g_root, replacement, "drop filter branch")
        .unwrap();

    memo.assert_invariants().unwrap();
    // Old filter group is gone; shared scan survives via the project
    // branch; a new scan("u") group and a new filter group were added.
    assert_eq!(memo.group_count(), 5);
}

#[test]
fn duplicate_child_references_count_with_multiplicity_two() {
    let child = scan("t", [1, 2]);
    let root = self_join(child);
    let memo = new_memo(root);
    memo.assert_invariants().unwrap();

    // Both occurrences of `child` in `self_join` are equal content, so
    // `insert_recursive` interns them into one scan group instead of two:
    // scan group + join group = 2 groups. `assert_invariants` (P2) checks
    // that the scan's incoming multiset records the join group exactly
    // twice, matching the two literal `GroupReference`s to it in the join's
    // member.
    assert_eq!(memo.group_count(), 2);
}

#[test]
fn deleting_a_group_referenced_twice_requires_two_decrements() {
    let child = scan("t", [1, 2]);
    let root = self_join(child);
    let mut memo = new_memo(root);
    let g = memo.root_group();
    let before = memo.group_count();
    assert_eq!(before, 2, "scan interned once, referenced twice by join");

    // Replacing the join with a bare scan drops both occurrences of the
    // shared child in one step: `decrement` walks the old join member's two
    // `GroupReference` children, both naming the same scan group, and must
    // remove one occurrence of the join's back-edge per occurrence before
    // that group's `incoming` empties and it is collected. A memo that
    // dropped it after the first occurrence (or leaked a phantom back-edge
    // after the second) would fail `assert_invariants` below.
    memo.replace(g, scan("u", [1, 2]), "collapse").unwrap();
    assert_eq!(memo.group_count(), 1, "shared scan collected, only the replaced join remains");
    memo.assert_invariants().unwrap();
}

#[test]
fn statistics_are_cached_and_returned() {
    let root = scan("t", [1]);
    let mut memo = new_memo(root);
    let g = memo.root_group();

    assert!(memo.get_stats(g).unwrap().is_none());
    memo.store_stats(g, Estimate::new(42u64)).unwrap();
    let cached = memo.get_stats(g).unwrap().expect("just stored");
    assert_eq!(*cached.downcast_ref::<u64>().unwrap(), 42);
}

#[test]
fn replace_evicts_cached_statistics_on_the_affected_group_and_its_ancestors() {
    let root = project(scan("t", [1, 2]), [1]);
    let mut memo = new_memo(root);
    let g_root = memo.root_group();
    let g_child = memo
        .get_node(g_root)
        .unwrap()
        .children()
        .first()
        .unwrap()
        .as_group_reference()
        .expect("project's child is always a group reference")
        .group_id;

    memo.store_stats(g_root, Estimate::new(10u64)).unwrap();
    memo.store_stats(g_child, Estimate::new(20u64)).unwrap();

    memo.replace(g_child, scan("u", [1, 2]), "rescan").unwrap();

    assert!(memo.get_stats(g_root).unwrap().is_none());
    assert!(memo.get_stats(g_child).unwrap().is_none());
}

#[test]
fn invalid_group_lookups_are_reported_rather_than_panicking() {
    let root = scan("t", [1]);
    let memo = new_memo(root);
    // `GroupId::default()` is the synthetic root sentinel, which is never a
    // key in the group store itself.
    let bogus = planmemo::GroupId::default();
    let err = memo.get_node(bogus).unwrap_err();
    assert!(matches!(err, MemoError::InvalidGroup { .. }));
}
