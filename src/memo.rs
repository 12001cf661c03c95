//! The group store, reference accounting, insertion engine and `replace`
//! operation described by this crate's design document.
//!
//! Mirrors the shape of `optd-core`'s own `cascades::memo` module — a
//! `HashMap<GroupId, Group<..>>` store plus a handful of free-standing
//! accounting primitives — but stores exactly one member per group instead
//! of a set of equivalent expressions, since this memo does not do
//! cost-based plan enumeration.

mod stats;

use std::collections::{HashMap, HashSet};
use std::fmt;

use itertools::Itertools;
use tracing::{debug, trace};

use crate::error::{MemoError, MemoResult};
use crate::node::{GroupReference, IdAllocator, PlanNode};
use crate::options::MemoOptions;

pub use stats::Estimate;

/// Identifies a group in the memo. Never reused once allocated.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct GroupId(u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Synthetic parent id denoting "the outside world holds a reference to this
/// group". Never names a real group; pins the root group against
/// reference-count collection.
pub const ROOT_SENTINEL: GroupId = GroupId(0);

/// A multiset of parent group ids, used for a group's `incoming` back-edges.
///
/// Duplicates matter: a group whose member references the same child twice
/// must contribute two occurrences of itself to that child's `incoming`
/// (§9, open question 1 — resolved as multiset semantics in DESIGN.md).
#[derive(Default, Clone, Debug)]
struct Multiset(HashMap<GroupId, u32>);

impl Multiset {
    fn new() -> Self {
        Self(HashMap::new())
    }

    fn insert(&mut self, id: GroupId) {
        *self.0.entry(id).or_insert(0) += 1;
    }

    /// Removes one occurrence of `id`. Returns `false` if none was present.
    fn remove_one(&mut self, id: GroupId) -> bool {
        match self.0.get_mut(&id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.0.remove(&id);
                }
                true
            }
            _ => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn count(&self, id: GroupId) -> u32 {
        *self.0.get(&id).unwrap_or(&0)
    }

    fn distinct_elements(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.0.keys().copied()
    }
}

/// A single interned group: the current member plan node, its back-edges,
/// and its cached statistics estimate.
struct Group<P> {
    member: P,
    incoming: Multiset,
    stats: Option<Estimate>,
}

/// A mutable, reference-counted memo of an immutable query plan tree.
///
/// `P` is the planner's opaque plan-node representation (see
/// [`crate::node::PlanNode`]); `A` supplies fresh plan-node ids for the
/// `GroupReference`s the memo installs.
pub struct Memo<P, A> {
    groups: HashMap<GroupId, Group<P>>,
    /// Content-addressed lookup from a group's current member's fingerprint
    /// (see [`fingerprint`]) back to its group id, so that `insert_recursive`
    /// reuses an existing group instead of minting a duplicate one for equal
    /// content (the actual interning §1 promises). Keyed on a canonicalized
    /// copy of the member with every group-reference child's plan-node id
    /// zeroed out, since that id is freshly minted on every insertion and
    /// must not affect whether two members are "the same" expression.
    /// Mirrors `NaiveMemo`'s `expr_fingerprint_to_ids` in the teacher, whose
    /// own fingerprint is keyed on child group ids rather than child expr
    /// ids for the same reason. One entry per live group, kept in sync with
    /// `groups` by `insert_recursive`, `replace` and `delete_group`.
    fingerprint_index: HashMap<P, GroupId>,
    next_group_id: u64,
    root_group: GroupId,
    ids: A,
    options: MemoOptions,
}

impl<P: PlanNode, A: IdAllocator> Memo<P, A> {
    /// Builds a memo from a single root plan tree, interning it
    /// group-by-group via [`Self::insert_recursive`].
    pub fn new(ids: A, root: P) -> MemoResult<Self> {
        Self::with_options(ids, MemoOptions::default(), root)
    }

    pub fn with_options(ids: A, options: MemoOptions, root: P) -> MemoResult<Self> {
        let groups = match options.initial_group_capacity {
            Some(cap) => HashMap::with_capacity(cap),
            None => HashMap::new(),
        };
        let mut memo = Self {
            groups,
            fingerprint_index: HashMap::new(),
            next_group_id: 1,
            root_group: ROOT_SENTINEL,
            ids,
            options,
        };
        let root_group = memo.insert_recursive(&root)?;
        memo.groups
            .get_mut(&root_group)
            .expect("just inserted")
            .incoming
            .insert(ROOT_SENTINEL);
        memo.root_group = root_group;
        debug!(event = "memo_constructed", root_group = %root_group, groups = memo.groups.len());
        memo.verify_if_configured()?;
        Ok(memo)
    }

    /// The group id of the root plan node.
    pub fn root_group(&self) -> GroupId {
        self.root_group
    }

    /// The number of live groups in the store.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The current member of `g`.
    pub fn get_node(&self, g: GroupId) -> MemoResult<&P> {
        self.groups
            .get(&g)
            .map(|group| &group.member)
            .ok_or(MemoError::InvalidGroup { group: g })
    }

    /// The current member of the group a [`GroupReference`] points at.
    pub fn resolve(&self, group_ref: &GroupReference) -> MemoResult<&P> {
        self.get_node(group_ref.group_id)
    }

    /// Reconstructs a self-contained plan tree by resolving every
    /// `GroupReference` in the current root member to its target group's
    /// current member, recursively.
    pub fn extract(&self) -> MemoResult<P> {
        let mut cache = HashMap::new();
        self.extract_inner(self.root_group, &mut cache)
    }

    fn extract_inner(&self, g: GroupId, cache: &mut HashMap<GroupId, P>) -> MemoResult<P> {
        if let Some(cached) = cache.get(&g) {
            return Ok(cached.clone());
        }
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || {
            let member = self.get_node(g)?.clone();
            let mut new_children = Vec::with_capacity(member.children().len());
            for child in member.children() {
                let group_ref =
                    child
                        .as_group_reference()
                        .ok_or_else(|| MemoError::InvariantViolation {
                            detail: format!(
                                "group {g} member has a non-group-reference child during extract"
                            ),
                        })?;
                new_children.push(self.extract_inner(group_ref.group_id, cache)?);
            }
            let materialized = member.replace_children(new_children);
            cache.insert(g, materialized.clone());
            Ok(materialized)
        })
    }

    /// Materialises an externally supplied plan subtree into groups,
    /// replacing each child with a group reference. If `node` is already a
    /// `GroupReference`, its group id is returned unchanged: no group is
    /// created and no back-edge is added here — the caller is responsible
    /// for accounting for the reference it is about to install.
    ///
    /// Interns on content: once every child has been materialised into a
    /// group reference, the rewritten node's [`fingerprint`] is looked up in
    /// [`Memo::fingerprint_index`] before any group is allocated. Equal
    /// content (the same node, appearing twice in the externally supplied
    /// tree, or two occurrences of the same child under one parent) resolves
    /// to the one existing group instead of minting a duplicate.
    fn insert_recursive(&mut self, node: &P) -> MemoResult<GroupId> {
        if let Some(group_ref) = node.as_group_reference() {
            return Ok(group_ref.group_id);
        }
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || {
            let children = node.children();
            let mut new_children = Vec::with_capacity(children.len());
            for child in &children {
                let child_group = self.insert_recursive(child)?;
                let node_id = self.ids.next_id();
                new_children.push(P::from_group_reference(GroupReference {
                    node_id,
                    group_id: child_group,
                    output_columns: child.output_columns(),
                }));
            }
            let rewritten = node.replace_children(new_children.clone());
            check_child_count(&rewritten, new_children.len())?;

            if let Some(&existing) = self.fingerprint_index.get(&fingerprint(&rewritten)) {
                trace!(event = "intern_hit", group = %existing);
                return Ok(existing);
            }

            let g = self.alloc_group_id();
            self.groups.insert(
                g,
                Group {
                    member: rewritten.clone(),
                    incoming: Multiset::new(),
                    stats: None,
                },
            );
            self.fingerprint_index.insert(fingerprint(&rewritten), g);
            self.increment(&rewritten, g)?;
            trace!(event = "insert_group", group = %g);
            Ok(g)
        })
    }

    fn alloc_group_id(&mut self) -> GroupId {
        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        id
    }

    /// Adds `from_group` as a back-edge to every child group referenced by
    /// `node`, once per literal occurrence (multiset semantics — see the
    /// module doc comment on [`Multiset`]).
    fn increment(&mut self, node: &P, from_group: GroupId) -> MemoResult<()> {
        for child in node.children() {
            let child_group = child_group_of(&child)?;
            self.groups
                .get_mut(&child_group)
                .ok_or(MemoError::InvalidGroup { group: child_group })?
                .incoming
                .insert(from_group);
        }
        Ok(())
    }

    /// Removes one `from_group` back-edge per literal occurrence of a child
    /// reference in `node`. A missing back-edge is a fatal accounting bug.
    /// A child whose `incoming` multiset becomes empty is collected.
    fn decrement(&mut self, node: &P, from_group: GroupId) -> MemoResult<()> {
        for child in node.children() {
            let child_group = child_group_of(&child)?;
            let group = self
                .groups
                .get_mut(&child_group)
                .ok_or(MemoError::InvalidGroup { group: child_group })?;
            if !group.incoming.remove_one(from_group) {
                return Err(MemoError::InvariantViolation {
                    detail: format!(
                        "decrement: group {child_group} has no back-edge from {from_group}"
                    ),
                });
            }
            if group.incoming.is_empty() {
                self.delete_group(child_group)?;
            }
        }
        Ok(())
    }

    /// Removes a now-unreferenced group from the store and recursively
    /// decrements its member's own children.
    fn delete_group(&mut self, g: GroupId) -> MemoResult<()> {
        let group = self
            .groups
            .get(&g)
            .ok_or(MemoError::InvalidGroup { group: g })?;
        if !group.incoming.is_empty() {
            return Err(MemoError::InvariantViolation {
                detail: format!("delete_group: group {g} is still referenced"),
            });
        }
        let member = group.member.clone();
        self.groups.remove(&g);
        let key = fingerprint(&member);
        if self.fingerprint_index.get(&key) == Some(&g) {
            self.fingerprint_index.remove(&key);
        }
        debug!(event = "delete_group", group = %g);
        self.decrement(&member, g)
    }

    /// Substitutes the member of group `g` by a rewritten form derived from
    /// `new_node`, preserving `g`'s output columns. See the design
    /// document's `replace` section for the increment-before-decrement
    /// discipline this relies on.
    pub fn replace(
        &mut self,
        g: GroupId,
        new_node: P,
        reason: impl Into<String>,
    ) -> MemoResult<P> {
        let reason = reason.into();
        let old = self.get_node(g)?.clone();

        let expected = old.output_columns();
        let observed = new_node.output_columns();
        if expected != observed {
            return Err(MemoError::OutputColumnsChanged {
                group: g,
                reason,
                expected,
                observed,
            });
        }

        debug!(event = "replace", group = %g, reason = %reason);

        let rewritten = if let Some(group_ref) = new_node.as_group_reference() {
            self.get_node(group_ref.group_id)?.clone()
        } else {
            let children = new_node.children();
            let mut new_children = Vec::with_capacity(children.len());
            for child in &children {
                let child_group = self.insert_recursive(child)?;
                let node_id = self.ids.next_id();
                new_children.push(P::from_group_reference(GroupReference {
                    node_id,
                    group_id: child_group,
                    output_columns: child.output_columns(),
                }));
            }
            let rewritten = new_node.replace_children(new_children.clone());
            check_child_count(&rewritten, new_children.len())?;
            rewritten
        };

        // Increment before decrement: a child common to `old` and
        // `rewritten` must never transiently drop to zero incoming
        // references and be collected mid-operation.
        self.increment(&rewritten, g)?;
        self.groups
            .get_mut(&g)
            .ok_or(MemoError::InvalidGroup { group: g })?
            .member = rewritten.clone();
        let old_key = fingerprint(&old);
        if self.fingerprint_index.get(&old_key) == Some(&g) {
            self.fingerprint_index.remove(&old_key);
        }
        self.fingerprint_index
            .entry(fingerprint(&rewritten))
            .or_insert(g);
        self.decrement(&old, g)?;
        self.evict_statistics(g)?;

        self.verify_if_configured()?;
        Ok(rewritten)
    }

    fn verify_if_configured(&self) -> MemoResult<()> {
        if self.options.always_verify_invariants || cfg!(debug_assertions) {
            self.assert_invariants()
        } else {
            Ok(())
        }
    }

    /// Checks invariants P1, P2, P3 and P6 (§8). Exposed publicly so tests
    /// can run it directly against whatever sequence of operations they
    /// construct, the same way `optd-core::cascades::naive_memo::NaiveMemo`
    /// exposes `verify_integrity` for its own debug-only self-checks.
    pub fn assert_invariants(&self) -> MemoResult<()> {
        let mut expected_incoming: HashMap<GroupId, Multiset> = HashMap::new();
        expected_incoming
            .entry(self.root_group)
            .or_default()
            .insert(ROOT_SENTINEL);

        for (&p, group) in &self.groups {
            for child in group.member.children() {
                let c = child.as_group_reference().ok_or_else(|| {
                    MemoError::InvariantViolation {
                        detail: format!("group {p} member has a non-group-reference child"),
                    }
                })?;
                if !self.groups.contains_key(&c.group_id) {
                    return Err(MemoError::InvariantViolation {
                        detail: format!(
                            "group {p} references group {} which is not in the store",
                            c.group_id
                        ),
                    });
                }
                expected_incoming.entry(c.group_id).or_default().insert(p);
            }
        }

        for (&g, group) in &self.groups {
            let expected = expected_incoming.remove(&g).unwrap_or_default();
            let all_ids = expected
                .distinct_elements()
                .chain(group.incoming.distinct_elements())
                .unique();
            for id in all_ids {
                if expected.count(id) != group.incoming.count(id) {
                    return Err(MemoError::InvariantViolation {
                        detail: format!(
                            "group {g} back-edge mismatch from {id}: expected {}, found {}",
                            expected.count(id),
                            group.incoming.count(id)
                        ),
                    });
                }
            }
        }

        let mut reachable = HashSet::new();
        let mut on_stack = HashSet::new();
        self.walk_reachable(self.root_group, &mut reachable, &mut on_stack)?;
        if reachable.len() != self.groups.len() {
            return Err(MemoError::InvariantViolation {
                detail: format!(
                    "{} groups reachable from root but {} groups live in the store",
                    reachable.len(),
                    self.groups.len()
                ),
            });
        }
        Ok(())
    }

    fn walk_reachable(
        &self,
        g: GroupId,
        reachable: &mut HashSet<GroupId>,
        on_stack: &mut HashSet<GroupId>,
    ) -> MemoResult<()> {
        if !on_stack.insert(g) {
            return Err(MemoError::InvariantViolation {
                detail: format!("cycle detected through group {g}"),
            });
        }
        if reachable.insert(g) {
            let member = self.get_node(g)?;
            for child in member.children() {
                if let Some(group_ref) = child.as_group_reference() {
                    self.walk_reachable(group_ref.group_id, reachable, on_stack)?;
                }
            }
        }
        on_stack.remove(&g);
        Ok(())
    }
}

/// A canonical copy of `node` for use as a [`Memo::fingerprint_index`] key:
/// every group-reference child's plan-node id is replaced by `0`, since that
/// id is freshly minted on every call and two members built from equivalent
/// children (the same group ids) must fingerprint identically regardless of
/// which plan-node id happened to be allocated for the reference this time.
fn fingerprint<P: PlanNode>(node: &P) -> P {
    let canonical_children = node
        .children()
        .into_iter()
        .map(|child| match child.as_group_reference() {
            Some(group_ref) => P::from_group_reference(GroupReference {
                node_id: 0,
                group_id: group_ref.group_id,
                output_columns: group_ref.output_columns.clone(),
            }),
            None => child,
        })
        .collect();
    node.replace_children(canonical_children)
}

fn child_group_of<P: PlanNode>(child: &P) -> MemoResult<GroupId> {
    child
        .as_group_reference()
        .map(|group_ref| group_ref.group_id)
        .ok_or_else(|| MemoError::InvariantViolation {
            detail: "expected a group-reference child, found a plan node".to_string(),
        })
}

fn check_child_count<P: PlanNode>(rewritten: &P, expected: usize) -> MemoResult<()> {
    let actual = rewritten.children().len();
    if actual != expected {
        return Err(MemoError::InvariantViolation {
            detail: format!(
                "replace_children returned {actual} children, expected {expected}"
            ),
        });
    }
    Ok(())
}
