//! The plan-node capability set consumed by the memo.
//!
//! The memo is oblivious to the actual operator algebra (joins, scans,
//! projections, ...). It only needs three operations on whatever value type
//! the surrounding planner uses to represent a plan node, plus a way to
//! recognize the one variant the memo itself introduces: [`GroupReference`].

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;

use crate::memo::GroupId;

/// A column identifier as produced by a plan node. Opaque to the memo beyond
/// equality and hashing.
pub type ColumnId = u64;

/// A fresh identifier minted for every plan node the memo installs, including
/// synthesized [`GroupReference`]s. Allocated by the planner, not the memo.
pub type PlanNodeId = u64;

/// Supplies fresh, monotonically unique [`PlanNodeId`]s.
///
/// Owned by the surrounding planner; the memo only ever calls `next_id` while
/// constructing a [`GroupReference`]. No other resource is shared between the
/// memo and its caller.
pub trait IdAllocator {
    fn next_id(&mut self) -> PlanNodeId;
}

/// A monotonic counter, sufficient for tests and for planners that do not
/// need plan-node ids to carry any other meaning.
#[derive(Debug, Default)]
pub struct CounterIdAllocator(PlanNodeId);

impl IdAllocator for CounterIdAllocator {
    fn next_id(&mut self) -> PlanNodeId {
        let id = self.0;
        self.0 += 1;
        id
    }
}

/// A placeholder plan node standing in for another group's current member.
///
/// `output_columns` is a snapshot taken at the moment the reference was
/// created (invariant 4, output stability): it does not change even if the
/// referenced group's member is later replaced by something with the same
/// logical output but a different physical representation of that set, since
/// `replace` is required to preserve output columns exactly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupReference {
    pub node_id: PlanNodeId,
    pub group_id: GroupId,
    pub output_columns: BTreeSet<ColumnId>,
}

/// The capability set the memo requires of a plan-node representation.
///
/// Implementations are expected to be cheap-to-clone handles (e.g. `Arc<T>`
/// around an enum of operator variants) since the memo clones and
/// re-children nodes freely while inserting and rewriting.
pub trait PlanNode: Clone + Debug + PartialEq + Eq + Hash {
    /// This node's direct children, in positional order.
    fn children(&self) -> Vec<Self>;

    /// A new node of the same variant with `children` substituted
    /// positionally. `new_children.len()` must equal `self.children().len()`;
    /// violating this is an [`crate::error::MemoError::InvariantViolation`].
    fn replace_children(&self, new_children: Vec<Self>) -> Self;

    /// The unordered set of columns this node produces.
    fn output_columns(&self) -> BTreeSet<ColumnId>;

    /// `Some` iff this node is a [`GroupReference`] the memo itself
    /// installed; a `PlanNode` implementation built atop a tagged-union
    /// operator type distinguishes this as one more variant.
    fn as_group_reference(&self) -> Option<&GroupReference>;

    /// Construct a node wrapping a [`GroupReference`]. Used internally by the
    /// memo when materializing a freshly inserted child.
    fn from_group_reference(group_ref: GroupReference) -> Self;
}
