//! The memo's error taxonomy.
//!
//! Every variant is a fatal, non-retriable contract violation (§7): either a
//! caller passed a stale or unknown handle, a rewrite rule changed the
//! columns a group produces, or the memo's own accounting is broken. Nothing
//! here is recovered locally; it is the caller's job to decide what a
//! `MemoError` means for the surrounding optimizer run.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::memo::GroupId;
use crate::node::ColumnId;

/// Errors raised by [`crate::memo::Memo`]'s public operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoError {
    /// A group id was looked up that does not (or no longer) name a live
    /// group in the store.
    #[error("group {group} is not present in the memo")]
    InvalidGroup { group: GroupId },

    /// `replace` was asked to install a node whose output columns differ
    /// from the group's current output columns.
    #[error(
        "replace({group}, reason = {reason:?}) would change output columns: \
         expected {expected:?}, got {observed:?}"
    )]
    OutputColumnsChanged {
        group: GroupId,
        reason: String,
        expected: BTreeSet<ColumnId>,
        observed: BTreeSet<ColumnId>,
    },

    /// An internal accounting mismatch: a back-edge was expected during
    /// `decrement` but not found, a group was deleted while still
    /// referenced, or `replace_children` returned a node with the wrong
    /// number of children. Indicates a bug in the memo or in a collaborator,
    /// never a caller mistake that can be worked around.
    #[error("memo invariant violated: {detail}")]
    InvariantViolation { detail: String },

    /// `storeStats` was called with no estimate to store.
    #[error("storeStats({group}, ..) called with an absent estimate")]
    StatsNull { group: GroupId },
}

pub type MemoResult<T> = Result<T, MemoError>;
