//! An interned, reference-counted memo table for iterative query plan
//! rewriting.
//!
//! A [`memo::Memo`] holds exactly one member per group and threads
//! back-edges between groups so that `replace`-driven rewrites can garbage
//! collect everything a rewrite orphans and invalidate cached statistics
//! along every affected ancestor chain. See each module's doc comment for
//! the operation it covers.

pub mod error;
pub mod memo;
pub mod node;
pub mod options;

pub use error::{MemoError, MemoResult};
pub use memo::{Estimate, GroupId, Memo, ROOT_SENTINEL};
pub use node::{ColumnId, CounterIdAllocator, GroupReference, IdAllocator, PlanNode, PlanNodeId};
pub use options::MemoOptions;
