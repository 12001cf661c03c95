//! The per-group statistics cache and its invalidation on `replace`.
//!
//! Grounded in `optd-core`'s `cost::Statistics`, an opaque `Box<dyn Any +
//! Send + Sync>` the optimizer's cost model stashes facts in without the
//! memo itself knowing their shape. This memo caches at most one
//! [`Estimate`] per group and evicts it — and every live ancestor's — on
//! `replace`, per this crate's statistics-caching module.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::{MemoError, MemoResult};
use crate::node::PlanNode;

use super::{GroupId, Memo};

/// An opaque, cheaply cloneable statistics value attached to a group.
///
/// The memo never inspects an `Estimate`'s contents; it only stores,
/// returns and evicts them. Callers downcast via [`Estimate::downcast_ref`].
#[derive(Clone)]
pub struct Estimate(Arc<dyn Any + Send + Sync>);

impl Estimate {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Estimate").finish_non_exhaustive()
    }
}

impl<P: PlanNode, A: crate::node::IdAllocator> Memo<P, A> {
    /// The estimate cached for `g`, if any survived since it was last
    /// stored or evicted.
    pub fn get_stats(&self, g: GroupId) -> MemoResult<Option<&Estimate>> {
        self.groups
            .get(&g)
            .map(|group| group.stats.as_ref())
            .ok_or(MemoError::InvalidGroup { group: g })
    }

    /// Caches `estimate` for `g`. If `g` already has a cached estimate,
    /// evicts `g` and every live ancestor's first — an ancestor's own
    /// estimate may have been derived in part from the value about to be
    /// overwritten. If `g` had no prior estimate, nothing could yet depend
    /// on it, so the new one is installed with no cascade.
    pub fn store_stats(&mut self, g: GroupId, estimate: Estimate) -> MemoResult<()> {
        let had_prior = self
            .groups
            .get(&g)
            .ok_or(MemoError::InvalidGroup { group: g })?
            .stats
            .is_some();
        if had_prior {
            self.evict_statistics(g)?;
        }
        trace!(event = "store_stats", group = %g);
        self.groups.get_mut(&g).expect("checked above").stats = Some(estimate);
        Ok(())
    }

    /// Clears the cached estimate for `g` and for every group that can
    /// reach `g` through a chain of back-edges (a statistic derived in part
    /// from a descendant's shape is no longer trustworthy once that
    /// descendant changes). A group is visited at most once even if it is
    /// reachable from `g` through more than one path.
    pub(super) fn evict_statistics(&mut self, g: GroupId) -> MemoResult<()> {
        let mut visited = HashSet::new();
        let mut frontier = vec![g];
        while let Some(current) = frontier.pop() {
            if !visited.insert(current) {
                continue;
            }
            let group = self
                .groups
                .get_mut(&current)
                .ok_or(MemoError::InvalidGroup { group: current })?;
            if group.stats.take().is_some() {
                trace!(event = "evict_statistics", group = %current);
            }
            let parents: Vec<GroupId> = group
                .incoming
                .distinct_elements()
                .filter(|&p| p != super::ROOT_SENTINEL)
                .collect();
            frontier.extend(parents);
        }
        Ok(())
    }
}
