//! Knobs that are orthogonal to correctness.
//!
//! Modeled on `optd-core`'s `cascades::optimizer::OptimizerProperties`: a
//! small `Default`-derived bag of switches, threaded through at construction
//! time and otherwise left alone.

/// Construction-time options for a [`crate::memo::Memo`].
#[derive(Default, Clone, Debug)]
pub struct MemoOptions {
    /// Re-run the full invariant check (§8, P1-P6) after every public
    /// mutating operation, regardless of build profile. Off by default:
    /// normally invariant verification only runs under `cfg!(debug_assertions)`,
    /// matching `NaiveMemo::verify_integrity`'s gating in the reference
    /// implementation. Turn this on in property tests and fuzz harnesses
    /// where a debug build is not guaranteed.
    pub always_verify_invariants: bool,

    /// Pre-size the group store for roughly this many groups. Purely an
    /// allocation hint; has no effect on behavior.
    pub initial_group_capacity: Option<usize>,
}

impl MemoOptions {
    pub fn with_always_verify_invariants(mut self, enabled: bool) -> Self {
        self.always_verify_invariants = enabled;
        self
    }

    pub fn with_initial_group_capacity(mut self, capacity: usize) -> Self {
        self.initial_group_capacity = Some(capacity);
        self
    }
}
