use rfloc_core::Real;

/// Synchronous estimation progress callbacks.
///
/// All callbacks run on the caller's thread while the estimator is locked:
/// result accessors work, mutators observe `Locked`. Default implementations
/// are empty, so listeners implement only what they need.
pub trait EstimateListener<E> {
    /// Fired once, before the robust loop begins.
    fn on_estimate_start(&mut self, _estimator: &E) {}

    /// Fired after each sampling attempt with the 1-based iteration index.
    fn on_estimate_next_iteration(&mut self, _estimator: &E, _iteration: usize) {}

    /// Fired whenever normalized progress advances by at least the
    /// configured progress delta; values never decrease within one call.
    fn on_estimate_progress_change(&mut self, _estimator: &E, _progress: Real) {}

    /// Fired once after a successful estimation; not fired on failure.
    fn on_estimate_end(&mut self, _estimator: &E) {}
}
