use std::cell::Cell;

/// Lifecycle of an estimator.
///
/// Mutation is legal in every state except [`Running`](EstimatorState::Running);
/// `estimate()` is the only transition trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimatorState {
    /// Readings or configuration are insufficient.
    #[default]
    Idle,
    /// A call to `estimate()` would be accepted.
    Ready,
    /// `estimate()` is executing; every mutator fails with `Locked`.
    Running,
    /// The last `estimate()` produced a result.
    Succeeded,
    /// The last `estimate()` raised.
    Failed,
}

/// Scoped lock: marks the state `Running` on construction and, unless the
/// estimator recorded success first, `Failed` on drop. Guarantees the lock
/// clears on every exit path, including early `?` returns.
pub(crate) struct RunGuard<'a> {
    state: &'a Cell<EstimatorState>,
}

impl<'a> RunGuard<'a> {
    pub(crate) fn new(state: &'a Cell<EstimatorState>) -> Self {
        state.set(EstimatorState::Running);
        Self { state }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.state.get() == EstimatorState::Running {
            self.state.set(EstimatorState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_marks_failed_unless_success_recorded() {
        let state = Cell::new(EstimatorState::Ready);
        {
            let _guard = RunGuard::new(&state);
            assert_eq!(state.get(), EstimatorState::Running);
        }
        assert_eq!(state.get(), EstimatorState::Failed);

        {
            let _guard = RunGuard::new(&state);
            state.set(EstimatorState::Succeeded);
        }
        assert_eq!(state.get(), EstimatorState::Succeeded);
    }
}
