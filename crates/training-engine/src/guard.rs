//! Global training guard
//!
//! One process-wide `{idle, running}` cell. `try_begin` is the only way in
//! and hands out an RAII permit; dropping the permit is the only way out,
//! so release happens exactly once on every path, including panics inside
//! a training run.

use std::sync::Arc;

use parking_lot::Mutex;

/// Shared handle to the process-wide training state
///
/// Cloning is cheap and every clone observes the same cell, so the
/// orchestrator, the scheduler, and the API boundary can all consult one
/// guard.
#[derive(Clone, Default)]
pub struct TrainingGuard {
    active: Arc<Mutex<bool>>,
}

impl TrainingGuard {
    /// Creates a guard in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically transitions idle → running.
    ///
    /// Returns `None` when a training run already holds the permit; the
    /// caller must report contention without side effects.
    pub fn try_begin(&self) -> Option<TrainingPermit> {
        let mut active = self.active.lock();
        if *active {
            return None;
        }
        *active = true;
        Some(TrainingPermit {
            guard: self.clone(),
        })
    }

    /// Whether a training run is currently active.
    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }
}

/// Exclusive permission to run one training job
///
/// Dropping the permit resets the guard to idle.
pub struct TrainingPermit {
    guard: TrainingGuard,
}

impl Drop for TrainingPermit {
    fn drop(&mut self) {
        *self.guard.active.lock() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention() {
        let guard = TrainingGuard::new();
        assert!(!guard.is_active());

        let permit = guard.try_begin().expect("first acquire succeeds");
        assert!(guard.is_active());

        // a second caller, through a clone, is refused
        let other = guard.clone();
        assert!(other.try_begin().is_none());

        drop(permit);
        assert!(!guard.is_active());
        assert!(other.try_begin().is_some());
    }

    #[test]
    fn test_permit_released_on_panic() {
        let guard = TrainingGuard::new();
        let worker = guard.clone();

        let handle = std::thread::spawn(move || {
            let _permit = worker.try_begin().expect("acquire in worker");
            panic!("training blew up");
        });
        assert!(handle.join().is_err());

        // unwinding dropped the permit
        assert!(!guard.is_active());
    }
}
