//! Run control: stop flag, re-entry guard, outcomes

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::block::BlockRef;
use crate::error::{DagError, Result};

/// Shared stop flag of one dag.
///
/// Once set, no further block steps start until it is cleared. Steps
/// already running finish normally.
#[derive(Clone, Default)]
pub struct Stopper(Arc<AtomicBool>);

impl Stopper {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn unstop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Stopper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stopper").field(&self.is_stopped()).finish()
    }
}

/// Whether steps may currently start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    Stopped,
}

/// How an `execute()` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every reachable step ran
    Completed,
    /// The stop flag was set before the run finished
    Stopped,
    /// A pausing block ran `prepare()`; resume with `execute_after_input()`
    Paused(BlockRef),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    pub fn paused_block(&self) -> Option<&BlockRef> {
        match self {
            Outcome::Paused(block) => Some(block),
            _ => None,
        }
    }
}

/// Held for the duration of one run; a second concurrent run is refused.
pub(crate) struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    pub fn acquire(running: &'a AtomicBool) -> Result<Self> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DagError::AlreadyRunning)?;
        Ok(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopper_clones_share_the_flag() {
        let stopper = Stopper::default();
        let other = stopper.clone();
        other.stop();
        assert!(stopper.is_stopped());
        stopper.unstop();
        assert!(!other.is_stopped());
    }

    #[test]
    fn run_guard_refuses_second_holder() {
        let running = AtomicBool::new(false);
        let guard = RunGuard::acquire(&running).unwrap();
        assert!(matches!(
            RunGuard::acquire(&running),
            Err(DagError::AlreadyRunning)
        ));
        drop(guard);
        assert!(RunGuard::acquire(&running).is_ok());
    }
}
