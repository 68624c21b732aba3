//! Value propagation along edges
//!
//! Each edge installs one watcher on its source block. When the watched
//! outputs change, the watcher copies the new values into the destination
//! inputs as one batch and runs the destination step, depth-first, before
//! the source's assignment returns.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use tracing::{debug, debug_span, info, warn};

use crate::block::{BlockId, BlockRef, StepContext};
use crate::error::{DagError, Result};
use crate::field::{FieldEvent, Value, WatchFn};
use crate::instrument::{self, Invocation, Phase};

use super::DagShared;

/// Why a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// Root of a run, or an upstream change
    Propagated,
    /// `execute_after_input()` on a paused block
    Resume,
}

/// Watcher for the edge `src -> dst`.
///
/// Holds the dag weakly: a dropped dag leaves inert watchers behind.
pub(crate) fn edge_watcher(shared: Weak<DagShared>, src: BlockId, dst: BlockRef) -> WatchFn {
    Arc::new(move |events: &[FieldEvent]| match shared.upgrade() {
        Some(shared) => shared.deliver(src, &dst, events),
        None => Ok(()),
    })
}

impl DagShared {
    /// A run reached a pausing block: nothing else runs until it ends.
    pub(crate) fn is_paused(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.paused.lock().is_some()
    }

    /// Copy changed outputs into `dst` and run its step.
    pub(crate) fn deliver(&self, src: BlockId, dst: &BlockRef, events: &[FieldEvent]) -> Result<()> {
        if self.stopper.is_stopped() {
            debug!(block = %dst.name(), "stopped, not propagating");
            return Ok(());
        }
        if self.is_paused() {
            debug!(block = %dst.name(), "paused, not propagating");
            return Ok(());
        }

        let values: Vec<(Arc<str>, Value)> = {
            let graph = self.graph.read();
            let Some(edge) = graph.edge(src, dst.id()) else {
                return Ok(());
            };
            events
                .iter()
                .flat_map(|event| {
                    edge.connections
                        .iter()
                        .filter(move |c| c.src_field() == &event.field)
                        .map(move |c| (Arc::clone(c.dst_field()), event.new.clone()))
                })
                .collect()
        };
        if values.is_empty() {
            return Ok(());
        }

        if let Err(e) = dst.update(values) {
            self.stopper.stop();
            return Err(e);
        }
        self.step(dst, Trigger::Propagated)
    }

    /// Run one block step through the hook.
    ///
    /// A pausing block reached by propagation runs `prepare()` and marks the
    /// dag paused; later deliveries and steps of the same run are skipped.
    /// Own-block failures set the stop flag, except validation failures.
    pub(crate) fn step(&self, block: &BlockRef, trigger: Trigger) -> Result<()> {
        if self.stopper.is_stopped() {
            debug!(block = %block.name(), "stopped, skipping step");
            return Ok(());
        }
        if self.is_paused() {
            debug!(block = %block.name(), "paused, skipping step");
            return Ok(());
        }

        let phase = if block.pauses_execution() && trigger == Trigger::Propagated {
            Phase::Prepare
        } else {
            Phase::Execute
        };

        let span = debug_span!("block", name = %block.name());
        let _enter = span.enter();

        let ctx = StepContext {
            stopper: self.stopper.clone(),
            config: Arc::clone(&self.config),
        };
        let invocation = Invocation {
            dag: &self.info,
            block: Some(block),
            phase,
        };
        let result = instrument::wrap(self.hook.as_ref(), &invocation, &mut || {
            block.run_work(phase, Some(&ctx))
        });

        match result {
            Ok(()) => {
                if phase == Phase::Prepare {
                    info!(block = %block.name(), "waiting for input");
                    *self.paused.lock() = Some(block.clone());
                }
                Ok(())
            }
            Err(e) => {
                if let DagError::Block { block: failed, source } = &e {
                    if failed == block.name() {
                        warn!(error = %source, "step failed");
                    }
                    if source.stops_dag() {
                        self.stopper.stop();
                    }
                }
                Err(e)
            }
        }
    }
}
