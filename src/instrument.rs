//! Instrumentation hooks around block steps and whole-dag runs
//!
//! A hook is a decorator: it receives an [`Invocation`] describing the call
//! and a callable performing the real work, and must call it itself. The
//! invocation metadata is only for the hook; the wrapped call never sees it.
//!
//! A dag resolves its hook once when it is built: the hook given to the
//! builder, else the process-wide default, else none.

use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::block::BlockRef;
use crate::dag::DagInfo;
use crate::error::{DagError, Result};

/// What is being wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// A whole `Dag::execute()` (or resume) call
    Dag,
    Prepare,
    Execute,
}

/// Metadata handed to a hook alongside the wrapped call.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub dag: &'a DagInfo,
    /// `None` for `Phase::Dag`
    pub block: Option<&'a BlockRef>,
    pub phase: Phase,
}

impl Invocation<'_> {
    pub fn block_name(&self) -> Option<&str> {
        self.block.map(BlockRef::name)
    }
}

/// Decorator around every block step and every dag run.
///
/// Implementations call `call` exactly once and return its result, or
/// return an error of their own to abort the cascade. Errors the hook
/// raises itself reach the caller as `DagError::Instrumentation`.
pub trait InstrumentHook: Send + Sync {
    fn around(&self, invocation: &Invocation<'_>, call: &mut dyn FnMut() -> Result<()>)
        -> Result<()>;
}

static DEFAULT_HOOK: Lazy<RwLock<Option<Arc<dyn InstrumentHook>>>> =
    Lazy::new(|| RwLock::new(None));

/// Install the process-wide hook picked up by dags built afterwards.
pub fn set_default_hook(hook: Arc<dyn InstrumentHook>) {
    *DEFAULT_HOOK.write() = Some(hook);
}

pub fn clear_default_hook() {
    *DEFAULT_HOOK.write() = None;
}

pub fn default_hook() -> Option<Arc<dyn InstrumentHook>> {
    DEFAULT_HOOK.read().clone()
}

/// Run `call` through `hook`, or directly when there is none.
///
/// Errors from `call` pass through unchanged. Any other error the hook
/// returns is its own failure and surfaces as `DagError::Instrumentation`.
pub(crate) fn wrap(
    hook: Option<&Arc<dyn InstrumentHook>>,
    invocation: &Invocation<'_>,
    call: &mut dyn FnMut() -> Result<()>,
) -> Result<()> {
    let Some(hook) = hook else {
        return call();
    };

    let mut call_failed = false;
    let result = hook.around(invocation, &mut || {
        let result = call();
        call_failed = result.is_err();
        result
    });

    match result {
        Ok(()) => Ok(()),
        Err(e) if call_failed => Err(e),
        Err(e @ DagError::Instrumentation { .. }) => Err(e),
        Err(e) => Err(DagError::instrumentation(e.to_string())),
    }
}

/// Logs every wrapped call with its duration.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

impl InstrumentHook for TracingHook {
    fn around(
        &self,
        invocation: &Invocation<'_>,
        call: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        let block = invocation.block_name().unwrap_or("-");
        let start = Instant::now();
        let result = call();
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => debug!(
                dag = %invocation.dag.title,
                block,
                phase = ?invocation.phase,
                elapsed_ms,
                "call finished"
            ),
            Err(e) => warn!(
                dag = %invocation.dag.title,
                block,
                phase = ?invocation.phase,
                elapsed_ms,
                error = %e,
                "call failed"
            ),
        }
        result
    }
}
