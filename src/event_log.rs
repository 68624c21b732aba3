//! Event log for dag execution
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: dag-level and block-level start/finish/failure
//! - EventLog: thread-safe, append-only log
//! - EventLogHook: instrumentation hook that fills an EventLog

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::instrument::{InstrumentHook, Invocation, Phase};

/// Single event in the execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// Uses Arc<str> for block names to enable zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // DAG LEVEL
    // ═══════════════════════════════════════════
    DagStarted {
        dag: Arc<str>,
    },
    DagCompleted {
        dag: Arc<str>,
        duration_ms: u64,
    },
    DagFailed {
        dag: Arc<str>,
        error: String,
        duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // BLOCK LEVEL
    // ═══════════════════════════════════════════
    BlockStarted {
        block: Arc<str>,
        phase: String,
    },
    BlockCompleted {
        block: Arc<str>,
        phase: String,
        duration_ms: u64,
    },
    BlockFailed {
        block: Arc<str>,
        phase: String,
        error: String,
        duration_ms: u64,
    },
}

impl EventKind {
    /// Extract the block name if the event is block-related
    pub fn block(&self) -> Option<&str> {
        match self {
            Self::BlockStarted { block, .. }
            | Self::BlockCompleted { block, .. }
            | Self::BlockFailed { block, .. } => Some(block),
            Self::DagStarted { .. } | Self::DagCompleted { .. } | Self::DagFailed { .. } => None,
        }
    }

    pub fn is_dag_event(&self) -> bool {
        matches!(
            self,
            Self::DagStarted { .. } | Self::DagCompleted { .. } | Self::DagFailed { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn filter_block(&self, block: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.block() == Some(block))
            .collect()
    }

    pub fn dag_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_dag_event())
            .collect()
    }

    /// Names of blocks in the order their steps completed.
    pub fn completed_blocks(&self) -> Vec<Arc<str>> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::BlockCompleted { block, .. } => Some(Arc::clone(block)),
                _ => None,
            })
            .collect()
    }

    /// Serialize to JSON for debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}

/// Records every wrapped call into an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct EventLogHook {
    log: EventLog,
}

impl EventLogHook {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

fn phase_name(phase: Phase) -> String {
    match phase {
        Phase::Dag => "dag",
        Phase::Prepare => "prepare",
        Phase::Execute => "execute",
    }
    .to_string()
}

impl InstrumentHook for EventLogHook {
    fn around(
        &self,
        invocation: &Invocation<'_>,
        call: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        let start = Instant::now();
        let dag: Arc<str> = Arc::from(invocation.dag.title.as_str());

        match invocation.block {
            None => {
                self.log.emit(EventKind::DagStarted {
                    dag: Arc::clone(&dag),
                });
                let result = call();
                let duration_ms = start.elapsed().as_millis() as u64;
                self.log.emit(match &result {
                    Ok(()) => EventKind::DagCompleted { dag, duration_ms },
                    Err(e) => EventKind::DagFailed {
                        dag,
                        error: e.to_string(),
                        duration_ms,
                    },
                });
                result
            }
            Some(block) => {
                let name = block.name_arc();
                let phase = phase_name(invocation.phase);
                self.log.emit(EventKind::BlockStarted {
                    block: Arc::clone(&name),
                    phase: phase.clone(),
                });
                let result = call();
                let duration_ms = start.elapsed().as_millis() as u64;
                self.log.emit(match &result {
                    Ok(()) => EventKind::BlockCompleted {
                        block: name,
                        phase,
                        duration_ms,
                    },
                    Err(e) => EventKind::BlockFailed {
                        block: name,
                        phase,
                        error: e.to_string(),
                        duration_ms,
                    },
                });
                result
            }
        }
    }
}
