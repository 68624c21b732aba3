//! # Instrumentation Hook Tests
//!
//! - EventLogHook records dag and block calls in call order
//! - a failing hook aborts the cascade
//! - the process-wide default is resolved once, when a dag is built

mod common;

use std::sync::Arc;

use blockdag::{
    clear_default_hook, set_default_hook, BlockRef, Dag, DagError, EventKind, EventLog,
    EventLogHook, InstrumentHook, Invocation, Phase,
};
use common::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serial_test::serial;

fn logged_dag(title: &str) -> (Dag, EventLog) {
    let log = EventLog::new();
    let dag = Dag::builder()
        .title(title)
        .hook(Arc::new(EventLogHook::new(log.clone())))
        .build();
    (dag, log)
}

fn started(log: &EventLog) -> Vec<String> {
    log.events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::BlockStarted { block, .. } => Some(block.to_string()),
            _ => None,
        })
        .collect()
}

/// Refuses to run steps of one block.
struct Refuse {
    block: &'static str,
}

impl InstrumentHook for Refuse {
    fn around(
        &self,
        invocation: &Invocation<'_>,
        call: &mut dyn FnMut() -> blockdag::Result<()>,
    ) -> blockdag::Result<()> {
        if invocation.block_name() == Some(self.block) {
            return Err(DagError::instrumentation(format!("refusing {}", self.block)));
        }
        call()
    }
}

/// Records every invocation's phase and block name.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(Phase, Option<String>)>>,
}

impl InstrumentHook for Recorder {
    fn around(
        &self,
        invocation: &Invocation<'_>,
        call: &mut dyn FnMut() -> blockdag::Result<()>,
    ) -> blockdag::Result<()> {
        self.calls
            .lock()
            .push((invocation.phase, invocation.block_name().map(str::to_string)));
        call()
    }
}

// ============================================================================
// EVENT LOG
// ============================================================================

#[test]
fn event_log_wraps_dag_and_every_step() {
    let (s, _) = source("s", 1);
    let (b, _) = inc("b");
    let (c, _) = sink("c");
    let (dag, log) = logged_dag("logged");
    dag.connect(&s, &b, [("out_x", "in_x")]).unwrap();
    dag.connect(&b, &c, [("out_y", "in_y")]).unwrap();

    dag.execute().unwrap();

    assert_eq!(started(&log), vec!["s", "b", "c"]);
    // nested steps finish innermost first
    let completed: Vec<String> = log
        .completed_blocks()
        .iter()
        .map(|b| b.to_string())
        .collect();
    assert_eq!(completed, vec!["c", "b", "s"]);

    let dag_events = log.dag_events();
    assert_eq!(dag_events.len(), 2);
    assert_eq!(
        dag_events[0].kind,
        EventKind::DagStarted {
            dag: "logged".into()
        }
    );
    assert!(matches!(dag_events[1].kind, EventKind::DagCompleted { .. }));
}

#[test]
fn event_log_records_failures() {
    let (s, _) = source("s", 1);
    let f = BlockRef::named(
        "f",
        Fail {
            error: || blockdag::BlockError::failed("boom"),
        },
    )
    .unwrap();
    let (dag, log) = logged_dag("failing");
    dag.connect(&s, &f, [("out_x", "in_x")]).unwrap();

    assert!(dag.execute().is_err());

    let failed: Vec<_> = log
        .filter_block("f")
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::BlockFailed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        log.dag_events().last().map(|e| &e.kind),
        Some(EventKind::DagFailed { .. })
    ));
}

#[test]
fn assignments_outside_execute_are_wrapped_per_step() {
    let (a, _) = source("a", 0);
    let (b, _) = inc("b");
    let (dag, log) = logged_dag("direct");
    dag.connect(&a, &b, [("out_x", "in_x")]).unwrap();

    a.set("out_x", 2).unwrap();

    assert_eq!(started(&log), vec!["b"]);
    assert!(log.dag_events().is_empty());
}

// ============================================================================
// HOOK FAILURE
// ============================================================================

#[test]
fn failing_hook_aborts_cascade() {
    let (s, _) = source("s", 1);
    let (b, b_steps) = inc("b");
    let (c, c_steps) = sink("c");
    let dag = Dag::builder()
        .title("refused")
        .hook(Arc::new(Refuse { block: "b" }))
        .build();
    dag.connect(&s, &b, [("out_x", "in_x")]).unwrap();
    dag.connect(&b, &c, [("out_y", "in_y")]).unwrap();

    let err = dag.execute().unwrap_err();
    assert!(matches!(err, DagError::Instrumentation { .. }));
    assert_eq!(b_steps.get(), 0);
    assert_eq!(c_steps.get(), 0);
    assert!(!dag.is_stopped());
}

#[test]
fn pausing_block_is_wrapped_as_prepare() {
    let recorder = Arc::new(Recorder::default());
    let ask = BlockRef::builder(PairOut)
        .name("ask")
        .pause_execution(true)
        .build()
        .unwrap();
    let b = BlockRef::named("b", PairIn { seen: Arc::default() }).unwrap();
    let dag = Dag::builder()
        .title("phases")
        .hook(recorder.clone())
        .build();
    dag.connect(&ask, &b, [("out_p", "in_p")]).unwrap();

    dag.execute().unwrap();
    dag.execute_after_input(&ask).unwrap();

    assert_eq!(
        *recorder.calls.lock(),
        vec![
            (Phase::Dag, None),
            (Phase::Prepare, Some("ask".to_string())),
            (Phase::Dag, None),
            (Phase::Execute, Some("ask".to_string())),
        ]
    );
}

// ============================================================================
// DEFAULT HOOK
// ============================================================================

#[test]
#[serial]
fn default_hook_is_resolved_at_build_time() {
    let log = EventLog::new();
    set_default_hook(Arc::new(EventLogHook::new(log.clone())));
    let with_default = Dag::new("default");
    let opted_out = Dag::builder().title("opted-out").no_hook().build();
    clear_default_hook();
    let after_clear = Dag::new("after-clear");

    assert!(with_default.has_hook());
    assert!(!opted_out.has_hook());
    assert!(!after_clear.has_hook());

    let (s, _) = source("s", 1);
    let (c, _) = sink("c");
    with_default.connect(&s, &c, [("out_x", "in_y")]).unwrap();
    with_default.execute().unwrap();

    assert_eq!(started(&log), vec!["s", "c"]);
}
