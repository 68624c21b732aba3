//! Dag: wiring, ordering and execution of blocks
//!
//! - `graph`: nodes, edges, topological order, layers, components
//! - `validate`: connection checks against a staged graph
//! - `propagate`: per-edge watchers and block steps
//! - `run`: stop flag, re-entry guard, outcomes
//!
//! A dag is a cheap handle: clones share the same blocks and run state.

mod graph;
mod propagate;
mod run;
mod validate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::block::{BlockRef, BlockState};
use crate::config::Config;
use crate::connection::Connection;
use crate::error::{DagError, Result};
use crate::field::FieldSpec;
use crate::instrument::{self, InstrumentHook, Invocation, Phase};

use graph::BlockGraph;
use propagate::{edge_watcher, Trigger};
use run::RunGuard;

pub use run::{Outcome, RunState, Stopper};

/// Descriptive metadata carried by a dag and handed to hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DagInfo {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
}

impl DagInfo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Author {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Connections from one block to another, validated and added as a unit.
#[derive(Debug, Clone)]
pub struct Link {
    pub src: BlockRef,
    pub dst: BlockRef,
    pub connections: Vec<Connection>,
}

impl Link {
    pub fn new<I, C>(src: &BlockRef, dst: &BlockRef, connections: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Connection>,
    {
        Self {
            src: src.clone(),
            dst: dst.clone(),
            connections: connections.into_iter().map(Into::into).collect(),
        }
    }
}

enum HookChoice {
    Default,
    Explicit(Arc<dyn InstrumentHook>),
    Disabled,
}

pub struct DagBuilder {
    info: DagInfo,
    hook: HookChoice,
    config: Config,
}

impl DagBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.info.title = title.into();
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.info.doc = Some(doc.into());
        self
    }

    pub fn site(mut self, site: impl Into<String>) -> Self {
        self.info.site = Some(site.into());
        self
    }

    pub fn author(mut self, name: impl Into<String>, email: Option<&str>) -> Self {
        self.info.author = Some(Author {
            name: name.into(),
            email: email.map(str::to_string),
        });
        self
    }

    /// Wrap every step in `hook` instead of the process-wide default.
    pub fn hook(mut self, hook: Arc<dyn InstrumentHook>) -> Self {
        self.hook = HookChoice::Explicit(hook);
        self
    }

    /// Run without any hook, ignoring the process-wide default.
    pub fn no_hook(mut self) -> Self {
        self.hook = HookChoice::Disabled;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Dag {
        let hook = match self.hook {
            HookChoice::Default => instrument::default_hook(),
            HookChoice::Explicit(hook) => Some(hook),
            HookChoice::Disabled => None,
        };

        Dag {
            shared: Arc::new(DagShared {
                info: self.info,
                graph: RwLock::new(BlockGraph::default()),
                running: AtomicBool::new(false),
                stopper: Stopper::default(),
                hook,
                config: Arc::new(self.config),
                paused: Mutex::new(None),
            }),
        }
    }
}

pub(crate) struct DagShared {
    info: DagInfo,
    graph: RwLock<BlockGraph>,
    running: AtomicBool,
    stopper: Stopper,
    hook: Option<Arc<dyn InstrumentHook>>,
    config: Arc<Config>,
    /// Block that paused the last run, if any
    paused: Mutex<Option<BlockRef>>,
}

/// A directed acyclic graph of connected blocks.
#[derive(Clone)]
pub struct Dag {
    shared: Arc<DagShared>,
}

impl Dag {
    /// A dag with default settings and the process-wide hook.
    pub fn new(title: impl Into<String>) -> Self {
        Self::builder().title(title).build()
    }

    pub fn builder() -> DagBuilder {
        DagBuilder {
            info: DagInfo::default(),
            hook: HookChoice::Default,
            config: Config::default(),
        }
    }

    pub fn info(&self) -> &DagInfo {
        &self.shared.info
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn has_hook(&self) -> bool {
        self.shared.hook.is_some()
    }

    // ═══════════════════════════════════════════
    // WIRING
    // ═══════════════════════════════════════════

    /// Connect outputs of `src` to inputs of `dst`.
    ///
    /// A connection given as a single name links equally named fields.
    /// On error the dag is left unchanged.
    pub fn connect<I, C>(&self, src: &BlockRef, dst: &BlockRef, connections: I) -> Result<()>
    where
        I: IntoIterator<Item = C>,
        C: Into<Connection>,
    {
        self.connect_all([Link::new(src, dst, connections)])
    }

    /// Add several links at once: either all of them are added or none.
    pub fn connect_all(&self, links: impl IntoIterator<Item = Link>) -> Result<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(DagError::MutationWhileRunning);
        }
        let links: Vec<Link> = links.into_iter().collect();

        let mut graph = self.shared.graph.write();
        let mut staged = graph.clone();
        for link in &links {
            validate::stage_link(&mut staged, link)?;
        }
        if let Err(remaining) = staged.refresh_order() {
            let names: Vec<&str> = remaining
                .iter()
                .filter_map(|id| staged.node(*id))
                .map(BlockRef::name)
                .collect();
            return Err(DagError::Cycle {
                src: names.first().copied().unwrap_or_default().to_string(),
                dst: names.last().copied().unwrap_or_default().to_string(),
                path: names.join(" -> "),
            });
        }

        self.install_watchers(&mut staged)?;

        for node in staged.nodes() {
            if node.state() == BlockState::Created {
                node.set_state(BlockState::Ready);
            }
        }
        *graph = staged;

        for link in &links {
            debug!(
                src = %link.src.name(),
                dst = %link.dst.name(),
                connections = link.connections.len(),
                "connected"
            );
        }
        Ok(())
    }

    /// One watcher per edge, covering every source field the edge reads.
    fn install_watchers(&self, staged: &mut BlockGraph) -> Result<()> {
        for edge in staged.edges_mut() {
            let fields = edge.src_fields();
            match edge.watcher {
                Some(id) => edge.src.watch_more(id, &fields)?,
                None => {
                    let callback =
                        edge_watcher(Arc::downgrade(&self.shared), edge.src.id(), edge.dst.clone());
                    edge.watcher = Some(edge.src.watch(&fields, callback)?);
                }
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════
    // EXECUTION
    // ═══════════════════════════════════════════

    /// Run every source block in topological order.
    ///
    /// Downstream blocks run as their inputs change. Returns early when the
    /// stop flag is set or a pausing block is reached.
    pub fn execute(&self) -> Result<Outcome> {
        let shared = &self.shared;
        let _guard = RunGuard::acquire(&shared.running)?;

        let roots: Vec<BlockRef> = {
            let graph = shared.graph.read();
            if graph.is_empty() {
                return Err(DagError::NothingToExecute);
            }
            graph
                .roots()
                .into_iter()
                .filter_map(|id| graph.node(id).cloned())
                .collect()
        };

        info!(dag = %shared.info.title, roots = roots.len(), "dag started");
        let outcome = self.run(|| {
            for root in &roots {
                if shared.stopper.is_stopped() {
                    return Ok(());
                }
                shared.step(root, Trigger::Propagated)?;
                if shared.is_paused() {
                    return Ok(());
                }
            }
            Ok(())
        })?;
        info!(dag = %shared.info.title, ?outcome, "dag finished");
        Ok(outcome)
    }

    /// Resume a run paused at `block`: runs its `execute()` and everything
    /// downstream of it.
    pub fn execute_after_input(&self, block: &BlockRef) -> Result<Outcome> {
        let shared = &self.shared;
        if !shared.graph.read().contains(block.id()) {
            return Err(DagError::UnknownBlock {
                block: block.name().to_string(),
            });
        }
        if !block.pauses_execution() || block.state() != BlockState::Waiting {
            return Err(DagError::NotPaused {
                block: block.name().to_string(),
            });
        }

        let _guard = RunGuard::acquire(&shared.running)?;
        info!(dag = %shared.info.title, block = %block.name(), "resuming after input");
        self.run(|| shared.step(block, Trigger::Resume))
    }

    /// Wrap one run in the dag-level hook and work out how it ended.
    fn run(&self, mut body: impl FnMut() -> Result<()>) -> Result<Outcome> {
        let shared = &self.shared;
        *shared.paused.lock() = None;

        let invocation = Invocation {
            dag: &shared.info,
            block: None,
            phase: Phase::Dag,
        };
        instrument::wrap(shared.hook.as_ref(), &invocation, &mut body)?;

        if let Some(block) = shared.paused.lock().take() {
            return Ok(Outcome::Paused(block));
        }
        if shared.stopper.is_stopped() {
            return Ok(Outcome::Stopped);
        }
        Ok(Outcome::Completed)
    }

    /// Ask the dag to stop: no further steps start until `unstop()`.
    pub fn stop(&self) {
        info!(dag = %self.shared.info.title, "stop requested");
        self.shared.stopper.stop();
    }

    pub fn unstop(&self) {
        self.shared.stopper.unstop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopper.is_stopped()
    }

    /// Handle for stopping this dag from another thread.
    pub fn stopper(&self) -> Stopper {
        self.shared.stopper.clone()
    }

    /// `Running` while an `execute()` or `execute_after_input()` is in
    /// progress, `Stopped` otherwise. See `is_stopped()` for the stop flag.
    pub fn run_state(&self) -> RunState {
        if self.is_running() {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    /// Whether an `execute()` or `execute_after_input()` call is in progress.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    // ═══════════════════════════════════════════
    // INSPECTION
    // ═══════════════════════════════════════════

    /// Every block, in topological order.
    pub fn sorted(&self) -> Vec<BlockRef> {
        let graph = self.shared.graph.read();
        graph
            .order()
            .iter()
            .filter_map(|id| graph.node(*id).cloned())
            .collect()
    }

    /// Blocks in insertion order.
    pub fn blocks(&self) -> Vec<BlockRef> {
        self.shared.graph.read().nodes().to_vec()
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockRef> {
        self.shared.graph.read().by_name(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.graph.read().nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.graph.read().is_empty()
    }

    /// Blocks grouped by longest distance from a source block.
    pub fn layers(&self) -> Vec<Vec<BlockRef>> {
        let graph = self.shared.graph.read();
        graph
            .layers()
            .into_iter()
            .map(|layer| {
                layer
                    .into_iter()
                    .filter_map(|id| graph.node(id).cloned())
                    .collect()
            })
            .collect()
    }

    /// Disconnected sub-dags, each in topological order.
    pub fn components(&self) -> Vec<Vec<BlockRef>> {
        let graph = self.shared.graph.read();
        graph
            .components()
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .filter_map(|id| graph.node(id).cloned())
                    .collect()
            })
            .collect()
    }

    /// Source block and field feeding `block.field`, if connected.
    pub fn source_of(&self, block: &BlockRef, field: &str) -> Option<(BlockRef, String)> {
        let graph = self.shared.graph.read();
        let (src, src_field) = graph.incoming_source(block.id(), &Arc::from(field))?;
        graph
            .node(src)
            .map(|b| (b.clone(), src_field.to_string()))
    }

    /// Serializable summary of blocks and connections.
    pub fn describe(&self) -> DagDescription {
        let graph = self.shared.graph.read();
        let ranks = graph.ranks();

        let blocks = graph
            .order()
            .iter()
            .filter_map(|id| graph.node(*id))
            .map(|b| BlockSummary {
                name: b.name().to_string(),
                key: b.key().to_string(),
                doc: b.doc().map(str::to_string),
                state: b.state(),
                rank: ranks.get(&b.id()).copied().unwrap_or(0),
                pause_execution: b.pauses_execution(),
                fields: b.fields(),
            })
            .collect();

        let connections = graph
            .edges()
            .iter()
            .map(|e| EdgeSummary {
                src: e.src.name().to_string(),
                dst: e.dst.name().to_string(),
                connections: e.connections.clone(),
            })
            .collect();

        DagDescription {
            dag: self.shared.info.clone(),
            blocks,
            connections,
        }
    }
}

impl std::fmt::Debug for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dag")
            .field("title", &self.shared.info.title)
            .field("blocks", &self.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DagDescription {
    pub dag: DagInfo,
    /// In topological order
    pub blocks: Vec<BlockSummary>,
    /// In registration order
    pub connections: Vec<EdgeSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    pub name: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    pub state: BlockState,
    pub rank: usize,
    pub pause_execution: bool,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeSummary {
    pub src: String,
    pub dst: String,
    pub connections: Vec<Connection>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockIo};
    use crate::error::BlockError;
    use crate::field::FieldType;
    use serde_json::json;

    struct Pass;

    impl Block for Pass {
        fn fields(&self) -> Vec<FieldSpec> {
            vec![
                FieldSpec::input("in_v", FieldType::Any),
                FieldSpec::output("out_v", FieldType::Any),
            ]
        }

        fn execute(&mut self, io: &mut BlockIo<'_>) -> std::result::Result<(), BlockError> {
            let v = io.get("in_v")?;
            io.set("out_v", v)?;
            Ok(())
        }
    }

    fn pass(name: &str) -> BlockRef {
        BlockRef::named(name, Pass).unwrap()
    }

    fn dag() -> Dag {
        Dag::builder().title("t").no_hook().build()
    }

    #[test]
    fn connect_marks_blocks_ready() {
        let (a, b) = (pass("a"), pass("b"));
        let dag = dag();
        dag.connect(&a, &b, [("out_v", "in_v")]).unwrap();
        assert_eq!(a.state(), BlockState::Ready);
        assert_eq!(b.state(), BlockState::Ready);
        assert_eq!(dag.len(), 2);
    }

    #[test]
    fn repeated_connect_extends_one_watcher() {
        let (a, b) = (pass("a"), pass("b"));
        let dag = dag();
        dag.connect(&a, &b, [("out_v", "in_v")]).unwrap();
        let err = dag.connect(&a, &b, [("out_v", "in_v")]).unwrap_err();
        assert!(matches!(err, DagError::DuplicateConnection { .. }));
        assert_eq!(dag.describe().connections.len(), 1);
    }

    #[test]
    fn failed_connect_all_leaves_dag_unchanged() {
        let (a, b, c) = (pass("a"), pass("b"), pass("c"));
        let dag = dag();
        dag.connect(&a, &b, [("out_v", "in_v")]).unwrap();

        let err = dag
            .connect_all([
                Link::new(&b, &c, [("out_v", "in_v")]),
                Link::new(&c, &a, [("out_v", "in_v")]),
            ])
            .unwrap_err();
        assert!(matches!(err, DagError::Cycle { .. }));
        assert_eq!(dag.len(), 2);
        assert!(dag.block_by_name("c").is_none());
        assert_eq!(c.state(), BlockState::Created);
    }

    #[test]
    fn values_flow_downstream() {
        let (a, b) = (pass("a"), pass("b"));
        let dag = dag();
        dag.connect(&a, &b, [("out_v", "in_v")]).unwrap();

        a.set("in_v", json!([1, 2])).unwrap();
        dag.execute().unwrap();
        assert_eq!(b.get("out_v").unwrap(), json!([1, 2]));
    }

    #[test]
    fn source_of_reports_feeding_field() {
        let (a, b) = (pass("a"), pass("b"));
        let dag = dag();
        dag.connect(&a, &b, [("out_v", "in_v")]).unwrap();

        let (src, field) = dag.source_of(&b, "in_v").unwrap();
        assert_eq!(src, a);
        assert_eq!(field, "out_v");
        assert!(dag.source_of(&a, "in_v").is_none());
    }

    #[test]
    fn describe_serializes() {
        let (a, b) = (pass("a"), pass("b"));
        let dag = Dag::builder()
            .title("described")
            .author("someone", Some("someone@example.com"))
            .no_hook()
            .build();
        dag.connect(&a, &b, [("out_v", "in_v")]).unwrap();

        let json = serde_json::to_value(dag.describe()).unwrap();
        assert_eq!(json["dag"]["title"], "described");
        assert_eq!(json["blocks"][1]["name"], "b");
        assert_eq!(json["blocks"][1]["rank"], 1);
        assert_eq!(json["blocks"][0]["state"], "READY");
        assert_eq!(json["connections"][0]["connections"][0]["src"], "out_v");
    }

    #[test]
    fn empty_dag_has_nothing_to_execute() {
        assert!(matches!(dag().execute(), Err(DagError::NothingToExecute)));
    }

    #[test]
    fn dropped_dag_leaves_inert_watchers() {
        let (a, b) = (pass("a"), pass("b"));
        {
            let dag = dag();
            dag.connect(&a, &b, [("out_v", "in_v")]).unwrap();
        }
        a.set("out_v", 5).unwrap();
        assert_eq!(b.get("in_v").unwrap(), json!(null));
    }
}
