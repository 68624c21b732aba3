//! Blocks: units of computation with typed input/output fields
//!
//! A block author implements [`Block`]; the engine works with [`BlockRef`],
//! a cheap shared handle owning the block's fields, state and work function.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::dag::Stopper;
use crate::error::{BlockError, DagError, Result};
use crate::field::{Direction, FieldSpec, FieldType, Params, Value, WatchFn, WatcherId};
use crate::instrument::Phase;

static BLOCK_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("block name regex is valid")
});

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_AUTO_NAME: AtomicU64 = AtomicU64::new(1);

/// A unit of computation.
///
/// `fields()` is read once when the block is wrapped in a [`BlockRef`].
/// `execute()` runs whenever connected inputs change; it reads inputs and
/// assigns outputs through [`BlockIo`]. Output assignments propagate to
/// downstream blocks before `set()` returns.
pub trait Block: Send + 'static {
    fn fields(&self) -> Vec<FieldSpec>;

    /// Called instead of `execute()` when a pausing block is reached.
    fn prepare(&mut self, _io: &mut BlockIo<'_>) -> std::result::Result<(), BlockError> {
        Ok(())
    }

    fn execute(&mut self, _io: &mut BlockIo<'_>) -> std::result::Result<(), BlockError> {
        Ok(())
    }

    /// Key used for config lookups; defaults to the Rust type name.
    fn key(&self) -> Option<&str> {
        None
    }

    fn doc(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution state reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockState {
    /// Built, not yet part of a dag
    Created,
    Ready,
    Executing,
    /// Pausing block ran `prepare()` and waits to be resumed
    Waiting,
    Error,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockState::Created => "CREATED",
            BlockState::Ready => "READY",
            BlockState::Executing => "EXECUTING",
            BlockState::Waiting => "WAITING",
            BlockState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// What a step can reach besides its own fields.
pub(crate) struct StepContext {
    pub stopper: Stopper,
    pub config: Arc<Config>,
}

struct BlockInner {
    id: BlockId,
    name: Arc<str>,
    key: String,
    doc: Option<String>,
    pause_execution: bool,
    params: Mutex<Params>,
    work: Mutex<Box<dyn Block>>,
    state: Mutex<BlockState>,
}

/// Shared handle to a block.
#[derive(Clone)]
pub struct BlockRef {
    inner: Arc<BlockInner>,
}

pub struct BlockBuilder {
    block: Box<dyn Block>,
    type_name: &'static str,
    name: Option<String>,
    key: Option<String>,
    pause_execution: bool,
}

impl BlockBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Make this an input block: when reached, `prepare()` runs and the dag
    /// pauses until `Dag::execute_after_input()` is called.
    pub fn pause_execution(mut self, pause: bool) -> Self {
        self.pause_execution = pause;
        self
    }

    pub fn build(self) -> Result<BlockRef> {
        let name = match self.name {
            Some(name) => name,
            None => auto_name(self.type_name),
        };
        if !BLOCK_NAME.is_match(&name) {
            return Err(DagError::InvalidName { name });
        }

        let name: Arc<str> = Arc::from(name);
        let params = Params::new(Arc::clone(&name), self.block.fields())?;
        let key = self
            .key
            .or_else(|| self.block.key().map(str::to_string))
            .unwrap_or_else(|| self.type_name.to_string());
        let doc = self.block.doc().map(str::to_string);

        Ok(BlockRef {
            inner: Arc::new(BlockInner {
                id: BlockId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
                name,
                key,
                doc,
                pause_execution: self.pause_execution,
                params: Mutex::new(params),
                work: Mutex::new(self.block),
                state: Mutex::new(BlockState::Created),
            }),
        })
    }
}

/// `TypeName00001`, `TypeName00002`, ...
fn auto_name(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let short = base.rsplit("::").next().unwrap_or(base);
    let n = NEXT_AUTO_NAME.fetch_add(1, Ordering::Relaxed);
    format!("{short}{n:05}")
}

impl BlockRef {
    /// Wrap a block under an auto-generated name.
    pub fn new<B: Block>(block: B) -> Result<Self> {
        Self::builder(block).build()
    }

    pub fn named<B: Block>(name: &str, block: B) -> Result<Self> {
        Self::builder(block).name(name).build()
    }

    pub fn builder<B: Block>(block: B) -> BlockBuilder {
        BlockBuilder {
            block: Box::new(block),
            type_name: std::any::type_name::<B>(),
            name: None,
            key: None,
            pause_execution: false,
        }
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.inner.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.inner.name)
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn doc(&self) -> Option<&str> {
        self.inner.doc.as_deref()
    }

    pub fn pauses_execution(&self) -> bool {
        self.inner.pause_execution
    }

    pub fn state(&self) -> BlockState {
        *self.inner.state.lock()
    }

    pub(crate) fn set_state(&self, state: BlockState) {
        *self.inner.state.lock() = state;
    }

    /// Same underlying block (identity, not name).
    pub fn ptr_eq(&self, other: &BlockRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn fields(&self) -> Vec<FieldSpec> {
        self.inner.params.lock().specs().to_vec()
    }

    pub fn field(&self, name: &str) -> Option<FieldSpec> {
        self.inner.params.lock().spec(name).cloned()
    }

    pub fn inputs(&self) -> Vec<FieldSpec> {
        self.fields_in(Direction::Input)
    }

    pub fn outputs(&self) -> Vec<FieldSpec> {
        self.fields_in(Direction::Output)
    }

    fn fields_in(&self, direction: Direction) -> Vec<FieldSpec> {
        self.inner
            .params
            .lock()
            .specs()
            .iter()
            .filter(|s| s.direction == direction)
            .cloned()
            .collect()
    }

    pub fn get(&self, field: &str) -> Result<Value> {
        self.inner.params.lock().get(field).cloned()
    }

    /// Read a field and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<T> {
        let (value, ty) = {
            let params = self.inner.params.lock();
            let value = params.get(field)?.clone();
            let ty = params.spec(field).map_or(FieldType::Any, |s| s.ty);
            (value, ty)
        };
        serde_json::from_value(value.clone()).map_err(|e| DagError::FieldValue {
            block: self.name().to_string(),
            field: field.to_string(),
            expected: ty,
            found: format!("{value} ({e})"),
        })
    }

    /// Current values of every field, in declaration order.
    pub fn values(&self) -> Vec<(Arc<str>, Value)> {
        self.inner.params.lock().snapshot()
    }

    /// Assign one field; watchers (and any downstream cascade) run before
    /// this returns.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let pending = self.inner.params.lock().set(field, value.into())?;
        pending.dispatch()
    }

    /// Assign several fields atomically; each watcher fires once.
    pub fn update<I, S>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let pending = self.inner.params.lock().update(values)?;
        pending.dispatch()
    }

    /// Run the block directly, outside any dag.
    ///
    /// Every input must be given. Returns the output values afterwards.
    pub fn call<I, S>(&self, inputs: I) -> Result<serde_json::Map<String, Value>>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let inputs: Vec<(S, Value)> = inputs.into_iter().collect();
        let given: Vec<&str> = inputs.iter().map(|(name, _)| name.as_ref()).collect();

        for name in &given {
            match self.field(name) {
                None => {
                    return Err(DagError::UnknownField {
                        block: self.name().to_string(),
                        field: name.to_string(),
                    })
                }
                Some(spec) if !spec.is_input() => {
                    return Err(DagError::WrongDirection {
                        block: self.name().to_string(),
                        field: name.to_string(),
                        expected: Direction::Input,
                    })
                }
                Some(_) => {}
            }
        }

        let declared = self.inputs();
        let missing: Vec<&str> = declared
            .iter()
            .map(|s| s.name.as_ref())
            .filter(|n| !given.contains(n))
            .collect();
        if !missing.is_empty() {
            return Err(DagError::MissingInputs {
                block: self.name().to_string(),
                missing: missing.join(", "),
            });
        }

        self.update(inputs)?;
        self.run_work(Phase::Execute, None)?;

        let params = self.inner.params.lock();
        Ok(params
            .specs()
            .iter()
            .filter(|s| s.is_output())
            .filter_map(|s| {
                params
                    .get(&s.name)
                    .ok()
                    .map(|v| (s.name.to_string(), v.clone()))
            })
            .collect())
    }

    pub(crate) fn watch(&self, fields: &[Arc<str>], callback: WatchFn) -> Result<WatcherId> {
        self.inner.params.lock().watch(fields, callback)
    }

    pub(crate) fn watch_more(&self, id: WatcherId, fields: &[Arc<str>]) -> Result<()> {
        self.inner.params.lock().watch_more(id, fields)
    }

    /// Run `prepare()` or `execute()` with state bookkeeping.
    ///
    /// Any failure moves the block to `Error`. An engine error passed back
    /// through `BlockIo` (e.g. a downstream failure) is returned unchanged.
    pub(crate) fn run_work(&self, phase: Phase, ctx: Option<&StepContext>) -> Result<()> {
        let mut work = self
            .inner
            .work
            .try_lock()
            .ok_or_else(|| DagError::Reentrant {
                block: self.name().to_string(),
            })?;

        self.set_state(BlockState::Executing);
        debug!(block = %self.name(), ?phase, "step started");

        let mut io = BlockIo { block: self, ctx };
        let result = match phase {
            Phase::Prepare => work.prepare(&mut io),
            _ => work.execute(&mut io),
        };
        drop(work);

        match result {
            Ok(()) => {
                let next = if phase == Phase::Prepare {
                    BlockState::Waiting
                } else {
                    BlockState::Ready
                };
                self.set_state(next);
                Ok(())
            }
            Err(BlockError::Cascade(err)) => {
                self.set_state(BlockState::Error);
                Err(*err)
            }
            Err(source) => {
                self.set_state(BlockState::Error);
                Err(DagError::Block {
                    block: self.name().to_string(),
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRef")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for BlockRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for BlockRef {}

impl std::hash::Hash for BlockRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

/// A block's view of itself while its step runs.
pub struct BlockIo<'a> {
    block: &'a BlockRef,
    ctx: Option<&'a StepContext>,
}

impl<'a> BlockIo<'a> {
    pub fn name(&self) -> &str {
        self.block.name()
    }

    pub fn get(&self, field: &str) -> Result<Value> {
        self.block.get(field)
    }

    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<T> {
        self.block.get_as(field)
    }

    /// Assign an output. Downstream blocks run before this returns.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        self.block.set(field, value)
    }

    /// Assign several outputs as one batch.
    pub fn update<I, S>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        self.block.update(values)
    }

    /// Whether the owning dag was asked to stop. Long steps may poll this.
    pub fn is_stopped(&self) -> bool {
        self.ctx.is_some_and(|c| c.stopper.is_stopped())
    }

    /// The owning dag's stop handle (`None` when called directly).
    pub fn stopper(&self) -> Option<Stopper> {
        self.ctx.map(|c| c.stopper.clone())
    }

    /// Look up `key` in this block's config section.
    pub fn config_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.ctx {
            Some(ctx) => ctx.config.value(self.block.key(), key),
            None => Ok(None),
        }
    }
}
