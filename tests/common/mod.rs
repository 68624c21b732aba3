//! Shared test blocks

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use blockdag::{
    Block, BlockError, BlockIo, BlockRef, Dag, DagError, FieldSpec, FieldType, Value,
};
use parking_lot::Mutex;

/// Step counter shared between a block and the test.
#[derive(Clone, Default)]
pub struct Steps(Arc<AtomicUsize>);

impl Steps {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// BLOCKS
// ============================================================================

/// No inputs; `execute()` emits `value` on `out_x`.
pub struct Source {
    pub value: i64,
    pub steps: Steps,
}

impl Block for Source {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![FieldSpec::output("out_x", FieldType::Int)]
    }

    fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        self.steps.hit();
        io.set("out_x", self.value)?;
        Ok(())
    }
}

/// `out_y = in_x + 1`
pub struct Inc {
    pub steps: Steps,
}

impl Block for Inc {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::input("in_x", FieldType::Int).with_default(0),
            FieldSpec::output("out_y", FieldType::Int),
        ]
    }

    fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        self.steps.hit();
        let x: i64 = io.get_as("in_x")?;
        io.set("out_y", x + 1)?;
        Ok(())
    }
}

/// Terminal block with one input.
pub struct Sink {
    pub steps: Steps,
}

impl Block for Sink {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![FieldSpec::input("in_y", FieldType::Int)]
    }

    fn execute(&mut self, _io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        self.steps.hit();
        Ok(())
    }
}

/// Two outputs, assigned by the test.
pub struct PairOut;

impl Block for PairOut {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::output("out_p", FieldType::Int),
            FieldSpec::output("out_q", FieldType::Int),
        ]
    }
}

/// Records `(in_p, in_q)` on every step.
pub struct PairIn {
    pub seen: Arc<Mutex<Vec<(Value, Value)>>>,
}

impl Block for PairIn {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::input("in_p", FieldType::Int),
            FieldSpec::input("in_q", FieldType::Int),
        ]
    }

    fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        let p = io.get("in_p")?;
        let q = io.get("in_q")?;
        self.seen.lock().push((p, q));
        Ok(())
    }
}

/// Fails every step with the given error.
pub struct Fail {
    pub error: fn() -> BlockError,
}

impl Block for Fail {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::input("in_x", FieldType::Int),
            FieldSpec::output("out_y", FieldType::Int),
        ]
    }

    fn execute(&mut self, _io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        Err((self.error)())
    }
}

/// Asks its dag to stop, then forwards `in_x` to `out_y`.
pub struct StopAndForward;

impl Block for StopAndForward {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::input("in_x", FieldType::Int),
            FieldSpec::output("out_y", FieldType::Int),
        ]
    }

    fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        if let Some(stopper) = io.stopper() {
            stopper.stop();
        }
        let x = io.get("in_x")?;
        io.set("out_y", x)?;
        Ok(())
    }
}

/// Runs `f` with a dag handle installed after construction and keeps the
/// errors it returns.
pub struct WithDag {
    pub slot: Arc<Mutex<Option<Dag>>>,
    pub errors: Arc<Mutex<Vec<DagError>>>,
    pub f: fn(&Dag) -> blockdag::Result<()>,
}

impl Block for WithDag {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![FieldSpec::output("out_x", FieldType::Int)]
    }

    fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        let dag = self.slot.lock().clone();
        if let Some(dag) = dag {
            if let Err(e) = (self.f)(&dag) {
                self.errors.lock().push(e);
            }
        }
        io.set("out_x", 1)?;
        Ok(())
    }
}

/// Generic node: one output, `inputs` numbered inputs.
pub struct Node {
    pub inputs: usize,
}

impl Block for Node {
    fn fields(&self) -> Vec<FieldSpec> {
        let mut fields: Vec<FieldSpec> = (0..self.inputs)
            .map(|i| FieldSpec::input(&format!("in_{i}"), FieldType::Any))
            .collect();
        fields.push(FieldSpec::output("out", FieldType::Any));
        fields
    }
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn source(name: &str, value: i64) -> (BlockRef, Steps) {
    let steps = Steps::default();
    let block = BlockRef::named(
        name,
        Source {
            value,
            steps: steps.clone(),
        },
    )
    .unwrap();
    (block, steps)
}

pub fn inc(name: &str) -> (BlockRef, Steps) {
    let steps = Steps::default();
    let block = BlockRef::named(name, Inc { steps: steps.clone() }).unwrap();
    (block, steps)
}

pub fn sink(name: &str) -> (BlockRef, Steps) {
    let steps = Steps::default();
    let block = BlockRef::named(name, Sink { steps: steps.clone() }).unwrap();
    (block, steps)
}

pub fn quiet_dag(title: &str) -> Dag {
    Dag::builder().title(title).no_hook().build()
}

pub fn names(blocks: &[BlockRef]) -> Vec<String> {
    blocks.iter().map(|b| b.name().to_string()).collect()
}
