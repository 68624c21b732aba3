//! blockdag - reactive dataflow over a dag of blocks
//!
//! Blocks declare typed input and output fields. Connecting an output to an
//! input installs a watcher, so assigning an output runs the downstream
//! blocks synchronously, depth-first, before the assignment returns.
//!
//! ```no_run
//! use blockdag::{Block, BlockError, BlockIo, BlockRef, Dag, FieldSpec, FieldType};
//!
//! struct Double;
//!
//! impl Block for Double {
//!     fn fields(&self) -> Vec<FieldSpec> {
//!         vec![
//!             FieldSpec::input("in_n", FieldType::Int),
//!             FieldSpec::output("out_n", FieldType::Int),
//!         ]
//!     }
//!
//!     fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
//!         let n: i64 = io.get_as("in_n")?;
//!         io.set("out_n", n * 2)?;
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> blockdag::Result<()> {
//! let a = BlockRef::named("a", Double)?;
//! let b = BlockRef::named("b", Double)?;
//! let dag = Dag::new("doubling");
//! dag.connect(&a, &b, [("out_n", "in_n")])?;
//!
//! a.set("in_n", 3)?;
//! dag.execute()?;
//! assert_eq!(b.get_as::<i64>("out_n")?, 12);
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod config;
pub mod connection;
pub mod dag;
pub mod error;
pub mod event_log;
pub mod field;
pub mod instrument;
pub mod logging;

pub use block::{Block, BlockBuilder, BlockId, BlockIo, BlockRef, BlockState};
pub use config::Config;
pub use connection::Connection;
pub use dag::{
    Author, BlockSummary, Dag, DagBuilder, DagDescription, DagInfo, EdgeSummary, Link, Outcome,
    RunState, Stopper,
};
pub use error::{BlockError, DagError, FixSuggestion, Result};
pub use event_log::{Event, EventKind, EventLog, EventLogHook};
pub use field::{Direction, FieldSpec, FieldType, Value};
pub use instrument::{
    clear_default_hook, default_hook, set_default_hook, InstrumentHook, Invocation, Phase,
    TracingHook,
};
