//! Two number sources feeding an adder, with a pausing input block.
//!
//! Run with `cargo run --example add_numbers`. Set `RUST_LOG=debug` to see
//! every step.

use std::sync::Arc;

use anyhow::Result;
use blockdag::{
    logging, Block, BlockError, BlockIo, BlockRef, Dag, EventLog, EventLogHook, FieldSpec,
    FieldType, Outcome,
};
use colored::Colorize;
use serde_json::json;

/// Emits a fixed number.
struct Number {
    value: f64,
}

impl Block for Number {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![FieldSpec::output("out_n", FieldType::Float)]
    }

    fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        io.set("out_n", self.value)?;
        Ok(())
    }
}

/// Waits for a number to be supplied before passing it on.
struct Prompt;

impl Block for Prompt {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::input("in_n", FieldType::Float).with_default(0.0),
            FieldSpec::output("out_n", FieldType::Float),
        ]
    }

    fn prepare(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        tracing::info!(block = io.name(), "waiting for a number");
        Ok(())
    }

    fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        let n = io.get("in_n")?;
        io.set("out_n", n)?;
        Ok(())
    }
}

struct Add;

impl Block for Add {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::input("in_a", FieldType::Float).with_default(0.0),
            FieldSpec::input("in_b", FieldType::Float).with_default(0.0),
            FieldSpec::output("out_sum", FieldType::Float),
        ]
    }

    fn doc(&self) -> Option<&str> {
        Some("Adds two numbers")
    }

    fn execute(&mut self, io: &mut BlockIo<'_>) -> Result<(), BlockError> {
        let a: f64 = io.get_as("in_a")?;
        let b: f64 = io.get_as("in_b")?;
        if !(a + b).is_finite() {
            return Err(BlockError::validate("sum is not finite"));
        }
        io.set("out_sum", a + b)?;
        Ok(())
    }
}

fn main() -> Result<()> {
    logging::init();

    let log = EventLog::new();
    let dag = Dag::builder()
        .title("add numbers")
        .doc("Adds a fixed number to one typed in by the user")
        .hook(Arc::new(EventLogHook::new(log.clone())))
        .build();

    let a = BlockRef::named("a", Number { value: 2.5 })?;
    let prompt = BlockRef::builder(Prompt)
        .name("prompt")
        .pause_execution(true)
        .build()?;
    let add = BlockRef::named("add", Add)?;

    dag.connect(&a, &add, [("out_n", "in_a")])?;
    dag.connect(&prompt, &add, [("out_n", "in_b")])?;

    println!("{}", "Topological order".bold());
    for (i, layer) in dag.layers().iter().enumerate() {
        let names: Vec<&str> = layer.iter().map(BlockRef::name).collect();
        println!("  {} {}", format!("[{i}]").dimmed(), names.join(", "));
    }

    match dag.execute()? {
        Outcome::Paused(block) => {
            println!("{} {}", "paused at".yellow(), block.name().cyan());
            block.set("in_n", json!(4.0))?;
            dag.execute_after_input(&block)?;
        }
        other => println!("{} {other:?}", "finished:".green()),
    }

    let sum: f64 = add.get_as("out_sum")?;
    println!("{} {}", "sum =".green().bold(), sum);
    println!(
        "{} {} events",
        "log:".dimmed(),
        log.len().to_string().cyan()
    );
    println!("{}", serde_json::to_string_pretty(&dag.describe())?);
    Ok(())
}
