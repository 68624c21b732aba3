//! Connection validation
//!
//! Validates one link against a staged graph and applies it there:
//! - both ends are distinct blocks with names unique in the dag
//! - every source field is an output, every destination field an input
//! - field types are compatible
//! - no destination input is fed twice
//! - the new edge does not close a cycle

use crate::block::BlockRef;
use crate::error::{DagError, Result};
use crate::field::{Direction, FieldSpec};

use super::graph::BlockGraph;
use super::Link;

/// Validate `link` against `graph` and add it.
///
/// Callers stage on a clone: on error `graph` may hold part of the link.
pub(crate) fn stage_link(graph: &mut BlockGraph, link: &Link) -> Result<()> {
    let (src, dst) = (&link.src, &link.dst);

    if link.connections.is_empty() {
        return Err(DagError::EmptyConnection {
            src: src.name().to_string(),
            dst: dst.name().to_string(),
        });
    }

    if src.ptr_eq(dst) {
        return Err(DagError::Cycle {
            src: src.name().to_string(),
            dst: dst.name().to_string(),
            path: format!("{} -> {}", src.name(), dst.name()),
        });
    }

    check_name(graph, src)?;
    check_name(graph, dst)?;
    if src.name() == dst.name() {
        return Err(DagError::DuplicateBlockName {
            name: dst.name().to_string(),
        });
    }

    for conn in &link.connections {
        let out = field_in(src, conn.src_field(), Direction::Output)?;
        let inp = field_in(dst, conn.dst_field(), Direction::Input)?;
        if !out.ty.connects_to(inp.ty) {
            return Err(DagError::TypeMismatch {
                src_block: src.name().to_string(),
                src_field: out.name.to_string(),
                src_type: out.ty,
                dst_block: dst.name().to_string(),
                dst_field: inp.name.to_string(),
                dst_type: inp.ty,
            });
        }
    }

    // Only a new edge can close a cycle
    if graph.edge(src.id(), dst.id()).is_none() && graph.contains(src.id()) {
        if let Some(path) = graph.find_path(dst.id(), src.id()) {
            let mut names: Vec<&str> = path
                .iter()
                .filter_map(|id| graph.node(*id))
                .map(BlockRef::name)
                .collect();
            names.push(dst.name());
            return Err(DagError::Cycle {
                src: src.name().to_string(),
                dst: dst.name().to_string(),
                path: names.join(" -> "),
            });
        }
    }

    graph.add_node(src);
    graph.add_node(dst);

    for conn in &link.connections {
        if let Some((existing, existing_field)) = graph.incoming_source(dst.id(), conn.dst_field()) {
            let existing_block = graph
                .node(existing)
                .map_or_else(|| existing.to_string(), |b| b.name().to_string());
            return Err(DagError::DuplicateConnection {
                block: dst.name().to_string(),
                field: conn.dst_field().to_string(),
                existing_block,
                existing_field: existing_field.to_string(),
            });
        }
        graph.add_connection(src, dst, conn.clone());
    }

    Ok(())
}

/// A block's name must not belong to a different block already in the graph.
fn check_name(graph: &BlockGraph, block: &BlockRef) -> Result<()> {
    match graph.by_name(block.name()) {
        Some(existing) if !existing.ptr_eq(block) => Err(DagError::DuplicateBlockName {
            name: block.name().to_string(),
        }),
        _ => Ok(()),
    }
}

fn field_in(block: &BlockRef, field: &str, direction: Direction) -> Result<FieldSpec> {
    let spec = block.field(field).ok_or_else(|| DagError::UnknownField {
        block: block.name().to_string(),
        field: field.to_string(),
    })?;
    if spec.direction != direction {
        return Err(DagError::WrongDirection {
            block: block.name().to_string(),
            field: field.to_string(),
            expected: direction,
        });
    }
    Ok(spec)
}
