//! Topology edges traced by the seeded flows, as a `from,to` CSV.
//!
//! A flow with hops `[A, B]` contributes `src:port -> A`, `A -> B` and
//! `B -> dst:port`. Each edge is written once, in the order first seen.

use std::{fs::File, io::Write, path::Path};

use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::info;

use super::Error;
use crate::flow::ResolvedFlow;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
struct Edge {
    from: String,
    to: String,
}

fn edges(flows: &[ResolvedFlow]) -> Vec<Edge> {
    let mut seen = FxHashSet::default();
    let mut edges = Vec::new();
    let mut push = |from: String, to: String| {
        let edge = Edge { from, to };
        if seen.insert(edge.clone()) {
            edges.push(edge);
        }
    };

    for flow in flows {
        let (Some(first), Some(last)) = (flow.hops.first(), flow.hops.last()) else {
            continue;
        };
        push(format!("{}:{}", flow.src_addr, flow.src_port), first.clone());
        for pair in flow.hops.windows(2) {
            push(pair[0].clone(), pair[1].clone());
        }
        push(last.clone(), format!("{}:{}", flow.dst_addr, flow.dst_port));
    }
    edges
}

/// Write the edges of `flows`, with a header row, to `writer`. Returns the
/// number of edges written.
///
/// # Errors
///
/// Function will error if writing fails.
pub fn render<W>(flows: &[ResolvedFlow], writer: W) -> Result<usize, Error>
where
    W: Write,
{
    let edges = edges(flows);
    let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
    for edge in &edges {
        writer.serialize(edge)?;
    }
    writer.flush()?;
    Ok(edges.len())
}

/// Write the edges of `flows` to `path`.
///
/// # Errors
///
/// Function will error if the file cannot be created or written.
pub fn write(flows: &[ResolvedFlow], path: &Path) -> Result<(), Error> {
    let edges = render(flows, File::create(path)?)?;
    info!(path = %path.display(), edges, "Generated graph file.");
    Ok(())
}
