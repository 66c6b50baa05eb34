//! Per-flow emission counters and the end of run summary.

use std::{fs, io, path::Path};

use serde::Serialize;
use tracing::info;

use crate::flow::ResolvedFlow;

/// Errors produced when exporting a [`Summary`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Serialization failed
    #[error("Failed to serialize stats: {0}")]
    Json(#[from] serde_json::Error),
    /// The stats file could not be written
    #[error("Failed to write stats file: {0}")]
    Io(#[from] io::Error),
}

/// Counters for one enabled flow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlowRuntimeState {
    /// Records emitted for the flow
    pub emitted_count: u64,
    /// Bytes reported across those records
    pub emitted_bytes: u64,
}

/// One counter per enabled flow, indexed like the enabled flow list.
#[derive(Debug, Clone)]
pub struct Accumulator {
    states: Vec<FlowRuntimeState>,
}

impl Accumulator {
    /// Create a new accumulator for `enabled` flows, all counters zero.
    #[must_use]
    pub fn new(enabled: usize) -> Self {
        Self {
            states: vec![FlowRuntimeState::default(); enabled],
        }
    }

    /// Counters of the `slot`th enabled flow.
    #[must_use]
    pub fn get(&self, slot: usize) -> FlowRuntimeState {
        self.states[slot]
    }

    /// Account one emission of `octets` bytes to the `slot`th enabled flow.
    pub fn record(&mut self, slot: usize, octets: u32) {
        let state = &mut self.states[slot];
        state.emitted_count += 1;
        state.emitted_bytes += u64::from(octets);
    }

    /// Join every enabled flow's descriptor with its counters.
    #[must_use]
    pub fn summary(&self, flows: &[ResolvedFlow], enabled: &[usize]) -> Summary {
        let total = enabled
            .iter()
            .zip(&self.states)
            .map(|(&index, state)| FlowSummary {
                flow: flows[index].clone(),
                emitted_count: state.emitted_count,
                emitted_bytes: state.emitted_bytes,
            })
            .collect();
        Summary { total }
    }
}

/// A flow's descriptor and final counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    /// The flow
    #[serde(flatten)]
    pub flow: ResolvedFlow,
    /// Records emitted
    pub emitted_count: u64,
    /// Bytes emitted
    pub emitted_bytes: u64,
}

/// The immutable end of run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// One entry per enabled flow, in enabled order
    pub total: Vec<FlowSummary>,
}

impl Summary {
    /// Total records emitted across every flow.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.total.iter().map(|f| f.emitted_count).sum()
    }

    /// Log every flow's final counters.
    pub fn log(&self) {
        for entry in &self.total {
            let flow = &entry.flow;
            info!(
                src = %flow.src_addr,
                src_port = flow.src_port,
                dst = %flow.dst_addr,
                dst_port = flow.dst_port,
                proto = flow.proto,
                emitted_count = entry.emitted_count,
                emitted_bytes = entry.emitted_bytes,
                "Flow summary."
            );
        }
        info!(flows = self.total.len(), records = self.records(), "Run summary.");
    }

    /// Write the summary as JSON to `path`.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be written.
    pub fn write_json(&self, path: &Path) -> Result<(), Error> {
        let contents = serde_json::to_vec_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
