//! The tick scheduler.
//!
//! Each tick draws a byte count for every seeded flow from the shared random
//! stream, enabled or not, so that cooperating hosts stay in lockstep. The
//! enabled flows due on the tick are then encoded in batches of at most
//! [`MAX_RECORDS`] records, one datagram per batch.
//!
//! ## Metrics
//!
//! `nflow_generator_sent_netflow_total`: Datagrams sent
//! `nflow_generator_sent_records_total`: Records sent
//! `nflow_generator_sent_records_total_bytes`: Bytes sent
//! `request_failure`: Datagrams the sink failed to send
//! `encode_failure`: Batches dropped because they failed to encode
//!

use std::{future::Future, num::NonZeroU32, time::Duration};

use bytes::Bytes;
use manflow_payload::{Record, netflow::MAX_RECORDS};
use rand::{
    Rng,
    rngs::{SmallRng, StdRng},
};
use tracing::{debug, info, warn};

use crate::{
    encoder::{self, Encoder, ExportState},
    flow::ResolvedFlow,
    sink::Sink,
    stats::{Accumulator, Summary},
    telemetry::Counters,
};

pub mod state_machine;

use state_machine::{Cycle, Phase, Step};

/// Byte counts are drawn from this range every tick.
const OCTETS_MIN: u32 = 50;
const OCTETS_MAX: u32 = 1_050;

/// Errors produced by [`Scheduler`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A record could not be built. The topology is inconsistent.
    #[error(transparent)]
    Encoder(#[from] encoder::Error),
}

/// One encoded batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// The encoded packet
    pub bytes: Bytes,
    /// Records in the packet
    pub records: usize,
}

/// What one tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Datagrams to send, in order
    pub datagrams: Vec<Datagram>,
    /// Whether a full cycle has now passed without an emission
    pub finished: bool,
}

/// Drives emission of the enabled flows.
#[derive(Debug)]
pub struct Scheduler<R = SmallRng> {
    flows: Vec<ResolvedFlow>,
    enabled: Vec<usize>,
    stats: Accumulator,
    octets: Vec<u32>,
    rng: StdRng,
    encoder: Encoder<R>,
    export: ExportState,
    cycle: Cycle,
    interval: Duration,
    counters: Counters,
}

impl<R> Scheduler<R>
where
    R: Rng,
{
    /// Create a new scheduler over the seeded `flows`, emitting those listed in
    /// `enabled`. `rng` must be the shared stream as left by seeding.
    ///
    /// Counters are registered with the recorder installed at the time of
    /// this call.
    #[must_use]
    pub fn new(
        flows: Vec<ResolvedFlow>,
        enabled: Vec<usize>,
        rng: StdRng,
        encoder: Encoder<R>,
        max_tick: NonZeroU32,
        interval: Duration,
    ) -> Self {
        Self {
            stats: Accumulator::new(enabled.len()),
            octets: vec![0; flows.len()],
            flows,
            enabled,
            rng,
            encoder,
            export: ExportState::new(),
            cycle: Cycle::new(max_tick),
            interval,
            counters: Counters::register(),
        }
    }

    /// Run one tick: draw byte counts, encode every due flow and advance the
    /// tick counter.
    ///
    /// # Errors
    ///
    /// Function will error if a due flow's next hop does not resolve.
    pub fn tick(&mut self) -> Result<TickReport, Error> {
        for octets in &mut self.octets {
            *octets = self.rng.random_range(OCTETS_MIN..OCTETS_MAX);
        }

        let stamp = self.export.stamp();
        let current = self.cycle.tick();
        let mut datagrams = Vec::new();
        let mut batch = Batch::default();

        for (slot, &index) in self.enabled.iter().enumerate() {
            let flow = &self.flows[index];
            let emitted = self.stats.get(slot).emitted_count;
            if Phase::of(flow.count, emitted, flow.tick, current) != Phase::Due {
                continue;
            }

            let octets = self.octets[index];
            let record = self.encoder.record(index, flow, octets, &stamp)?;
            debug!(
                tick = current,
                src = %flow.src_addr,
                src_port = flow.src_port,
                dst = %flow.dst_addr,
                dst_port = flow.dst_port,
                proto = flow.proto,
                first = record.first,
                last = record.last,
                octets,
                "Emitting flow."
            );
            self.cycle.mark_sent();
            batch.push(slot, octets, record);

            if batch.records.len() == MAX_RECORDS {
                batch.flush(
                    &self.encoder,
                    &mut self.export,
                    &mut self.stats,
                    &self.counters,
                    &mut datagrams,
                );
            }
        }
        if !batch.records.is_empty() {
            batch.flush(
                &self.encoder,
                &mut self.export,
                &mut self.stats,
                &self.counters,
                &mut datagrams,
            );
        }

        let finished = self.cycle.advance() == Step::Finished;
        Ok(TickReport { datagrams, finished })
    }

    /// Tick until a full cycle passes without an emission or `shutdown`
    /// resolves, sending every datagram through `sink`. Shutdown is only
    /// observed between ticks, a tick's datagrams are always sent whole.
    ///
    /// A failed send is logged and counted and the run continues.
    ///
    /// # Errors
    ///
    /// Function will error if a due flow's next hop does not resolve.
    pub async fn run<S, F>(mut self, sink: &mut S, shutdown: F) -> Result<Summary, Error>
    where
        S: Sink + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let report = self.tick()?;
            for datagram in &report.datagrams {
                match sink.send(&datagram.bytes).await {
                    Ok(written) => {
                        self.counters.sent_netflow.increment(1);
                        self.counters.sent_records.increment(datagram.records as u64);
                        self.counters.sent_bytes.increment(written as u64);
                    }
                    Err(err) => {
                        warn!(%err, records = datagram.records, "Failed to send datagram.");
                        self.counters.request_failure.increment(1);
                    }
                }
            }
            if report.finished {
                info!("No flow was sent in a full cycle, finishing.");
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {},
                () = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        Ok(self.summary())
    }

    /// The counters so far, joined with their flows.
    #[must_use]
    pub fn summary(&self) -> Summary {
        self.stats.summary(&self.flows, &self.enabled)
    }
}

/// Records awaiting encoding, alongside the stats slot and byte count of
/// each.
#[derive(Debug, Default)]
struct Batch {
    records: Vec<Record>,
    emitted: Vec<(usize, u32)>,
}

impl Batch {
    fn push(&mut self, slot: usize, octets: u32, record: Record) {
        self.records.push(record);
        self.emitted.push((slot, octets));
    }

    /// Encode the pending records into `out`, leaving the batch empty. Flows
    /// are accounted in `stats` only once their batch has encoded.
    fn flush<R>(
        &mut self,
        encoder: &Encoder<R>,
        export: &mut ExportState,
        stats: &mut Accumulator,
        counters: &Counters,
        out: &mut Vec<Datagram>,
    ) where
        R: Rng,
    {
        let records = std::mem::replace(&mut self.records, Vec::with_capacity(MAX_RECORDS));
        let count = records.len();
        match encoder.packet(export, records) {
            Ok(bytes) => {
                for (slot, octets) in self.emitted.drain(..) {
                    stats.record(slot, octets);
                }
                out.push(Datagram {
                    bytes,
                    records: count,
                });
            }
            Err(err) => {
                warn!(%err, records = count, "Dropping batch that failed to encode.");
                counters.encode_failure.increment(1);
                self.emitted.clear();
            }
        }
    }
}
