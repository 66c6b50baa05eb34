//! Derivation of `NetFlow` v5 records and packets from resolved flows.
//!
//! The shared random stream is never touched here. Per-record noise, packet
//! counts, AS numbers, prefix masks and uptime jitter, comes from a private
//! generator so that how many records a host emits cannot shift the draws
//! its peers depend on.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use manflow_payload::{Header, Packet, Record};
use rand::{Rng, SeedableRng, rngs::SmallRng};

use crate::{flow::ResolvedFlow, hosts};

/// Added to the exporter's elapsed milliseconds so that a freshly started
/// exporter does not report an uptime shorter than a flow's duration.
const UPTIME_OFFSET_MS: u32 = 1_000;
const ENGINE_TYPE: u8 = 1;
const MAX_PACKETS: u32 = 256;

/// Errors produced by [`Encoder`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The flow's next hop is not in the host table. Fatal.
    #[error(transparent)]
    Topology(#[from] hosts::Error),
    /// The packet could not be written. The batch is lost.
    #[error("Failed to encode packet: {0}")]
    Write(#[from] manflow_payload::Error),
}

/// Exporter state threaded through every packet this process builds: the
/// uptime baseline and the packet sequence counter.
#[derive(Debug, Clone, Copy)]
pub struct ExportState {
    boot: Instant,
    flow_sequence: u32,
}

impl Default for ExportState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportState {
    /// Create a new exporter state with uptime measured from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
            flow_sequence: 0,
        }
    }

    /// Sequence number of the last packet built, 0 before the first.
    #[must_use]
    pub fn flow_sequence(&self) -> u32 {
        self.flow_sequence
    }

    /// Sample the exporter's clocks.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn stamp(&self) -> Stamp {
        let elapsed = u32::try_from(self.boot.elapsed().as_millis()).unwrap_or(u32::MAX);
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Stamp {
            sys_uptime: elapsed.saturating_add(UPTIME_OFFSET_MS),
            // the wire field is 32 bits wide
            unix_secs: since_epoch.as_secs() as u32,
            unix_nsecs: since_epoch.subsec_nanos(),
        }
    }
}

/// A reading of the exporter's clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// Milliseconds of exporter uptime
    pub sys_uptime: u32,
    /// Seconds since the Unix epoch
    pub unix_secs: u32,
    /// Residual nanoseconds
    pub unix_nsecs: u32,
}

/// Builds records and packets for the flows of one host.
#[derive(Debug)]
pub struct Encoder<R = SmallRng> {
    hosts: hosts::HostTable,
    tick_interval_ms: u32,
    false_index: bool,
    noise: R,
}

impl Encoder<SmallRng> {
    /// Create a new encoder with noise seeded from OS entropy.
    #[must_use]
    pub fn new(hosts: hosts::HostTable, tick_interval_ms: u32, false_index: bool) -> Self {
        Self::with_noise(hosts, tick_interval_ms, false_index, SmallRng::from_os_rng())
    }
}

impl<R> Encoder<R>
where
    R: Rng,
{
    /// Create a new encoder drawing per-record noise from `noise`.
    pub fn with_noise(hosts: hosts::HostTable, tick_interval_ms: u32, false_index: bool, noise: R) -> Self {
        Self {
            hosts,
            tick_interval_ms,
            false_index,
            noise,
        }
    }

    /// Build the record for `flow`, the flow at position `index` of the seeded
    /// flow list, carrying `octets` bytes.
    ///
    /// The record's first and last switched times place the flow on its path:
    /// the tick interval is divided evenly among the hops and a host further
    /// along the path reports a flow that ended more recently.
    ///
    /// # Errors
    ///
    /// Function will error if the flow's next hop does not resolve.
    pub fn record(&mut self, index: usize, flow: &ResolvedFlow, octets: u32, stamp: &Stamp) -> Result<Record, Error> {
        let nexthop = self.hosts.next_hop(index, flow)?.map_or(0, u32::from);
        let srcaddr = u32::from(flow.src_addr);
        let dstaddr = u32::from(flow.dst_addr);

        let (input, output) = match (self.false_index, srcaddr > dstaddr) {
            (false, _) => (0, 0),
            (true, true) => (1, 2),
            (true, false) => (2, 1),
        };

        let (first, last) = self.switched(flow, stamp.sys_uptime);

        Ok(Record {
            srcaddr,
            dstaddr,
            nexthop,
            input,
            output,
            d_pkts: self.noise.random_range(1..=MAX_PACKETS),
            d_octets: octets,
            first,
            last,
            srcport: flow.src_port,
            dstport: flow.dst_port,
            pad1: 0,
            tcp_flags: 0,
            prot: flow.proto,
            tos: 0,
            src_as: self.noise.random_range(0..u16::MAX),
            dst_as: self.noise.random_range(0..u16::MAX),
            src_mask: self.noise.random_range(0..32),
            dst_mask: self.noise.random_range(0..32),
            pad2: 0,
        })
    }

    /// `(first, last)` switched uptimes for `flow`. Never inverted, both
    /// saturate at zero.
    #[allow(clippy::cast_possible_truncation)]
    fn switched(&mut self, flow: &ResolvedFlow, sys_uptime: u32) -> (u32, u32) {
        let hops = flow.hops.len().max(1);
        let position = flow.host_index.unwrap_or(0).min(hops - 1);
        // hops is bounded by the config file, far below u32::MAX
        let hops = hops as u32;
        let position = position as u32;

        let slice = self.tick_interval_ms / hops;
        let start_offset = slice * (hops - position);
        let end_offset = slice * (hops - position - 1);
        let center = (start_offset - end_offset) / 2 + end_offset;

        let last = sys_uptime.saturating_sub(jitter(&mut self.noise, end_offset, center));
        let first = last.saturating_sub(jitter(&mut self.noise, center, start_offset));
        (first, last)
    }

    /// Assemble `records` into one packet and encode it. Consumes the next
    /// flow sequence number.
    ///
    /// # Errors
    ///
    /// Function will error if the packet cannot be assembled or written.
    pub fn packet(&self, state: &mut ExportState, records: Vec<Record>) -> Result<Bytes, Error> {
        let stamp = state.stamp();
        state.flow_sequence = state.flow_sequence.wrapping_add(1);
        let header = Header {
            version: manflow_payload::netflow::VERSION,
            count: 0,
            sys_uptime: stamp.sys_uptime,
            unix_secs: stamp.unix_secs,
            unix_nsecs: stamp.unix_nsecs,
            flow_sequence: state.flow_sequence,
            engine_type: ENGINE_TYPE,
            engine_id: 0,
            sampling_interval: 0,
        };
        let packet = Packet::new(header, records)?;
        Ok(packet.to_bytes()?)
    }
}

/// A draw from `[min, max)`, or `min` when the range is empty.
fn jitter<R>(rng: &mut R, min: u32, max: u32) -> u32
where
    R: Rng + ?Sized,
{
    if min >= max {
        min
    } else {
        rng.random_range(min..max)
    }
}

#[cfg(test)]
mod test {
    use std::{net::Ipv4Addr, sync::Arc};

    use manflow_payload::netflow::MAX_RECORDS;

    use super::*;
    use crate::hosts::{Host, HostTable};

    fn table() -> HostTable {
        HostTable::new(&[
            Host {
                name: "A".to_string(),
                ip: Ipv4Addr::new(10, 0, 0, 2),
            },
            Host {
                name: "B".to_string(),
                ip: Ipv4Addr::new(10, 0, 0, 3),
            },
            Host {
                name: "C".to_string(),
                ip: Ipv4Addr::new(10, 0, 0, 4),
            },
        ])
        .unwrap()
    }

    fn encoder(false_index: bool, seed: u64) -> Encoder<SmallRng> {
        Encoder::with_noise(table(), 900, false_index, SmallRng::seed_from_u64(seed))
    }

    fn flow(src: Ipv4Addr, dst: Ipv4Addr, hops: &[&str], host_index: usize) -> ResolvedFlow {
        ResolvedFlow {
            src_addr: src,
            src_port: 22,
            dst_addr: dst,
            dst_port: 4000,
            proto: 17,
            hops: hops.iter().map(ToString::to_string).collect::<Arc<[String]>>(),
            count: 0,
            tick: 0,
            host_index: Some(host_index),
        }
    }

    const STAMP: Stamp = Stamp {
        sys_uptime: 100_000,
        unix_secs: 1_700_000_000,
        unix_nsecs: 0,
    };

    #[test]
    fn record_carries_flow_fields() {
        let mut encoder = encoder(false, 1);
        let flow = flow(
            Ipv4Addr::new(192, 168, 0, 1),
            Ipv4Addr::new(10, 0, 0, 5),
            &["A", "B"],
            0,
        );
        let record = encoder.record(0, &flow, 777, &STAMP).unwrap();

        assert_eq!(record.srcaddr, u32::from(Ipv4Addr::new(192, 168, 0, 1)));
        assert_eq!(record.dstaddr, u32::from(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(record.nexthop, u32::from(Ipv4Addr::new(10, 0, 0, 3)));
        assert_eq!((record.input, record.output), (0, 0));
        assert_eq!(record.d_octets, 777);
        assert_eq!((record.srcport, record.dstport, record.prot), (22, 4000, 17));
        assert!((1..=MAX_PACKETS).contains(&record.d_pkts));
        assert!(record.src_mask < 32 && record.dst_mask < 32);
        assert_eq!((record.tcp_flags, record.tos, record.pad1, record.pad2), (0, 0, 0, 0));
    }

    #[test]
    fn final_hop_has_no_next_hop() {
        let mut encoder = encoder(false, 1);
        let flow = flow(Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2), &["A", "B"], 1);
        assert_eq!(encoder.record(0, &flow, 50, &STAMP).unwrap().nexthop, 0);
    }

    #[test]
    fn unknown_next_hop_is_fatal() {
        let mut encoder = encoder(false, 1);
        let flow = flow(Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2), &["A", "Z"], 0);
        assert!(matches!(
            encoder.record(4, &flow, 50, &STAMP),
            Err(Error::Topology(hosts::Error::UnresolvedHop { flow: 4, .. }))
        ));
    }

    #[test]
    fn snmp_index_follows_address_order() {
        let mut encoder = encoder(true, 1);
        let high = Ipv4Addr::new(200, 0, 0, 1);
        let low = Ipv4Addr::new(10, 0, 0, 1);

        let record = encoder.record(0, &flow(high, low, &["A"], 0), 50, &STAMP).unwrap();
        assert_eq!((record.input, record.output), (1, 2));
        let record = encoder.record(0, &flow(low, high, &["A"], 0), 50, &STAMP).unwrap();
        assert_eq!((record.input, record.output), (2, 1));
        let record = encoder.record(0, &flow(low, low, &["A"], 0), 50, &STAMP).unwrap();
        assert_eq!((record.input, record.output), (2, 1));
    }

    #[test]
    fn switched_times_shrink_along_the_path() {
        let src = Ipv4Addr::new(1, 1, 1, 1);
        let dst = Ipv4Addr::new(2, 2, 2, 2);
        // 900ms over three hops is a 300ms slice per hop
        let bounds = [(0, 600, 749, 750, 899), (1, 300, 449, 450, 599), (2, 0, 149, 150, 299)];
        for seed in 0..64 {
            let mut encoder = encoder(false, seed);
            for (position, end_lo, end_hi, span_lo, span_hi) in bounds {
                let flow = flow(src, dst, &["A", "B", "C"], position);
                let record = encoder.record(0, &flow, 50, &STAMP).unwrap();

                let end_age = STAMP.sys_uptime - record.last;
                let span = record.last - record.first;
                assert!((end_lo..=end_hi).contains(&end_age), "end age {end_age}");
                assert!((span_lo..=span_hi).contains(&span), "span {span}");
            }
        }
    }

    #[test]
    fn switched_times_saturate_and_never_invert() {
        let mut encoder = encoder(false, 3);
        let flow = flow(Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2), &["A", "B", "C"], 0);
        let stamp = Stamp {
            sys_uptime: 10,
            ..STAMP
        };
        let record = encoder.record(0, &flow, 50, &stamp).unwrap();
        assert_eq!((record.first, record.last), (0, 0));
    }

    #[test]
    fn jitter_collapses_empty_ranges() {
        let mut rng = SmallRng::seed_from_u64(0);
        assert_eq!(jitter(&mut rng, 5, 5), 5);
        assert_eq!(jitter(&mut rng, 9, 5), 9);
        assert!((5..6).contains(&jitter(&mut rng, 5, 6)));
    }

    #[test]
    fn packets_are_sequenced_from_one() {
        let encoder = encoder(false, 1);
        let mut state = ExportState::new();
        let records = vec![Record::default(); 3];

        let first = Packet::decode(&encoder.packet(&mut state, records.clone()).unwrap()).unwrap();
        let second = Packet::decode(&encoder.packet(&mut state, records).unwrap()).unwrap();

        assert_eq!(first.header().version, 5);
        assert_eq!(first.header().count, 3);
        assert_eq!(first.header().engine_type, ENGINE_TYPE);
        assert!(first.header().sys_uptime >= UPTIME_OFFSET_MS);
        assert_eq!(first.header().flow_sequence, 1);
        assert_eq!(second.header().flow_sequence, 2);
        assert_eq!(state.flow_sequence(), 2);
    }

    #[test]
    fn oversized_batch_is_a_write_error() {
        let encoder = encoder(false, 1);
        let mut state = ExportState::new();
        let records = vec![Record::default(); MAX_RECORDS + 1];
        assert!(matches!(
            encoder.packet(&mut state, records),
            Err(Error::Write(manflow_payload::Error::TooManyRecords { .. }))
        ));
    }
}
