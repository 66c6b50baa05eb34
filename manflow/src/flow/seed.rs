//! Deterministic seeding of expanded flows.
//!
//! Every cooperating host runs this over the same expanded sequence with the
//! same seed. Draws are made strictly in sequence order, one flow at a time,
//! so that each host arrives at identical field values and ticks without
//! exchanging a byte. Do not reorder the draws below: doing so silently
//! breaks agreement with hosts running an older build.

use std::{net::Ipv4Addr, num::NonZeroU32, sync::Arc};

use rand::Rng;
use serde::Serialize;

use super::{DEFAULT_PROTOCOL, ExpandedFlow};

/// A flow with every field concrete, its emission tick and the running host's
/// position on its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFlow {
    /// Source address
    pub src_addr: Ipv4Addr,
    /// Source port
    pub src_port: u16,
    /// Destination address
    pub dst_addr: Ipv4Addr,
    /// Destination port
    pub dst_port: u16,
    /// IP protocol
    pub proto: u8,
    /// Host names along the path, first hop first
    pub hops: Arc<[String]>,
    /// Emission limit, 0 for none
    pub count: u32,
    /// The tick of the cycle in which this flow is emitted
    pub tick: u32,
    /// Position of the running host in `hops`, `None` when not on the path
    pub host_index: Option<usize>,
}

impl ResolvedFlow {
    /// Whether the running host emits this flow.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.host_index.is_some()
    }

    /// The name of the hop after the running host, `None` when the running
    /// host is the final hop or is not on the path.
    #[must_use]
    pub fn next_hop(&self) -> Option<&str> {
        let index = self.host_index?;
        self.hops.get(index + 1).map(String::as_str)
    }
}

/// Fill every unset field of `flows`, assign each an emission tick in
/// `[0, flow_timeout)` and locate `host_name` on each flow's path.
///
/// For each flow, in order: an unset source then destination address is a
/// uniform 32-bit draw, an unset source then destination port is drawn from
/// `[0, 65535)`, an unset protocol becomes TCP without a draw, and finally the
/// tick is drawn.
pub fn seed<R>(
    flows: Vec<ExpandedFlow>,
    rng: &mut R,
    host_name: &str,
    flow_timeout: NonZeroU32,
) -> Vec<ResolvedFlow>
where
    R: Rng + ?Sized,
{
    flows
        .into_iter()
        .map(|flow| {
            let src_addr = flow
                .src_addr
                .unwrap_or_else(|| Ipv4Addr::from(rng.random::<u32>()));
            let dst_addr = flow
                .dst_addr
                .unwrap_or_else(|| Ipv4Addr::from(rng.random::<u32>()));
            let src_port = if flow.src_port == 0 {
                rng.random_range(0..u16::MAX)
            } else {
                flow.src_port
            };
            let dst_port = if flow.dst_port == 0 {
                rng.random_range(0..u16::MAX)
            } else {
                flow.dst_port
            };
            let proto = if flow.proto == 0 {
                DEFAULT_PROTOCOL
            } else {
                flow.proto
            };
            let tick = rng.random_range(0..flow_timeout.get());
            let host_index = flow.hops.iter().position(|hop| hop == host_name);

            ResolvedFlow {
                src_addr,
                src_port,
                dst_addr,
                dst_port,
                proto,
                hops: flow.hops,
                count: flow.count,
                tick,
                host_index,
            }
        })
        .collect()
}
