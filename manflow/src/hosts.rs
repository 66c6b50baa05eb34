//! The host resolution table.
//!
//! Every generator instance plays a named host. Flows name their hops by host
//! name and the table maps those names to the addresses reported as a
//! record's next hop.

use std::net::Ipv4Addr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::flow::ResolvedFlow;

/// Errors produced by [`HostTable`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Two hosts share one name.
    #[error("host name {0:?} is defined more than once")]
    Duplicate(String),
    /// A flow names a next hop that is not in the table.
    #[error("flow {flow}: next hop {hop:?} is not a known host")]
    UnresolvedHop {
        /// Index of the flow in the seeded flow list
        flow: usize,
        /// The unknown host name
        hop: String,
    },
}

/// One entry of the host table as written in configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Host {
    /// The host's name, as used in flow hops
    pub name: String,
    /// The host's address
    pub ip: Ipv4Addr,
}

/// Name to address lookup over the configured hosts.
#[derive(Debug, Clone, Default)]
pub struct HostTable {
    by_name: FxHashMap<String, Ipv4Addr>,
}

impl HostTable {
    /// Build a table from the configured hosts.
    ///
    /// # Errors
    ///
    /// Function will error if a name appears twice.
    pub fn new(hosts: &[Host]) -> Result<Self, Error> {
        let mut by_name = FxHashMap::default();
        for host in hosts {
            if by_name.insert(host.name.clone(), host.ip).is_some() {
                return Err(Error::Duplicate(host.name.clone()));
            }
        }
        Ok(Self { by_name })
    }

    /// Look up a host's address by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Ipv4Addr> {
        self.by_name.get(name).copied()
    }

    /// Resolve the next hop of `flows[index]`. `Ok(None)` when the running
    /// host is the final hop.
    ///
    /// # Errors
    ///
    /// Function will error if the next hop is named but not in the table. The
    /// topology is inconsistent and no default is substituted.
    pub fn next_hop(&self, index: usize, flow: &ResolvedFlow) -> Result<Option<Ipv4Addr>, Error> {
        match flow.next_hop() {
            None => Ok(None),
            Some(hop) => self.resolve(hop).map(Some).ok_or_else(|| Error::UnresolvedHop {
                flow: index,
                hop: hop.to_string(),
            }),
        }
    }

    /// Check that the next hop of every enabled flow resolves. Run before the
    /// first packet so an inconsistent topology aborts cleanly.
    ///
    /// # Errors
    ///
    /// See [`HostTable::next_hop`].
    pub fn check(&self, flows: &[ResolvedFlow], enabled: &[usize]) -> Result<(), Error> {
        for &index in enabled {
            self.next_hop(index, &flows[index])?;
        }
        Ok(())
    }

    /// Check every flow as if run on each of its hops in turn: every hop but
    /// the first is some host's next hop and must resolve.
    ///
    /// # Errors
    ///
    /// Function will error on the first hop that is not in the table.
    pub fn check_topology(&self, flows: &[ResolvedFlow]) -> Result<(), Error> {
        for (index, flow) in flows.iter().enumerate() {
            if let Some(hop) = flow.hops.iter().skip(1).find(|hop| self.resolve(hop).is_none()) {
                return Err(Error::UnresolvedHop {
                    flow: index,
                    hop: hop.clone(),
                });
            }
        }
        Ok(())
    }
}
