//! Flow templates and the pipeline that turns them into concrete flows.
//!
//! A [`Template`] is what users write. [`expand`] takes the cartesian product
//! of every template's field specifications, [`seed`] fills what was left
//! unset and [`enabled`] picks out the flows the running host takes part in.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod expand;
pub mod filter;
pub mod seed;

pub use expand::{ExpandedFlow, expand};
pub use filter::enabled;
pub use seed::{ResolvedFlow, seed};

/// IP protocol assumed when a flow leaves it unset.
pub const DEFAULT_PROTOCOL: u8 = 6;
/// Most flows a single template may expand to.
pub const MAX_TEMPLATE_FLOWS: u64 = 1 << 20;

/// Errors produced while expanding flow templates.
///
/// Every variant names the template, by position in the configuration, and
/// the field that failed so misconfiguration can be found without rerunning.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A field containing '/' did not parse as an IPv4 CIDR block.
    #[error("flow {template}: `{field}` is not a valid CIDR block {value:?}: {source}")]
    Cidr {
        /// Template index
        template: usize,
        /// Offending field
        field: Field,
        /// The raw field value
        value: String,
        /// Underlying parse error
        #[source]
        source: ipnetwork::IpNetworkError,
    },
    /// An address field did not parse as an IPv4 address.
    #[error("flow {template}: `{field}` is not a valid IPv4 address {value:?}")]
    Address {
        /// Template index
        template: usize,
        /// Offending field
        field: Field,
        /// The raw field value
        value: String,
    },
    /// A port or protocol token is not an integer.
    #[error("flow {template}: `{field}` has non-integer token {token:?}")]
    Integer {
        /// Template index
        template: usize,
        /// Offending field
        field: Field,
        /// The token that failed to parse
        token: String,
    },
    /// A `start-end` range with `start > end`.
    #[error("flow {template}: `{field}` range {start}-{end} is inverted")]
    InvertedRange {
        /// Template index
        template: usize,
        /// Offending field
        field: Field,
        /// Range start
        start: u64,
        /// Range end
        end: u64,
    },
    /// A value does not fit the field's wire width.
    #[error("flow {template}: `{field}` value {value} exceeds maximum {max}")]
    OutOfRange {
        /// Template index
        template: usize,
        /// Offending field
        field: Field,
        /// The value given
        value: u64,
        /// The largest value the field admits
        max: u64,
    },
    /// The template's cartesian product exceeds [`MAX_TEMPLATE_FLOWS`].
    #[error("flow {template}: expands to {count} flows, at most {MAX_TEMPLATE_FLOWS} are allowed")]
    TooManyFlows {
        /// Template index
        template: usize,
        /// Flows the template would expand to
        count: u128,
    },
}

/// The expandable fields of a [`Template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `src_addr`
    SrcAddr,
    /// `dst_addr`
    DstAddr,
    /// `src_port`
    SrcPort,
    /// `dst_port`
    DstPort,
    /// `proto`
    Proto,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::SrcAddr => "src_addr",
            Field::DstAddr => "dst_addr",
            Field::SrcPort => "src_port",
            Field::DstPort => "dst_port",
            Field::Proto => "proto",
        };
        f.write_str(name)
    }
}

/// A user-authored flow template.
///
/// Address fields hold nothing, a single IPv4 address or a CIDR block. Port
/// and protocol fields hold nothing, a single integer, a comma separated list
/// or an inclusive `start-end` range. Empty fields are randomized by
/// [`seed`].
#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Template {
    /// Source address specification
    pub src_addr: String,
    /// Source port specification
    pub src_port: String,
    /// Destination address specification
    pub dst_addr: String,
    /// Destination port specification
    pub dst_port: String,
    /// IP protocol specification
    pub proto: String,
    /// Host names along the flow's path, first hop first
    pub hops: Vec<String>,
    /// Number of times each expanded flow is emitted, 0 for no limit
    pub count: u32,
}
