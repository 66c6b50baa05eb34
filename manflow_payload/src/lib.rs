//! The manflow payloads
//!
//! This library holds the wire formats spoken by the manflow generator. At
//! present that is `NetFlow` v5 only: a fixed 24 byte header followed by up to
//! thirty fixed 48 byte flow records, every integer in network byte order.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use std::io;

pub mod netflow;

pub use netflow::{Header, Packet, Record};

/// Errors related to encoding and decoding payloads
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO operation failed
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),
    /// More records were handed to a packet than the format allows.
    #[error("NetFlow v5 packets carry at most {max} records, {count} given")]
    TooManyRecords {
        /// Number of records given.
        count: usize,
        /// Format maximum.
        max: usize,
    },
    /// Input ended before a complete header or record could be read.
    #[error("Truncated packet: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes remaining in the input.
        available: usize,
    },
    /// Version field did not match.
    #[error("Unsupported NetFlow version {0}")]
    Version(u16),
    /// Trailing bytes after the last record announced by the header.
    #[error("{0} trailing bytes after final record")]
    Trailing(usize),
}
