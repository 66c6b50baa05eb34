//! The manflow mock `NetFlow` generator.
//!
//! This library supports the manflow binary found elsewhere in this project.
//! A run expands user-authored flow templates into concrete flows, seeds every
//! unset field from a shared deterministic random stream and then emits the
//! flows this host participates in as `NetFlow` v5 datagrams on a fixed tick
//! schedule. Several manflow processes given the same configuration and seed
//! agree on every flow's attributes without talking to each other, each one
//! playing a single hop of the flows' simulated paths.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod artifact;
pub mod config;
pub mod encoder;
pub mod flow;
pub mod generator;
pub mod hosts;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod telemetry;
