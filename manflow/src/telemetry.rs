//! Counters published by the scheduler and the Prometheus endpoint that
//! exposes them.

use std::{fmt, net::SocketAddr};

use metrics::{Counter, Unit, counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Datagrams handed to the sink.
pub const SENT_NETFLOW: &str = "nflow_generator_sent_netflow_total";
/// Records across those datagrams.
pub const SENT_RECORDS: &str = "nflow_generator_sent_records_total";
/// Bytes across those datagrams.
pub const SENT_BYTES: &str = "nflow_generator_sent_records_total_bytes";
/// Datagrams the sink failed to send.
pub const REQUEST_FAILURE: &str = "request_failure";
/// Batches dropped because they could not be encoded.
pub const ENCODE_FAILURE: &str = "encode_failure";

/// Handles to every counter the scheduler increments.
///
/// Handles are bound to whichever recorder is installed when
/// [`Counters::register`] runs.
#[derive(Clone)]
pub struct Counters {
    /// See [`SENT_NETFLOW`]
    pub sent_netflow: Counter,
    /// See [`SENT_RECORDS`]
    pub sent_records: Counter,
    /// See [`SENT_BYTES`]
    pub sent_bytes: Counter,
    /// See [`REQUEST_FAILURE`]
    pub request_failure: Counter,
    /// See [`ENCODE_FAILURE`]
    pub encode_failure: Counter,
}

impl fmt::Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counters").finish_non_exhaustive()
    }
}

impl Counters {
    /// Register every counter with the current recorder.
    #[must_use]
    pub fn register() -> Self {
        describe_counter!(SENT_NETFLOW, "The total number of netflow packets sent");
        describe_counter!(SENT_RECORDS, "The total number of netflow records sent");
        describe_counter!(
            SENT_BYTES,
            Unit::Bytes,
            "The total number of netflow packet bytes sent"
        );
        Self {
            sent_netflow: counter!(SENT_NETFLOW),
            sent_records: counter!(SENT_RECORDS),
            sent_bytes: counter!(SENT_BYTES),
            request_failure: counter!(REQUEST_FAILURE),
            encode_failure: counter!(ENCODE_FAILURE),
        }
    }
}

/// Install the Prometheus exporter on `addr`, every series labeled with the
/// running host's name. Must be called from within a tokio runtime.
///
/// # Errors
///
/// Function will error if the exporter cannot bind or a recorder is already
/// installed.
pub fn install_prometheus(addr: SocketAddr, host_name: &str) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("host", host_name)
        .install()
}
