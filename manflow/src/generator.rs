//! Assembly of a run.
//!
//! [`Generator`] takes a validated configuration and the name of the host to
//! play, runs the flow pipeline end to end and owns the scheduler that emits
//! the result. Everything that can be wrong with the configuration is found
//! in [`Generator::new`], before a packet is sent.

use std::{
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::{
    config::{self, Config},
    encoder::Encoder,
    flow::{self, ResolvedFlow},
    hosts::{self, HostTable},
    scheduler::{self, Scheduler},
    sink::Sink,
    stats::Summary,
};

/// Errors produced by [`Generator`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// See [`config::Error`]
    #[error(transparent)]
    Config(#[from] config::Error),
    /// See [`flow::Error`]
    #[error(transparent)]
    Flow(#[from] flow::Error),
    /// See [`hosts::Error`]
    #[error(transparent)]
    Hosts(#[from] hosts::Error),
    /// See [`scheduler::Error`]
    #[error(transparent)]
    Scheduler(#[from] scheduler::Error),
}

/// Expand and seed every flow of `config` as `host_name` sees them. Returns
/// the shared random stream positioned after seeding.
///
/// Every host computes the same flows. Only `host_index` differs between
/// hosts.
///
/// # Errors
///
/// Function will error if a template does not expand.
pub fn resolve(config: &Config, host_name: &str) -> Result<(Vec<ResolvedFlow>, StdRng), Error> {
    let mut rng = config.rng();
    let expanded = flow::expand(&config.flows)?;
    let flows = flow::seed(expanded, &mut rng, host_name, config.flow_timeout());
    info!(
        templates = config.flows.len(),
        flows = flows.len(),
        "Expanded flow templates."
    );
    Ok((flows, rng))
}

/// A fully prepared run for one host.
#[derive(Debug)]
pub struct Generator {
    scheduler: Scheduler,
    enabled: usize,
    align_start: Duration,
}

impl Generator {
    /// Prepare a run of `config` as `host_name`.
    ///
    /// # Errors
    ///
    /// Function will error if no host name is given, a template does not
    /// expand, the tick cycle is invalid or an enabled flow's next hop does
    /// not resolve.
    pub fn new(config: &Config, host_name: &str) -> Result<Self, Error> {
        if host_name.is_empty() {
            return Err(config::Error::MissingHostName.into());
        }
        let hosts = HostTable::new(&config.hosts)?;
        if hosts.resolve(host_name).is_none() {
            warn!(host_name, "Running host is not in the host table.");
        }
        let max_tick = config.max_tick()?;
        let interval = config.tick_interval()?;

        let (flows, rng) = resolve(config, host_name)?;
        let enabled = flow::enabled(&flows);
        hosts.check(&flows, &enabled)?;

        for &index in &enabled {
            let flow = &flows[index];
            info!(
                host_name,
                src = %flow.src_addr,
                src_port = flow.src_port,
                dst = %flow.dst_addr,
                dst_port = flow.dst_port,
                proto = flow.proto,
                tick = flow.tick,
                count = flow.count,
                "Flow enabled."
            );
        }
        info!(
            host_name,
            active = enabled.len(),
            expected_flow_rate = enabled.len() as f64 / f64::from(config.flow_timeout().get()),
            "Flows ready."
        );

        let encoder = Encoder::new(hosts, config.tick_interval_ms, config.false_index);
        let enabled_count = enabled.len();
        let scheduler = Scheduler::new(flows, enabled, rng, encoder, max_tick, interval);

        Ok(Self {
            scheduler,
            enabled: enabled_count,
            align_start: Duration::from_secs(u64::from(config.align_start_seconds)),
        })
    }

    /// Number of flows this host emits.
    #[must_use]
    pub fn enabled(&self) -> usize {
        self.enabled
    }

    /// Run to completion or until `shutdown` resolves.
    ///
    /// The first tick is delayed to the next wall clock multiple of the
    /// configured alignment so that hosts started together tick together.
    ///
    /// # Errors
    ///
    /// Function will error if an enabled flow's next hop does not resolve.
    pub async fn spin<S, F>(self, sink: &mut S, shutdown: F) -> Result<Summary, Error>
    where
        S: Sink + ?Sized,
        F: Future<Output = ()>,
    {
        if self.enabled == 0 {
            info!("No flows configured for this host.");
            return Ok(self.scheduler.summary());
        }
        tokio::pin!(shutdown);

        if !self.align_start.is_zero() {
            let since_epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            let delay = alignment_delay(since_epoch, self.align_start);
            info!(delay_ms = delay.as_millis(), "Aligning start.");
            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                () = &mut shutdown => {
                    info!("shutdown signal received");
                    return Ok(self.scheduler.summary());
                }
            }
        }

        info!("Sending flows.");
        Ok(self.scheduler.run(sink, shutdown).await?)
    }
}

/// Time from `now` until the next multiple of `align`. A full `align` when
/// `now` is already on a boundary.
#[allow(clippy::cast_possible_truncation)]
fn alignment_delay(now: Duration, align: Duration) -> Duration {
    let align_ns = align.as_nanos();
    if align_ns == 0 {
        return Duration::ZERO;
    }
    let remaining = align_ns - now.as_nanos() % align_ns;
    // remaining never exceeds align, which came from a Duration
    Duration::from_nanos(remaining as u64)
}

#[cfg(test)]
mod test {
    use std::{net::Ipv4Addr, path::Path};

    use super::*;
    use crate::sink;

    fn config(contents: &str) -> Config {
        Config::parse(contents, Path::new("test.json")).unwrap()
    }

    const TOPOLOGY: &str = r#"
{
  "seed": 9,
  "flow_timeout": 2,
  "align_start_seconds": 0,
  "hosts": [
    {"name": "A", "ip": "10.0.0.2"},
    {"name": "B", "ip": "10.0.0.3"},
    {"name": "C", "ip": "10.0.0.4"}
  ],
  "flows": [
    {"src_addr": "172.16.0.0/30", "dst_addr": "10.9.0.1", "hops": ["A", "B"], "count": 2},
    {"dst_port": "53", "proto": "17", "hops": ["C"], "count": 1}
  ]
}
"#;

    #[test]
    fn alignment_delay_reaches_next_boundary() {
        let ten = Duration::from_secs(10);
        assert_eq!(alignment_delay(Duration::from_millis(123_400), ten), Duration::from_millis(6_600));
        assert_eq!(alignment_delay(Duration::from_secs(120), ten), ten);
        assert_eq!(alignment_delay(Duration::from_secs(5), Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn host_name_is_required() {
        assert!(matches!(
            Generator::new(&config(TOPOLOGY), ""),
            Err(Error::Config(config::Error::MissingHostName))
        ));
    }

    #[test]
    fn hosts_enable_their_own_flows() {
        let config = config(TOPOLOGY);
        assert_eq!(Generator::new(&config, "A").unwrap().enabled(), 2);
        assert_eq!(Generator::new(&config, "B").unwrap().enabled(), 2);
        assert_eq!(Generator::new(&config, "C").unwrap().enabled(), 1);
        assert_eq!(Generator::new(&config, "Z").unwrap().enabled(), 0);
    }

    #[test]
    fn resolution_is_host_agnostic() {
        let config = config(TOPOLOGY);
        let (a, _) = resolve(&config, "A").unwrap();
        let (c, _) = resolve(&config, "C").unwrap();
        assert_eq!(a.len(), 3);
        for (a, c) in a.iter().zip(&c) {
            assert_eq!((a.src_addr, a.dst_port, a.tick), (c.src_addr, c.dst_port, c.tick));
        }
        assert_eq!(a[0].src_addr, Ipv4Addr::new(172, 16, 0, 1));
        assert_eq!(a[2].dst_port, 53);
    }

    #[test]
    fn unresolvable_next_hop_aborts_before_sending() {
        let contents = r#"
{
  "seed": 9,
  "hosts": [{"name": "A", "ip": "10.0.0.2"}],
  "flows": [{"hops": ["A", "B"]}]
}
"#;
        let config = config(contents);
        assert!(matches!(
            Generator::new(&config, "A"),
            Err(Error::Hosts(hosts::Error::UnresolvedHop { flow: 0, .. }))
        ));
        // B is the final hop and has nothing to resolve
        assert!(Generator::new(&config, "B").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn spin_runs_each_host_to_completion() {
        let config = config(TOPOLOGY);
        let summary = Generator::new(&config, "A")
            .unwrap()
            .spin(&mut sink::Null, std::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!(summary.total.len(), 2);
        assert!(summary.total.iter().all(|f| f.emitted_count == 2));

        let summary = Generator::new(&config, "Z")
            .unwrap()
            .spin(&mut sink::Null, std::future::pending::<()>())
            .await
            .unwrap();
        assert!(summary.total.is_empty());
    }
}
