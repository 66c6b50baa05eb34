//! This module controls configuration parsing from the end user. Every
//! configuration mistake manflow can detect is detected here or in the flow
//! expansion that immediately follows, before a single packet is sent.
use std::{
    fs, io,
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::Duration,
};

use rand::{SeedableRng, rngs::StdRng};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{flow, hosts};

/// Path consulted when neither `--config-path` nor `CONFIG_FILE` is given.
pub const DEFAULT_PATH: &str = "flowConfig.json";
/// Flow timeout substituted for a zero or absent `flow_timeout`.
pub const DEFAULT_FLOW_TIMEOUT: NonZeroU32 = NonZeroU32::new(60).unwrap();

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Error deserializing the config file
    #[error("Failed to deserialize config file {path:?}: {source}")]
    Json {
        /// File path
        path: PathBuf,
        /// Underlying serde error
        #[source]
        source: Box<serde_json::Error>,
    },
    /// The host table is inconsistent
    #[error("Invalid host table in {path:?}: {source}")]
    Hosts {
        /// File path
        path: PathBuf,
        /// Underlying host table error
        #[source]
        source: hosts::Error,
    },
    /// `tick_interval_ms` is zero
    #[error("tick_interval_ms must be non-zero")]
    ZeroTickInterval,
    /// The tick cycle holds no ticks
    #[error("flow_timeout of {flow_timeout}s is shorter than one {tick_interval_ms}ms tick")]
    EmptyCycle {
        /// Configured flow timeout, seconds
        flow_timeout: u32,
        /// Configured tick interval, milliseconds
        tick_interval_ms: u32,
    },
    /// No host name was given to run as
    #[error("No host name given, set HOST_NAME or pass --host-name")]
    MissingHostName,
    /// No collector was configured and the run is not simulated
    #[error("collector_ip and collector_port must be set unless simulating")]
    MissingCollector,
}

fn default_flow_timeout() -> u32 {
    DEFAULT_FLOW_TIMEOUT.get()
}

fn default_tick_interval() -> u32 {
    1_000
}

fn default_align_start() -> u32 {
    10
}

/// Main configuration struct for this program
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Seed shared by every cooperating host. Zero seeds from OS entropy and
    /// hosts will not agree.
    #[serde(default)]
    pub seed: u64,
    /// Length of the tick cycle in seconds. Zero is treated as the default.
    #[serde(default = "default_flow_timeout")]
    pub flow_timeout: u32,
    /// Duration of one tick in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u32,
    /// Address of the collector datagrams are sent to
    #[serde(default)]
    pub collector_ip: String,
    /// Port of the collector datagrams are sent to
    #[serde(default)]
    pub collector_port: u16,
    /// Derive SNMP interface indexes from the address ordering
    #[serde(default)]
    pub false_index: bool,
    /// Delay the first tick to the next wall clock multiple of this many
    /// seconds. Zero disables alignment.
    #[serde(default = "default_align_start")]
    pub align_start_seconds: u32,
    /// The host resolution table
    #[serde(default)]
    pub hosts: Vec<hosts::Host>,
    /// The flow templates
    #[serde(default)]
    pub flows: Vec<flow::Template>,
}

impl Config {
    /// Read and validate the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read, is not valid JSON for
    /// this struct or fails validation.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::parse(&contents, path)
    }

    /// Parse and validate configuration text. `origin` is reported in errors.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn parse(contents: &str, origin: &Path) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(contents).map_err(|source| Error::Json {
            path: origin.to_path_buf(),
            source: Box::new(source),
        })?;
        config.validate(origin)?;
        Ok(config)
    }

    fn validate(&self, origin: &Path) -> Result<(), Error> {
        hosts::HostTable::new(&self.hosts).map_err(|source| Error::Hosts {
            path: origin.to_path_buf(),
            source,
        })?;
        let max_tick = self.max_tick()?.get();
        if max_tick < self.flow_timeout().get() {
            warn!(
                max_tick,
                flow_timeout = self.flow_timeout().get(),
                "Tick cycle is shorter than the flow timeout, flows assigned to later ticks will never be sent."
            );
        }
        Ok(())
    }

    /// The flow timeout with zero replaced by the default.
    #[must_use]
    pub fn flow_timeout(&self) -> NonZeroU32 {
        NonZeroU32::new(self.flow_timeout).unwrap_or(DEFAULT_FLOW_TIMEOUT)
    }

    /// The tick interval.
    ///
    /// # Errors
    ///
    /// Function will error if the interval is zero.
    pub fn tick_interval(&self) -> Result<Duration, Error> {
        if self.tick_interval_ms == 0 {
            return Err(Error::ZeroTickInterval);
        }
        Ok(Duration::from_millis(u64::from(self.tick_interval_ms)))
    }

    /// Number of ticks in one cycle, `flow_timeout * 1000 / tick_interval_ms`.
    ///
    /// # Errors
    ///
    /// Function will error if the interval is zero or the cycle holds no
    /// ticks.
    pub fn max_tick(&self) -> Result<NonZeroU32, Error> {
        self.tick_interval()?;
        let flow_timeout = self.flow_timeout().get();
        let ticks = u64::from(flow_timeout) * 1_000 / u64::from(self.tick_interval_ms);
        NonZeroU32::new(u32::try_from(ticks).unwrap_or(u32::MAX)).ok_or(Error::EmptyCycle {
            flow_timeout,
            tick_interval_ms: self.tick_interval_ms,
        })
    }

    /// The shared random stream every cooperating host draws from.
    #[must_use]
    pub fn rng(&self) -> StdRng {
        if self.seed == 0 {
            warn!("No seed configured, seeding from OS entropy. Hosts will not agree on flows.");
            StdRng::from_os_rng()
        } else {
            info!(seed = self.seed, "Seeding shared random stream.");
            StdRng::seed_from_u64(self.seed)
        }
    }

    /// The collector as `ip:port`.
    ///
    /// # Errors
    ///
    /// Function will error if either half is unset.
    pub fn collector(&self) -> Result<String, Error> {
        if self.collector_ip.is_empty() || self.collector_port == 0 {
            return Err(Error::MissingCollector);
        }
        Ok(format!("{}:{}", self.collector_ip, self.collector_port))
    }
}
