use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    process,
};

use clap::{Args, Parser, Subcommand};
use manflow::{
    artifact,
    config::{self, Config},
    generator::{self, Generator},
    hosts::{self, HostTable},
    sink::{self, Sink},
    stats, telemetry,
};
use metrics_exporter_prometheus::BuildError;
use tokio::{runtime::Builder, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Generator(#[from] generator::Error),
    #[error(transparent)]
    Hosts(#[from] hosts::Error),
    #[error("Failed to open transport: {0}")]
    Sink(#[from] sink::Error),
    #[error("Failed to generate file: {0}")]
    Artifact(#[from] artifact::Error),
    #[error("Failed to export stats: {0}")]
    Stats(#[from] stats::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] BuildError),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit flows as one host of the configured topology
    Run(RunCommand),
    /// Validate configuration file and exit
    ConfigCheck(ConfigArgs),
    /// Write a docker compose file with one service per configured host
    GenComposeFile(GenCommand),
    /// Write a Prometheus file service discovery target list
    GenTargetsFile(TargetsCommand),
    /// Write the topology traced by the configured flows as CSV
    GenGraphFile(GenCommand),
}

#[derive(Args)]
struct ConfigArgs {
    /// path on disk to the configuration file
    #[clap(long, env = "CONFIG_FILE", default_value = config::DEFAULT_PATH)]
    config_path: PathBuf,
}

#[derive(Args)]
struct RunCommand {
    #[command(flatten)]
    config: ConfigArgs,
    /// name of the host, as used in flow hops, this process plays
    #[clap(long, env = "HOST_NAME")]
    host_name: Option<String>,
    /// encode everything but send nothing
    #[clap(long)]
    simulate: bool,
    /// path to write per-flow counters to at the end of the run
    #[clap(long)]
    stats_out_file: Option<PathBuf>,
    /// address to expose Prometheus metrics on
    #[clap(long, default_value = "0.0.0.0:2112")]
    prometheus_addr: SocketAddr,
    /// do not expose Prometheus metrics
    #[clap(long)]
    disable_metrics: bool,
}

#[derive(Args)]
struct GenCommand {
    #[command(flatten)]
    config: ConfigArgs,
    /// path to write the generated file to
    path: PathBuf,
}

#[derive(Args)]
struct TargetsCommand {
    #[command(flatten)]
    config: ConfigArgs,
    /// path to write the generated file to
    path: PathBuf,
    /// port each host exposes metrics on
    #[clap(long, default_value_t = 2112)]
    metrics_port: u16,
}

fn load(path: &Path) -> Result<Config, Error> {
    info!(path = %path.display(), "Loading configuration.");
    Config::load(path).map_err(|err| {
        error!("Configuration validation failed: {err}");
        Error::Config(err)
    })
}

fn config_check(path: &Path) -> Result<(), Error> {
    let config = load(path)?;
    config.max_tick()?;
    let (flows, _) = generator::resolve(&config, "")?;
    if let Err(err) = HostTable::new(&config.hosts).and_then(|hosts| hosts.check_topology(&flows)) {
        error!("Configuration validation failed: {err}");
        return Err(err.into());
    }
    info!(flows = flows.len(), "Configuration file is valid");
    Ok(())
}

async fn shutdown() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("Unable to listen for ctrl-c, running until completion: {err}");
        std::future::pending::<()>().await;
    }
    info!("received ctrl-c");
}

async fn inner_main(cmd: RunCommand, config: Config) -> Result<(), Error> {
    let host_name = cmd.host_name.unwrap_or_default();
    if !cmd.disable_metrics {
        telemetry::install_prometheus(cmd.prometheus_addr, &host_name)?;
        info!(addr = %cmd.prometheus_addr, "Prometheus exporter listening.");
    }

    let generator = Generator::new(&config, &host_name)?;
    let mut sink: Box<dyn Sink + Send> = if cmd.simulate {
        info!("Simulating, no datagram will be sent.");
        Box::new(sink::Null)
    } else if generator.enabled() == 0 {
        Box::new(sink::Null)
    } else {
        let udp = sink::Udp::connect(&config.collector()?).await?;
        info!(collector = %udp.peer(), "Sending to collector.");
        Box::new(udp)
    };

    let summary = generator.spin(&mut *sink, shutdown()).await?;
    summary.log();
    if let Some(path) = cmd.stats_out_file {
        summary.write_json(&path)?;
        info!(path = %path.display(), "Wrote stats file.");
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(cmd) => {
            info!("Starting manflow {version} run.");
            let config = load(&cmd.config.config_path)?;
            let runtime = Builder::new_multi_thread()
                .enable_io()
                .enable_time()
                .build()?;
            let res = runtime.block_on(inner_main(cmd, config));
            if let Err(err) = &res {
                error!("Run failed: {err}");
            }
            info!("Bye. :)");
            res
        }
        Commands::ConfigCheck(args) => match config_check(&args.config_path) {
            Ok(()) => process::exit(0),
            Err(_) => process::exit(1),
        },
        Commands::GenComposeFile(cmd) => {
            let config = load(&cmd.config.config_path)?;
            artifact::compose::write(&config, &cmd.config.config_path, &cmd.path)?;
            Ok(())
        }
        Commands::GenTargetsFile(cmd) => {
            let config = load(&cmd.config.config_path)?;
            artifact::targets::write(&config.hosts, cmd.metrics_port, &cmd.path)?;
            Ok(())
        }
        Commands::GenGraphFile(cmd) => {
            let config = load(&cmd.config.config_path)?;
            let (flows, _) = generator::resolve(&config, "")?;
            artifact::graph::write(&flows, &cmd.path)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "manflow",
            "run",
            "--config-path",
            "/tmp/flows.json",
            "--host-name",
            "A",
            "--simulate",
            "--disable-metrics",
        ])
        .unwrap();
        let Commands::Run(cmd) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(cmd.config.config_path, PathBuf::from("/tmp/flows.json"));
        assert_eq!(cmd.host_name.as_deref(), Some("A"));
        assert!(cmd.simulate);
        assert!(cmd.disable_metrics);
        assert_eq!(cmd.prometheus_addr, "0.0.0.0:2112".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn config_check_reports_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.json");

        std::fs::write(&path, r#"{"flows": [{"src_port": "9-1"}]}"#).unwrap();
        assert!(config_check(&path).is_err());

        std::fs::write(&path, r#"{"seed": 1, "flows": [{"src_port": "1-9", "hops": ["A"]}]}"#).unwrap();
        assert!(config_check(&path).is_ok());

        // host A would fail to resolve its next hop at run time
        std::fs::write(
            &path,
            r#"{"seed": 1, "hosts": [{"name": "A", "ip": "10.0.0.2"}], "flows": [{"hops": ["A", "B"]}]}"#,
        )
        .unwrap();
        assert!(matches!(
            config_check(&path),
            Err(Error::Hosts(hosts::Error::UnresolvedHop { flow: 0, .. }))
        ));
    }
}
