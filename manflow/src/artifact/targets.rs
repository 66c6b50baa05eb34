//! Prometheus file service discovery targets, one per configured host.

use std::{fs, path::Path};

use serde::Serialize;
use tracing::info;

use super::Error;
use crate::hosts::Host;

#[derive(Debug, Serialize)]
struct Target {
    targets: Vec<String>,
    labels: Labels,
}

#[derive(Debug, Serialize)]
struct Labels {
    ip: String,
    name: String,
}

/// Render the targets of `hosts`, each scraped on `metrics_port`.
///
/// # Errors
///
/// Function will error if serialization fails.
pub fn render(hosts: &[Host], metrics_port: u16) -> Result<String, Error> {
    let targets: Vec<Target> = hosts
        .iter()
        .map(|host| Target {
            targets: vec![format!("{}:{metrics_port}", host.ip)],
            labels: Labels {
                ip: host.ip.to_string(),
                name: host.name.clone(),
            },
        })
        .collect();
    Ok(serde_json::to_string_pretty(&targets)?)
}

/// Write the targets of `hosts` to `path`.
///
/// # Errors
///
/// Function will error if rendering or writing fails.
pub fn write(hosts: &[Host], metrics_port: u16, path: &Path) -> Result<(), Error> {
    fs::write(path, render(hosts, metrics_port)?)?;
    info!(path = %path.display(), hosts = hosts.len(), "Generated targets file.");
    Ok(())
}
