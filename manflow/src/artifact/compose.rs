//! Docker compose file with one service per configured host.
//!
//! Every host extends a common `nflow-base` service, differing only in its
//! `HOST_NAME` and its static address on a shared `10.0.0.0/16` network.

use std::{collections::BTreeMap, fs, path::Path};

use serde::Serialize;
use tracing::info;

use super::Error;
use crate::config::Config;

const BASE_SERVICE: &str = "nflow-base";
const NETWORK: &str = "nflow-network";
const SUBNET: &str = "10.0.0.0/16";
const IMAGE: &str = "manflow";
const CONTAINER_CONFIG: &str = "/app/config.json";

#[derive(Debug, Serialize)]
struct Compose {
    services: serde_yaml::Mapping,
    networks: BTreeMap<&'static str, Network>,
}

#[derive(Debug, Default, Serialize)]
struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extends: Option<Extends>,
    environment: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    networks: BTreeMap<&'static str, Attachment>,
    profiles: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct Extends {
    service: &'static str,
}

#[derive(Debug, Serialize)]
struct Attachment {
    ipv4_address: String,
}

#[derive(Debug, Serialize)]
struct Network {
    ipam: Ipam,
}

#[derive(Debug, Serialize)]
struct Ipam {
    driver: &'static str,
    config: Vec<Subnet>,
}

#[derive(Debug, Serialize)]
struct Subnet {
    subnet: &'static str,
}

/// Render the compose file for `config`, mounting `config_path` into every
/// container.
///
/// # Errors
///
/// Function will error if serialization fails.
pub fn render(config: &Config, config_path: &Path) -> Result<String, Error> {
    let mut services = serde_yaml::Mapping::new();

    let base = Service {
        image: Some(IMAGE),
        command: Some(vec!["run"]),
        environment: BTreeMap::from([("CONFIG_FILE", CONTAINER_CONFIG.to_string())]),
        volumes: vec![format!("./{}:{CONTAINER_CONFIG}", config_path.display())],
        profiles: vec![BASE_SERVICE],
        ..Service::default()
    };
    services.insert(BASE_SERVICE.into(), serde_yaml::to_value(base)?);

    for host in &config.hosts {
        let service = Service {
            extends: Some(Extends {
                service: BASE_SERVICE,
            }),
            environment: BTreeMap::from([("HOST_NAME", host.name.clone())]),
            networks: BTreeMap::from([(
                NETWORK,
                Attachment {
                    ipv4_address: host.ip.to_string(),
                },
            )]),
            profiles: vec!["nflow"],
            ..Service::default()
        };
        services.insert(format!("nflow-{}", host.name).into(), serde_yaml::to_value(service)?);
    }

    let compose = Compose {
        services,
        networks: BTreeMap::from([(
            NETWORK,
            Network {
                ipam: Ipam {
                    driver: "default",
                    config: vec![Subnet { subnet: SUBNET }],
                },
            },
        )]),
    };
    Ok(serde_yaml::to_string(&compose)?)
}

/// Write the compose file for `config` to `path`.
///
/// # Errors
///
/// Function will error if rendering or writing fails.
pub fn write(config: &Config, config_path: &Path, path: &Path) -> Result<(), Error> {
    fs::write(path, render(config, config_path)?)?;
    info!(path = %path.display(), hosts = config.hosts.len(), "Generated compose file.");
    Ok(())
}
