//! TOML daemon configuration: which transports to start and with what
//! endpoints, plus router retention policy. Mirrors
//! `reticulumd::config::DaemonConfig`'s shape (a flat `Deserialize` struct
//! loaded once at startup, with `#[serde(default)]` filling in anything the
//! operator left out).

use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub transports: Vec<TransportConfig>,
    pub router: RouterPolicyConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            transports: vec![
                TransportConfig { kind: TransportKindConfig::NeighborDiscovery, enabled: true, bind: None },
                TransportConfig { kind: TransportKindConfig::PairedRadio, enabled: false, bind: None },
                TransportConfig { kind: TransportKindConfig::DirectIp, enabled: false, bind: None },
                TransportConfig { kind: TransportKindConfig::AudioBeacon, enabled: false, bind: None },
            ],
            router: RouterPolicyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKindConfig {
    NeighborDiscovery,
    PairedRadio,
    DirectIp,
    AudioBeacon,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    pub kind: TransportKindConfig,
    #[serde(default)]
    pub enabled: bool,
    /// Required for `direct-ip`; a `host:port` socket address to bind the
    /// listener to. Ignored by the other transport kinds.
    #[serde(default)]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterPolicyConfig {
    pub relay_replay_window_secs: u64,
    pub persistence_retention_secs: u64,
    pub retention_sweep_interval_secs: u64,
}

impl Default for RouterPolicyConfig {
    fn default() -> Self {
        let defaults = mesh_router::RouterConfig::default();
        Self {
            relay_replay_window_secs: defaults.relay_replay_window.as_secs(),
            persistence_retention_secs: defaults.persistence_retention.as_secs(),
            retention_sweep_interval_secs: defaults.retention_sweep_interval.as_secs(),
        }
    }
}

impl RouterPolicyConfig {
    pub fn to_router_config(&self) -> mesh_router::RouterConfig {
        mesh_router::RouterConfig {
            relay_replay_window: std::time::Duration::from_secs(self.relay_replay_window_secs),
            persistence_retention: std::time::Duration::from_secs(self.persistence_retention_secs),
            retention_sweep_interval: std::time::Duration::from_secs(self.retention_sweep_interval_secs),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(Self::from_toml(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_only_neighbor_discovery() {
        let config = DaemonConfig::default();
        let enabled: Vec<_> = config.transports.iter().filter(|t| t.enabled).collect();
        assert_eq!(enabled.len(), 1);
        assert!(matches!(enabled[0].kind, TransportKindConfig::NeighborDiscovery));
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let toml = r#"
            [[transports]]
            kind = "direct-ip"
            enabled = true
            bind = "0.0.0.0:7337"

            [router]
            relay_replay_window_secs = 3600
        "#;
        let config = DaemonConfig::from_toml(toml).expect("parse");
        assert_eq!(config.transports.len(), 1);
        assert_eq!(config.transports[0].bind.as_deref(), Some("0.0.0.0:7337"));
        assert_eq!(config.router.relay_replay_window_secs, 3600);
        // Fields left unset fall back to RouterConfig's own defaults.
        assert_eq!(
            config.router.persistence_retention_secs,
            mesh_router::RouterConfig::default().persistence_retention.as_secs()
        );
    }
}
