//! # Peer File
//!
//! TOML configuration shared by every peer of a deployment. Each peer picks
//! its own entry by row; all other entries become its initial registry.
//!
//! ```toml
//! [node]
//! name = "alpha"
//!
//! [timing]
//! bid_delay_ms = 5000
//! critical_section_min_ms = 10000
//! critical_section_max_ms = 13000
//! bid_timeout_ms = 0
//! connect_timeout_ms = 2000
//!
//! [[peers]]
//! address = "127.0.0.1"
//! port = 50050
//! name = "alpha"
//!
//! [[peers]]
//! address = "127.0.0.1"
//! port = 50051
//! name = "beta"
//! ```

use ra_mutual_exclusion::{PeerIdentity, ServiceConfig};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Name used when neither the CLI nor the file provides one.
pub const DEFAULT_PEER_NAME: &str = "peer";

/// Overrides the listening address (e.g. "0.0.0.0").
pub const ENV_BIND_ADDRESS: &str = "RA_BIND_ADDRESS";

/// Overrides `timing.bid_timeout_ms`.
pub const ENV_BID_TIMEOUT_MS: &str = "RA_BID_TIMEOUT_MS";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path of the file that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML or has the wrong shape.
    #[error("Failed to parse peer file: {0}")]
    Parse(#[from] toml::de::Error),

    /// `--row` points past the last entry.
    #[error("Row {row} not found ({entries} entries in peer file)")]
    RowNotFound {
        /// Requested row.
        row: usize,
        /// Entries in the file.
        entries: usize,
    },

    /// `--row` points at an entry that was skipped as malformed.
    #[error("Row {0} is malformed")]
    InvalidRow(usize),

    /// Critical section bounds are inverted.
    #[error("critical_section_min_ms ({min}) exceeds critical_section_max_ms ({max})")]
    InvalidTiming {
        /// Lower bound.
        min: u64,
        /// Upper bound.
        max: u64,
    },
}

/// `[node]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeSection {
    /// Display name of this peer.
    #[serde(default)]
    pub name: Option<String>,
    /// Address to listen on instead of the entry's own address.
    #[serde(default)]
    pub bind_address: Option<String>,
}

/// `[timing]` section. All values in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause between entering `Wanted` and sending the bid.
    pub bid_delay_ms: u64,
    /// Shortest stay in the critical section.
    pub critical_section_min_ms: u64,
    /// Longest stay in the critical section.
    pub critical_section_max_ms: u64,
    /// Give up on silent peers after this long. 0 waits forever.
    pub bid_timeout_ms: u64,
    /// Time allowed to open a connection to a peer.
    pub connect_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            bid_delay_ms: 5_000,
            critical_section_min_ms: 10_000,
            critical_section_max_ms: 13_000,
            bid_timeout_ms: 0,
            connect_timeout_ms: 2_000,
        }
    }
}

impl TimingConfig {
    /// Fan-out delay, `None` when zero.
    pub fn bid_delay(&self) -> Option<Duration> {
        (self.bid_delay_ms > 0).then(|| Duration::from_millis(self.bid_delay_ms))
    }

    /// Bid timeout, `None` when zero.
    pub fn bid_timeout(&self) -> Option<Duration> {
        (self.bid_timeout_ms > 0).then(|| Duration::from_millis(self.bid_timeout_ms))
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Critical section bounds.
    pub fn critical_section_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.critical_section_min_ms),
            Duration::from_millis(self.critical_section_max_ms),
        )
    }

    /// Runtime knobs for the exclusion service.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            bid_timeout: self.bid_timeout(),
            fanout_delay: self.bid_delay(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.critical_section_min_ms > self.critical_section_max_ms {
            return Err(ConfigError::InvalidTiming {
                min: self.critical_section_min_ms,
                max: self.critical_section_max_ms,
            });
        }
        Ok(())
    }
}

/// One `[[peers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerEntry {
    /// Host address.
    pub address: String,
    /// Listening port.
    pub port: u16,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl PeerEntry {
    fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(self.address.clone(), self.port, self.name.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    node: NodeSection,
    #[serde(default)]
    timing: TimingConfig,
    #[serde(default)]
    peers: Vec<toml::Value>,
}

/// Parsed peer file.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// `[node]` section.
    pub node: NodeSection,
    /// `[timing]` section.
    pub timing: TimingConfig,
    /// Peer entries by row. Malformed rows are `None`.
    entries: Vec<Option<PeerEntry>>,
}

/// Who we are and whom we talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Local identity.
    pub local: PeerIdentity,
    /// Every other well-formed entry.
    pub peers: Vec<PeerIdentity>,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.timing.validate()?;

        let entries = file
            .peers
            .into_iter()
            .enumerate()
            .map(|(row, value)| Self::parse_entry(row, value))
            .collect();

        Ok(Self {
            node: file.node,
            timing: file.timing,
            entries,
        })
    }

    fn parse_entry(row: usize, value: toml::Value) -> Option<PeerEntry> {
        let entry: PeerEntry = match value.try_into() {
            Ok(entry) => entry,
            Err(e) => {
                warn!(row, error = %e, "Skipping malformed peer entry");
                return None;
            }
        };
        if entry.address.trim().is_empty() || entry.port == 0 {
            warn!(
                row,
                address = %entry.address,
                port = entry.port,
                "Skipping peer entry without address or port"
            );
            return None;
        }
        Some(entry)
    }

    /// Number of rows, including malformed ones.
    pub fn rows(&self) -> usize {
        self.entries.len()
    }

    /// Well-formed entries, in file order.
    pub fn entries(&self) -> impl Iterator<Item = &PeerEntry> {
        self.entries.iter().flatten()
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup` (keys `RA_BIND_ADDRESS`,
    /// `RA_BID_TIMEOUT_MS`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(address) = lookup(ENV_BIND_ADDRESS) {
            info!(address = %address, "Bind address overridden from environment");
            self.node.bind_address = Some(address);
        }
        if let Some(raw) = lookup(ENV_BID_TIMEOUT_MS) {
            match raw.parse() {
                Ok(ms) => self.timing.bid_timeout_ms = ms,
                Err(_) => warn!(
                    value = %raw,
                    "{} must be a number of milliseconds",
                    ENV_BID_TIMEOUT_MS
                ),
            }
        }
    }

    /// Resolve the local peer from `row` and the initial registry from the
    /// other rows.
    ///
    /// The local name is, in order: `name_override`, `[node].name`, the
    /// entry's own name, `"peer"`.
    pub fn topology(
        &self,
        row: usize,
        name_override: Option<&str>,
    ) -> Result<Topology, ConfigError> {
        let entry = self
            .entries
            .get(row)
            .ok_or(ConfigError::RowNotFound {
                row,
                entries: self.entries.len(),
            })?
            .as_ref()
            .ok_or(ConfigError::InvalidRow(row))?;

        let name = name_override
            .map(str::to_owned)
            .or_else(|| self.node.name.clone())
            .filter(|n| !n.is_empty())
            .or_else(|| Some(entry.name.clone()).filter(|n| !n.is_empty()))
            .unwrap_or_else(|| DEFAULT_PEER_NAME.to_owned());
        let local = PeerIdentity::new(entry.address.clone(), entry.port, name);

        let peers = self
            .entries
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != row)
            .filter_map(|(_, entry)| entry.as_ref())
            .map(PeerEntry::identity)
            .filter(|identity| *identity != local)
            .collect();

        Ok(Topology { local, peers })
    }

    /// Address the server listens on for `local`.
    pub fn bind_endpoint(&self, local: &PeerIdentity) -> String {
        match &self.node.bind_address {
            Some(address) => format!("{}:{}", address, local.port),
            None => local.endpoint(),
        }
    }
}
