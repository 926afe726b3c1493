//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

use std::path::{Path, PathBuf};

use lumen_common::exit_codes::{ExitCode, ExitError};
use serde::Deserialize;

/// Node configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Address the node serves the consensus protocol on.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Halt before finalizing this height. 0 disables.
    #[serde(default)]
    pub halt_height: u64,
    /// Halt before finalizing any block with a time at or past this unix
    /// timestamp. 0 disables.
    #[serde(default)]
    pub halt_time: u64,
    /// App version in effect at the last committed height. 0 for a fresh
    /// chain; the first info exchange corrects it otherwise.
    #[serde(default)]
    pub initial_app_version: u64,
    /// Serve RPC only, skipping local consensus participation. Forwarded to
    /// embedded binaries as `--grpc-only`.
    #[serde(default)]
    pub grpc_only: bool,
    #[serde(default, rename = "embedded_version")]
    pub embedded_versions: Vec<EmbeddedVersionConfig>,
}

/// One embedded application version entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddedVersionConfig {
    pub app_version: u64,
    /// `legacy` or `current`.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Gzipped tar archive holding the binary.
    pub archive: PathBuf,
    /// Address the binary serves its application protocol on once started.
    pub address: String,
    #[serde(default)]
    pub start_args: Vec<String>,
    /// Subcommand invocations run before the binary starts.
    #[serde(default)]
    pub pre_launch_actions: Vec<Vec<String>>,
}

fn default_listen_address() -> String {
    "127.0.0.1:26658".to_string()
}

fn default_protocol() -> String {
    "current".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            halt_height: 0,
            halt_time: 0,
            initial_app_version: 0,
            grpc_only: false,
            embedded_versions: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Loads the configuration file, or the defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ExitError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ExitError::new(ExitCode::IoError, format!("could not read {}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| ExitError::new(ExitCode::ConfigError, format!("{}: {}", path.display(), e)))
    }
}
