//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[clap(author, version, about = "Lumen validator node")]
pub struct Cli {
    /// Directory holding configuration, logs and extracted binaries.
    #[clap(long, short = 'b', env = "LUMEN_BASE_DIR", default_value = ".lumen")]
    pub base_dir: PathBuf,
    /// Path to the node configuration file, relative to the base directory
    /// unless absolute.
    #[clap(long, short = 'c', default_value = "config.toml")]
    pub config: PathBuf,
    /// Path to the log4rs configuration file, relative to the base directory
    /// unless absolute.
    #[clap(long, default_value = "log4rs.yml")]
    pub log_config: PathBuf,
    /// Override the configured halt height.
    #[clap(long)]
    pub halt_height: Option<u64>,
    /// Override the configured halt time (unix seconds).
    #[clap(long)]
    pub halt_time: Option<u64>,
    /// Serve RPC only, skipping local consensus participation.
    #[clap(long)]
    pub grpc_only: bool,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.relative_to_base(&self.config)
    }

    pub fn log_config_path(&self) -> PathBuf {
        self.relative_to_base(&self.log_config)
    }

    fn relative_to_base(&self, path: &PathBuf) -> PathBuf {
        if path.is_absolute() {
            path.clone()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn relative_paths_resolve_under_base_dir() {
        let cli = Cli::parse_from(["lumen_node", "--base-dir", "/data/lumen"]);
        assert_eq!(cli.config_path(), PathBuf::from("/data/lumen/config.toml"));
        assert_eq!(cli.log_config_path(), PathBuf::from("/data/lumen/log4rs.yml"));
    }

    #[test]
    fn absolute_paths_win() {
        let cli = Cli::parse_from(["lumen_node", "--config", "/etc/lumen/node.toml"]);
        assert_eq!(cli.config_path(), PathBuf::from("/etc/lumen/node.toml"));
    }

    #[test]
    fn halt_overrides_parse() {
        let cli = Cli::parse_from(["lumen_node", "--halt-height", "100", "--halt-time", "1700000000"]);
        assert_eq!(cli.halt_height, Some(100));
        assert_eq!(cli.halt_time, Some(1_700_000_000));
        assert!(!cli.grpc_only);
    }

    #[test]
    fn grpc_only_parses() {
        let cli = Cli::parse_from(["lumen_node", "--grpc-only"]);
        assert!(cli.grpc_only);
    }
}
