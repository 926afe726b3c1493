//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

pub mod exit_codes;
mod logging;

pub use logging::{initialize_logging, install_default_logfile_config};

pub const DEFAULT_LOG_CONFIG: &str = "log4rs.yml";
