//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

use clap::Parser;
use lumen_common::{exit_codes::ExitError, initialize_logging};
use lumen_node::{cli::Cli, run_node};

const LOG_CONFIG_SAMPLE: &str = include_str!("../log4rs_sample.yml");

fn main() {
    match main_inner() {
        Ok(()) => {},
        Err(err) => {
            eprintln!("Exiting with code {}: {}", err.exit_code.as_i32(), err.details);
            if let Some(hint) = err.exit_code.hint() {
                eprintln!();
                eprintln!("{}", hint);
            }
            std::process::exit(err.exit_code.as_i32());
        },
    }
}

fn main_inner() -> Result<(), ExitError> {
    let cli = Cli::parse();

    let log_dir = cli.base_dir.join("log");
    initialize_logging(&cli.log_config_path(), &log_dir, LOG_CONFIG_SAMPLE);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            ExitError::new(
                lumen_common::exit_codes::ExitCode::UnknownError,
                format!("could not create runtime: {}", e),
            )
        })?;
    runtime.block_on(run_node(cli))
}
