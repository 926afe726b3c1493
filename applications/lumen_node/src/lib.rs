//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

pub mod cli;
pub mod config;

use std::sync::Arc;

use log::*;
use lumen_common::exit_codes::{ExitCode, ExitError};
use lumen_multiplexer::{
    AbciServer,
    Appd,
    HaltConditions,
    Multiplexer,
    MultiplexerConfig,
    ProtocolVariant,
    Version,
    Versions,
};
use lumen_shutdown::Shutdown;
use nix::sys::signal::{kill, signal, SigHandler, Signal};

use crate::{cli::Cli, config::NodeConfig};

const LOG_TARGET: &str = "lumen::node";

pub async fn run_node(cli: Cli) -> Result<(), ExitError> {
    let config = NodeConfig::load_from(&cli.config_path())?;
    let mux_config = MultiplexerConfig {
        initial_app_version: config.initial_app_version,
        halt: HaltConditions {
            halt_height: cli.halt_height.unwrap_or(config.halt_height),
            halt_time: cli.halt_time.unwrap_or(config.halt_time),
        },
        grpc_only: cli.grpc_only || config.grpc_only,
    };

    let node_args: Vec<String> = std::env::args().skip(1).collect();
    let versions = build_registry(&config, &node_args, mux_config.grpc_only).await?;
    let mut shutdown = Shutdown::new();

    // No natively linked application ships in this binary; every served app
    // version must come from the registry.
    let multiplexer = Arc::new(Multiplexer::new(versions, None, mux_config));

    let server = AbciServer::bind(&*config.listen_address, multiplexer.clone())
        .await
        .map_err(|e| {
            ExitError::new(
                ExitCode::IoError,
                format!("could not listen on {}: {}", config.listen_address, e),
            )
        })?;
    let server_task = tokio::spawn(server.serve(shutdown.to_signal()));

    info!(
        target: LOG_TARGET,
        "Node started, serving the consensus protocol on {}", config.listen_address
    );

    let received = wait_for_signal().await;
    info!(target: LOG_TARGET, "{} received, shutting down", received);
    shutdown.trigger();

    if let Err(err) = multiplexer.cleanup().await {
        error!(target: LOG_TARGET, "Cleanup finished with errors: {}", err);
    }
    let _ = server_task.await;

    // Re-raise so the exit status reflects the signal that stopped us.
    reraise(received);
    Ok(())
}

/// Arguments handed to an embedded binary's `start` invocation: the entry's
/// configured arguments, then the node's own command line minus the program
/// name so shared flags reach the binary, then `--grpc-only` when requested
/// and not already forwarded.
fn embedded_start_args(configured: &[String], node_args: &[String], grpc_only: bool) -> Vec<String> {
    let mut args = configured.to_vec();
    args.extend(node_args.iter().cloned());
    if grpc_only && !args.iter().any(|arg| arg == "--grpc-only") {
        args.push("--grpc-only".to_string());
    }
    args
}

/// Builds the version registry from configuration. A version whose archive
/// cannot be prepared stays registered without a binary, so resolving it
/// reports it unusable instead of silently serving a neighbour.
async fn build_registry(
    config: &NodeConfig,
    node_args: &[String],
    grpc_only: bool,
) -> Result<Versions, ExitError> {
    let mut versions = Vec::with_capacity(config.embedded_versions.len());
    for entry in &config.embedded_versions {
        let variant = match entry.protocol.as_str() {
            "legacy" => ProtocolVariant::Legacy,
            "current" => ProtocolVariant::Current,
            other => {
                return Err(ExitError::new(
                    ExitCode::ConfigError,
                    format!(
                        "embedded version {}: unknown protocol '{}' (expected 'legacy' or 'current')",
                        entry.app_version, other
                    ),
                ));
            },
        };

        let name = format!("app-v{}", entry.app_version);
        let appd = match tokio::fs::read(&entry.archive).await {
            Ok(archive) => {
                let start_args = embedded_start_args(&entry.start_args, node_args, grpc_only);
                match Appd::prepare(&name, &archive, start_args).await {
                    Ok(appd) => Some(Arc::new(appd)),
                    Err(err) => {
                        warn!(
                            target: LOG_TARGET,
                            "Embedded version {} is unusable: {}", entry.app_version, err
                        );
                        None
                    },
                }
            },
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    "Embedded version {}: could not read archive {}: {}",
                    entry.app_version,
                    entry.archive.display(),
                    err
                );
                None
            },
        };

        versions.push(Version {
            app_version: entry.app_version,
            variant,
            address: entry.address.clone(),
            appd,
            pre_launch_actions: entry.pre_launch_actions.clone(),
        });
    }
    let versions =
        Versions::new(versions).map_err(|e| ExitError::new(ExitCode::RegistryError, e))?;
    info!(
        target: LOG_TARGET,
        "Registered {} embedded application version(s)",
        versions.iter().count()
    );
    Ok(versions)
}

async fn wait_for_signal() -> Signal {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};
    let mut interrupt = match unix_signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(target: LOG_TARGET, "Could not install SIGINT handler: {}", e);
            std::future::pending().await
        },
    };
    let mut terminate = match unix_signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(target: LOG_TARGET, "Could not install SIGTERM handler: {}", e);
            std::future::pending().await
        },
    };
    tokio::select! {
        _ = interrupt.recv() => Signal::SIGINT,
        _ = terminate.recv() => Signal::SIGTERM,
    }
}

fn reraise(sig: Signal) {
    // Restore the default disposition first, otherwise the runtime's handler
    // swallows the re-raise.
    unsafe {
        if signal(sig, SigHandler::SigDfl).is_err() {
            std::process::exit(ExitCode::Interrupted.as_i32());
        }
    }
    let _ = kill(nix::unistd::Pid::this(), sig);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::EmbeddedVersionConfig;

    #[test]
    fn start_args_forward_node_flags_and_grpc_only() {
        let configured = vec!["--home".to_string(), "/var/lumen".to_string()];
        let node_args = vec!["--halt-height".to_string(), "500".to_string()];
        assert_eq!(embedded_start_args(&configured, &node_args, true), vec![
            "--home",
            "/var/lumen",
            "--halt-height",
            "500",
            "--grpc-only"
        ]);
    }

    #[test]
    fn grpc_only_flag_is_not_duplicated() {
        let node_args = vec!["--grpc-only".to_string()];
        assert_eq!(embedded_start_args(&[], &node_args, true), vec!["--grpc-only"]);
    }

    #[tokio::test]
    async fn registry_rejects_duplicate_versions() {
        let entry = EmbeddedVersionConfig {
            app_version: 1,
            protocol: "current".to_string(),
            archive: "/nonexistent.tar.gz".into(),
            address: "127.0.0.1:36001".to_string(),
            start_args: vec![],
            pre_launch_actions: vec![],
        };
        let config = NodeConfig {
            embedded_versions: vec![entry.clone(), entry],
            ..Default::default()
        };
        let err = build_registry(&config, &[], false).await.unwrap_err();
        assert_eq!(err.exit_code, ExitCode::RegistryError);
    }

    #[tokio::test]
    async fn unknown_protocol_is_a_config_error() {
        let config = NodeConfig {
            embedded_versions: vec![EmbeddedVersionConfig {
                app_version: 1,
                protocol: "v4".to_string(),
                archive: "/nonexistent.tar.gz".into(),
                address: "127.0.0.1:36001".to_string(),
                start_args: vec![],
                pre_launch_actions: vec![],
            }],
            ..Default::default()
        };
        let err = build_registry(&config, &[], false).await.unwrap_err();
        assert_eq!(err.exit_code, ExitCode::ConfigError);
    }

    #[tokio::test]
    async fn unreadable_archive_registers_an_unusable_version() {
        let config = NodeConfig {
            embedded_versions: vec![EmbeddedVersionConfig {
                app_version: 3,
                protocol: "legacy".to_string(),
                archive: "/nonexistent.tar.gz".into(),
                address: "127.0.0.1:36003".to_string(),
                start_args: vec![],
                pre_launch_actions: vec![],
            }],
            ..Default::default()
        };
        let versions = build_registry(&config, &[], false).await.unwrap();
        let resolved = versions.resolve(3).unwrap();
        assert!(resolved.appd().is_err());
    }
}
