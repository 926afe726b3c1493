//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Supervises an embedded application binary: extracts it from a compressed
//! archive, validates it, and manages the child process lifecycle.

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Mutex,
    time::Duration,
};

use flate2::read::GzDecoder;
use log::*;
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use tar::Archive;
use tempfile::TempDir;
use tokio::{process::Command, sync::watch};

use crate::error::AppdError;

const LOG_TARGET: &str = "multiplexer::appd";

/// Sentinel pid published while no child process is running.
pub const APPD_STOPPED: u32 = 0;

/// Grace period between SIGINT and SIGKILL when stopping a child.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(6);

/// A supervised embedded application binary.
///
/// `prepare` is done once at construction; `start` and `stop` may be called
/// repeatedly as the multiplexer switches versions. The extraction directory
/// lives as long as the `Appd` value.
#[derive(Debug)]
pub struct Appd {
    name: String,
    binary_path: PathBuf,
    // Held for its Drop impl, which removes the extraction directory.
    _extract_dir: TempDir,
    start_args: Vec<String>,
    pid: watch::Sender<u32>,
    child_guard: Mutex<Option<ChildGuard>>,
}

#[derive(Debug)]
struct ChildGuard {
    pid: u32,
}

impl Appd {
    /// Extracts `archive` (gzipped tar) into a temporary directory, locates the
    /// executable inside it, and smoke-tests it by running `<binary> version`.
    pub async fn prepare(name: &str, archive: &[u8], start_args: Vec<String>) -> Result<Self, AppdError> {
        if archive.is_empty() {
            return Err(AppdError::NoBinaryData(name.to_string()));
        }

        let extract_dir = TempDir::new()?;
        let decoder = GzDecoder::new(archive);
        let mut tar = Archive::new(decoder);
        tar.unpack(extract_dir.path())?;

        let binary_path = find_executable(extract_dir.path())?
            .ok_or_else(|| AppdError::NoExecutableFound(name.to_string()))?;
        debug!(
            target: LOG_TARGET,
            "Extracted binary for '{}' to {}", name, binary_path.display()
        );

        let appd = Self {
            name: name.to_string(),
            binary_path,
            _extract_dir: extract_dir,
            start_args,
            pid: watch::channel(APPD_STOPPED).0,
            child_guard: Mutex::new(None),
        };
        appd.validate().await?;
        Ok(appd)
    }

    /// Runs `<binary> version` and checks it exits successfully.
    async fn validate(&self) -> Result<(), AppdError> {
        let output = Command::new(&self.binary_path)
            .arg("version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| AppdError::StartFailed {
                name: self.name.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(AppdError::BinaryValidationFailed {
                name: self.name.clone(),
                details: format!(
                    "version check exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        info!(
            target: LOG_TARGET,
            "Validated binary for '{}': {}",
            self.name,
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    /// Starts `<binary> start <args>`. A no-op if the child is already
    /// running.
    pub fn start(&self) -> Result<(), AppdError> {
        let mut guard = self
            .child_guard
            .lock()
            .expect("appd child lock poisoned");
        if guard.is_some() {
            debug!(target: LOG_TARGET, "'{}' is already running, ignoring start", self.name);
            return Ok(());
        }

        let mut command = Command::new(&self.binary_path);
        command
            .arg("start")
            .args(&self.start_args)
            .stdin(Stdio::null())
            .kill_on_drop(false);
        // Run the child in its own process group so terminal signals aimed at
        // the node are not also delivered to it.
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| AppdError::StartFailed {
            name: self.name.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or(APPD_STOPPED);
        info!(target: LOG_TARGET, "Started '{}' (pid {})", self.name, pid);

        let _ = self.pid.send_replace(pid);
        *guard = Some(ChildGuard { pid });

        // The waiter owns the child handle and reaps it whenever it exits,
        // whether stopped by us or crashed on its own.
        let name = self.name.clone();
        let pid_tx = self.pid.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(target: LOG_TARGET, "'{}' (pid {}) exited: {}", name, pid, status),
                Err(err) => warn!(target: LOG_TARGET, "Failed to wait on '{}' (pid {}): {}", name, pid, err),
            }
            pid_tx.send_if_modified(|current| {
                if *current == pid {
                    *current = APPD_STOPPED;
                    true
                } else {
                    false
                }
            });
        });

        Ok(())
    }

    /// Stops the child: SIGINT, wait up to the grace period, then SIGKILL.
    /// A no-op if nothing is running.
    pub async fn stop(&self) -> Result<(), AppdError> {
        let pid = {
            let mut guard = self
                .child_guard
                .lock()
                .expect("appd child lock poisoned");
            match guard.take() {
                Some(child) => child.pid,
                None => return Ok(()),
            }
        };
        if pid == APPD_STOPPED || *self.pid.borrow() != pid {
            // Already exited and reaped by the waiter.
            return Ok(());
        }

        info!(target: LOG_TARGET, "Stopping '{}' (pid {})", self.name, pid);
        let nix_pid = Pid::from_raw(pid as i32);
        if let Err(err) = kill(nix_pid, Signal::SIGINT) {
            // ESRCH means the process has already exited.
            if err != nix::errno::Errno::ESRCH {
                return Err(AppdError::StopFailed {
                    name: self.name.clone(),
                    pid,
                    details: format!("failed to send SIGINT: {}", err),
                });
            }
            return Ok(());
        }

        if self.wait_for_exit(pid, STOP_GRACE_PERIOD).await {
            return Ok(());
        }

        warn!(
            target: LOG_TARGET,
            "'{}' (pid {}) did not exit within {:?}, sending SIGKILL", self.name, pid, STOP_GRACE_PERIOD
        );
        if let Err(err) = kill(nix_pid, Signal::SIGKILL) {
            if err != nix::errno::Errno::ESRCH {
                return Err(AppdError::StopFailed {
                    name: self.name.clone(),
                    pid,
                    details: format!("failed to send SIGKILL: {}", err),
                });
            }
            return Ok(());
        }

        if self.wait_for_exit(pid, STOP_GRACE_PERIOD).await {
            Ok(())
        } else {
            Err(AppdError::StopFailed {
                name: self.name.clone(),
                pid,
                details: "process survived SIGKILL".to_string(),
            })
        }
    }

    async fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let mut rx = self.pid.subscribe();
        let exited = tokio::time::timeout(timeout, rx.wait_for(|current| *current != pid))
            .await
            .is_ok();
        exited
    }

    /// The pid of the running child, or [`APPD_STOPPED`].
    pub fn pid(&self) -> u32 {
        *self.pid.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.pid() != APPD_STOPPED
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs an arbitrary subcommand of the binary to completion, returning its
    /// stdout. Used for pre-launch actions such as state migrations.
    pub async fn exec_command(&self, args: &[String]) -> Result<String, AppdError> {
        let output = Command::new(&self.binary_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| AppdError::StartFailed {
                name: self.name.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(AppdError::BinaryValidationFailed {
                name: self.name.clone(),
                details: format!(
                    "command {:?} exited with {}: {}",
                    args,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Walks the extraction directory looking for a regular file with any execute
/// bit set. The first match in directory order wins.
fn find_executable(dir: &Path) -> Result<Option<PathBuf>, std::io::Error> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                return Ok(Some(entry.path()));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};

    use super::*;

    /// Packs a shell script named `name` into a gzipped tar with the execute
    /// bit set.
    fn script_archive(name: &str, script: &str) -> Vec<u8> {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_size(script.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append(&header, script.as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    const WELL_BEHAVED: &str = "#!/bin/sh\n\
        case \"$1\" in\n\
        version) echo v1.0.0 ;;\n\
        start) trap 'exit 0' INT TERM; while true; do sleep 0.1; done ;;\n\
        migrate) echo migrated ;;\n\
        *) exit 1 ;;\n\
        esac\n";

    #[tokio::test]
    async fn prepare_rejects_empty_archive() {
        let err = Appd::prepare("app", &[], vec![]).await.unwrap_err();
        assert!(matches!(err, AppdError::NoBinaryData(_)));
    }

    #[tokio::test]
    async fn prepare_rejects_archive_without_executable() {
        let mut header = tar::Header::new_gnu();
        header.set_path("readme.txt").unwrap();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append(&header, &b"hello"[..]).unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let err = Appd::prepare("app", &archive, vec![]).await.unwrap_err();
        assert!(matches!(err, AppdError::NoExecutableFound(_)));
    }

    #[tokio::test]
    async fn prepare_rejects_failing_version_check() {
        let archive = script_archive("app", "#!/bin/sh\nexit 3\n");
        let err = Appd::prepare("app", &archive, vec![]).await.unwrap_err();
        assert!(matches!(err, AppdError::BinaryValidationFailed { .. }));
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let archive = script_archive("app", WELL_BEHAVED);
        let appd = Appd::prepare("app", &archive, vec![]).await.unwrap();
        assert_eq!(appd.pid(), APPD_STOPPED);

        appd.start().unwrap();
        assert!(appd.is_running());
        let pid = appd.pid();
        assert_ne!(pid, APPD_STOPPED);

        // Repeated start is a no-op and keeps the same child.
        appd.start().unwrap();
        assert_eq!(appd.pid(), pid);

        appd.stop().await.unwrap();
        assert_eq!(appd.pid(), APPD_STOPPED);

        // Stop with nothing running is a no-op.
        appd.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_escalates_to_sigkill() {
        // This child ignores SIGINT, so stop has to kill it.
        let stubborn = "#!/bin/sh\n\
            case \"$1\" in\n\
            version) echo v1.0.0 ;;\n\
            start) trap '' INT; while true; do sleep 0.1; done ;;\n\
            esac\n";
        let archive = script_archive("app", stubborn);
        let appd = Appd::prepare("app", &archive, vec![]).await.unwrap();
        appd.start().unwrap();
        assert!(appd.is_running());
        appd.stop().await.unwrap();
        assert_eq!(appd.pid(), APPD_STOPPED);
    }

    #[tokio::test]
    async fn exec_command_returns_stdout() {
        let archive = script_archive("app", WELL_BEHAVED);
        let appd = Appd::prepare("app", &archive, vec![]).await.unwrap();
        let out = appd.exec_command(&["migrate".to_string()]).await.unwrap();
        assert_eq!(out.trim(), "migrated");
    }

    #[tokio::test]
    async fn crashed_child_is_reaped() {
        let crashing = "#!/bin/sh\n\
            case \"$1\" in\n\
            version) echo v1.0.0 ;;\n\
            start) exit 7 ;;\n\
            esac\n";
        let archive = script_archive("app", crashing);
        let appd = Appd::prepare("app", &archive, vec![]).await.unwrap();
        appd.start().unwrap();
        let mut rx = appd.pid.subscribe();
        rx.wait_for(|pid| *pid == APPD_STOPPED).await.unwrap();
        assert!(!appd.is_running());
    }

    #[test]
    fn find_executable_recurses() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        let path = dir.path().join("bin").join("tool");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"#!/bin/sh\n").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();

        let found = find_executable(dir.path()).unwrap().unwrap();
        assert_eq!(found, path);
    }
}
