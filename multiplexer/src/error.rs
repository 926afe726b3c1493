//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

use std::{fmt, io};

use thiserror::Error;

/// Errors raised while preparing or supervising an embedded application binary.
#[derive(Debug, Error)]
pub enum AppdError {
    #[error("no binary data available for version '{0}'")]
    NoBinaryData(String),
    #[error("failed to extract binary archive: {0}")]
    ExtractionFailed(#[from] io::Error),
    #[error("no executable found in the archive for '{0}'")]
    NoExecutableFound(String),
    #[error("binary validation failed for '{name}': {details}")]
    BinaryValidationFailed { name: String, details: String },
    #[error("failed to start '{name}': {source}")]
    StartFailed { name: String, source: io::Error },
    #[error("failed to stop '{name}' (pid {pid}): {details}")]
    StopFailed { name: String, pid: u32, details: String },
}

/// Errors raised on the local RPC channel to an embedded application.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to connect to remote application at {address}: {source}")]
    ConnectFailed { address: String, source: io::Error },
    #[error("rpc channel closed")]
    ChannelClosed,
    #[error("rpc transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("failed to decode remote response: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("remote application returned an exception: {0}")]
    Exception(String),
    #[error("remote application returned an unexpected response variant for {operation}")]
    UnexpectedResponse { operation: &'static str },
}

#[derive(Debug, Error)]
pub enum MultiplexerError {
    #[error("duplicate app version {0} in registry")]
    DuplicateVersion(u64),
    #[error("no version found for app version {0}")]
    NoVersionFound(u64),
    #[error("version {0} is unusable: binary preparation previously failed")]
    VersionUnusable(u64),
    #[error("no native application is available and app version {0} is not in the registry")]
    NativeUnavailable(u64),
    #[error("application process supervision failed: {0}")]
    Appd(#[from] AppdError),
    #[error("rpc failure: {0}")]
    Rpc(#[from] RpcError),
    #[error("protocol translation failed: {0}")]
    Translation(String),
    #[error("halting node per configuration: {0}")]
    Halt(HaltReason),
    #[error("multiplexer is shutting down")]
    ShuttingDown,
    #[error("app version {app_version}, operation {operation}: {source}")]
    Application {
        app_version: u64,
        operation: &'static str,
        #[source]
        source: Box<MultiplexerError>,
    },
    #[error("native application error: {0}")]
    Native(String),
    #[error("cleanup completed with errors: {0}")]
    Cleanup(CleanupErrors),
}

impl MultiplexerError {
    /// Wraps an error with the app version and operation it occurred under, so operators can
    /// distinguish "the application rejected this" from "the multiplexer could not reach the
    /// application". Halt and shutdown conditions pass through unwrapped.
    pub fn for_operation(self, app_version: u64, operation: &'static str) -> Self {
        match self {
            err @ (MultiplexerError::Halt(_) | MultiplexerError::ShuttingDown) => err,
            source => MultiplexerError::Application {
                app_version,
                operation,
                source: Box::new(source),
            },
        }
    }

    pub fn is_halt(&self) -> bool {
        matches!(self, MultiplexerError::Halt(_))
    }
}

/// Deliberate, expected termination reason. Not an unexpected error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Height { halt_height: u64, block_height: u64 },
    Time { halt_time: u64, block_time: i64 },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Height {
                halt_height,
                block_height,
            } => write!(f, "configured halt height {} reached at height {}", halt_height, block_height),
            HaltReason::Time { halt_time, block_time } => {
                write!(f, "configured halt time {} reached at block time {}", halt_time, block_time)
            },
        }
    }
}

/// Aggregation of errors encountered during cleanup. One failed teardown never skips the others.
#[derive(Debug, Default)]
pub struct CleanupErrors(pub Vec<MultiplexerError>);

impl CleanupErrors {
    pub fn push(&mut self, err: MultiplexerError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<(), MultiplexerError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(MultiplexerError::Cleanup(self))
        }
    }
}

impl fmt::Display for CleanupErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn for_operation_wraps_ordinary_errors() {
        let err = MultiplexerError::NoVersionFound(3).for_operation(3, "finalize_block");
        match err {
            MultiplexerError::Application {
                app_version, operation, ..
            } => {
                assert_eq!(app_version, 3);
                assert_eq!(operation, "finalize_block");
            },
            other => panic!("unexpected variant: {}", other),
        }
    }

    #[test]
    fn for_operation_passes_halt_through() {
        let err = MultiplexerError::Halt(HaltReason::Height {
            halt_height: 10,
            block_height: 10,
        })
        .for_operation(1, "finalize_block");
        assert!(err.is_halt());
    }

    #[test]
    fn cleanup_errors_join_messages() {
        let mut errs = CleanupErrors::default();
        errs.push(MultiplexerError::ShuttingDown);
        errs.push(MultiplexerError::NoVersionFound(9));
        let joined = errs.to_string();
        assert!(joined.contains("shutting down"));
        assert!(joined.contains("app version 9"));
    }
}
