//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

use std::fmt;

use thiserror::Error;

/// Error that takes down the process with a well-known exit code.
#[derive(Debug, Error)]
#[error("{exit_code}: {details}")]
pub struct ExitError {
    pub exit_code: ExitCode,
    pub details: String,
}

impl ExitError {
    pub fn new<T: ToString>(exit_code: ExitCode, details: T) -> Self {
        Self {
            exit_code,
            details: details.to_string(),
        }
    }
}

impl From<ExitCode> for ExitError {
    fn from(exit_code: ExitCode) -> Self {
        Self::new(exit_code, exit_code.to_string())
    }
}

/// Exit codes reported by lumen binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExitCode {
    #[error("There is an error in the configuration")]
    ConfigError,
    #[error("The application version registry is invalid")]
    RegistryError,
    #[error("An embedded application binary failed validation")]
    BinaryValidationError,
    #[error("The application exited because of a runtime error")]
    RuntimeError,
    #[error("The application exited because of an I/O error")]
    IoError,
    #[error("The application was interrupted")]
    Interrupted,
    #[error("Unknown error")]
    UnknownError,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::ConfigError => 101,
            Self::RegistryError => 102,
            Self::BinaryValidationError => 103,
            Self::RuntimeError => 104,
            Self::IoError => 105,
            Self::Interrupted => 106,
            Self::UnknownError => 107,
        }
    }

    /// A hint printed below the error message where a remedy is known.
    pub fn hint(self) -> Option<&'static str> {
        match self {
            Self::RegistryError => Some(
                "Check the [[embedded_version]] entries in the node configuration: every entry needs a unique \
                 app_version and a readable archive path.",
            ),
            Self::BinaryValidationError => {
                Some("The referenced archive could not be extracted to a working binary. Re-download the release archive.")
            },
            _ => None,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code.as_i32()
    }
}

pub struct ExitCodeDisplay<'a>(pub &'a ExitError);

impl fmt::Display for ExitCodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {}: {}", self.0.exit_code.as_i32(), self.0.details)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            ExitCode::ConfigError,
            ExitCode::RegistryError,
            ExitCode::BinaryValidationError,
            ExitCode::RuntimeError,
            ExitCode::IoError,
            ExitCode::Interrupted,
            ExitCode::UnknownError,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a.as_i32(), b.as_i32());
            }
        }
    }

    #[test]
    fn error_display_includes_details() {
        let err = ExitError::new(ExitCode::ConfigError, "missing field");
        assert!(err.to_string().contains("missing field"));
    }
}
