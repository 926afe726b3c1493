//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! The registry of embedded application versions and the rules for resolving a
//! consensus app version to one of them.

use std::{fmt, sync::Arc};

use crate::{appd::Appd, error::MultiplexerError};

/// Wire revision spoken by an embedded binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// Split block execution (begin-block / deliver-tx / end-block), bytes
    /// event attributes.
    Legacy,
    /// Single finalize-block call, string event attributes.
    Current,
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVariant::Legacy => write!(f, "legacy"),
            ProtocolVariant::Current => write!(f, "current"),
        }
    }
}

/// One registered embedded application version.
#[derive(Clone)]
pub struct Version {
    pub app_version: u64,
    pub variant: ProtocolVariant,
    /// Address the embedded binary serves its application protocol on.
    pub address: String,
    /// The supervised binary. `None` when preparation failed at startup; the
    /// version remains registered so resolution can report it as unusable
    /// instead of silently picking a different one.
    pub appd: Option<Arc<Appd>>,
    /// Subcommand invocations run to completion before the binary is started,
    /// e.g. state migrations. Failures are logged, not fatal.
    pub pre_launch_actions: Vec<Vec<String>>,
}

impl Version {
    pub fn appd(&self) -> Result<&Arc<Appd>, MultiplexerError> {
        self.appd
            .as_ref()
            .ok_or(MultiplexerError::VersionUnusable(self.app_version))
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("app_version", &self.app_version)
            .field("variant", &self.variant)
            .field("address", &self.address)
            .field("usable", &self.appd.is_some())
            .finish()
    }
}

/// The set of registered versions, held sorted by ascending app version.
#[derive(Debug, Clone, Default)]
pub struct Versions {
    versions: Vec<Version>,
}

impl Versions {
    /// Validates and sorts the given versions. App versions must be unique.
    pub fn new(mut versions: Vec<Version>) -> Result<Self, MultiplexerError> {
        versions.sort_by_key(|v| v.app_version);
        for pair in versions.windows(2) {
            if pair[0].app_version == pair[1].app_version {
                return Err(MultiplexerError::DuplicateVersion(pair[0].app_version));
            }
        }
        Ok(Self { versions })
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter()
    }

    /// True when no embedded version covers `app_version` and the natively
    /// linked application should serve it. This is the case for an empty
    /// registry and for app versions beyond the newest registered one.
    pub fn should_use_native(&self, app_version: u64) -> bool {
        match self.versions.last() {
            Some(newest) => app_version > newest.app_version,
            None => true,
        }
    }

    /// Resolves `app_version` to a registered version.
    ///
    /// An exact match wins. A version falling between two registered ones
    /// resolves to the newest registered version below it. A version older
    /// than everything registered resolves to the oldest. A version newer than
    /// everything registered is not resolvable here; the caller is expected to
    /// have consulted [`should_use_native`](Self::should_use_native) first.
    pub fn resolve(&self, app_version: u64) -> Result<&Version, MultiplexerError> {
        if self.should_use_native(app_version) {
            return Err(MultiplexerError::NoVersionFound(app_version));
        }
        let at_or_below = self
            .versions
            .iter()
            .rev()
            .find(|v| v.app_version <= app_version);
        Ok(at_or_below.unwrap_or_else(|| &self.versions[0]))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn version(app_version: u64) -> Version {
        Version {
            app_version,
            variant: ProtocolVariant::Current,
            address: format!("127.0.0.1:{}", 36000 + app_version),
            appd: None,
            pre_launch_actions: vec![],
        }
    }

    #[test]
    fn rejects_duplicate_app_versions() {
        let err = Versions::new(vec![version(2), version(1), version(2)]).unwrap_err();
        assert!(matches!(err, MultiplexerError::DuplicateVersion(2)));
    }

    #[test]
    fn sorts_on_construction() {
        let versions = Versions::new(vec![version(3), version(1), version(2)]).unwrap();
        let order: Vec<_> = versions.iter().map(|v| v.app_version).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn resolves_exact_match() {
        let versions = Versions::new(vec![version(1), version(3)]).unwrap();
        assert_eq!(versions.resolve(3).unwrap().app_version, 3);
    }

    #[test]
    fn gap_resolves_to_newest_below() {
        let versions = Versions::new(vec![version(1), version(3)]).unwrap();
        assert_eq!(versions.resolve(2).unwrap().app_version, 1);
    }

    #[test]
    fn below_range_resolves_to_oldest() {
        let versions = Versions::new(vec![version(2), version(4)]).unwrap();
        assert_eq!(versions.resolve(1).unwrap().app_version, 2);
    }

    #[test]
    fn above_range_is_native_territory() {
        let versions = Versions::new(vec![version(1), version(2)]).unwrap();
        assert!(versions.should_use_native(5));
        let err = versions.resolve(5).unwrap_err();
        assert!(matches!(err, MultiplexerError::NoVersionFound(5)));
    }

    #[test]
    fn empty_registry_is_always_native() {
        let versions = Versions::new(vec![]).unwrap();
        assert!(versions.should_use_native(0));
        assert!(versions.should_use_native(1));
        assert!(matches!(
            versions.resolve(1).unwrap_err(),
            MultiplexerError::NoVersionFound(1)
        ));
    }

    #[test]
    fn unusable_version_reports_as_such() {
        let versions = Versions::new(vec![version(1)]).unwrap();
        let resolved = versions.resolve(1).unwrap();
        assert!(matches!(
            resolved.appd().unwrap_err(),
            MultiplexerError::VersionUnusable(1)
        ));
    }
}
