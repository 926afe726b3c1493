//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Checked-in prost message definitions for the two wire revisions of the
//! consensus-application protocol. `abci` is the current revision spoken by the
//! consensus engine and newer embedded binaries; `legacy` is the older revision
//! spoken by historical embedded binaries.

pub mod abci;
pub mod legacy;
