//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Adapters presenting remote application processes as [`Application`]s in the
//! current wire revision, regardless of the revision the process itself
//! speaks.
//!
//! [`Application`]: crate::traits::Application

mod current;
mod legacy;
mod translate;

pub use current::CurrentClient;
pub use legacy::LegacyClient;
