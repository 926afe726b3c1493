//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Application-version multiplexing for a validator node.
//!
//! A chain upgrades its application logic over time without coordinated binary
//! swaps: older application versions ship inside the node as embedded
//! binaries, the newest runs natively in-process. This crate resolves each
//! consensus app version to the application serving it, supervises embedded
//! binaries as subprocesses, adapts the older wire revision they may speak,
//! and switches versions exactly at commit boundaries.

pub mod adapter;
pub mod appd;
pub mod error;
pub mod multiplexer;
pub mod proto;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod traits;

pub use appd::{Appd, APPD_STOPPED};
pub use error::{AppdError, HaltReason, MultiplexerError, RpcError};
pub use multiplexer::{CleanupFn, HaltConditions, Multiplexer, MultiplexerConfig, SwitchHook};
pub use registry::{ProtocolVariant, Version, Versions};
pub use server::AbciServer;
pub use traits::Application;
