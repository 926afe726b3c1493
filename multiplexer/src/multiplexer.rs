//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! The orchestrator. Routes every consensus operation to the application
//! serving the current consensus app version, and switches applications at
//! commit boundaries when a finalized block changed the version.

use std::sync::Arc;

use async_trait::async_trait;
use log::*;
use tokio::sync::Mutex;

use crate::{
    adapter::{CurrentClient, LegacyClient},
    error::{CleanupErrors, HaltReason, MultiplexerError},
    proto::abci,
    registry::{ProtocolVariant, Version, Versions},
    traits::Application,
};

const LOG_TARGET: &str = "multiplexer";

/// Halt conditions checked before each block is finalized. Zero disables a
/// condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaltConditions {
    pub halt_height: u64,
    /// Unix seconds.
    pub halt_time: u64,
}

/// Operational controls the multiplexer consumes read-only; parsing them from
/// flags or files is the embedding node's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiplexerConfig {
    /// Consensus app version in effect at the last committed height, as
    /// recorded by the node's state store; 0 for a fresh chain.
    pub initial_app_version: u64,
    pub halt: HaltConditions,
    /// The node serves RPC only and skips local consensus participation.
    /// Forwarded to embedded binaries by the node; the multiplexer itself
    /// only reports it.
    pub grpc_only: bool,
}

/// Callback invoked after the multiplexer switches the serving application,
/// with the registered version switched away from, the one switched to, and
/// the live handle now serving traffic. `None` denotes the natively linked
/// application.
pub type SwitchHook = Box<dyn Fn(Option<u64>, Option<u64>, Arc<dyn Application>) + Send + Sync>;

/// Teardown registered by the embedding node, run once during cleanup.
pub type CleanupFn = Box<dyn FnOnce() -> Result<(), MultiplexerError> + Send>;

enum EmbeddedClient {
    Current(Arc<CurrentClient>),
    Legacy(Arc<LegacyClient>),
}

impl EmbeddedClient {
    fn connect(version: &Version) -> Self {
        match version.variant {
            ProtocolVariant::Current => EmbeddedClient::Current(Arc::new(CurrentClient::new(&*version.address))),
            ProtocolVariant::Legacy => EmbeddedClient::Legacy(Arc::new(LegacyClient::new(&*version.address))),
        }
    }

    fn app(&self) -> Arc<dyn Application> {
        match self {
            EmbeddedClient::Current(client) => client.clone(),
            EmbeddedClient::Legacy(client) => client.clone(),
        }
    }

    async fn close(&self) {
        match self {
            EmbeddedClient::Current(client) => client.close().await,
            EmbeddedClient::Legacy(client) => client.close().await,
        }
    }
}

/// Which application is currently serving traffic.
enum ActiveApp {
    /// Nothing resolved yet.
    None,
    /// The natively linked application.
    Native,
    /// A supervised embedded binary, keyed by its registered app version.
    Embedded {
        registered_version: u64,
        client: EmbeddedClient,
    },
}

struct SessionState {
    /// Consensus app version currently in effect.
    app_version: u64,
    /// Version announced by the last finalized block, applied after its
    /// commit succeeds.
    next_app_version: Option<u64>,
    active: ActiveApp,
    shutting_down: bool,
}

/// Multiplexes consensus traffic across embedded application versions and an
/// optional natively linked application.
///
/// All state lives behind a single async lock; operations are strictly
/// serialized, which matches the one-connection request/response discipline of
/// the consensus side.
pub struct Multiplexer {
    versions: Versions,
    native: Option<Arc<dyn Application>>,
    config: MultiplexerConfig,
    state: Mutex<SessionState>,
    switch_hooks: Vec<SwitchHook>,
    cleanup_fns: std::sync::Mutex<Vec<CleanupFn>>,
}

impl Multiplexer {
    pub fn new(versions: Versions, native: Option<Arc<dyn Application>>, config: MultiplexerConfig) -> Self {
        if config.grpc_only {
            info!(target: LOG_TARGET, "Running in gRPC-only mode");
        }
        Self {
            versions,
            native,
            state: Mutex::new(SessionState {
                app_version: config.initial_app_version,
                next_app_version: None,
                active: ActiveApp::None,
                shutting_down: false,
            }),
            config,
            switch_hooks: Vec::new(),
            cleanup_fns: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn grpc_only(&self) -> bool {
        self.config.grpc_only
    }

    /// Must be called before the multiplexer is shared.
    pub fn add_switch_hook(&mut self, hook: SwitchHook) {
        self.switch_hooks.push(hook);
    }

    pub fn register_cleanup(&self, cleanup: CleanupFn) {
        self.cleanup_fns
            .lock()
            .expect("cleanup list lock poisoned")
            .push(cleanup);
    }

    pub async fn app_version(&self) -> u64 {
        self.state.lock().await.app_version
    }

    fn active_version_label(active: &ActiveApp) -> Option<u64> {
        match active {
            ActiveApp::Embedded { registered_version, .. } => Some(*registered_version),
            _ => None,
        }
    }

    /// Ensures the application serving `state.app_version` is running and
    /// returns it along with the version, stopping and starting embedded
    /// binaries as needed.
    async fn resolve_app(&self, state: &mut SessionState) -> Result<(Arc<dyn Application>, u64), MultiplexerError> {
        if state.shutting_down {
            return Err(MultiplexerError::ShuttingDown);
        }
        let app_version = state.app_version;

        if self.versions.should_use_native(app_version) {
            let native = self
                .native
                .clone()
                .ok_or(MultiplexerError::NativeUnavailable(app_version))?;
            if !matches!(state.active, ActiveApp::Native) {
                let from = Self::active_version_label(&state.active);
                self.stop_active(state).await?;
                info!(target: LOG_TARGET, "Serving app version {} natively", app_version);
                state.active = ActiveApp::Native;
                self.notify_switch(from, None, native.clone());
            }
            return Ok((native, app_version));
        }

        let resolved = self.versions.resolve(app_version)?.clone();
        if let ActiveApp::Embedded {
            registered_version,
            client,
        } = &state.active
        {
            if *registered_version == resolved.app_version {
                return Ok((client.app(), app_version));
            }
        }

        let from = Self::active_version_label(&state.active);
        self.stop_active(state).await?;
        self.launch(&resolved).await?;
        let client = EmbeddedClient::connect(&resolved);
        let app = client.app();
        info!(
            target: LOG_TARGET,
            "Serving app version {} with embedded binary for version {} ({})",
            app_version,
            resolved.app_version,
            resolved.variant
        );
        state.active = ActiveApp::Embedded {
            registered_version: resolved.app_version,
            client,
        };
        self.notify_switch(from, Some(resolved.app_version), app.clone());
        Ok((app, app_version))
    }

    /// Runs pre-launch actions and starts the binary. Pre-launch failures are
    /// logged and do not abort the launch.
    async fn launch(&self, version: &Version) -> Result<(), MultiplexerError> {
        let appd = version.appd()?;
        for action in &version.pre_launch_actions {
            match appd.exec_command(action).await {
                Ok(output) => {
                    let output = output.trim();
                    if !output.is_empty() {
                        debug!(target: LOG_TARGET, "Pre-launch action {:?}: {}", action, output);
                    }
                },
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        "Pre-launch action {:?} for version {} failed: {}", action, version.app_version, err
                    );
                },
            }
        }
        appd.start()?;
        Ok(())
    }

    /// Stops whatever is currently active. The native application has no
    /// process to stop.
    async fn stop_active(&self, state: &mut SessionState) -> Result<(), MultiplexerError> {
        let active = std::mem::replace(&mut state.active, ActiveApp::None);
        if let ActiveApp::Embedded {
            registered_version,
            client,
        } = active
        {
            info!(
                target: LOG_TARGET,
                "Stopping embedded binary for version {}", registered_version
            );
            client.close().await;
            if let Ok(version) = self.versions.resolve(registered_version) {
                if let Some(appd) = &version.appd {
                    appd.stop().await?;
                }
            }
        }
        Ok(())
    }

    fn notify_switch(&self, from: Option<u64>, to: Option<u64>, app: Arc<dyn Application>) {
        for hook in &self.switch_hooks {
            hook(from, to, app.clone());
        }
    }

    fn check_halt_conditions(&self, request: &abci::RequestFinalizeBlock) -> Result<(), MultiplexerError> {
        if self.config.halt.halt_height > 0 && request.height >= 0 && request.height as u64 >= self.config.halt.halt_height {
            return Err(MultiplexerError::Halt(HaltReason::Height {
                halt_height: self.config.halt.halt_height,
                block_height: request.height as u64,
            }));
        }
        if self.config.halt.halt_time > 0 {
            let block_time = request.time.as_ref().map(|t| t.seconds).unwrap_or_default();
            if block_time >= self.config.halt.halt_time as i64 {
                return Err(MultiplexerError::Halt(HaltReason::Time {
                    halt_time: self.config.halt.halt_time,
                    block_time,
                }));
            }
        }
        Ok(())
    }

    /// Stops any running embedded binary, closes connections and runs
    /// registered teardowns. Idempotent; failures are aggregated so one bad
    /// teardown never skips the rest.
    pub async fn cleanup(&self) -> Result<(), MultiplexerError> {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return Ok(());
        }
        state.shutting_down = true;
        info!(target: LOG_TARGET, "Cleaning up multiplexer");

        let mut errors = CleanupErrors::default();
        if let Err(err) = self.stop_active(&mut state).await {
            errors.push(err);
        }
        drop(state);

        let cleanups: Vec<CleanupFn> = self
            .cleanup_fns
            .lock()
            .expect("cleanup list lock poisoned")
            .drain(..)
            .collect();
        for cleanup in cleanups {
            if let Err(err) = cleanup() {
                errors.push(err);
            }
        }
        errors.into_result()
    }
}

macro_rules! route {
    ($self:ident, $request:ident, $method:ident, $operation:literal) => {{
        let mut state = $self.state.lock().await;
        let (app, app_version) = $self.resolve_app(&mut state).await?;
        app.$method($request)
            .await
            .map_err(|err| err.for_operation(app_version, $operation))
    }};
}

#[async_trait]
impl Application for Multiplexer {
    async fn info(&self, request: abci::RequestInfo) -> Result<abci::ResponseInfo, MultiplexerError> {
        route!(self, request, info, "info")
    }

    async fn init_chain(
        &self,
        request: abci::RequestInitChain,
    ) -> Result<abci::ResponseInitChain, MultiplexerError> {
        let mut state = self.state.lock().await;
        // Genesis consensus params may declare the starting app version.
        if let Some(version) = request
            .consensus_params
            .as_ref()
            .and_then(|p| p.version.as_ref())
        {
            if version.app > 0 {
                state.app_version = version.app;
            }
        }
        let (app, app_version) = self.resolve_app(&mut state).await?;
        app.init_chain(request)
            .await
            .map_err(|err| err.for_operation(app_version, "init_chain"))
    }

    async fn query(&self, request: abci::RequestQuery) -> Result<abci::ResponseQuery, MultiplexerError> {
        route!(self, request, query, "query")
    }

    async fn check_tx(&self, request: abci::RequestCheckTx) -> Result<abci::ResponseCheckTx, MultiplexerError> {
        route!(self, request, check_tx, "check_tx")
    }

    async fn prepare_proposal(
        &self,
        request: abci::RequestPrepareProposal,
    ) -> Result<abci::ResponsePrepareProposal, MultiplexerError> {
        route!(self, request, prepare_proposal, "prepare_proposal")
    }

    async fn process_proposal(
        &self,
        request: abci::RequestProcessProposal,
    ) -> Result<abci::ResponseProcessProposal, MultiplexerError> {
        route!(self, request, process_proposal, "process_proposal")
    }

    async fn finalize_block(
        &self,
        request: abci::RequestFinalizeBlock,
    ) -> Result<abci::ResponseFinalizeBlock, MultiplexerError> {
        self.check_halt_conditions(&request)?;
        let mut state = self.state.lock().await;
        let (app, app_version) = self.resolve_app(&mut state).await?;
        let response = app
            .finalize_block(request)
            .await
            .map_err(|err| err.for_operation(app_version, "finalize_block"))?;

        if let Some(version) = response
            .consensus_param_updates
            .as_ref()
            .and_then(|p| p.version.as_ref())
        {
            if version.app != state.app_version {
                info!(
                    target: LOG_TARGET,
                    "Block updates app version {} -> {}; switching after commit", state.app_version, version.app
                );
                state.next_app_version = Some(version.app);
            }
        }
        Ok(response)
    }

    /// Applies a pending version change only after the commit that seals it
    /// succeeds, then eagerly brings up the new application so the first
    /// operation of the next height pays no switch latency.
    async fn commit(&self, request: abci::RequestCommit) -> Result<abci::ResponseCommit, MultiplexerError> {
        let mut state = self.state.lock().await;
        let (app, app_version) = self.resolve_app(&mut state).await?;
        let response = app
            .commit(request)
            .await
            .map_err(|err| err.for_operation(app_version, "commit"))?;

        if let Some(next) = state.next_app_version.take() {
            state.app_version = next;
            self.resolve_app(&mut state)
                .await
                .map_err(|err| err.for_operation(next, "commit"))?;
        }
        Ok(response)
    }

    async fn extend_vote(
        &self,
        request: abci::RequestExtendVote,
    ) -> Result<abci::ResponseExtendVote, MultiplexerError> {
        route!(self, request, extend_vote, "extend_vote")
    }

    async fn verify_vote_extension(
        &self,
        request: abci::RequestVerifyVoteExtension,
    ) -> Result<abci::ResponseVerifyVoteExtension, MultiplexerError> {
        route!(self, request, verify_vote_extension, "verify_vote_extension")
    }

    async fn list_snapshots(
        &self,
        request: abci::RequestListSnapshots,
    ) -> Result<abci::ResponseListSnapshots, MultiplexerError> {
        route!(self, request, list_snapshots, "list_snapshots")
    }

    /// A state-sync snapshot carries the app version at its height; adopt it
    /// before routing so the snapshot is offered to the right application.
    async fn offer_snapshot(
        &self,
        request: abci::RequestOfferSnapshot,
    ) -> Result<abci::ResponseOfferSnapshot, MultiplexerError> {
        let mut state = self.state.lock().await;
        if request.app_version > 0 && request.app_version != state.app_version {
            info!(
                target: LOG_TARGET,
                "Snapshot carries app version {} (current {}), adopting it", request.app_version, state.app_version
            );
            state.app_version = request.app_version;
        }
        let (app, app_version) = self.resolve_app(&mut state).await?;
        app.offer_snapshot(request)
            .await
            .map_err(|err| err.for_operation(app_version, "offer_snapshot"))
    }

    async fn load_snapshot_chunk(
        &self,
        request: abci::RequestLoadSnapshotChunk,
    ) -> Result<abci::ResponseLoadSnapshotChunk, MultiplexerError> {
        route!(self, request, load_snapshot_chunk, "load_snapshot_chunk")
    }

    async fn apply_snapshot_chunk(
        &self,
        request: abci::RequestApplySnapshotChunk,
    ) -> Result<abci::ResponseApplySnapshotChunk, MultiplexerError> {
        route!(self, request, apply_snapshot_chunk, "apply_snapshot_chunk")
    }
}
