//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! End-to-end test of the orchestrator: an embedded version backed by a
//! supervised dummy binary and a served mock application, handed over to the
//! native application at a commit boundary.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use lumen_multiplexer::{
    proto::abci,
    Appd,
    Application,
    Multiplexer,
    MultiplexerConfig,
    MultiplexerError,
    ProtocolVariant,
    Version,
    Versions,
    APPD_STOPPED,
};
use lumen_shutdown::Shutdown;

/// An application that reports a fixed identity and can announce a consensus
/// app version bump from finalize-block.
struct MockApp {
    ident: &'static str,
    app_version: u64,
    announce_version: AtomicU64,
    calls: AtomicU64,
}

impl MockApp {
    fn new(ident: &'static str, app_version: u64) -> Self {
        Self {
            ident,
            app_version,
            announce_version: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Application for MockApp {
    async fn info(&self, _request: abci::RequestInfo) -> Result<abci::ResponseInfo, MultiplexerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(abci::ResponseInfo {
            data: self.ident.to_string(),
            app_version: self.app_version,
            ..Default::default()
        })
    }

    async fn init_chain(
        &self,
        _request: abci::RequestInitChain,
    ) -> Result<abci::ResponseInitChain, MultiplexerError> {
        Ok(Default::default())
    }

    async fn query(&self, _request: abci::RequestQuery) -> Result<abci::ResponseQuery, MultiplexerError> {
        Ok(Default::default())
    }

    async fn check_tx(&self, _request: abci::RequestCheckTx) -> Result<abci::ResponseCheckTx, MultiplexerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Default::default())
    }

    async fn prepare_proposal(
        &self,
        _request: abci::RequestPrepareProposal,
    ) -> Result<abci::ResponsePrepareProposal, MultiplexerError> {
        Ok(Default::default())
    }

    async fn process_proposal(
        &self,
        _request: abci::RequestProcessProposal,
    ) -> Result<abci::ResponseProcessProposal, MultiplexerError> {
        Ok(Default::default())
    }

    async fn finalize_block(
        &self,
        _request: abci::RequestFinalizeBlock,
    ) -> Result<abci::ResponseFinalizeBlock, MultiplexerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let announce = self.announce_version.load(Ordering::SeqCst);
        let consensus_param_updates = if announce > 0 {
            Some(abci::ConsensusParams {
                version: Some(abci::VersionParams { app: announce }),
                ..Default::default()
            })
        } else {
            None
        };
        Ok(abci::ResponseFinalizeBlock {
            consensus_param_updates,
            ..Default::default()
        })
    }

    async fn commit(&self, _request: abci::RequestCommit) -> Result<abci::ResponseCommit, MultiplexerError> {
        Ok(Default::default())
    }

    async fn extend_vote(
        &self,
        _request: abci::RequestExtendVote,
    ) -> Result<abci::ResponseExtendVote, MultiplexerError> {
        Ok(Default::default())
    }

    async fn verify_vote_extension(
        &self,
        _request: abci::RequestVerifyVoteExtension,
    ) -> Result<abci::ResponseVerifyVoteExtension, MultiplexerError> {
        Ok(Default::default())
    }

    async fn list_snapshots(
        &self,
        _request: abci::RequestListSnapshots,
    ) -> Result<abci::ResponseListSnapshots, MultiplexerError> {
        Ok(Default::default())
    }

    async fn offer_snapshot(
        &self,
        _request: abci::RequestOfferSnapshot,
    ) -> Result<abci::ResponseOfferSnapshot, MultiplexerError> {
        Ok(Default::default())
    }

    async fn load_snapshot_chunk(
        &self,
        _request: abci::RequestLoadSnapshotChunk,
    ) -> Result<abci::ResponseLoadSnapshotChunk, MultiplexerError> {
        Ok(Default::default())
    }

    async fn apply_snapshot_chunk(
        &self,
        _request: abci::RequestApplySnapshotChunk,
    ) -> Result<abci::ResponseApplySnapshotChunk, MultiplexerError> {
        Ok(Default::default())
    }
}

/// A tiny well-behaved stand-in for an embedded application binary.
fn dummy_binary_archive() -> Vec<u8> {
    let script = "#!/bin/sh\n\
        case \"$1\" in\n\
        version) echo v1.0.0 ;;\n\
        start) trap 'exit 0' INT TERM; while true; do sleep 0.1; done ;;\n\
        *) exit 1 ;;\n\
        esac\n";
    let mut header = tar::Header::new_gnu();
    header.set_path("app").unwrap();
    header.set_size(script.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append(&header, script.as_bytes()).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

#[tokio::test]
async fn embedded_to_native_handover_at_commit_boundary() {
    let shutdown = Shutdown::new();

    // The "embedded binary" protocol endpoint is a served mock application;
    // the supervised process itself is a dummy script.
    let embedded_app = Arc::new(MockApp::new("embedded-v1", 1));
    let server = lumen_multiplexer::AbciServer::bind("127.0.0.1:0", embedded_app.clone())
        .await
        .unwrap();
    let embedded_addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.serve(shutdown.to_signal()));

    let appd = Arc::new(
        Appd::prepare("app-v1", &dummy_binary_archive(), vec![])
            .await
            .unwrap(),
    );
    let versions = Versions::new(vec![Version {
        app_version: 1,
        variant: ProtocolVariant::Current,
        address: embedded_addr,
        appd: Some(appd.clone()),
        pre_launch_actions: vec![],
    }])
    .unwrap();

    let native_app = Arc::new(MockApp::new("native", 2));
    let mux = Multiplexer::new(versions, Some(native_app.clone()), MultiplexerConfig {
        initial_app_version: 1,
        ..Default::default()
    });

    // Version 1 routes to the embedded application and starts its binary.
    let info = mux.info(abci::RequestInfo::default()).await.unwrap();
    assert_eq!(info.data, "embedded-v1");
    assert!(appd.is_running());

    // A finalized block announces version 2; nothing switches until commit.
    embedded_app.announce_version.store(2, Ordering::SeqCst);
    mux.finalize_block(abci::RequestFinalizeBlock {
        height: 100,
        ..Default::default()
    })
    .await
    .unwrap();
    assert!(appd.is_running());
    assert_eq!(mux.app_version().await, 1);

    // Commit applies the pending version. Version 2 is beyond the registry,
    // so the native application takes over and the binary is stopped.
    mux.commit(abci::RequestCommit {}).await.unwrap();
    assert_eq!(mux.app_version().await, 2);
    assert_eq!(appd.pid(), APPD_STOPPED);

    let native_calls_before = native_app.calls.load(Ordering::SeqCst);
    let info = mux.info(abci::RequestInfo::default()).await.unwrap();
    assert_eq!(info.data, "native");
    assert!(native_app.calls.load(Ordering::SeqCst) > native_calls_before);

    mux.cleanup().await.unwrap();
}

#[tokio::test]
async fn repeated_operations_reuse_the_running_binary() {
    let shutdown = Shutdown::new();
    let embedded_app = Arc::new(MockApp::new("embedded-v1", 1));
    let server = lumen_multiplexer::AbciServer::bind("127.0.0.1:0", embedded_app.clone())
        .await
        .unwrap();
    let embedded_addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.serve(shutdown.to_signal()));

    let appd = Arc::new(
        Appd::prepare("app-v1", &dummy_binary_archive(), vec![])
            .await
            .unwrap(),
    );
    let versions = Versions::new(vec![Version {
        app_version: 1,
        variant: ProtocolVariant::Current,
        address: embedded_addr,
        appd: Some(appd.clone()),
        pre_launch_actions: vec![],
    }])
    .unwrap();
    let mux = Multiplexer::new(versions, None, MultiplexerConfig {
        initial_app_version: 1,
        ..Default::default()
    });

    mux.check_tx(abci::RequestCheckTx::default()).await.unwrap();
    let pid = appd.pid();
    assert_ne!(pid, APPD_STOPPED);
    mux.check_tx(abci::RequestCheckTx::default()).await.unwrap();
    assert_eq!(appd.pid(), pid);
    assert_eq!(embedded_app.calls.load(Ordering::SeqCst), 2);

    mux.cleanup().await.unwrap();
    assert_eq!(appd.pid(), APPD_STOPPED);
}

#[tokio::test]
async fn failed_pre_launch_action_does_not_block_startup() {
    let shutdown = Shutdown::new();
    let embedded_app = Arc::new(MockApp::new("embedded-v1", 1));
    let server = lumen_multiplexer::AbciServer::bind("127.0.0.1:0", embedded_app.clone())
        .await
        .unwrap();
    let embedded_addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.serve(shutdown.to_signal()));

    let appd = Arc::new(
        Appd::prepare("app-v1", &dummy_binary_archive(), vec![])
            .await
            .unwrap(),
    );
    // The dummy binary exits non-zero for anything but `version` and `start`,
    // so this action fails; the version must still come up.
    let versions = Versions::new(vec![Version {
        app_version: 1,
        variant: ProtocolVariant::Current,
        address: embedded_addr,
        appd: Some(appd.clone()),
        pre_launch_actions: vec![vec!["migrate".to_string()]],
    }])
    .unwrap();
    let mux = Multiplexer::new(versions, None, MultiplexerConfig {
        initial_app_version: 1,
        ..Default::default()
    });

    mux.check_tx(abci::RequestCheckTx::default()).await.unwrap();
    assert!(appd.is_running());

    mux.cleanup().await.unwrap();
}
