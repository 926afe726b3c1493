//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

use async_trait::async_trait;

use crate::{error::MultiplexerError, proto::abci};

/// The application side of the consensus-application protocol, expressed in
/// the current wire revision.
///
/// Implemented by the in-process state machine, by remote clients talking to
/// embedded binaries (in either wire revision), and by the multiplexer itself
/// so it can be served to a consensus engine.
#[async_trait]
pub trait Application: Send + Sync {
    async fn info(&self, request: abci::RequestInfo) -> Result<abci::ResponseInfo, MultiplexerError>;

    async fn init_chain(
        &self,
        request: abci::RequestInitChain,
    ) -> Result<abci::ResponseInitChain, MultiplexerError>;

    async fn query(&self, request: abci::RequestQuery) -> Result<abci::ResponseQuery, MultiplexerError>;

    async fn check_tx(&self, request: abci::RequestCheckTx) -> Result<abci::ResponseCheckTx, MultiplexerError>;

    async fn prepare_proposal(
        &self,
        request: abci::RequestPrepareProposal,
    ) -> Result<abci::ResponsePrepareProposal, MultiplexerError>;

    async fn process_proposal(
        &self,
        request: abci::RequestProcessProposal,
    ) -> Result<abci::ResponseProcessProposal, MultiplexerError>;

    async fn finalize_block(
        &self,
        request: abci::RequestFinalizeBlock,
    ) -> Result<abci::ResponseFinalizeBlock, MultiplexerError>;

    async fn commit(&self, request: abci::RequestCommit) -> Result<abci::ResponseCommit, MultiplexerError>;

    async fn extend_vote(
        &self,
        request: abci::RequestExtendVote,
    ) -> Result<abci::ResponseExtendVote, MultiplexerError>;

    async fn verify_vote_extension(
        &self,
        request: abci::RequestVerifyVoteExtension,
    ) -> Result<abci::ResponseVerifyVoteExtension, MultiplexerError>;

    async fn list_snapshots(
        &self,
        request: abci::RequestListSnapshots,
    ) -> Result<abci::ResponseListSnapshots, MultiplexerError>;

    async fn offer_snapshot(
        &self,
        request: abci::RequestOfferSnapshot,
    ) -> Result<abci::ResponseOfferSnapshot, MultiplexerError>;

    async fn load_snapshot_chunk(
        &self,
        request: abci::RequestLoadSnapshotChunk,
    ) -> Result<abci::ResponseLoadSnapshotChunk, MultiplexerError>;

    async fn apply_snapshot_chunk(
        &self,
        request: abci::RequestApplySnapshotChunk,
    ) -> Result<abci::ResponseApplySnapshotChunk, MultiplexerError>;
}
