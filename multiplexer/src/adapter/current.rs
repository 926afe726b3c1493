//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Client for embedded binaries that already speak the current wire revision.
//! Requests pass through untranslated.

use async_trait::async_trait;

use crate::{
    error::{MultiplexerError, RpcError},
    proto::abci,
    rpc::AbciConnection,
    traits::Application,
};

macro_rules! roundtrip {
    ($self:ident, $request:expr, $req_variant:ident, $resp_variant:ident, $operation:literal) => {{
        let request = abci::Request {
            value: Some(abci::request::Value::$req_variant($request)),
        };
        let response: abci::Response = $self.connection.call(&request).await?;
        let result: Result<_, MultiplexerError> = match response.value {
            Some(abci::response::Value::$resp_variant(resp)) => Ok(resp),
            Some(abci::response::Value::Exception(ex)) => Err(RpcError::Exception(ex.error).into()),
            _ => Err(RpcError::UnexpectedResponse { operation: $operation }.into()),
        };
        result
    }};
}

pub struct CurrentClient {
    connection: AbciConnection,
}

impl CurrentClient {
    pub fn new<T: Into<String>>(address: T) -> Self {
        Self {
            connection: AbciConnection::new(address),
        }
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}

#[async_trait]
impl Application for CurrentClient {
    async fn info(&self, request: abci::RequestInfo) -> Result<abci::ResponseInfo, MultiplexerError> {
        roundtrip!(self, request, Info, Info, "info")
    }

    async fn init_chain(
        &self,
        request: abci::RequestInitChain,
    ) -> Result<abci::ResponseInitChain, MultiplexerError> {
        roundtrip!(self, request, InitChain, InitChain, "init_chain")
    }

    async fn query(&self, request: abci::RequestQuery) -> Result<abci::ResponseQuery, MultiplexerError> {
        roundtrip!(self, request, Query, Query, "query")
    }

    async fn check_tx(&self, request: abci::RequestCheckTx) -> Result<abci::ResponseCheckTx, MultiplexerError> {
        roundtrip!(self, request, CheckTx, CheckTx, "check_tx")
    }

    async fn prepare_proposal(
        &self,
        request: abci::RequestPrepareProposal,
    ) -> Result<abci::ResponsePrepareProposal, MultiplexerError> {
        roundtrip!(self, request, PrepareProposal, PrepareProposal, "prepare_proposal")
    }

    async fn process_proposal(
        &self,
        request: abci::RequestProcessProposal,
    ) -> Result<abci::ResponseProcessProposal, MultiplexerError> {
        roundtrip!(self, request, ProcessProposal, ProcessProposal, "process_proposal")
    }

    async fn finalize_block(
        &self,
        request: abci::RequestFinalizeBlock,
    ) -> Result<abci::ResponseFinalizeBlock, MultiplexerError> {
        roundtrip!(self, request, FinalizeBlock, FinalizeBlock, "finalize_block")
    }

    async fn commit(&self, request: abci::RequestCommit) -> Result<abci::ResponseCommit, MultiplexerError> {
        roundtrip!(self, request, Commit, Commit, "commit")
    }

    async fn extend_vote(
        &self,
        request: abci::RequestExtendVote,
    ) -> Result<abci::ResponseExtendVote, MultiplexerError> {
        roundtrip!(self, request, ExtendVote, ExtendVote, "extend_vote")
    }

    async fn verify_vote_extension(
        &self,
        request: abci::RequestVerifyVoteExtension,
    ) -> Result<abci::ResponseVerifyVoteExtension, MultiplexerError> {
        roundtrip!(
            self,
            request,
            VerifyVoteExtension,
            VerifyVoteExtension,
            "verify_vote_extension"
        )
    }

    async fn list_snapshots(
        &self,
        request: abci::RequestListSnapshots,
    ) -> Result<abci::ResponseListSnapshots, MultiplexerError> {
        roundtrip!(self, request, ListSnapshots, ListSnapshots, "list_snapshots")
    }

    async fn offer_snapshot(
        &self,
        request: abci::RequestOfferSnapshot,
    ) -> Result<abci::ResponseOfferSnapshot, MultiplexerError> {
        roundtrip!(self, request, OfferSnapshot, OfferSnapshot, "offer_snapshot")
    }

    async fn load_snapshot_chunk(
        &self,
        request: abci::RequestLoadSnapshotChunk,
    ) -> Result<abci::ResponseLoadSnapshotChunk, MultiplexerError> {
        roundtrip!(self, request, LoadSnapshotChunk, LoadSnapshotChunk, "load_snapshot_chunk")
    }

    async fn apply_snapshot_chunk(
        &self,
        request: abci::RequestApplySnapshotChunk,
    ) -> Result<abci::ResponseApplySnapshotChunk, MultiplexerError> {
        roundtrip!(
            self,
            request,
            ApplySnapshotChunk,
            ApplySnapshotChunk,
            "apply_snapshot_chunk"
        )
    }
}
