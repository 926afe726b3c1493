//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Client for embedded binaries speaking the older wire revision. Presents
//! the current revision by translating requests down, responses up, and
//! stitching single finalize-block calls out of the split legacy execution
//! flow.

use async_trait::async_trait;
use log::*;
use tokio::sync::Mutex;

use super::translate;
use crate::{
    error::{MultiplexerError, RpcError},
    proto::{abci, legacy},
    rpc::AbciConnection,
    traits::Application,
};

const LOG_TARGET: &str = "multiplexer::adapter::legacy";

macro_rules! roundtrip {
    ($self:ident, $request:expr, $req_variant:ident, $resp_variant:ident, $operation:literal) => {{
        let request = legacy::Request {
            value: Some(legacy::request::Value::$req_variant($request)),
        };
        let response: legacy::Response = $self.connection.call(&request).await?;
        let result: Result<_, MultiplexerError> = match response.value {
            Some(legacy::response::Value::$resp_variant(resp)) => Ok(resp),
            Some(legacy::response::Value::Exception(ex)) => Err(RpcError::Exception(ex.error).into()),
            _ => Err(RpcError::UnexpectedResponse { operation: $operation }.into()),
        };
        result
    }};
}

/// Per-connection state the legacy flow needs carried between operations.
#[derive(Debug, Default)]
struct Session {
    /// Retain height reported by the most recent legacy commit, handed to the
    /// consensus engine on the next commit call.
    retain_height: i64,
    /// Consensus app version, cached from end-block parameter updates. `None`
    /// until first learned; resolved via an info query on demand.
    app_version: Option<u64>,
    /// Chain id, learned from init-chain. Legacy proposal requests carry it
    /// explicitly.
    chain_id: String,
}

pub struct LegacyClient {
    connection: AbciConnection,
    session: Mutex<Session>,
}

impl LegacyClient {
    pub fn new<T: Into<String>>(address: T) -> Self {
        Self {
            connection: AbciConnection::new(address),
            session: Mutex::new(Session::default()),
        }
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }

    /// The consensus app version currently in effect on the remote, from the
    /// session cache or an info query when nothing is cached yet.
    async fn current_app_version(&self) -> Result<u64, MultiplexerError> {
        if let Some(version) = self.session.lock().await.app_version {
            return Ok(version);
        }
        let info: legacy::ResponseInfo =
            roundtrip!(self, legacy::RequestInfo::default(), Info, Info, "info")?;
        let mut session = self.session.lock().await;
        session.app_version = Some(info.app_version);
        Ok(info.app_version)
    }

    /// Legacy requests always carry this client's own notion of the protocol
    /// version and chain id, no matter what the incoming header claimed. The
    /// chain id is only overridden once init-chain has taught us one.
    async fn pin_header(&self, header: &mut legacy::Header, app_version: u64) {
        header.version = Some(legacy::Consensus {
            block: legacy::BLOCK_PROTOCOL_VERSION,
            app: app_version,
        });
        let chain_id = self.session.lock().await.chain_id.clone();
        if !chain_id.is_empty() {
            header.chain_id = chain_id;
        }
    }
}

#[async_trait]
impl Application for LegacyClient {
    async fn info(&self, request: abci::RequestInfo) -> Result<abci::ResponseInfo, MultiplexerError> {
        let request = legacy::RequestInfo {
            version: request.version,
            block_version: request.block_version,
            p2p_version: request.p2p_version,
        };
        let resp: legacy::ResponseInfo = roundtrip!(self, request, Info, Info, "info")?;
        Ok(abci::ResponseInfo {
            data: resp.data,
            version: resp.version,
            app_version: resp.app_version,
            last_block_height: resp.last_block_height,
            last_block_app_hash: resp.last_block_app_hash,
        })
    }

    async fn init_chain(
        &self,
        request: abci::RequestInitChain,
    ) -> Result<abci::ResponseInitChain, MultiplexerError> {
        self.session.lock().await.chain_id = request.chain_id.clone();
        let request = legacy::RequestInitChain {
            time: request.time,
            chain_id: request.chain_id,
            consensus_params: request.consensus_params.map(translate::consensus_params_to_legacy),
            validators: translate::validator_updates_to_legacy(request.validators),
            app_state_bytes: request.app_state_bytes,
            initial_height: request.initial_height,
        };
        let resp: legacy::ResponseInitChain = roundtrip!(self, request, InitChain, InitChain, "init_chain")?;
        if let Some(version) = resp
            .consensus_params
            .as_ref()
            .and_then(|p| p.version.as_ref())
        {
            self.session.lock().await.app_version = Some(version.app_version);
        }
        Ok(abci::ResponseInitChain {
            consensus_params: resp.consensus_params.map(translate::consensus_params_to_current),
            validators: translate::validator_updates_to_current(resp.validators),
            app_hash: resp.app_hash,
        })
    }

    async fn query(&self, request: abci::RequestQuery) -> Result<abci::ResponseQuery, MultiplexerError> {
        let request = legacy::RequestQuery {
            data: request.data,
            path: request.path,
            height: request.height,
            prove: request.prove,
        };
        let resp: legacy::ResponseQuery = roundtrip!(self, request, Query, Query, "query")?;
        Ok(abci::ResponseQuery {
            code: resp.code,
            log: resp.log,
            info: resp.info,
            index: resp.index,
            key: resp.key,
            value: resp.value,
            proof_ops: resp.proof_ops.map(translate::proof_ops_to_current),
            height: resp.height,
            codespace: resp.codespace,
        })
    }

    async fn check_tx(&self, request: abci::RequestCheckTx) -> Result<abci::ResponseCheckTx, MultiplexerError> {
        let request = legacy::RequestCheckTx {
            tx: request.tx,
            r#type: request.r#type,
        };
        let resp: legacy::ResponseCheckTx = roundtrip!(self, request, CheckTx, CheckTx, "check_tx")?;
        Ok(abci::ResponseCheckTx {
            code: resp.code,
            data: resp.data,
            log: resp.log,
            info: resp.info,
            gas_wanted: resp.gas_wanted,
            gas_used: resp.gas_used,
            events: translate::events_to_current(resp.events),
            codespace: resp.codespace,
        })
    }

    async fn prepare_proposal(
        &self,
        request: abci::RequestPrepareProposal,
    ) -> Result<abci::ResponsePrepareProposal, MultiplexerError> {
        let chain_id = self.session.lock().await.chain_id.clone();
        let request = legacy::RequestPrepareProposal {
            chain_id,
            block_data: Some(legacy::Data {
                txs: request.txs,
                ..Default::default()
            }),
            block_data_size: request.max_tx_bytes,
            height: request.height,
            time: request.time,
        };
        let resp: legacy::ResponsePrepareProposal =
            roundtrip!(self, request, PrepareProposal, PrepareProposal, "prepare_proposal")?;
        let block_data = resp.block_data.unwrap_or_default();
        Ok(abci::ResponsePrepareProposal {
            txs: block_data.txs,
            square_size: block_data.square_size,
            data_root_hash: block_data.hash,
        })
    }

    async fn process_proposal(
        &self,
        request: abci::RequestProcessProposal,
    ) -> Result<abci::ResponseProcessProposal, MultiplexerError> {
        let app_version = self.current_app_version().await?;
        let mut header = match request.header.clone() {
            Some(header) => translate::header_to_legacy(header),
            None => legacy::Header {
                height: request.height,
                time: request.time,
                next_validators_hash: request.next_validators_hash.clone(),
                proposer_address: request.proposer_address.clone(),
                data_hash: request.data_root_hash.clone(),
                ..Default::default()
            },
        };
        self.pin_header(&mut header, app_version).await;
        let request = legacy::RequestProcessProposal {
            header: Some(header),
            block_data: Some(legacy::Data {
                txs: request.txs,
                square_size: request.square_size,
                hash: request.data_root_hash,
            }),
        };
        let resp: legacy::ResponseProcessProposal =
            roundtrip!(self, request, ProcessProposal, ProcessProposal, "process_proposal")?;
        let status = if resp.result == legacy::response_process_proposal::Result::Accept as i32 {
            abci::response_process_proposal::ProposalStatus::Accept
        } else {
            abci::response_process_proposal::ProposalStatus::Reject
        };
        Ok(abci::ResponseProcessProposal { status: status as i32 })
    }

    /// Drives the legacy begin-block / deliver-tx / end-block / commit flow
    /// and folds the results into a single finalize response. The remote
    /// commits its state here; the commit call on this client only reports
    /// the retain height learned now.
    async fn finalize_block(
        &self,
        request: abci::RequestFinalizeBlock,
    ) -> Result<abci::ResponseFinalizeBlock, MultiplexerError> {
        let app_version = self.current_app_version().await?;
        let mut header = translate::finalize_block_header(&request, app_version);
        self.pin_header(&mut header, app_version).await;

        let begin = legacy::RequestBeginBlock {
            hash: request.hash.clone(),
            header: Some(header),
            last_commit_info: request.decided_last_commit.map(translate::commit_info_to_legacy),
            byzantine_validators: translate::misbehavior_to_legacy(request.misbehavior),
        };
        let begin_resp: legacy::ResponseBeginBlock =
            roundtrip!(self, begin, BeginBlock, BeginBlock, "begin_block")?;
        let mut events = translate::events_to_current(begin_resp.events);

        let mut tx_results = Vec::with_capacity(request.txs.len());
        for tx in request.txs {
            let deliver: legacy::ResponseDeliverTx = roundtrip!(
                self,
                legacy::RequestDeliverTx { tx },
                DeliverTx,
                DeliverTx,
                "deliver_tx"
            )?;
            // The block-level event stream carries each transaction's events
            // in execution order, in addition to the per-tx results.
            events.extend(translate::events_to_current(deliver.events.clone()));
            tx_results.push(translate::tx_result_to_current(deliver));
        }

        let end: legacy::ResponseEndBlock = roundtrip!(
            self,
            legacy::RequestEndBlock { height: request.height },
            EndBlock,
            EndBlock,
            "end_block"
        )?;

        let commit: legacy::ResponseCommit =
            roundtrip!(self, legacy::RequestCommit {}, Commit, Commit, "commit")?;

        {
            let mut session = self.session.lock().await;
            session.retain_height = commit.retain_height;
            if let Some(version) = end
                .consensus_param_updates
                .as_ref()
                .and_then(|p| p.version.as_ref())
            {
                debug!(
                    target: LOG_TARGET,
                    "End-block updated consensus app version to {}", version.app_version
                );
                session.app_version = Some(version.app_version);
            }
        }

        events.extend(translate::events_to_current(end.events.clone()));

        Ok(abci::ResponseFinalizeBlock {
            events,
            tx_results,
            validator_updates: translate::validator_updates_to_current(end.validator_updates),
            consensus_param_updates: end.consensus_param_updates.map(translate::consensus_params_to_current),
            app_hash: commit.data,
        })
    }

    /// The remote already committed during finalize; only the retain height
    /// learned there is reported back.
    async fn commit(&self, _request: abci::RequestCommit) -> Result<abci::ResponseCommit, MultiplexerError> {
        let retain_height = self.session.lock().await.retain_height;
        Ok(abci::ResponseCommit { retain_height })
    }

    /// Vote extensions postdate the legacy revision; nothing to extend.
    async fn extend_vote(
        &self,
        _request: abci::RequestExtendVote,
    ) -> Result<abci::ResponseExtendVote, MultiplexerError> {
        Ok(abci::ResponseExtendVote::default())
    }

    async fn verify_vote_extension(
        &self,
        _request: abci::RequestVerifyVoteExtension,
    ) -> Result<abci::ResponseVerifyVoteExtension, MultiplexerError> {
        Ok(abci::ResponseVerifyVoteExtension {
            status: abci::response_verify_vote_extension::VerifyStatus::Accept as i32,
        })
    }

    async fn list_snapshots(
        &self,
        _request: abci::RequestListSnapshots,
    ) -> Result<abci::ResponseListSnapshots, MultiplexerError> {
        let resp: legacy::ResponseListSnapshots = roundtrip!(
            self,
            legacy::RequestListSnapshots {},
            ListSnapshots,
            ListSnapshots,
            "list_snapshots"
        )?;
        Ok(abci::ResponseListSnapshots {
            snapshots: translate::snapshots_to_current(resp.snapshots),
        })
    }

    async fn offer_snapshot(
        &self,
        request: abci::RequestOfferSnapshot,
    ) -> Result<abci::ResponseOfferSnapshot, MultiplexerError> {
        let request = legacy::RequestOfferSnapshot {
            snapshot: request.snapshot.map(translate::snapshot_to_legacy),
            app_hash: request.app_hash,
            app_version: request.app_version,
        };
        let resp: legacy::ResponseOfferSnapshot =
            roundtrip!(self, request, OfferSnapshot, OfferSnapshot, "offer_snapshot")?;
        Ok(abci::ResponseOfferSnapshot { result: resp.result })
    }

    async fn load_snapshot_chunk(
        &self,
        request: abci::RequestLoadSnapshotChunk,
    ) -> Result<abci::ResponseLoadSnapshotChunk, MultiplexerError> {
        let request = legacy::RequestLoadSnapshotChunk {
            height: request.height,
            format: request.format,
            chunk: request.chunk,
        };
        let resp: legacy::ResponseLoadSnapshotChunk = roundtrip!(
            self,
            request,
            LoadSnapshotChunk,
            LoadSnapshotChunk,
            "load_snapshot_chunk"
        )?;
        Ok(abci::ResponseLoadSnapshotChunk { chunk: resp.chunk })
    }

    async fn apply_snapshot_chunk(
        &self,
        request: abci::RequestApplySnapshotChunk,
    ) -> Result<abci::ResponseApplySnapshotChunk, MultiplexerError> {
        let request = legacy::RequestApplySnapshotChunk {
            index: request.index,
            chunk: request.chunk,
            sender: request.sender,
        };
        let resp: legacy::ResponseApplySnapshotChunk = roundtrip!(
            self,
            request,
            ApplySnapshotChunk,
            ApplySnapshotChunk,
            "apply_snapshot_chunk"
        )?;
        Ok(abci::ResponseApplySnapshotChunk {
            result: resp.result,
            refetch_chunks: resp.refetch_chunks,
            reject_senders: resp.reject_senders,
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use bytes::{Bytes, BytesMut};
    use futures::{SinkExt, StreamExt};
    use prost::Message;
    use tokio::{net::TcpListener, sync::Mutex as AsyncMutex};

    use super::*;
    use crate::rpc::MAX_FRAME_SIZE;

    /// A scripted legacy-revision server that records the operations it saw.
    async fn serve_legacy(listener: TcpListener, seen: Arc<AsyncMutex<Vec<&'static str>>>) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = tokio_util::codec::LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_SIZE)
            .new_framed(stream);
        while let Some(Ok(frame)) = framed.next().await {
            let request = legacy::Request::decode(Bytes::from(frame)).unwrap();
            use legacy::{request::Value as Req, response::Value as Resp};
            let value = match request.value.unwrap() {
                Req::Info(_) => {
                    seen.lock().await.push("info");
                    Resp::Info(legacy::ResponseInfo {
                        app_version: 2,
                        ..Default::default()
                    })
                },
                Req::BeginBlock(req) => {
                    seen.lock().await.push("begin_block");
                    let version = req.header.unwrap().version.unwrap();
                    assert_eq!(version.block, legacy::BLOCK_PROTOCOL_VERSION);
                    assert_eq!(version.app, 2);
                    Resp::BeginBlock(legacy::ResponseBeginBlock {
                        events: vec![legacy::Event {
                            r#type: "begin".to_string(),
                            attributes: vec![],
                        }],
                    })
                },
                Req::DeliverTx(req) => {
                    seen.lock().await.push("deliver_tx");
                    Resp::DeliverTx(legacy::ResponseDeliverTx {
                        code: 0,
                        data: req.tx,
                        events: vec![legacy::Event {
                            r#type: "tx".to_string(),
                            attributes: vec![],
                        }],
                        ..Default::default()
                    })
                },
                Req::EndBlock(_) => {
                    seen.lock().await.push("end_block");
                    Resp::EndBlock(legacy::ResponseEndBlock {
                        consensus_param_updates: Some(legacy::ConsensusParams {
                            version: Some(legacy::VersionParams { app_version: 3 }),
                            ..Default::default()
                        }),
                        events: vec![legacy::Event {
                            r#type: "end".to_string(),
                            attributes: vec![],
                        }],
                        ..Default::default()
                    })
                },
                Req::Commit(_) => {
                    seen.lock().await.push("commit");
                    Resp::Commit(legacy::ResponseCommit {
                        data: b"apphash".to_vec(),
                        retain_height: 10,
                    })
                },
                other => panic!("unexpected request {:?}", other),
            };
            let response = legacy::Response { value: Some(value) };
            let mut buf = BytesMut::new();
            response.encode(&mut buf).unwrap();
            framed.send(buf.freeze()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn finalize_block_stitches_legacy_flow() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        tokio::spawn(serve_legacy(listener, seen.clone()));

        let client = LegacyClient::new(addr.to_string());
        let response = client
            .finalize_block(abci::RequestFinalizeBlock {
                txs: vec![b"tx1".to_vec(), b"tx2".to_vec()],
                height: 5,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().await,
            vec!["info", "begin_block", "deliver_tx", "deliver_tx", "end_block", "commit"]
        );
        assert_eq!(response.app_hash, b"apphash");
        assert_eq!(response.tx_results.len(), 2);
        assert_eq!(response.tx_results[0].data, b"tx1");
        assert_eq!(response.tx_results[0].events[0].r#type, "tx");
        // Block events concatenate in execution phase order: begin-block,
        // each transaction's events, then end-block.
        let phases: Vec<&str> = response.events.iter().map(|e| e.r#type.as_str()).collect();
        assert_eq!(phases, vec!["begin", "tx", "tx", "end"]);
        assert_eq!(
            response
                .consensus_param_updates
                .unwrap()
                .version
                .unwrap()
                .app,
            3
        );

        // The retain height from the legacy commit surfaces on the next
        // commit call without touching the remote again.
        let commit = client.commit(abci::RequestCommit {}).await.unwrap();
        assert_eq!(commit.retain_height, 10);
        let calls = seen.lock().await.len();
        assert_eq!(calls, 6);
    }

    #[tokio::test]
    async fn incoming_header_version_is_repinned() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        tokio::spawn(serve_legacy(listener, seen.clone()));

        // A fully populated header comes in claiming a different protocol
        // version; the one on the wire must carry ours. The scripted server
        // rejects anything else, which surfaces here as a dropped connection.
        let client = LegacyClient::new(addr.to_string());
        let response = client
            .finalize_block(abci::RequestFinalizeBlock {
                height: 7,
                header: Some(abci::Header {
                    version: Some(abci::Consensus { block: 99, app: 42 }),
                    chain_id: "stale-chain".to_string(),
                    height: 7,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.app_hash, b"apphash");
    }

    #[tokio::test]
    async fn app_version_cache_supersedes_info_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        tokio::spawn(serve_legacy(listener, seen.clone()));

        let client = LegacyClient::new(addr.to_string());
        // First resolution falls back to an info query.
        assert_eq!(client.current_app_version().await.unwrap(), 2);
        // A finalized block updates the cache from end-block; no further info
        // queries happen.
        client
            .finalize_block(abci::RequestFinalizeBlock {
                height: 6,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(client.current_app_version().await.unwrap(), 3);
        assert_eq!(seen.lock().await.iter().filter(|op| **op == "info").count(), 1);
    }

    #[tokio::test]
    async fn vote_extensions_are_local_no_ops() {
        let client = LegacyClient::new("127.0.0.1:1");
        let extend = client.extend_vote(abci::RequestExtendVote::default()).await.unwrap();
        assert!(extend.vote_extension.is_empty());
        let verify = client
            .verify_vote_extension(abci::RequestVerifyVoteExtension::default())
            .await
            .unwrap();
        assert_eq!(
            verify.status,
            abci::response_verify_vote_extension::VerifyStatus::Accept as i32
        );
    }
}
