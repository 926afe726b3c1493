//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Serves an [`Application`] to a consensus engine over the framed envelope
//! protocol. Errors from the application are reported as exception responses
//! rather than dropped connections.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use log::*;
use lumen_shutdown::ShutdownSignal;
use prost::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::LengthDelimitedCodec;

use crate::{proto::abci, rpc::MAX_FRAME_SIZE, traits::Application};

const LOG_TARGET: &str = "multiplexer::server";

/// Accepts connections from the consensus engine and dispatches envelope
/// requests to the wrapped application.
pub struct AbciServer {
    listener: TcpListener,
    application: Arc<dyn Application>,
}

impl AbciServer {
    pub async fn bind<T: Into<String>>(
        address: T,
        application: Arc<dyn Application>,
    ) -> Result<Self, std::io::Error> {
        let address = address.into();
        let listener = TcpListener::bind(&address).await?;
        info!(target: LOG_TARGET, "Listening for consensus connections on {}", address);
        Ok(Self { listener, application })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until the shutdown signal fires.
    pub async fn serve(self, mut shutdown: ShutdownSignal) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(target: LOG_TARGET, "Accepted consensus connection from {}", peer);
                        let application = self.application.clone();
                        let signal = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, application, signal).await {
                                warn!(target: LOG_TARGET, "Connection from {} ended with error: {}", peer, err);
                            }
                        });
                    },
                    Err(err) => {
                        warn!(target: LOG_TARGET, "Failed to accept connection: {}", err);
                    },
                },
                _ = shutdown.wait() => {
                    info!(target: LOG_TARGET, "Shutdown signal received, stopping listener");
                    break;
                },
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    application: Arc<dyn Application>,
    mut shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let mut framed = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_framed(stream);

    loop {
        let frame = tokio::select! {
            frame = framed.next() => match frame {
                Some(frame) => frame?,
                None => break,
            },
            _ = shutdown.wait() => break,
        };

        let response = match abci::Request::decode(Bytes::from(frame)) {
            Ok(request) => dispatch(&*application, request).await,
            Err(err) => exception(format!("malformed request: {}", err)),
        };

        let mut buf = BytesMut::with_capacity(response.encoded_len());
        response
            .encode(&mut buf)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        framed.send(buf.freeze()).await?;
    }
    Ok(())
}

fn exception(error: String) -> abci::Response {
    abci::Response {
        value: Some(abci::response::Value::Exception(abci::ResponseException { error })),
    }
}

async fn dispatch(application: &dyn Application, request: abci::Request) -> abci::Response {
    use abci::{request::Value as Req, response::Value as Resp};

    let value = match request.value {
        Some(value) => value,
        None => return exception("empty request envelope".to_string()),
    };

    let result = match value {
        Req::Info(req) => application.info(req).await.map(Resp::Info),
        Req::InitChain(req) => application.init_chain(req).await.map(Resp::InitChain),
        Req::Query(req) => application.query(req).await.map(Resp::Query),
        Req::CheckTx(req) => application.check_tx(req).await.map(Resp::CheckTx),
        Req::PrepareProposal(req) => application.prepare_proposal(req).await.map(Resp::PrepareProposal),
        Req::ProcessProposal(req) => application.process_proposal(req).await.map(Resp::ProcessProposal),
        Req::FinalizeBlock(req) => application.finalize_block(req).await.map(Resp::FinalizeBlock),
        Req::Commit(req) => application.commit(req).await.map(Resp::Commit),
        Req::ExtendVote(req) => application.extend_vote(req).await.map(Resp::ExtendVote),
        Req::VerifyVoteExtension(req) => application
            .verify_vote_extension(req)
            .await
            .map(Resp::VerifyVoteExtension),
        Req::ListSnapshots(req) => application.list_snapshots(req).await.map(Resp::ListSnapshots),
        Req::OfferSnapshot(req) => application.offer_snapshot(req).await.map(Resp::OfferSnapshot),
        Req::LoadSnapshotChunk(req) => application.load_snapshot_chunk(req).await.map(Resp::LoadSnapshotChunk),
        Req::ApplySnapshotChunk(req) => application
            .apply_snapshot_chunk(req)
            .await
            .map(Resp::ApplySnapshotChunk),
    };

    match result {
        Ok(value) => abci::Response { value: Some(value) },
        Err(err) => {
            error!(target: LOG_TARGET, "Application returned an error: {}", err);
            exception(err.to_string())
        },
    }
}
