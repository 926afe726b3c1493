//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Length-delimited request/response channel to a remote application process.
//!
//! Every request over a connection is serialized: the protocol is strictly
//! ping-pong, so a single in-flight exchange at a time is an invariant, not a
//! limitation.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use log::*;
use prost::Message;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::RpcError;

const LOG_TARGET: &str = "multiplexer::rpc";

/// Maximum frame size accepted on the wire. Blocks can be large.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const CONNECT_ATTEMPTS: usize = 40;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

type Framing = Framed<TcpStream, LengthDelimitedCodec>;

fn framing(stream: TcpStream) -> Framing {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_framed(stream)
}

enum State {
    Disconnected,
    Connected(Framing),
    Closed,
}

/// A lazily-established connection to a remote application.
///
/// The first call dials the address, retrying with a fixed interval while the
/// process finishes binding its listener. A transport failure drops the
/// connection so the next call redials; `close` is terminal.
pub struct AbciConnection {
    address: String,
    state: tokio::sync::Mutex<State>,
}

impl AbciConnection {
    pub fn new<T: Into<String>>(address: T) -> Self {
        Self {
            address: address.into(),
            state: tokio::sync::Mutex::new(State::Disconnected),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sends a single request and waits for the single response frame.
    pub async fn call<Req, Resp>(&self, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut state = self.state.lock().await;
        let framed = match &mut *state {
            State::Connected(framed) => framed,
            State::Disconnected => {
                let framed = self.connect().await?;
                *state = State::Connected(framed);
                match &mut *state {
                    State::Connected(framed) => framed,
                    _ => unreachable!(),
                }
            },
            State::Closed => return Err(RpcError::ChannelClosed),
        };

        match Self::exchange(framed, request).await {
            Ok(resp) => Ok(resp),
            Err(err) => {
                // Tear the connection down so the next call redials.
                warn!(
                    target: LOG_TARGET,
                    "Connection to {} failed ({}), dropping it", self.address, err
                );
                *state = State::Disconnected;
                Err(err)
            },
        }
    }

    async fn exchange<Req, Resp>(framed: &mut Framing, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut buf = BytesMut::with_capacity(request.encoded_len());
        request
            .encode(&mut buf)
            .map_err(|e| RpcError::Exception(e.to_string()))?;
        framed.send(buf.freeze()).await?;
        let frame = framed.next().await.ok_or(RpcError::ChannelClosed)??;
        let resp = Resp::decode(Bytes::from(frame))?;
        Ok(resp)
    }

    async fn connect(&self) -> Result<Framing, RpcError> {
        let mut last_err = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match TcpStream::connect(&self.address).await {
                Ok(stream) => {
                    debug!(
                        target: LOG_TARGET,
                        "Connected to remote application at {} (attempt {})", self.address, attempt
                    );
                    return Ok(framing(stream));
                },
                Err(err) => {
                    trace!(
                        target: LOG_TARGET,
                        "Connect attempt {} to {} failed: {}", attempt, self.address, err
                    );
                    last_err = Some(err);
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                },
            }
        }
        Err(RpcError::ConnectFailed {
            address: self.address.clone(),
            source: last_err.unwrap_or_else(|| std::io::Error::other("no connect attempts made")),
        })
    }

    /// Closes the connection permanently. Subsequent calls fail with
    /// `ChannelClosed`.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let State::Connected(framed) = &mut *state {
            let _ = framed.close().await;
        }
        *state = State::Closed;
    }
}

#[cfg(test)]
mod test {
    use tokio::net::TcpListener;

    use super::*;
    use crate::proto::abci;

    async fn serve_echo_info(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = framing(stream);
        while let Some(Ok(frame)) = framed.next().await {
            let _req = abci::Request::decode(Bytes::from(frame)).unwrap();
            let resp = abci::Response {
                value: Some(abci::response::Value::Info(abci::ResponseInfo {
                    data: "echo".to_string(),
                    app_version: 7,
                    ..Default::default()
                })),
            };
            let mut buf = BytesMut::new();
            resp.encode(&mut buf).unwrap();
            framed.send(buf.freeze()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn call_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_echo_info(listener));

        let conn = AbciConnection::new(addr.to_string());
        let req = abci::Request {
            value: Some(abci::request::Value::Info(abci::RequestInfo::default())),
        };
        let resp: abci::Response = conn.call(&req).await.unwrap();
        match resp.value {
            Some(abci::response::Value::Info(info)) => {
                assert_eq!(info.data, "echo");
                assert_eq!(info.app_version, 7);
            },
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn connects_lazily_once_listener_appears() {
        // Reserve a port, drop the listener, rebind shortly after the first
        // connect attempt has failed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            serve_echo_info(listener).await;
        });

        let conn = AbciConnection::new(addr.to_string());
        let req = abci::Request {
            value: Some(abci::request::Value::Info(abci::RequestInfo::default())),
        };
        let resp: abci::Response = conn.call(&req).await.unwrap();
        assert!(resp.value.is_some());
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_echo_info(listener));

        let conn = AbciConnection::new(addr.to_string());
        let req = abci::Request {
            value: Some(abci::request::Value::Info(abci::RequestInfo::default())),
        };
        let _: abci::Response = conn.call(&req).await.unwrap();
        conn.close().await;
        let err = conn.call::<_, abci::Response>(&req).await.unwrap_err();
        assert!(matches!(err, RpcError::ChannelClosed));
    }
}
