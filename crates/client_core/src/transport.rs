use std::{convert::Infallible, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use futures::{Sink, SinkExt, StreamExt};
use shared::protocol::{InboundFrame, OutboundRequest};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::{
    config::{Backoff, ReconnectPolicy},
    error::CallError,
    protocol_client::RequestCorrelator,
};

type ControllerStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Receives everything the transport reads, in arrival order.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_connected(&self);
    async fn on_frame(&self, frame: InboundFrame);
    async fn on_disconnected(&self);
}

enum SessionEnd {
    /// Network-level failure; retried with growing backoff.
    Lost(String),
    /// Something this side could not handle; retried after a fixed delay.
    Internal(anyhow::Error),
}

pub struct Transport {
    url: String,
    correlator: Arc<RequestCorrelator>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
}

impl Transport {
    pub fn new(url: impl Into<String>, correlator: Arc<RequestCorrelator>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: url.into(),
            correlator,
            policy,
            state,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connects, serves the session and reconnects, forever.
    pub async fn run(&self, handler: Arc<dyn FrameHandler>) -> Infallible {
        let mut backoff = Backoff::new(self.policy);
        loop {
            self.state.send_replace(ConnectionState::Connecting);
            debug!(url = %self.url, "connecting to controller");

            let delay = match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    backoff.reset();
                    match self.serve(stream, handler.as_ref()).await {
                        SessionEnd::Lost(reason) => {
                            warn!(url = %self.url, %reason, "controller connection lost");
                            backoff.next_network_delay()
                        }
                        SessionEnd::Internal(err) => {
                            error!(url = %self.url, error = %format!("{err:#}"), "controller session failed");
                            backoff.internal_failure_delay()
                        }
                    }
                }
                Err(err) => {
                    warn!(url = %self.url, error = %err, "failed to connect to controller");
                    backoff.next_network_delay()
                }
            };

            self.state.send_replace(ConnectionState::Disconnected);
            info!(delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    async fn serve(&self, stream: ControllerStream, handler: &dyn FrameHandler) -> SessionEnd {
        let (mut writer, mut reader) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundRequest>();

        // Bootstrap snapshots go out before anything a handler might send.
        let _ = outbound_tx.send(OutboundRequest::query_variables());
        let _ = outbound_tx.send(OutboundRequest::query_custom_controls());
        self.correlator.attach(outbound_tx).await;

        self.state.send_replace(ConnectionState::Connected);
        info!(url = %self.url, "connected to controller");
        handler.on_connected().await;

        let end = loop {
            tokio::select! {
                request = outbound_rx.recv() => {
                    let Some(request) = request else {
                        break SessionEnd::Lost("outbound queue closed".into());
                    };
                    if let Err(end) = self.write(&mut writer, request).await {
                        break end;
                    }
                }
                message = reader.next() => match message {
                    Some(Ok(Message::Text(text))) => match InboundFrame::decode(&text) {
                        Ok(frame) => handler.on_frame(frame).await,
                        Err(err) => {
                            break SessionEnd::Internal(
                                anyhow::Error::new(err).context("undecodable frame from controller"),
                            );
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|frame| frame.reason.to_string())
                            .unwrap_or_else(|| "closed by controller".into());
                        break SessionEnd::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break SessionEnd::Lost(err.to_string()),
                    None => break SessionEnd::Lost("stream ended".into()),
                },
            }
        };

        self.correlator.detach().await;
        handler.on_disconnected().await;
        let _ = writer.close().await;
        end
    }

    async fn write<S>(&self, writer: &mut S, request: OutboundRequest) -> Result<(), SessionEnd>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        let text = match serde_json::to_string(&request)
            .with_context(|| format!("failed to encode request '{}'", request.method))
        {
            Ok(text) => text,
            Err(err) => {
                self.correlator
                    .fail(&request.id, CallError::TransportLost(format!("{err:#}")))
                    .await;
                return Err(SessionEnd::Internal(err));
            }
        };
        if let Err(err) = writer.send(Message::Text(text)).await {
            let reason = err.to_string();
            self.correlator
                .fail(&request.id, CallError::TransportLost(reason.clone()))
                .await;
            return Err(SessionEnd::Lost(reason));
        }
        debug!(id = %request.id, method = %request.method, "sent request");
        Ok(())
    }
}

/// Waits until `state` reports `wanted`; `false` if `limit` passes first.
pub async fn wait_for_state(
    state: &mut watch::Receiver<ConnectionState>,
    wanted: ConnectionState,
    limit: Duration,
) -> bool {
    tokio::time::timeout(limit, state.wait_for(|current| *current == wanted))
        .await
        .is_ok_and(|result| result.is_ok())
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
