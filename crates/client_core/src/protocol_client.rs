use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde_json::Value;
use shared::{
    domain::RequestId,
    protocol::{OutboundRequest, Reply, ReplyOutcome, FIRST_REQUEST_ID},
};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;

use crate::error::CallError;

type ResultSlot = oneshot::Sender<Result<Value, CallError>>;

/// Matches outbound requests with their replies by id.
///
/// The correlator outlives individual connections. The transport attaches the
/// per-session send queue on connect and detaches it on loss.
pub struct RequestCorrelator {
    next_id: AtomicU64,
    request_timeout: Duration,
    /// Only calls that wait for a reply are registered.
    pending: Mutex<HashMap<RequestId, ResultSlot>>,
    outbound: RwLock<Option<mpsc::UnboundedSender<OutboundRequest>>>,
}

impl RequestCorrelator {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(FIRST_REQUEST_ID),
            request_timeout,
            pending: Mutex::new(HashMap::new()),
            outbound: RwLock::new(None),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Sends `method` and, when `expect_reply` is set, waits for the matching reply.
    ///
    /// Returns `Ok(None)` for fire-and-forget calls.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        expect_reply: bool,
    ) -> Result<Option<Value>, CallError> {
        let Some(outbound) = self.outbound.read().await.clone() else {
            return Err(CallError::TransportLost("not connected".into()));
        };

        let id = self.allocate_id();
        let request = OutboundRequest::new(id.clone(), method, params);

        if !expect_reply {
            return match outbound.send(request) {
                Ok(()) => Ok(None),
                Err(_) => Err(CallError::TransportLost("connection closed".into())),
            };
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        if outbound.send(request).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(CallError::TransportLost("connection closed".into()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map(Some),
            Ok(Err(_)) => Err(CallError::TransportLost(
                "result slot dropped before completion".into(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(%id, method, "request timed out");
                Err(CallError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Completes the pending entry for `reply.id`. Returns `false` for unknown ids.
    pub async fn resolve(&self, reply: &Reply) -> bool {
        let Some(tx) = self.pending.lock().await.remove(&reply.id) else {
            return false;
        };
        let outcome = match &reply.outcome {
            ReplyOutcome::Result(value) => Ok(value.clone()),
            ReplyOutcome::Error(err) => Err(CallError::Protocol(err.clone())),
            ReplyOutcome::Empty => Ok(Value::Null),
        };
        let _ = tx.send(outcome);
        true
    }

    /// Fails the slot of a request that could not be written to the socket.
    pub async fn fail(&self, id: &RequestId, err: CallError) {
        if let Some(tx) = self.pending.lock().await.remove(id) {
            let _ = tx.send(Err(err));
        }
    }

    pub(crate) async fn attach(&self, outbound: mpsc::UnboundedSender<OutboundRequest>) {
        *self.outbound.write().await = Some(outbound);
    }

    /// Drops the session queue. Waiting slots stay registered and run into
    /// their timeout.
    pub(crate) async fn detach(&self) {
        self.outbound.write().await.take();
    }

    pub async fn is_connected(&self) -> bool {
        self.outbound.read().await.is_some()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.lock().await.contains_key(id)
    }
}

#[cfg(test)]
#[path = "tests/protocol_client_tests.rs"]
mod tests;
