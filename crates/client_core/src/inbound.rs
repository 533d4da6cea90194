//! The single place where everything read from the controller is handled.

use async_trait::async_trait;
use serde_json::Value;
use shared::protocol::{
    ControlData, InboundFrame, InteractionPayload, PushEvent, Reply, ReplyOutcome, VariableBatch,
    CONTROLS_SNAPSHOT_ID, VARIABLES_SNAPSHOT_ID,
};
use tracing::{debug, error, info, warn};

use crate::{
    control_registry::{ControlUpdate, RegisteredControl},
    transport::FrameHandler,
    Controller, PendingInteraction,
};

/// Which bootstrap replies were already handled on the current connection.
#[derive(Debug, Default)]
pub(crate) struct BootstrapState {
    variables: bool,
    controls: bool,
}

#[async_trait]
impl FrameHandler for Controller {
    async fn on_connected(&self) {
        *self.inner.bootstrap.lock().await = BootstrapState::default();
    }

    async fn on_frame(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::Reply(reply) => self.handle_reply(reply).await,
            InboundFrame::Push(event) => self.handle_push(event).await,
            InboundFrame::InvalidPush { event, reason } => {
                warn!(%event, %reason, "ignoring push event with malformed payload");
            }
            InboundFrame::RemoteError(err) => {
                error!(error = %err, "controller reported an error");
            }
            InboundFrame::Unrecognized(value) => {
                warn!(frame = %value, "ignoring unrecognized frame");
            }
        }
    }

    async fn on_disconnected(&self) {
        self.inner.dispatcher.reset_readiness().await;
    }
}

impl Controller {
    async fn handle_reply(&self, reply: Reply) {
        if self.inner.correlator.resolve(&reply).await {
            return;
        }

        if reply.id == VARIABLES_SNAPSHOT_ID {
            if self.first_bootstrap_reply(|state| &mut state.variables).await {
                self.apply_variable_snapshot(reply.outcome).await;
            }
        } else if reply.id == CONTROLS_SNAPSHOT_ID {
            if self.first_bootstrap_reply(|state| &mut state.controls).await {
                self.apply_control_snapshot(reply.outcome).await;
            }
        } else {
            debug!(id = %reply.id, "reply for a request nobody waits on");
        }
    }

    async fn first_bootstrap_reply(&self, flag: impl FnOnce(&mut BootstrapState) -> &mut bool) -> bool {
        let mut state = self.inner.bootstrap.lock().await;
        let handled = flag(&mut state);
        !std::mem::replace(handled, true)
    }

    async fn apply_variable_snapshot(&self, outcome: ReplyOutcome) {
        let value = match outcome {
            ReplyOutcome::Result(value) => value,
            ReplyOutcome::Error(err) => {
                error!(error = %err, "variable snapshot request failed");
                return;
            }
            ReplyOutcome::Empty => return,
        };
        let batch = match serde_json::from_value::<VariableBatch>(value) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "variable snapshot has an unexpected shape");
                return;
            }
        };
        let connections = batch.len();
        self.inner.dispatcher.apply_batch(batch, false).await;
        info!(connections, "cached variables");
    }

    async fn apply_control_snapshot(&self, outcome: ReplyOutcome) {
        let items = match outcome {
            ReplyOutcome::Result(Value::Array(items)) => items,
            ReplyOutcome::Result(other) => {
                warn!(result = %other, "control snapshot is not a list");
                return;
            }
            ReplyOutcome::Error(err) => {
                error!(error = %err, "control snapshot request failed");
                return;
            }
            ReplyOutcome::Empty => Vec::new(),
        };

        let controls: Vec<ControlData> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<ControlData>(item) {
                Ok(control) => Some(control),
                Err(err) => {
                    warn!(error = %err, "skipping malformed control in snapshot");
                    None
                }
            })
            .collect();

        let created = self.inner.controls.write().await.rebuild_all(controls);
        info!(controls = created.len(), "built control layout");
        for control in &created {
            self.spawn_on_create(control);
        }
    }

    async fn handle_push(&self, event: PushEvent) {
        match event {
            PushEvent::VariablesChanged(batch) => {
                self.inner.dispatcher.apply_batch(batch, true).await;
            }
            PushEvent::ControlAdded(data) => {
                let added = self.inner.controls.write().await.add_or_replace(&data);
                if let Some(control) = added {
                    self.spawn_on_create(&control);
                }
            }
            PushEvent::ControlUpdated(data) => {
                let update = self.inner.controls.write().await.update(&data);
                match update {
                    ControlUpdate::InPlace(info) => {
                        debug!(control_id = %info.control_id, location = %info.location_text(), "control updated");
                    }
                    ControlUpdate::Replaced(Some(control)) => {
                        self.spawn_on_create(&control);
                    }
                    ControlUpdate::Replaced(None) => {}
                }
            }
            PushEvent::ControlReplaced(payload) => {
                let added = self
                    .inner
                    .controls
                    .write()
                    .await
                    .replace(&payload.old_control_id, payload.new_control.as_ref());
                if let Some(control) = added {
                    self.spawn_on_create(&control);
                }
            }
            PushEvent::ControlRemoved(payload) => {
                let removed = self.inner.controls.write().await.remove(&payload.control_id);
                if removed.is_none() {
                    debug!(control_id = %payload.control_id, "remove for unknown control");
                }
            }
            PushEvent::Interaction(payload) => self.queue_interaction(payload).await,
        }
    }

    async fn queue_interaction(&self, payload: InteractionPayload) {
        let Some(kind) = payload.kind() else {
            debug!(control_id = %payload.control_id, event = %payload.event, "ignoring interaction kind");
            return;
        };
        let control: Option<RegisteredControl> = self
            .inner
            .controls
            .read()
            .await
            .get(&payload.control_id)
            .cloned();
        let Some(control) = control else {
            return;
        };
        if self
            .inner
            .interactions_tx
            .send(PendingInteraction { control, kind })
            .await
            .is_err()
        {
            warn!(control_id = %payload.control_id, "interaction queue closed, dropping event");
        }
    }
}

#[cfg(test)]
#[path = "tests/inbound_tests.rs"]
mod tests;
