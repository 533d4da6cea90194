use std::{future::Future, sync::Arc};

use anyhow::{anyhow, Result};
use futures::future::{join_all, try_join_all};
use serde_json::{json, Value};
use shared::{
    domain::ControlId,
    protocol::{InteractionKind, RUN_CONNECTION_ACTION},
};
use tokio::{
    sync::{mpsc, watch, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod cast;
pub mod config;
pub mod control_registry;
pub mod controls;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
mod inbound;
pub mod protocol_client;
pub mod transport;
pub mod types;

pub use config::ClientConfig;
pub use control_registry::{ControlRegistry, ControlUpdate, RegisteredControl};
pub use controls::{ControlBehavior, ControlContext, ControlInfo, ControlTypeRegistry};
pub use coordinator::{Debouncer, RetryWithReset};
pub use dispatcher::{ChangeFilter, EventDispatcher, VariableMatcher};
pub use error::{CallError, ConfigError, CoordinatorError};
pub use transport::ConnectionState;
pub use types::{ChangeEvent, NamedHandler, VariableStore};

use crate::{
    inbound::BootstrapState, protocol_client::RequestCorrelator, transport::Transport,
    types::spawn_isolated,
};

/// A control interaction waiting for its hook to be scheduled.
pub(crate) struct PendingInteraction {
    control: RegisteredControl,
    kind: InteractionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlHook {
    Create,
    Press,
    Release,
    Rotate { clockwise: bool },
}

impl ControlHook {
    fn name(self) -> &'static str {
        match self {
            Self::Create => "on_create",
            Self::Press => "on_press",
            Self::Release => "on_release",
            Self::Rotate { .. } => "on_rotate",
        }
    }
}

impl From<InteractionKind> for ControlHook {
    fn from(kind: InteractionKind) -> Self {
        match kind {
            InteractionKind::Press => Self::Press,
            InteractionKind::Release => Self::Release,
            InteractionKind::Rotate { clockwise } => Self::Rotate { clockwise },
        }
    }
}

struct ControllerInner {
    config: ClientConfig,
    correlator: Arc<RequestCorrelator>,
    dispatcher: EventDispatcher,
    controls: RwLock<ControlRegistry>,
    transport: Transport,
    bootstrap: Mutex<BootstrapState>,
    interactions_tx: mpsc::Sender<PendingInteraction>,
    interactions_rx: Mutex<Option<mpsc::Receiver<PendingInteraction>>>,
}

/// Shared handle to one controller connection and everything mirrored from it.
///
/// Built once at startup and cloned into handlers and control hooks.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    pub fn new(config: ClientConfig, types: ControlTypeRegistry) -> Self {
        let correlator = Arc::new(RequestCorrelator::new(config.request_timeout));
        let transport = Transport::new(
            config.url.clone(),
            Arc::clone(&correlator),
            config.reconnect_policy(),
        );
        let (interactions_tx, interactions_rx) =
            mpsc::channel(config.interaction_queue_capacity.max(1));
        Self {
            inner: Arc::new(ControllerInner {
                config,
                correlator,
                dispatcher: EventDispatcher::new(),
                controls: RwLock::new(ControlRegistry::new(types)),
                transport,
                bootstrap: Mutex::new(BootstrapState::default()),
                interactions_tx,
                interactions_rx: Mutex::new(Some(interactions_rx)),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.transport.state()
    }

    /// Registers a change handler. The filter is validated immediately.
    pub async fn on_change(
        &self,
        connection: &str,
        filter: ChangeFilter,
        handler: NamedHandler,
    ) -> Result<(), ConfigError> {
        self.inner
            .dispatcher
            .on_change(connection, filter, handler)
            .await
    }

    /// Registers a handler fired each time `connection` becomes ready.
    pub async fn on_connect(&self, connection: &str, handler: NamedHandler) {
        self.inner.dispatcher.on_connect(connection, handler).await;
    }

    /// Wraps `handler` so it only runs while every listed connection is ready.
    pub fn requires<S: AsRef<str>>(&self, connections: &[S], handler: NamedHandler) -> NamedHandler {
        let required: Arc<[String]> = connections
            .iter()
            .map(|connection| connection.as_ref().to_string())
            .collect();
        let controller = Arc::downgrade(&self.inner);
        let name = handler.name().to_string();
        NamedHandler::new(name, move |event| {
            let required = Arc::clone(&required);
            let controller = controller.clone();
            let handler = handler.clone();
            async move {
                let Some(inner) = controller.upgrade() else {
                    return Ok(());
                };
                if !inner.dispatcher.connections_ready(&required[..]).await {
                    debug!(handler = handler.name(), ?required, %event, "skipping handler, connections not ready");
                    return Ok(());
                }
                handler.call(event).await
            }
        })
    }

    pub async fn var(&self, connection: &str, name: &str) -> Option<Value> {
        self.inner.dispatcher.var(connection, name).await
    }

    pub async fn var_or(&self, connection: &str, name: &str, default: Value) -> Value {
        self.var(connection, name).await.unwrap_or(default)
    }

    pub async fn variables(&self) -> Arc<VariableStore> {
        self.inner.dispatcher.snapshot().await
    }

    pub async fn status(&self, connection: &str) -> Option<String> {
        self.inner.dispatcher.status(connection).await
    }

    pub async fn is_ready(&self, connection: &str) -> bool {
        self.inner.dispatcher.is_ready(connection).await
    }

    pub async fn connections_ready<S: AsRef<str>>(&self, connections: &[S]) -> bool {
        self.inner.dispatcher.connections_ready(connections).await
    }

    /// Casts numeric and boolean strings for these connections; empty means all.
    pub async fn enable_cast<S: AsRef<str>>(&self, connections: &[S]) {
        self.inner.dispatcher.enable_cast(connections).await;
    }

    pub async fn call(
        &self,
        method: &str,
        params: Value,
        expect_reply: bool,
    ) -> Result<Option<Value>, CallError> {
        self.inner.correlator.call(method, params, expect_reply).await
    }

    /// Runs one action of a remote connection. With `wait` unset nothing is awaited.
    pub async fn action(
        &self,
        connection: &str,
        action_id: &str,
        options: Value,
        wait: bool,
    ) -> Result<Option<Value>, CallError> {
        let params = json!({
            "connectionName": connection,
            "actionId": action_id,
            "options": options,
            "extras": { "surfaceId": self.inner.config.surface_id },
        });
        let outcome = self.call(RUN_CONNECTION_ACTION, params, wait).await;
        if let Err(CallError::Timeout { .. }) = &outcome {
            warn!(connection, action_id, "action timed out");
        }
        outcome
    }

    /// Runs actions concurrently and returns every outcome; failures are logged.
    pub async fn action_multi<I, F>(&self, actions: I) -> Vec<Result<Option<Value>, CallError>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<Option<Value>, CallError>>,
    {
        let outcomes = join_all(actions).await;
        for (index, outcome) in outcomes.iter().enumerate() {
            if let Err(err) = outcome {
                warn!(index, error = %err, "action in batch failed");
            }
        }
        outcomes
    }

    /// Runs actions concurrently; the first failure is returned.
    pub async fn try_action_multi<I, F>(&self, actions: I) -> Result<Vec<Option<Value>>, CallError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<Option<Value>, CallError>>,
    {
        try_join_all(actions).await
    }

    pub async fn control(&self, id: &ControlId) -> Option<ControlInfo> {
        self.inner
            .controls
            .read()
            .await
            .get(id)
            .map(|control| control.info.clone())
    }

    pub async fn control_count(&self) -> usize {
        self.inner.controls.read().await.len()
    }

    /// Connects and keeps the connection alive. Only returns if already running.
    pub async fn run(&self) -> Result<()> {
        self.start_interaction_loop().await?;
        info!(url = %self.inner.config.url, "starting controller client");
        let handler = Arc::new(self.clone());
        match self.inner.transport.run(handler).await {}
    }

    async fn start_interaction_loop(&self) -> Result<JoinHandle<()>> {
        let mut interactions = self
            .inner
            .interactions_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("controller is already running"))?;
        let controller = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(PendingInteraction { control, kind }) = interactions.recv().await {
                controller.spawn_hook(&control, kind.into());
            }
        }))
    }

    fn spawn_on_create(&self, control: &RegisteredControl) -> JoinHandle<()> {
        self.spawn_hook(control, ControlHook::Create)
    }

    fn spawn_hook(&self, control: &RegisteredControl, hook: ControlHook) -> JoinHandle<()> {
        let info = &control.info;
        let ctx = ControlContext::new(self.clone(), info.control_id.clone(), info.type_tag.clone());
        let behavior = Arc::clone(&control.behavior);
        let name: Arc<str> = format!("{}::{}", info.type_tag, hook.name()).into();
        let context = format!("{}@{}", info.control_id, info.location_text());
        spawn_isolated(name, context, async move {
            match hook {
                ControlHook::Create => behavior.on_create(&ctx).await,
                ControlHook::Press => behavior.on_press(&ctx).await,
                ControlHook::Release => behavior.on_release(&ctx).await,
                ControlHook::Rotate { clockwise } => behavior.on_rotate(&ctx, clockwise).await,
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
