use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::{future::BoxFuture, FutureExt};
use serde_json::Value;
use shared::protocol::VariableDelta;
use tokio::task::JoinHandle;
use tracing::error;

/// Mirror of the controller's variables, keyed by connection name.
///
/// Each connection's map sits behind an `Arc`, so cloning the store is a
/// shallow copy and merging only copies the connections a delta touches.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    connections: HashMap<String, Arc<HashMap<String, Value>>>,
}

impl VariableStore {
    pub fn get(&self, connection: &str, variable: &str) -> Option<&Value> {
        self.connections.get(connection)?.get(variable)
    }

    pub fn connection(&self, connection: &str) -> Option<&HashMap<String, Value>> {
        self.connections.get(connection).map(Arc::as_ref)
    }

    pub fn connection_names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Adds or overwrites keys; never removes any.
    pub(crate) fn merge(&mut self, connection: &str, delta: &VariableDelta) {
        let vars = self.connections.entry(connection.to_string()).or_default();
        let vars = Arc::make_mut(vars);
        for (key, value) in delta {
            vars.insert(key.clone(), value.clone());
        }
    }

    pub(crate) fn map_values(&mut self, connection: &str, mut f: impl FnMut(&Value) -> Value) {
        if let Some(vars) = self.connections.get_mut(connection) {
            for value in Arc::make_mut(vars).values_mut() {
                *value = f(value);
            }
        }
    }

    pub(crate) fn connection_list(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }
}

/// A variable change delivered to a handler.
#[derive(Clone)]
pub struct ChangeEvent {
    pub connection: String,
    pub variable: String,
    pub value: Value,
    /// Value of the same variable before the batch was applied, if it existed.
    pub last: Option<Value>,
    /// The whole store as it was before the batch was applied.
    pub previous: Arc<VariableStore>,
}

impl ChangeEvent {
    pub fn previous_value(&self, connection: &str, variable: &str) -> Option<&Value> {
        self.previous.get(connection, variable)
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event<{}.{} | {}>", self.connection, self.variable, self.value)
    }
}

impl fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("connection", &self.connection)
            .field("variable", &self.variable)
            .field("value", &self.value)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;
type HandlerFn = Arc<dyn Fn(ChangeEvent) -> HandlerFuture + Send + Sync>;

/// A change or connect handler together with the name it is logged under.
#[derive(Clone)]
pub struct NamedHandler {
    name: Arc<str>,
    handler: HandlerFn,
}

impl NamedHandler {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ChangeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            name: name.into(),
            handler: Arc::new(move |event| handler(event).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, event: ChangeEvent) -> HandlerFuture {
        (self.handler)(event)
    }

    /// Runs the handler as its own task; failures are logged, never returned.
    pub fn spawn(&self, event: ChangeEvent) -> JoinHandle<()> {
        let context = event.to_string();
        spawn_isolated(Arc::clone(&self.name), context, self.call(event))
    }
}

impl fmt::Debug for NamedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamedHandler").field(&self.name).finish()
    }
}

/// Spawns `work` detached from the caller. Errors and panics are caught at the
/// task boundary and logged with the handler's identity and event context.
pub(crate) fn spawn_isolated(
    name: Arc<str>,
    context: String,
    work: impl Future<Output = anyhow::Result<()>> + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(handler = %name, event = %context, error = %format!("{err:#}"), "handler failed");
            }
            Err(panic) => {
                error!(handler = %name, event = %context, panic = %panic_message(panic.as_ref()), "handler panicked");
            }
        }
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
