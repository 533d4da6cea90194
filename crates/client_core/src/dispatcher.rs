use std::{collections::HashMap, sync::Arc};

use regex::Regex;
use serde_json::Value;
use shared::protocol::{VariableBatch, VariableDelta};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    cast::{smart_cast, CastPolicy},
    error::ConfigError,
    types::{ChangeEvent, NamedHandler, VariableStore},
};

/// Status values that count as a ready connection.
pub const CONNECTION_STATUS_OK: &[&str] = &["good", "ok"];

pub fn is_ready_status(status: &str) -> bool {
    CONNECTION_STATUS_OK.contains(&status)
}

/// Extracts `<name>` from a `connection_<name>_status` variable.
pub fn status_connection_name(variable: &str) -> Option<&str> {
    variable
        .strip_prefix("connection_")?
        .strip_suffix("_status")
        .filter(|name| !name.is_empty())
}

/// Selection criteria for a change handler. Exactly one field must be set.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    pub variable: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub regex: Option<String>,
}

impl ChangeFilter {
    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            variable: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: Some(suffix.into()),
            ..Self::default()
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            regex: Some(pattern.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum VariableMatcher {
    Exact(String),
    Prefix(String),
    Suffix(String),
    /// Matches when the pattern matches at the start of the variable name.
    Pattern(Regex),
}

impl VariableMatcher {
    pub fn matches(&self, variable: &str) -> bool {
        match self {
            Self::Exact(name) => variable == name,
            Self::Prefix(prefix) => variable.starts_with(prefix.as_str()),
            Self::Suffix(suffix) => variable.ends_with(suffix.as_str()),
            Self::Pattern(regex) => regex.is_match(variable),
        }
    }
}

impl TryFrom<ChangeFilter> for VariableMatcher {
    type Error = ConfigError;

    fn try_from(filter: ChangeFilter) -> Result<Self, Self::Error> {
        let ChangeFilter {
            variable,
            prefix,
            suffix,
            regex,
        } = filter;
        let given = [&variable, &prefix, &suffix, &regex]
            .iter()
            .filter(|criterion| criterion.is_some())
            .count();
        if given != 1 {
            return Err(ConfigError::MatcherCriteria(given));
        }

        if let Some(name) = variable {
            return Ok(Self::Exact(name));
        }
        if let Some(prefix) = prefix {
            return Ok(Self::Prefix(prefix));
        }
        if let Some(suffix) = suffix {
            return Ok(Self::Suffix(suffix));
        }
        let pattern = regex.unwrap_or_default();
        Regex::new(&format!("^(?:{pattern})"))
            .map(Self::Pattern)
            .map_err(|err| ConfigError::InvalidPattern {
                pattern,
                reason: err.to_string(),
            })
    }
}

struct Subscription {
    matcher: VariableMatcher,
    handler: NamedHandler,
}

/// Owns the variable mirror and connection readiness, and fans changes out to handlers.
#[derive(Default)]
pub struct EventDispatcher {
    store: RwLock<VariableStore>,
    readiness: RwLock<HashMap<String, String>>,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    connect_handlers: RwLock<HashMap<String, Vec<NamedHandler>>>,
    cast: RwLock<CastPolicy>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on_change(
        &self,
        connection: &str,
        filter: ChangeFilter,
        handler: NamedHandler,
    ) -> Result<(), ConfigError> {
        let matcher = VariableMatcher::try_from(filter)?;
        debug!(connection, handler = handler.name(), ?matcher, "registered change handler");
        self.subscriptions
            .write()
            .await
            .entry(connection.to_string())
            .or_default()
            .push(Subscription { matcher, handler });
        Ok(())
    }

    pub async fn on_connect(&self, connection: &str, handler: NamedHandler) {
        self.connect_handlers
            .write()
            .await
            .entry(connection.to_string())
            .or_default()
            .push(handler);
    }

    pub async fn var(&self, connection: &str, variable: &str) -> Option<Value> {
        self.store.read().await.get(connection, variable).cloned()
    }

    pub async fn snapshot(&self) -> Arc<VariableStore> {
        Arc::new(self.store.read().await.clone())
    }

    pub async fn status(&self, connection: &str) -> Option<String> {
        self.readiness.read().await.get(connection).cloned()
    }

    pub async fn is_ready(&self, connection: &str) -> bool {
        self.readiness
            .read()
            .await
            .get(connection)
            .is_some_and(|status| is_ready_status(status))
    }

    pub async fn connections_ready<S: AsRef<str>>(&self, connections: &[S]) -> bool {
        let readiness = self.readiness.read().await;
        connections.iter().all(|connection| {
            readiness
                .get(connection.as_ref())
                .is_some_and(|status| is_ready_status(status))
        })
    }

    /// Forgets every connection status, so the next `ok` fires connect handlers again.
    pub async fn reset_readiness(&self) {
        self.readiness.write().await.clear();
    }

    /// Enables value casting; values already stored for those connections are cast in place.
    pub async fn enable_cast<S: AsRef<str>>(&self, connections: &[S]) {
        let mut policy = self.cast.write().await;
        policy.enable(connections);
        let mut store = self.store.write().await;
        let targets = if connections.is_empty() {
            store.connection_list()
        } else {
            connections.iter().map(|c| c.as_ref().to_string()).collect()
        };
        for connection in targets {
            store.map_values(&connection, smart_cast);
        }
    }

    pub async fn apply_delta(&self, connection: &str, delta: VariableDelta) -> Vec<JoinHandle<()>> {
        let mut batch = VariableBatch::new();
        batch.insert(connection.to_string(), delta);
        self.apply_batch(batch, true).await
    }

    /// Applies a batch of deltas against a single previous-state snapshot.
    ///
    /// Readiness transitions and the store merge happen for every connection
    /// first; change handlers are spawned afterwards when `dispatch` is set.
    /// Returns the handles of every spawned handler task.
    pub async fn apply_batch(&self, mut batch: VariableBatch, dispatch: bool) -> Vec<JoinHandle<()>> {
        let mut spawned = Vec::new();
        let cast = self.cast.read().await.clone();

        let previous = {
            let mut store = self.store.write().await;
            let previous = Arc::new(store.clone());
            for (connection, delta) in batch.iter_mut() {
                for (variable, value) in delta.iter() {
                    if let Some(name) = status_connection_name(variable) {
                        spawned.extend(
                            self.update_readiness(name, variable, value, &previous)
                                .await,
                        );
                    }
                }
                if cast.applies_to(connection) {
                    for value in delta.values_mut() {
                        *value = smart_cast(value);
                    }
                }
                store.merge(connection, delta);
            }
            previous
        };

        if !dispatch {
            return spawned;
        }

        let subscriptions = self.subscriptions.read().await;
        for (connection, delta) in &batch {
            let Some(registered) = subscriptions.get(connection) else {
                continue;
            };
            for (variable, value) in delta {
                for subscription in registered {
                    if !subscription.matcher.matches(variable) {
                        continue;
                    }
                    let event = ChangeEvent {
                        connection: connection.clone(),
                        variable: variable.clone(),
                        value: value.clone(),
                        last: previous.get(connection, variable).cloned(),
                        previous: Arc::clone(&previous),
                    };
                    spawned.push(subscription.handler.spawn(event));
                }
            }
        }
        spawned
    }

    async fn update_readiness(
        &self,
        connection: &str,
        variable: &str,
        value: &Value,
        previous: &Arc<VariableStore>,
    ) -> Vec<JoinHandle<()>> {
        let status = match value {
            Value::String(status) => status.clone(),
            other => other.to_string(),
        };

        let last_status = {
            let mut readiness = self.readiness.write().await;
            readiness.insert(connection.to_string(), status.clone())
        };
        let was_ready = last_status.as_deref().is_some_and(is_ready_status);
        if was_ready || !is_ready_status(&status) {
            return Vec::new();
        }

        info!(connection, %status, "connection became ready");
        let handlers = self
            .connect_handlers
            .read()
            .await
            .get(connection)
            .cloned()
            .unwrap_or_default();
        handlers
            .iter()
            .map(|handler| {
                handler.spawn(ChangeEvent {
                    connection: connection.to_string(),
                    variable: variable.to_string(),
                    value: value.clone(),
                    last: last_status.clone().map(Value::String),
                    previous: Arc::clone(previous),
                })
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
