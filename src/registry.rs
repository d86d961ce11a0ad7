//! Per-project connection registry.
//!
//! At most one [`Connection`] exists per project id. Connections are
//! created lazily on first use. A closed connection stays cached, frozen,
//! until [`Registry::reconnect`] or [`Registry::dispose_all`]. The registry is an explicit value passed to subscriptions; there
//! is no process-global instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use wire::Message;

use crate::api::{ApiClient, ApiError, HistorySource};
use crate::config::{ClientConfig, ConfigError};
use crate::connection::{Connection, ConnectionError, ListenerId, ReplyHandler};
use crate::observable::Observable;
use crate::timer::IdleSignal;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Creates the connection for a project.
pub trait Connector: Send + Sync {
    fn connect(&self, project_id: &str) -> Connection;
}

/// Opens a real websocket to a fixed URL.
pub struct SocketConnector {
    ws_url: String,
}

impl SocketConnector {
    #[must_use]
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }
}

impl Connector for SocketConnector {
    fn connect(&self, project_id: &str) -> Connection {
        tracing::info!(%project_id, url = %self.ws_url, "opening project websocket");
        Connection::open(project_id, &self.ws_url)
    }
}

pub struct Registry {
    config: ClientConfig,
    history: Arc<dyn HistorySource>,
    connector: Box<dyn Connector>,
    connections: Mutex<HashMap<String, Connection>>,
    idle: IdleSignal,
}

impl Registry {
    /// Registry backed by the real HTTP API and websocket.
    ///
    /// # Errors
    ///
    /// Fails if the websocket URL cannot be derived from the base URL or the
    /// HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, RegistryError> {
        let ws_url = config.ws_url()?;
        let api = ApiClient::new(&config)?;
        Ok(Self::with_parts(
            config,
            Arc::new(api),
            Box::new(SocketConnector::new(ws_url)),
        ))
    }

    /// Registry over caller-supplied transports.
    #[must_use]
    pub fn with_parts(
        config: ClientConfig,
        history: Arc<dyn HistorySource>,
        connector: Box<dyn Connector>,
    ) -> Self {
        Self {
            config,
            history,
            connector,
            connections: Mutex::new(HashMap::new()),
            idle: IdleSignal::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn history(&self) -> Arc<dyn HistorySource> {
        Arc::clone(&self.history)
    }

    /// Idle hint shared by every subscription's flush timer.
    #[must_use]
    pub fn idle_signal(&self) -> IdleSignal {
        self.idle.clone()
    }

    /// The project's connection, created on first use.
    ///
    /// A connection that has been closed (or never finished its handshake
    /// and lost its socket) stays cached until [`Registry::reconnect`] or
    /// [`Registry::dispose_all`]; callers keep seeing its frozen state.
    pub fn connection(&self, project_id: &str) -> Connection {
        let mut connections = self.lock_connections();
        if let Some(connection) = connections.get(project_id) {
            return connection.clone();
        }
        let connection = self.connector.connect(project_id);
        connections.insert(project_id.to_owned(), connection.clone());
        connection
    }

    /// Drop the cached connection for `project_id` and open a fresh one.
    pub fn reconnect(&self, project_id: &str) -> Connection {
        let previous = self.lock_connections().remove(project_id);
        if let Some(previous) = previous {
            previous.close();
        }
        self.connection(project_id)
    }

    #[must_use]
    pub fn is_ready(&self, project_id: &str) -> bool {
        self.connection(project_id).is_ready()
    }

    #[must_use]
    pub fn readiness(&self, project_id: &str) -> Observable<bool> {
        self.connection(project_id).readiness()
    }

    /// Send on the project's connection. `on_reply`, when given, runs once
    /// with the reply that carries the assigned event id.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the socket is gone.
    pub fn send(
        &self,
        project_id: &str,
        message: Message,
        on_reply: Option<ReplyHandler>,
    ) -> Result<i64, ConnectionError> {
        self.connection(project_id).send(message, on_reply)
    }

    pub fn add_listener<F>(&self, project_id: &str, listener: F) -> ListenerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.connection(project_id).add_listener(listener)
    }

    pub fn remove_listener(&self, project_id: &str, id: ListenerId) -> bool {
        self.connection(project_id).remove_listener(id)
    }

    /// Invoke a named action on a run and wait for its reply payload.
    ///
    /// # Errors
    ///
    /// Fails if the socket is closed or no reply arrives within the
    /// configured reply timeout.
    pub async fn invoke_action(
        &self,
        project_id: &str,
        run_id: &str,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Message, ConnectionError> {
        let mut message = Message::action(name, args);
        message.envelope.run_id = Some(run_id.to_owned());
        tracing::info!(%project_id, %run_id, action = %name, "invoking action");
        self.connection(project_id)
            .send_and_wait(message, self.config.reply_timeout)
            .await
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock_connections().len()
    }

    /// Close every socket and forget them.
    pub fn dispose_all(&self) {
        let drained: Vec<(String, Connection)> = self.lock_connections().drain().collect();
        for (project_id, connection) in drained {
            tracing::info!(%project_id, "closing project websocket");
            connection.close();
        }
    }

    fn lock_connections(&self) -> std::sync::MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;

    /// Hands out detached connections and keeps their outbound queues.
    #[derive(Clone, Default)]
    pub struct DetachedConnector {
        outbound: Arc<Mutex<HashMap<String, mpsc::UnboundedReceiver<String>>>>,
        opened: Arc<Mutex<usize>>,
    }

    impl Connector for DetachedConnector {
        fn connect(&self, project_id: &str) -> Connection {
            let (connection, rx) = Connection::detached(project_id);
            self.outbound.lock().unwrap().insert(project_id.to_owned(), rx);
            *self.opened.lock().unwrap() += 1;
            connection
        }
    }

    impl DetachedConnector {
        pub fn opened(&self) -> usize {
            *self.opened.lock().unwrap()
        }

        /// Drain every frame sent on the project's connection.
        pub fn take_outbound(&self, project_id: &str) -> Vec<Value> {
            let mut outbound = self.outbound.lock().unwrap();
            let Some(rx) = outbound.get_mut(project_id) else {
                return Vec::new();
            };
            let mut frames = Vec::new();
            while let Ok(text) = rx.try_recv() {
                frames.push(serde_json::from_str(&text).unwrap());
            }
            frames
        }
    }

    /// Run the handshake on the project's connection and answer it.
    pub fn complete_handshake(registry: &Registry, connector: &DetachedConnector, project_id: &str) {
        let connection = registry.connection(project_id);
        connection.handshake();
        let frames = connector.take_outbound(project_id);
        let handshake = frames
            .iter()
            .rev()
            .find(|f| f["event-type"] == "handshake")
            .unwrap();
        let reply = serde_json::json!({"event-type": "handshake", "event-id": handshake["event-id"]});
        connection.receive_text(&reply.to_string());
        assert!(connection.is_ready());
    }

    pub enum Scripted {
        Body(Value),
        Status(u16),
    }

    /// History source answering from a queue; an empty queue answers `[]`.
    #[derive(Default)]
    pub struct ScriptedHistory {
        responses: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedHistory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every response waits `delay` before resolving.
        pub fn delayed(delay: Duration) -> Self {
            Self { delay: Some(delay), ..Self::default() }
        }

        pub fn push(&self, response: Scripted) {
            self.responses.lock().unwrap().push_back(response);
        }

        pub fn push_body(&self, body: Value) {
            self.push(Scripted::Body(body));
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HistorySource for ScriptedHistory {
        async fn get_json(&self, path_and_query: &str) -> Result<Value, ApiError> {
            self.requests.lock().unwrap().push(path_and_query.to_owned());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                None => Ok(Value::Array(Vec::new())),
                Some(Scripted::Body(body)) => Ok(body),
                Some(Scripted::Status(status)) => Err(ApiError::Status {
                    status,
                    path: path_and_query.to_owned(),
                    body: "scripted failure".to_owned(),
                }),
            }
        }
    }

    /// Registry over a scripted history source and detached connections.
    pub fn test_registry(history: Arc<ScriptedHistory>) -> (Arc<Registry>, DetachedConnector) {
        let connector = DetachedConnector::default();
        let registry = Registry::with_parts(
            ClientConfig::default(),
            history,
            Box::new(connector.clone()),
        );
        (Arc::new(registry), connector)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
