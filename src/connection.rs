//! Per-project websocket connection.
//!
//! A `Connection` owns one socket to the backend for one project. Outbound
//! messages get a locally unique `event-id`; inbound messages whose
//! `event-id` matches a pending reply resolve that reply exactly once, and
//! everything else fans out to the registered listeners.
//!
//! DESIGN
//! ======
//! The socket itself lives in a background task (`run_socket`) that pumps
//! an outbound channel into the sink and feeds inbound text frames back into
//! [`Connection::receive_text`]. Tests build a [`Connection::detached`]
//! instance, read the outbound channel directly, and push inbound frames by
//! hand, so the sync engine can be exercised without a server.
//!
//! ERROR HANDLING
//! ==============
//! Malformed or unknown inbound messages are logged and dropped. A listener
//! that panics is logged and skipped; the remaining listeners still receive
//! the message. Socket close flips readiness to false and drops pending
//! replies; there is no automatic reconnect.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use wire::Message;

use crate::observable::Observable;

/// Handle returned by [`Connection::add_listener`].
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&Message) + Send + Sync>;
/// One-shot handler for the reply carrying a sent message's event id.
pub type ReplyHandler = Box<dyn FnOnce(Message) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The socket is gone; nothing can be sent.
    #[error("websocket closed")]
    Closed,
    /// No reply with the matching event id arrived in time.
    #[error("timed out waiting for reply to event {0}")]
    ReplyTimeout(i64),
    /// The connection closed before the reply arrived.
    #[error("connection closed before reply to event {0}")]
    ReplyDropped(i64),
}

/// Cloneable handle to one project's socket.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

struct ConnectionShared {
    project_id: String,
    ready: Observable<bool>,
    listeners: Mutex<HashMap<ListenerId, Listener>>,
    replies: Mutex<HashMap<i64, ReplyHandler>>,
    next_listener: AtomicU64,
    next_event_id: AtomicI64,
    outbound: mpsc::UnboundedSender<String>,
    io_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Open a socket to `ws_url` for `project_id` and start the handshake.
    ///
    /// Must be called from inside a tokio runtime.
    #[must_use]
    pub fn open(project_id: &str, ws_url: &str) -> Self {
        let (connection, rx) = Self::detached(project_id);
        let weak = Arc::downgrade(&connection.shared);
        let task = tokio::spawn(run_socket(ws_url.to_owned(), weak, rx));
        *connection
            .shared
            .io_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
        connection.handshake();
        connection
    }

    /// Connection without a socket. Outbound text frames are delivered to the
    /// returned receiver; inbound frames are injected with
    /// [`Connection::receive_text`].
    #[must_use]
    pub fn detached(project_id: &str) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let seed = rand::rng().random_range(0..100_000_000_i64) * 1000;
        let connection = Self {
            shared: Arc::new(ConnectionShared {
                project_id: project_id.to_owned(),
                ready: Observable::new(false),
                listeners: Mutex::new(HashMap::new()),
                replies: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                next_event_id: AtomicI64::new(seed),
                outbound,
                io_task: Mutex::new(None),
            }),
        };
        (connection, rx)
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.shared.project_id
    }

    /// Send `{"event-type": "handshake", "who": "web"}`; readiness flips to
    /// true when the reply arrives.
    pub fn handshake(&self) {
        let ready = self.shared.ready.clone();
        let project_id = self.shared.project_id.clone();
        let sent = self.send(
            Message::handshake("web"),
            Some(Box::new(move |reply: Message| {
                tracing::info!(%project_id, who = ?reply.envelope.who, "websocket handshake complete");
                ready.set(true);
            })),
        );
        if let Err(e) = sent {
            tracing::warn!(project_id = %self.shared.project_id, error = %e, "handshake not sent");
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.ready.get()
    }

    /// Reactive readiness flag.
    #[must_use]
    pub fn readiness(&self) -> Observable<bool> {
        self.shared.ready.clone()
    }

    /// Transmit `message` with a fresh event id and this project's id.
    ///
    /// When `on_reply` is given it is invoked exactly once with the reply
    /// carrying the same event id, then forgotten.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the socket task has exited.
    pub fn send(
        &self,
        mut message: Message,
        on_reply: Option<ReplyHandler>,
    ) -> Result<i64, ConnectionError> {
        let event_id = self.shared.next_event_id.fetch_add(1, Ordering::Relaxed);
        message.envelope.event_id = Some(event_id);
        if message.envelope.project_id.is_none() {
            message.envelope.project_id = Some(self.shared.project_id.clone());
        }

        if let Some(handler) = on_reply {
            self.lock_replies().insert(event_id, handler);
        }

        tracing::debug!(
            project_id = %self.shared.project_id,
            event_id,
            event_type = %message.kind(),
            "ws send"
        );
        if self.shared.outbound.send(wire::encode_message(&message)).is_err() {
            self.lock_replies().remove(&event_id);
            return Err(ConnectionError::Closed);
        }
        Ok(event_id)
    }

    /// Send `message` and wait for its correlated reply.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if sending fails,
    /// [`ConnectionError::ReplyTimeout`] after `timeout`, and
    /// [`ConnectionError::ReplyDropped`] if the socket closes first.
    pub async fn send_and_wait(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        let event_id = self.send(
            message,
            Some(Box::new(move |reply| {
                let _ = tx.send(reply);
            })),
        )?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ConnectionError::ReplyDropped(event_id)),
            Err(_) => {
                self.lock_replies().remove(&event_id);
                Err(ConnectionError::ReplyTimeout(event_id))
            }
        }
    }

    /// Register a listener for every message that is not a pending reply.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners().insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.lock_listeners().remove(&id).is_some()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Feed one inbound text frame.
    pub fn receive_text(&self, text: &str) {
        match wire::decode_message(text) {
            Ok(message) => self.receive(message),
            Err(e) => {
                tracing::warn!(project_id = %self.shared.project_id, error = %e, "dropping malformed ws message");
            }
        }
    }

    /// Route one inbound message to its reply handler or to the listeners.
    pub fn receive(&self, message: Message) {
        if let Some(event_id) = message.event_id() {
            let handler = self.lock_replies().remove(&event_id);
            if let Some(handler) = handler {
                handler(message);
                return;
            }
        }

        if let wire::Event::Other { event_type, .. } = &message.event {
            tracing::debug!(project_id = %self.shared.project_id, %event_type, "unmodeled ws event");
        }

        // Dispatch over a copy so listeners may add/remove listeners.
        let listeners: Vec<Listener> = self.lock_listeners().values().cloned().collect();
        for listener in listeners {
            let delivered =
                std::panic::catch_unwind(AssertUnwindSafe(|| listener(&message)));
            if delivered.is_err() {
                tracing::error!(
                    project_id = %self.shared.project_id,
                    event_type = %message.kind(),
                    "ws listener panicked; continuing dispatch"
                );
            }
        }
    }

    /// Mark the socket as gone: readiness false, pending replies dropped.
    pub fn mark_closed(&self) {
        self.lock_replies().clear();
        if self.shared.ready.get() {
            self.shared.ready.set(false);
        }
    }

    /// Stop the socket task and mark the connection closed.
    pub fn close(&self) {
        let task = self
            .shared
            .io_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.mark_closed();
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, HashMap<ListenerId, Listener>> {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, HashMap<i64, ReplyHandler>> {
        self.shared
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Socket pump: connect, forward outbound frames, dispatch inbound frames
/// until either side ends.
async fn run_socket(
    url: String,
    shared: Weak<ConnectionShared>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::warn!(%url, error = %e, "websocket connect failed");
            if let Some(shared) = shared.upgrade() {
                Connection { shared }.mark_closed();
            }
            return;
        }
    };
    tracing::info!(%url, "websocket open");
    let (mut sink, mut source) = stream.split();

    let send_loop = async {
        while let Some(text) = outbound.recv().await {
            if sink.send(WsFrame::Text(text.into())).await.is_err() {
                break;
            }
        }
    };

    let recv_loop = async {
        while let Some(frame) = source.next().await {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let connection = Connection { shared };
            match frame {
                Ok(WsFrame::Text(text)) => connection.receive_text(text.as_str()),
                Ok(WsFrame::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => connection.receive_text(text),
                    Err(_) => tracing::warn!("dropping non-utf8 binary ws frame"),
                },
                Ok(WsFrame::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "websocket receive failed");
                    break;
                }
            }
        }
    };

    futures_util::future::select(Box::pin(send_loop), Box::pin(recv_loop)).await;

    tracing::info!(%url, "websocket closed");
    if let Some(shared) = shared.upgrade() {
        Connection { shared }.mark_closed();
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
