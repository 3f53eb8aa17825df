//! Live Channel Correlator
//!
//! Workers may hold a WebSocket session and register their slot on it. An
//! update for a registered slot is pushed over the session with a fresh
//! correlation token, and the caller waits a bounded window for the
//! matching acknowledgement. Every outcome other than `Delivered` means the
//! caller falls back to the config file.

use axum::extract::ws::{Message, WebSocket};
use galaxy_common::{CorrelationToken, DaemonMessage, Slot, WorkerConfig, WorkerMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SessionId = Uuid;

/// Result of pushing a config over the live channel
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The worker acknowledged with this result
    Delivered(Value),
    /// No session registered for the slot
    NoSession,
    /// No matching acknowledgement within the wait window
    TimedOut,
    /// The session went away before answering
    Disconnected,
}

impl PushOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered(_) => "delivered",
            Self::NoSession => "no_session",
            Self::TimedOut => "timed_out",
            Self::Disconnected => "disconnected",
        }
    }
}

struct Pending {
    session: SessionId,
    reply: oneshot::Sender<Value>,
    created: Instant,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, mpsc::UnboundedSender<DaemonMessage>>,
    slots: HashMap<Slot, SessionId>,
    pending: HashMap<CorrelationToken, Pending>,
}

pub struct LiveChannel {
    registry: Mutex<Registry>,
    wait: Duration,
}

impl LiveChannel {
    pub fn new(wait: Duration) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            wait,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// New session; the receiver yields messages to write to the socket
    pub fn open_session(&self) -> (SessionId, mpsc::UnboundedReceiver<DaemonMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry().sessions.insert(id, tx);
        debug!("[CHANNEL] session {} opened", id);
        (id, rx)
    }

    /// Bind `slot` to `session`, replacing any earlier binding for the slot
    pub fn register(&self, session: SessionId, slot: Slot) -> bool {
        let mut registry = self.registry();
        if !registry.sessions.contains_key(&session) {
            return false;
        }
        if let Some(previous) = registry.slots.insert(slot, session) {
            if previous != session {
                debug!("[CHANNEL] slot {} moved from session {} to {}", slot, previous, session);
            }
        }
        info!("[CHANNEL] slot {} registered on session {}", slot, session);
        true
    }

    pub fn is_registered(&self, slot: Slot) -> bool {
        self.registry().slots.contains_key(&slot)
    }

    pub fn session_count(&self) -> usize {
        self.registry().sessions.len()
    }

    pub fn pending_count(&self) -> usize {
        self.registry().pending.len()
    }

    /// Push `config` to the session registered for `slot` and wait for the
    /// matching acknowledgement
    pub async fn push(&self, slot: Slot, config: &WorkerConfig) -> PushOutcome {
        let token = CorrelationToken::new();
        let reply = {
            let mut registry = self.registry();
            prune(&mut registry, self.wait);

            let Some(&session) = registry.slots.get(&slot) else {
                return PushOutcome::NoSession;
            };
            let Some(outbound) = registry.sessions.get(&session) else {
                registry.slots.remove(&slot);
                return PushOutcome::NoSession;
            };

            let message = DaemonMessage::ConfigUpdate {
                token,
                slot,
                config: config.clone(),
            };
            if outbound.send(message).is_err() {
                drop_session(&mut registry, session);
                return PushOutcome::Disconnected;
            }

            let (tx, rx) = oneshot::channel();
            registry.pending.insert(
                token,
                Pending {
                    session,
                    reply: tx,
                    created: Instant::now(),
                },
            );
            rx
        };

        debug!("[CHANNEL] slot {} push {} awaiting ack", slot, token);
        match tokio::time::timeout(self.wait, reply).await {
            Ok(Ok(result)) => PushOutcome::Delivered(result),
            Ok(Err(_)) => PushOutcome::Disconnected,
            Err(_) => {
                self.registry().pending.remove(&token);
                warn!("[CHANNEL] slot {} no ack for {} within {:?}", slot, token, self.wait);
                PushOutcome::TimedOut
            }
        }
    }

    /// Hand an acknowledgement to its waiter. A token is consumed at most
    /// once; unknown, expired or foreign tokens are ignored.
    pub fn resolve(&self, session: SessionId, token: CorrelationToken, result: Value) -> bool {
        let mut registry = self.registry();
        match registry.pending.get(&token) {
            Some(pending) if pending.session == session => {}
            Some(_) => {
                warn!("[CHANNEL] ack {} from a session that did not receive it", token);
                return false;
            }
            None => {
                debug!("[CHANNEL] ack {} matches nothing pending", token);
                return false;
            }
        }
        registry
            .pending
            .remove(&token)
            .is_some_and(|pending| pending.reply.send(result).is_ok())
    }

    /// Forget the session, its slot bindings and its pending tokens
    pub fn close_session(&self, session: SessionId) {
        drop_session(&mut self.registry(), session);
        debug!("[CHANNEL] session {} closed", session);
    }

    /// Drop pending tokens older than the wait window
    pub fn prune_expired(&self) -> usize {
        prune(&mut self.registry(), self.wait)
    }

    /// Apply one inbound text frame; returns the reply to send, if any
    pub fn handle_text(&self, session: SessionId, text: &str) -> Option<DaemonMessage> {
        match serde_json::from_str::<WorkerMessage>(text) {
            Ok(WorkerMessage::Register { slot }) => {
                if self.register(session, slot) {
                    Some(DaemonMessage::Registered { slot })
                } else {
                    Some(DaemonMessage::Error {
                        message: "session is closed".to_string(),
                    })
                }
            }
            Ok(WorkerMessage::ConfigAck { token, result }) => {
                self.resolve(session, token, result);
                None
            }
            Err(e) => Some(DaemonMessage::Error {
                message: format!("unrecognized message: {}", e),
            }),
        }
    }
}

fn drop_session(registry: &mut Registry, session: SessionId) {
    registry.sessions.remove(&session);
    registry.slots.retain(|_, s| *s != session);
    // Dropping the reply senders wakes the waiters with `Disconnected`
    registry.pending.retain(|_, p| p.session != session);
}

fn prune(registry: &mut Registry, wait: Duration) -> usize {
    let before = registry.pending.len();
    registry.pending.retain(|_, p| p.created.elapsed() <= wait);
    before - registry.pending.len()
}

/// Drive one WebSocket session until the peer leaves or the daemon stops
pub async fn serve_socket(channel: Arc<LiveChannel>, mut socket: WebSocket, mut shutdown: watch::Receiver<bool>) {
    let (session, mut outbound) = channel.open_session();

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = channel.handle_text(session, &text) {
                        if send(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("[CHANNEL] session {} read error: {}", session, e);
                    break;
                }
            },
            message = outbound.recv() => match message {
                Some(message) => {
                    if send(&mut socket, &message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    channel.close_session(session);
}

async fn send(socket: &mut WebSocket, message: &DaemonMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_else(|e| {
        format!("{{\"type\":\"error\",\"message\":\"serialization failed: {}\"}}", e)
    });
    socket.send(Message::Text(text)).await
}
