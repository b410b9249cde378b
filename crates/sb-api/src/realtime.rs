//! Live score updates over WebSocket.
//!
//! One broadcast channel feeds every socket. Each event carries an
//! [`Audience`]; a socket forwards only what is addressed to everyone or to
//! the group named after its own alias. Publishing never waits on slow
//! clients: a lagging receiver just skips ahead.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use sb_core::models::{ItemKind, VoteOutcome};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::identity::Caller;
use crate::state::AppState;

const CHANNEL_CAPACITY: usize = 256;

/// Wire format of the messages pushed to browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A user's sigma changed; sent only to that user's own sockets
    UpdateSigma { alias: String, sigma: i64 },
    UpdatePostSigma { post_id: i64, sigma: i64 },
    UpdateCommentSigma {
        comment_id: i64,
        post_id: i64,
        sigma: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    /// Sockets opened by this alias
    Group(String),
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub audience: Audience,
    pub event: RealtimeEvent,
}

impl Envelope {
    pub fn reaches(&self, alias: Option<&str>) -> bool {
        match &self.audience {
            Audience::Everyone => true,
            Audience::Group(group) => alias == Some(group.as_str()),
        }
    }
}

/// Fan-out hub shared by all handlers.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Envelope>,
    /// Open sockets per alias group
    groups: Arc<DashMap<String, usize>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            groups: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn publish(&self, audience: Audience, event: RealtimeEvent) {
        // An error only means nobody is listening.
        if self.tx.send(Envelope { audience, event }).is_err() {
            tracing::trace!("no realtime listeners");
        }
    }

    /// Announces a committed vote: the author's new sigma to the author,
    /// the item's new score to everyone.
    pub fn publish_vote(&self, outcome: &VoteOutcome) {
        self.publish(
            Audience::Group(outcome.author.clone()),
            RealtimeEvent::UpdateSigma {
                alias: outcome.author.clone(),
                sigma: outcome.author_sigma,
            },
        );
        let item_event = match outcome.kind {
            ItemKind::Post => RealtimeEvent::UpdatePostSigma {
                post_id: outcome.item_id,
                sigma: outcome.new_score,
            },
            ItemKind::Comment => RealtimeEvent::UpdateCommentSigma {
                comment_id: outcome.item_id,
                post_id: outcome.post_id,
                sigma: outcome.new_score,
            },
        };
        self.publish(Audience::Everyone, item_event);
    }

    /// Registers a socket in its alias group until the guard drops.
    pub fn join(&self, alias: &str) -> GroupMembership {
        *self.groups.entry(alias.to_string()).or_insert(0) += 1;
        tracing::debug!(%alias, "socket joined group");
        GroupMembership {
            groups: Arc::clone(&self.groups),
            alias: alias.to_string(),
        }
    }

    pub fn group_size(&self, alias: &str) -> usize {
        self.groups.get(alias).map_or(0, |n| *n)
    }
}

pub struct GroupMembership {
    groups: Arc<DashMap<String, usize>>,
    alias: String,
}

impl Drop for GroupMembership {
    fn drop(&mut self) {
        if let Some(mut count) = self.groups.get_mut(&self.alias) {
            *count = count.saturating_sub(1);
        }
        self.groups.remove_if(&self.alias, |_, count| *count == 0);
        tracing::debug!(alias = %self.alias, "socket left group");
    }
}

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    caller: Caller,
) -> Response {
    let alias = caller.alias().map(str::to_owned);
    ws.on_upgrade(move |socket| handle_socket(socket, state.notifier, alias))
}

async fn handle_socket(socket: WebSocket, notifier: Notifier, alias: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = notifier.subscribe();
    let _membership = alias.as_deref().map(|a| notifier.join(a));

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(envelope) => {
                    if !envelope.reaches(alias.as_deref()) {
                        continue;
                    }
                    let json = match serde_json::to_string(&envelope.event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode realtime event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "realtime socket lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "websocket error");
                    break;
                }
            },
        }
    }
}
