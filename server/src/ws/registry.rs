//! Connection Registry: the process-wide set of live connections plus
//! the derived aggregates (population count, admin roster, selection
//! overlay).
//!
//! Connections are an arena of records keyed by a monotonically
//! assigned id; transports are referenced only by their outbound mpsc
//! sender, never by back-pointer. The record map lives behind one
//! mutex; senders are cloned out and the lock released before any send,
//! so a slow peer never blocks the fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;

use crate::auth::session::Role;
use crate::errors::CLOSE_GOING_AWAY;
use crate::ws::protocol::{
    ConnectionSender, OnlineCountData, Position, SelectionEntry, SelectionUpdateData,
    ServerMessage, UserInfoData,
};

/// Stable handle for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Observers,
    Administrators,
}

impl Audience {
    fn includes(self, role: Role) -> bool {
        match self {
            Audience::All => true,
            Audience::Observers => role == Role::Observer,
            Audience::Administrators => role == Role::Administrator,
        }
    }
}

struct ConnectionRecord {
    sender: ConnectionSender,
    role: Role,
    /// Actor id for observers, used for targeted ban-kicks.
    actor_id: Option<String>,
    nickname: String,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
    /// Selection overlay, keyed by display name. Mutated only through
    /// registry methods; last write wins per name.
    selections: DashMap<String, Position>,
}

impl ConnectionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionRecord>> {
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
    }

    /// Register an authenticated connection and publish the updated
    /// aggregates to everyone.
    pub fn admit(
        &self,
        sender: ConnectionSender,
        role: Role,
        actor_id: Option<String>,
        nickname: String,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let count = {
            let mut conns = self.lock();
            conns.insert(
                id,
                ConnectionRecord {
                    sender,
                    role,
                    actor_id,
                    nickname,
                },
            );
            conns.len()
        };
        tracing::debug!(connection = id.0, connections = count, "Connection admitted");

        self.notify_aggregates();
        id
    }

    /// Unregister a connection. Idempotent: a second call, or a call for
    /// a connection that was never admitted, does nothing. Clears the
    /// connection's selection entry and re-publishes the aggregates.
    pub fn remove(&self, id: ConnectionId) {
        let record = { self.lock().remove(&id) };
        let Some(record) = record else {
            return;
        };

        if record.role == Role::Observer {
            self.selections.remove(&record.nickname);
            self.broadcast(
                &ServerMessage::SelectionUpdate {
                    data: SelectionUpdateData {
                        nickname: record.nickname.clone(),
                        position: None,
                    },
                },
                Audience::All,
            );
        }

        tracing::debug!(connection = id.0, nickname = %record.nickname, "Connection removed");
        self.notify_aggregates();
    }

    /// Fan a message out to the given audience. Delivery is best-effort
    /// per connection: a dead channel marks that connection for removal
    /// and never aborts delivery to the rest.
    pub fn broadcast(&self, message: &ServerMessage, audience: Audience) {
        let Some(frame) = message.encode() else {
            return;
        };

        let targets: Vec<(ConnectionId, ConnectionSender)> = {
            let conns = self.lock();
            conns
                .iter()
                .filter(|(_, record)| audience.includes(record.role))
                .map(|(id, record)| (*id, record.sender.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, sender) in targets {
            if sender.send(frame.clone()).is_err() {
                dead.push(id);
            }
        }

        for id in dead {
            tracing::debug!(connection = id.0, "Dropping connection with dead channel");
            self.remove(id);
        }
    }

    /// Store or clear one display name's selection and broadcast the
    /// change to everyone.
    pub fn update_selection(&self, nickname: &str, position: Option<Position>) {
        match position {
            Some(p) => {
                self.selections.insert(nickname.to_string(), p);
            }
            None => {
                self.selections.remove(nickname);
            }
        }

        self.broadcast(
            &ServerMessage::SelectionUpdate {
                data: SelectionUpdateData {
                    nickname: nickname.to_string(),
                    position,
                },
            },
            Audience::All,
        );
    }

    pub fn selections_snapshot(&self) -> Vec<SelectionEntry> {
        self.selections
            .iter()
            .map(|entry| SelectionEntry {
                nickname: entry.key().clone(),
                position: *entry.value(),
            })
            .collect()
    }

    /// Observers currently online. Administrators are not counted.
    pub fn online_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|r| r.role == Role::Observer)
            .count()
    }

    /// Live observer roster for the admin overview.
    pub fn users_info(&self) -> Vec<UserInfoData> {
        self.lock()
            .values()
            .filter_map(|r| {
                r.actor_id.as_ref().map(|id| UserInfoData {
                    nickname: r.nickname.clone(),
                    id: id.clone(),
                })
            })
            .collect()
    }

    /// Force-close every connection belonging to an actor (ban-kick).
    /// The close frame goes through the normal writer channel and the
    /// record leaves through the normal removal path.
    pub fn force_disconnect_actor(&self, actor_id: &str, close_code: u16, reason: &str) {
        let targets: Vec<(ConnectionId, ConnectionSender)> = {
            let conns = self.lock();
            conns
                .iter()
                .filter(|(_, r)| r.actor_id.as_deref() == Some(actor_id))
                .map(|(id, r)| (*id, r.sender.clone()))
                .collect()
        };

        for (id, sender) in targets {
            let _ = sender.send(Message::Close(Some(CloseFrame {
                code: close_code,
                reason: reason.to_string().into(),
            })));
            self.remove(id);
        }
    }

    /// Close every connection with a "server going away" code and clear
    /// all registry state. Used by full-game-reset.
    pub fn shutdown_all(&self) {
        let drained: Vec<ConnectionRecord> = {
            let mut conns = self.lock();
            conns.drain().map(|(_, record)| record).collect()
        };

        for record in &drained {
            let _ = record.sender.send(Message::Close(Some(CloseFrame {
                code: CLOSE_GOING_AWAY,
                reason: "Server going away".into(),
            })));
        }
        self.selections.clear();

        tracing::info!(closed = drained.len(), "All connections shut down");
    }

    /// Recompute and publish the derived aggregates: population count to
    /// everyone, the observer roster to administrators only.
    fn notify_aggregates(&self) {
        let online = self.online_count();
        self.broadcast(
            &ServerMessage::OnlineCountUpdate {
                data: OnlineCountData { online },
            },
            Audience::All,
        );
        self.broadcast(
            &ServerMessage::UsersInfoUpdate {
                data: self.users_info(),
            },
            Audience::Administrators,
        );
    }
}
