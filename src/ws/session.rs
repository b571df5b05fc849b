//! One live dashboard session and its outbound queue.
//!
//! Producers (device workers, via the broadcaster) push frames into the
//! session's [`Outbox`] without ever touching the socket; the session's
//! connection task drains it. Two delivery classes share the outbox:
//!
//! - `sensor_update` frames are best-effort and newest-wins: at most one
//!   pending frame per (device, datastream), a newer value replaces the
//!   queued one in place.
//! - `status_update` and `device_status` frames are reliable: they stay
//!   queued until the socket write succeeded. If the replay buffer
//!   overflows, the queued deltas are discarded and the session is
//!   resynchronized with a full snapshot instead.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::domain::{DatastreamKey, DeviceId, LiveEvent, UserId};

/// Unique identifier of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Creates a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Next thing the connection task should write.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Build and send a fresh snapshot.
    Snapshot,
    /// Send a reliable frame, then [`Session::ack`] it.
    Reliable(LiveEvent),
    /// Send a best-effort frame; it is already dequeued.
    BestEffort(LiveEvent),
}

type StreamSlot = (DeviceId, DatastreamKey);

#[derive(Debug)]
struct Outbox {
    resync: bool,
    reliable: VecDeque<LiveEvent>,
    reliable_capacity: usize,
    latest: HashMap<StreamSlot, LiveEvent>,
    order: VecDeque<StreamSlot>,
    overflows: u64,
}

impl Outbox {
    fn push(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::SensorUpdate {
                device_id,
                ref datastream,
                ..
            } => {
                let slot = (device_id, datastream.clone());
                if self.latest.insert(slot.clone(), event).is_none() {
                    self.order.push_back(slot);
                }
            }
            LiveEvent::Snapshot(_) => self.resync = true,
            reliable => {
                if self.reliable.len() >= self.reliable_capacity {
                    self.reliable.clear();
                    self.resync = true;
                    self.overflows += 1;
                } else {
                    self.reliable.push_back(reliable);
                }
            }
        }
    }

    fn next(&mut self) -> Option<Outgoing> {
        if self.resync {
            self.resync = false;
            // Everything queued so far is already reflected in the snapshot.
            self.reliable.clear();
            return Some(Outgoing::Snapshot);
        }
        if let Some(front) = self.reliable.front() {
            return Some(Outgoing::Reliable(front.clone()));
        }
        while let Some(slot) = self.order.pop_front() {
            if let Some(event) = self.latest.remove(&slot) {
                return Some(Outgoing::BestEffort(event));
            }
        }
        None
    }
}

/// A live, authenticated connection of one user.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    user_id: UserId,
    outbox: Mutex<Outbox>,
    wake: Notify,
}

impl Session {
    /// Creates a session whose first outbound frame is a snapshot.
    #[must_use]
    pub fn new(user_id: UserId, replay_capacity: usize) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            outbox: Mutex::new(Outbox {
                resync: true,
                reliable: VecDeque::new(),
                reliable_capacity: replay_capacity.max(1),
                latest: HashMap::new(),
                order: VecDeque::new(),
                overflows: 0,
            }),
            wake: Notify::new(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Owning user.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Queues a frame and wakes the connection task.
    pub fn push(&self, event: LiveEvent) {
        let overflowed = {
            let mut outbox = self.outbox.lock();
            let before = outbox.overflows;
            outbox.push(event);
            outbox.overflows != before
        };
        if overflowed {
            tracing::warn!(session_id = %self.id, user_id = %self.user_id, "replay buffer overflow, session will be resynchronized");
        }
        self.wake.notify_one();
    }

    /// Asks for a fresh snapshot to be sent next.
    pub fn request_snapshot(&self) {
        self.outbox.lock().resync = true;
        self.wake.notify_one();
    }

    /// Returns the next frame to write, if any.
    #[must_use]
    pub fn next_outgoing(&self) -> Option<Outgoing> {
        self.outbox.lock().next()
    }

    /// Confirms that a reliable frame was written.
    pub fn ack(&self, event: &LiveEvent) {
        let mut outbox = self.outbox.lock();
        if outbox.reliable.front() == Some(event) {
            outbox.reliable.pop_front();
        }
    }

    /// Number of reliable frames awaiting delivery.
    #[must_use]
    pub fn pending_reliable(&self) -> usize {
        self.outbox.lock().reliable.len()
    }

    /// Waits until something is pushed.
    pub async fn wait(&self) {
        self.wake.notified().await;
    }
}
