//! Fan-out of live events to the sessions of a device's audience.

use std::sync::Arc;

use super::SessionRegistry;
use crate::domain::{LiveEvent, UserId};

/// Pushes live events into the outboxes of entitled sessions.
///
/// Delivery never blocks on a socket: a slow session only grows (or
/// overflows) its own outbox.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
}

impl Broadcaster {
    /// Creates a broadcaster over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Delivers `event` to every session of every user in `audience`.
    /// Returns the number of sessions reached.
    pub fn deliver(&self, audience: &[UserId], event: LiveEvent) -> usize {
        let sessions = self.registry.sessions_for(audience);
        for session in &sessions {
            session.push(event.clone());
        }
        tracing::trace!(
            event = event.type_str(),
            device_id = ?event.device_id(),
            sessions = sessions.len(),
            "live event delivered"
        );
        sessions.len()
    }
}
