//! Live-update channel: per-user sessions and their WebSocket endpoint.
//!
//! Device workers hand [`LiveEvent`](crate::domain::LiveEvent)s to the
//! [`Broadcaster`], which pushes them into the outbox of every session of
//! the device's audience. Each session's connection task drains its outbox
//! onto the socket at its own pace.

pub mod broadcaster;
pub mod connection;
pub mod handler;
pub mod messages;
pub mod registry;
pub mod session;

pub use broadcaster::Broadcaster;
pub use handler::{USER_ID_HEADER, authenticated_user, ws_handler};
pub use registry::SessionRegistry;
pub use session::{Outgoing, Session, SessionId};
