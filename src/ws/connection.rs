//! Per-session socket loop.
//!
//! Drains the session outbox onto the socket, answers client commands and
//! pings the client periodically. The loop ends when the client closes,
//! the socket errors or a write fails; the session is then unregistered.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;

use super::messages::{ClientCommand, ServerNotice};
use super::session::{Outgoing, Session};
use super::SessionRegistry;
use crate::domain::{LiveEvent, StateBoard};
use crate::error::PipelineError;
use crate::service::PipelineStats;

/// Shared handles a connection needs besides its session.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Registry the session is unregistered from on exit.
    pub registry: Arc<SessionRegistry>,
    /// Source of snapshots.
    pub board: Arc<StateBoard>,
    /// Delivery failure counter.
    pub stats: Arc<PipelineStats>,
    /// Interval between protocol pings.
    pub ping_interval: Duration,
}

/// Upper bound on frames written per flush, so client frames and pings
/// still get polled while a large backlog drains.
const FLUSH_BATCH: usize = 64;

/// Runs the read/write loop for one registered session.
pub async fn run_connection(socket: WebSocket, session: Arc<Session>, ctx: ConnectionContext) {
    let (ws_tx, ws_rx) = socket.split();
    serve(ws_tx, ws_rx, session, ctx).await;
}

async fn serve<S, R, E>(mut ws_tx: S, mut ws_rx: R, session: Arc<Session>, ctx: ConnectionContext)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let mut ping = tokio::time::interval(ctx.ping_interval);
    ping.tick().await;

    loop {
        let backlog = match flush(&mut ws_tx, &session, &ctx.board).await {
            Ok(backlog) => backlog,
            Err(e) => {
                ctx.stats.record_delivery_failure();
                tracing::warn!(error = %e, user_id = %session.user_id(), "closing session");
                break;
            }
        };

        tokio::select! {
            () = session.wait(), if !backlog => {}
            () = std::future::ready(()), if backlog => {}
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text(text.as_str(), &session)
                            && send(&mut ws_tx, &reply, &session).await.is_err()
                        {
                            ctx.stats.record_delivery_failure();
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, session_id = %session.id(), "socket read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    ctx.stats.record_delivery_failure();
                    break;
                }
            }
        }
    }

    ctx.registry.disconnect(&session);
}

/// Writes up to [`FLUSH_BATCH`] queued frames. Returns `true` if the
/// batch filled up and more may be waiting.
async fn flush<S>(ws_tx: &mut S, session: &Session, board: &StateBoard) -> Result<bool, PipelineError>
where
    S: Sink<Message> + Unpin,
{
    for _ in 0..FLUSH_BATCH {
        let Some(next) = session.next_outgoing() else {
            return Ok(false);
        };
        match next {
            Outgoing::Snapshot => {
                let snapshot = LiveEvent::Snapshot(board.user_snapshot(session.user_id()));
                send(ws_tx, &snapshot, session).await?;
            }
            Outgoing::Reliable(event) => {
                send(ws_tx, &event, session).await?;
                session.ack(&event);
            }
            Outgoing::BestEffort(event) => send(ws_tx, &event, session).await?,
        }
    }
    Ok(true)
}

async fn send<S, T>(ws_tx: &mut S, frame: &T, session: &Session) -> Result<(), PipelineError>
where
    S: Sink<Message> + Unpin,
    T: Serialize,
{
    let failed = || PipelineError::Delivery(*session.id().as_uuid());
    let json = serde_json::to_string(frame).map_err(|_| failed())?;
    ws_tx.send(Message::text(json)).await.map_err(|_| failed())
}

/// Interprets a client text frame, returning an optional reply.
fn handle_text(text: &str, session: &Session) -> Option<ServerNotice> {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(ClientCommand::Snapshot) => {
            session.request_snapshot();
            None
        }
        Ok(ClientCommand::Ping) => Some(ServerNotice::Pong),
        Err(e) => Some(ServerNotice::Error {
            message: format!("unrecognized message: {e}"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;
    use futures_util::{sink, stream};

    use super::*;
    use crate::domain::{DeviceId, Liveness, UserId};

    fn context() -> ConnectionContext {
        ConnectionContext {
            registry: Arc::new(SessionRegistry::new(256)),
            board: Arc::new(StateBoard::new()),
            stats: Arc::new(PipelineStats::new()),
            ping_interval: Duration::from_secs(30),
        }
    }

    fn went_offline(device: i64) -> LiveEvent {
        LiveEvent::DeviceStatus {
            device_id: DeviceId::new(device),
            status: Liveness::Offline,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failed_write_unregisters_session() {
        let ctx = context();
        let session = ctx.registry.connect(UserId::new(1));
        let broken = Box::pin(sink::unfold((), |(), _frame: Message| async {
            Err::<(), _>(std::io::Error::other("connection reset"))
        }));
        let silent = stream::pending::<Result<Message, std::io::Error>>();

        serve(broken, silent, Arc::clone(&session), ctx.clone()).await;

        assert_eq!(ctx.registry.session_count(), 0);
        assert_eq!(ctx.stats.snapshot().delivery_failures, 1);
    }

    #[tokio::test]
    async fn flush_stops_after_one_batch() {
        let board = StateBoard::new();
        let session = Session::new(UserId::new(1), 256);
        assert_eq!(session.next_outgoing(), Some(Outgoing::Snapshot));
        for device in 0..100 {
            session.push(went_offline(device));
        }

        let mut written: Vec<Message> = Vec::new();
        let Ok(more) = flush(&mut written, &session, &board).await else {
            panic!("in-memory sink cannot fail");
        };
        assert!(more);
        assert_eq!(written.len(), FLUSH_BATCH);
        assert_eq!(session.pending_reliable(), 100 - FLUSH_BATCH);

        let Ok(more) = flush(&mut written, &session, &board).await else {
            panic!("in-memory sink cannot fail");
        };
        assert!(!more);
        assert_eq!(written.len(), 100);
        assert_eq!(session.pending_reliable(), 0);
    }

    #[test]
    fn snapshot_command_requests_resync() {
        let session = Session::new(UserId::new(1), 4);
        let _ = session.next_outgoing();
        assert_eq!(handle_text(r#"{"type":"snapshot"}"#, &session), None);
        assert_eq!(session.next_outgoing(), Some(Outgoing::Snapshot));
    }

    #[test]
    fn ping_and_garbage_get_replies() {
        let session = Session::new(UserId::new(1), 4);
        assert_eq!(
            handle_text(r#"{"type":"ping"}"#, &session),
            Some(ServerNotice::Pong)
        );
        assert!(matches!(
            handle_text("not json", &session),
            Some(ServerNotice::Error { .. })
        ));
    }
}
