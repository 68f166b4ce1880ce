//! Server-sent event framing for session buses: one frame per event, in
//! publish order.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::Stream;
use libmoltslack::Session;
use libmoltslack::bus::SubscriberId;
use moltslack_protocol::Event;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::AppState;
use crate::routes::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub replay: Option<String>,
}

impl EventsQuery {
    /// Replay is on unless explicitly disabled.
    pub fn replay(&self) -> bool {
        !matches!(self.replay.as_deref(), Some("0" | "false" | "False"))
    }
}

/// `event: <kind>` / `data: <payload json with ts>`.
pub fn frame(event: &Event) -> SseEvent {
    SseEvent::default()
        .event(event.kind().as_str())
        .data(event.wire_data().to_string())
}

/// Detaches the subscriber when the stream is dropped.
struct Unsubscribe {
    session: Arc<Session>,
    id: SubscriberId,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.session.unsubscribe_id(self.id);
        debug!(session_id = %self.session.id, subscriber = self.id, "event stream closed");
    }
}

pub fn event_stream(
    session: Arc<Session>,
    replay: bool,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    let mut subscription = session.subscribe(replay);
    async_stream::stream! {
        let _guard = Unsubscribe {
            id: subscription.id(),
            session,
        };
        loop {
            let next = tokio::select! {
                event = subscription.recv() => event,
                _ = shutdown.cancelled() => None,
            };
            match next {
                Some(event) => yield Ok::<SseEvent, Infallible>(frame(&event)),
                None => break,
            }
        }
    }
}

/// GET /api/chats/{id}/events
pub async fn chat_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let session = state.registry.get(&id)?;
    let stream = event_stream(session, query.replay(), state.shutdown.clone());
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
