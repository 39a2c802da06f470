//! Server-sent event streams for the inspector and the log viewer.
//!
//! Each connection holds its own subscription. When the client goes away
//! the stream is dropped, which unsubscribes it.

use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tracing::debug;

use mini_edge_state::BroadcastEvent;

use crate::state::AppState;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

fn to_event<T: Serialize>(value: &T) -> Result<Event, axum::Error> {
    Event::default().json_data(value)
}

/// `GET /api/inspect/stream`: `connected`, then one `traffic` event per
/// record.
pub async fn inspect_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.traffic().subscribe();
    debug!(observer = subscription.id(), "Inspector connected");

    let events = stream::once(async { BroadcastEvent::Connected })
        .chain(subscription.into_stream())
        .map(|event| to_event(&event));

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
}

/// `GET /api/logs/stream`: one event per worker log line.
pub async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.logs().subscribe();
    debug!(observer = subscription.id(), "Log viewer connected");

    let events = subscription.into_stream().map(|line| to_event(&line));
    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
}
