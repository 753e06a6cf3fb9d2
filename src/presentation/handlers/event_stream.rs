use std::convert::Infallible;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;

use crate::application::services::Subscription;
use crate::domain::StreamEvent;

#[derive(Debug, Default, Deserialize)]
pub struct ReplayQuery {
    pub after: Option<u64>,
}

impl ReplayQuery {
    /// `?after=` wins over the `Last-Event-ID` header a reconnecting
    /// browser sends on its own.
    pub fn resolve(&self, headers: &HeaderMap) -> u64 {
        self.after
            .or_else(|| {
                headers
                    .get("last-event-id")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok())
            })
            .unwrap_or(0)
    }
}

/// SSE framing of an operation stream: event name is the event type, id is
/// the sequence number, data is the whole event as JSON.
pub fn sse_response(
    subscription: Subscription,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = subscription
        .into_stream()
        .map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    Sse::new(events).keep_alive(KeepAlive::new().interval(keep_alive).text("keep-alive"))
}

fn to_sse_event(event: &StreamEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default()
        .event(event.event_type.as_str())
        .id(event.seq.to_string())
        .data(data)
}
