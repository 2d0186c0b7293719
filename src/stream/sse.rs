//! Server-sent-events adapter for registered clients.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::Stream;

use super::registry::{ClientHandle, ClientReceiver};
use crate::events::StreamEvent;

fn to_sse_event(seq: u64, event: &StreamEvent) -> Event {
    Event::default()
        .event(event.kind())
        .id(seq.to_string())
        .data(event.to_json())
}

/// Turn a registered connection into an SSE event stream.
///
/// The stream owns `handle`: when the client disconnects the response body is
/// dropped, which drops the handle and deregisters the entry. The stream ends
/// on its own once the registry releases the client's sink.
pub fn client_event_stream(
    handle: ClientHandle,
    mut rx: ClientReceiver,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        let connected = StreamEvent::connected(handle.id().as_str());
        let mut seq: u64 = 1;
        yield Ok(to_sse_event(seq, &connected));

        while let Some(event) = rx.recv().await {
            seq += 1;
            yield Ok(to_sse_event(seq, &event));
        }

        tracing::debug!(client_id = %handle.id(), "Client channel closed, ending stream");
        drop(handle);
    }
}

/// Wrap `stream` in an SSE response with periodic keep-alive comments.
pub fn build_sse_response<S>(stream: S, keep_alive: Duration) -> Sse<KeepAliveStream<S>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive))
}
