// src/http/sse.rs

//! Server-sent event stream for one job subscription.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::Stream;

use crate::logs::Subscription;

/// Turn a subscription into an SSE stream of JSON events.
///
/// The stream ends when the job's log closes. A subscriber dropped for
/// falling behind gets a final `{"type":"disconnected"}` event.
pub fn event_stream(
    mut subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job_id = subscription.job_id();

    let stream = async_stream::stream! {
        loop {
            match subscription.recv().await {
                Ok(Some(event)) => {
                    yield Ok(Event::default().data(
                        serde_json::to_string(&event).unwrap_or_default()
                    ));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(%job_id, error = %e, "SSE subscriber disconnected");
                    let notice = serde_json::json!({
                        "type": "disconnected",
                        "reason": e.to_string(),
                    });
                    yield Ok(Event::default().data(notice.to_string()));
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
