use crate::fanout::Subscription;
use actix_web::web::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::interval;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tracing::{debug, warn};

/// Ping interval for SSE keep-alive (30 seconds)
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// SSE stream carrying one endpoint's live captures
pub struct SseStream {
    event_stream:
        Pin<Box<dyn Stream<Item = Result<Bytes, actix_web::Error>> + Send + Sync + 'static>>,
}

impl SseStream {
    /// Turn a fan-out subscription into a stream of SSE frames.
    pub fn new(subscription: Subscription) -> Self {
        let endpoint_id = subscription.endpoint_id();

        // Stream of captured payloads from the fan-out channel
        let payload_stream =
            BroadcastStream::new(subscription.into_receiver()).filter_map(move |result| async move {
                match result {
                    Ok(payload) => {
                        let data = serde_json::to_string(payload.as_ref()).unwrap_or_default();
                        Some(Ok(Bytes::from(format!(
                            "event: payload\ndata: {}\n\n",
                            data
                        ))))
                    }
                    Err(BroadcastStreamRecvError::Lagged(count)) => {
                        warn!(
                            endpoint_id = %endpoint_id,
                            lagged = count,
                            "SSE receiver lagged, payloads dropped"
                        );
                        None
                    }
                }
            });

        // Stream of periodic pings
        let ping_stream = IntervalStream::new(interval(PING_INTERVAL)).map(move |_| {
            let ping_data = json!({ "timestamp": Utc::now().to_rfc3339() });
            debug!("Sending SSE ping");
            Ok(Bytes::from(format!("event: ping\ndata: {}\n\n", ping_data)))
        });

        // Initial ping once
        let initial_ping = futures::stream::once(async {
            let ping_data = json!({ "timestamp": Utc::now().to_rfc3339() });
            Ok(Bytes::from(format!("event: ping\ndata: {}\n\n", ping_data)))
        });

        // Combine: initial ping -> then payloads and pings interleaved
        let event_stream = initial_ping.chain(futures::stream::select(payload_stream, ping_stream));

        Self {
            event_stream: Box::pin(event_stream),
        }
    }
}

impl Stream for SseStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.event_stream.as_mut().poll_next(cx)
    }
}
