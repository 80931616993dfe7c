use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::models::Payload;

/// Live delivery handle for one endpoint's capture stream.
///
/// Only payloads published after attachment are delivered; earlier captures
/// are the history snapshot's job. Dropping the handle detaches the
/// subscriber, and the hub reclaims the channel once no handles remain.
#[derive(Debug)]
pub struct Subscription {
    endpoint_id: Uuid,
    receiver: broadcast::Receiver<Arc<Payload>>,
}

impl Subscription {
    pub fn endpoint_id(&self) -> Uuid {
        self.endpoint_id
    }

    /// Next live payload; `None` once the channel is gone.
    ///
    /// A subscriber that fell behind its buffer skips what it missed and
    /// keeps receiving — its lag never affects the publisher.
    pub async fn recv(&mut self) -> Option<Arc<Payload>> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        endpoint_id = %self.endpoint_id,
                        skipped,
                        "Subscriber lagged, missed payloads dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Number of payloads buffered and ready to receive.
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }

    pub fn into_receiver(self) -> broadcast::Receiver<Arc<Payload>> {
        self.receiver
    }
}

/// Per-endpoint broadcast registry for live payload delivery.
///
/// Each endpoint gets its own bounded channel, created lazily on first
/// subscribe. Publishing snapshots the subscriber set: attaching or
/// detaching during a publish neither blocks it nor is missed by it.
pub struct FanoutHub {
    channels: DashMap<Uuid, broadcast::Sender<Arc<Payload>>>,
    buffer: usize,
}

impl FanoutHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer,
        }
    }

    /// Attach a new live subscriber to an endpoint's stream.
    ///
    /// Subscribing to an endpoint that has seen no traffic yet is the common
    /// case; the caller is responsible for rejecting unknown identifiers.
    pub fn subscribe(&self, endpoint_id: Uuid) -> Subscription {
        let receiver = self
            .channels
            .entry(endpoint_id)
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe();

        Subscription {
            endpoint_id,
            receiver,
        }
    }

    /// Best-effort delivery to every subscriber attached right now.
    ///
    /// Returns the number of subscribers the payload was handed to. With no
    /// live channel this is a no-op; the caller has already appended the
    /// payload to history.
    pub fn publish(&self, endpoint_id: &Uuid, payload: Arc<Payload>) -> usize {
        let Some(sender) = self.channels.get(endpoint_id) else {
            return 0;
        };

        // send only fails when every receiver has detached
        sender.send(payload).unwrap_or(0)
    }

    pub fn subscriber_count(&self, endpoint_id: &Uuid) -> usize {
        self.channels
            .get(endpoint_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of endpoints with a live channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Reclaim channels whose subscribers have all detached.
    pub fn sweep_idle(&self) -> usize {
        let before = self.channels.len();
        self.channels
            .retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PayloadBody;
    use chrono::Utc;

    fn payload(marker: &str) -> Arc<Payload> {
        Arc::new(Payload {
            payload_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            method: "POST".to_string(),
            path: "/capture/test".to_string(),
            query_params: Vec::new(),
            headers: Vec::new(),
            body: PayloadBody::Text(marker.to_string()),
            ip_address: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            content_length: marker.len(),
        })
    }

    fn marker(payload: &Payload) -> &str {
        match &payload.body {
            PayloadBody::Text(text) => text,
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_publishes_in_order() {
        let hub = FanoutHub::new(16);
        let id = Uuid::new_v4();
        let mut subscription = hub.subscribe(id);

        for i in 0..5 {
            hub.publish(&id, payload(&format!("p{}", i)));
        }

        for i in 0..5 {
            let received = subscription.recv().await.unwrap();
            assert_eq!(marker(&received), format!("p{}", i));
        }
        assert_eq!(subscription.backlog(), 0);
    }

    #[tokio::test]
    async fn late_subscriber_sees_nothing_retroactively() {
        let hub = FanoutHub::new(16);
        let id = Uuid::new_v4();

        let mut early = hub.subscribe(id);
        hub.publish(&id, payload("before"));

        let mut late = hub.subscribe(id);
        hub.publish(&id, payload("after"));

        assert_eq!(marker(&early.recv().await.unwrap()), "before");
        assert_eq!(marker(&early.recv().await.unwrap()), "after");

        // the late handle only carries the delta since it attached
        assert_eq!(marker(&late.recv().await.unwrap()), "after");
        assert_eq!(late.backlog(), 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let hub = FanoutHub::new(16);
        let id = Uuid::new_v4();

        assert_eq!(hub.publish(&id, payload("lost")), 0);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let hub = FanoutHub::new(16);
        let id = Uuid::new_v4();

        let mut first = hub.subscribe(id);
        let mut second = hub.subscribe(id);
        assert_eq!(hub.subscriber_count(&id), 2);

        assert_eq!(hub.publish(&id, payload("fan")), 2);
        assert_eq!(marker(&first.recv().await.unwrap()), "fan");
        assert_eq!(marker(&second.recv().await.unwrap()), "fan");
    }

    #[tokio::test]
    async fn unrelated_endpoints_do_not_cross_deliver() {
        let hub = FanoutHub::new(16);
        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();

        let mut first = hub.subscribe(first_id);
        let second = hub.subscribe(second_id);

        hub.publish(&first_id, payload("only-first"));

        assert_eq!(marker(&first.recv().await.unwrap()), "only-first");
        assert_eq!(second.backlog(), 0);
    }

    #[tokio::test]
    async fn detach_is_idempotent_and_sweep_reclaims() {
        let hub = FanoutHub::new(16);
        let id = Uuid::new_v4();

        let first = hub.subscribe(id);
        let mut second = hub.subscribe(id);

        drop(first);
        assert_eq!(hub.subscriber_count(&id), 1);
        // dropping one handle must not disturb the other
        assert_eq!(hub.publish(&id, payload("still-live")), 1);
        assert_eq!(marker(&second.recv().await.unwrap()), "still-live");

        drop(second);
        assert_eq!(hub.sweep_idle(), 1);
        assert_eq!(hub.channel_count(), 0);
        // a swept channel publishes to nobody, without error
        assert_eq!(hub.publish(&id, payload("gone")), 0);
    }

    #[tokio::test]
    async fn laggard_drops_only_its_own_payloads() {
        let hub = FanoutHub::new(2);
        let id = Uuid::new_v4();
        let mut subscription = hub.subscribe(id);

        // overflow the 2-slot buffer: p0 and p1 are dropped for this
        // subscriber, the publisher never blocks
        for i in 0..4 {
            hub.publish(&id, payload(&format!("p{}", i)));
        }

        assert_eq!(marker(&subscription.recv().await.unwrap()), "p2");
        assert_eq!(marker(&subscription.recv().await.unwrap()), "p3");
    }
}
