use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::fanout::{FanoutHub, Subscription};
use crate::models::{Payload, PayloadBody};
use crate::rate_limit::RateLimiter;
use crate::registry::{Endpoint, EndpointRegistry};

/// Everything the ingestion path needs from one inbound capture hit.
#[derive(Debug, Clone)]
pub struct InboundCapture {
    pub method: String,
    pub path: String,
    pub query_string: String,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub ip_address: String,
    pub user_agent: String,
}

/// Orchestrator for the capture and creation flows.
///
/// A capture request moves through rate check, endpoint resolution, payload
/// construction, append and publish; a rejection at any step leaves no trace
/// in history and publishes nothing.
pub struct IngestionService {
    registry: Arc<EndpointRegistry>,
    hub: Arc<FanoutHub>,
    limiter: Arc<RateLimiter>,
}

impl IngestionService {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        hub: Arc<FanoutHub>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            registry,
            hub,
            limiter,
        }
    }

    /// Creation sub-flow: rate check, then ceiling-guarded allocation.
    pub fn create_endpoint(&self, client_key: &str) -> AppResult<Arc<Endpoint>> {
        if !self.limiter.allow(client_key) {
            return Err(AppError::RateLimitExceeded(format!(
                "too many requests from {}",
                client_key
            )));
        }

        self.registry.create()
    }

    /// Capture flow: rate check, resolve, build, append, publish.
    ///
    /// The timestamp is assigned and the payload handed to the hub under the
    /// endpoint's history lock, so a subscriber's view and the history
    /// snapshot never disagree about which payload came first.
    pub async fn capture(
        &self,
        client_key: &str,
        endpoint_id: Uuid,
        inbound: InboundCapture,
    ) -> AppResult<Arc<Payload>> {
        if !self.limiter.allow(client_key) {
            return Err(AppError::RateLimitExceeded(format!(
                "too many requests from {}",
                client_key
            )));
        }

        let endpoint = self
            .registry
            .lookup(&endpoint_id)
            .ok_or(AppError::EndpointNotFound)?;

        let body = PayloadBody::from_bytes(inbound.content_type.as_deref(), &inbound.body);
        let query_params = parse_query(&inbound.query_string);
        let content_length = inbound.body.len();

        let mut history = endpoint.history.write().await;

        // Clamp against the newest entry so capture order and capture time
        // never disagree, even across a wall-clock step.
        let mut timestamp = Utc::now();
        if let Some(newest) = history.newest_timestamp() {
            timestamp = timestamp.max(newest);
        }

        let payload = Arc::new(Payload {
            payload_id: Uuid::new_v4(),
            timestamp,
            method: inbound.method,
            path: inbound.path,
            query_params,
            headers: inbound.headers,
            body,
            ip_address: inbound.ip_address,
            user_agent: inbound.user_agent,
            content_length,
        });

        history.append(payload.clone());
        let delivered = self.hub.publish(&endpoint_id, payload.clone());
        drop(history);

        debug!(
            endpoint_id = %endpoint_id,
            payload_id = %payload.payload_id,
            delivered,
            "Captured payload"
        );

        Ok(payload)
    }

    /// Attach a live subscriber to a known endpoint.
    ///
    /// Attaching before any traffic arrives is the common case; only unknown
    /// identifiers are rejected.
    pub fn subscribe(&self, endpoint_id: Uuid) -> AppResult<Subscription> {
        if self.registry.lookup(&endpoint_id).is_none() {
            return Err(AppError::EndpointNotFound);
        }

        Ok(self.hub.subscribe(endpoint_id))
    }
}

/// Split a raw query string into an order-preserving multimap.
fn parse_query(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn service(ceiling: usize, capacity: usize, rate_limit: u32) -> IngestionService {
        IngestionService::new(
            Arc::new(EndpointRegistry::new(ceiling, capacity)),
            Arc::new(FanoutHub::new(16)),
            Arc::new(RateLimiter::new(rate_limit, Duration::from_secs(60))),
        )
    }

    fn inbound(body: &[u8], content_type: Option<&str>) -> InboundCapture {
        InboundCapture {
            method: "POST".to_string(),
            path: "/capture/test".to_string(),
            query_string: String::new(),
            content_type: content_type.map(|ct| ct.to_string()),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_vec(),
            ip_address: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
        }
    }

    #[test]
    fn query_strings_parse_into_ordered_pairs() {
        assert_eq!(
            parse_query("a=1&b=&a=2&c"),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), String::new()),
                ("a".to_string(), "2".to_string()),
                ("c".to_string(), String::new()),
            ]
        );
        assert_eq!(
            parse_query("key=hello%20world"),
            vec![("key".to_string(), "hello world".to_string())]
        );
        assert!(parse_query("").is_empty());
    }

    #[tokio::test]
    async fn capture_appends_and_acknowledges() {
        let svc = service(10, 100, 100);
        let endpoint = svc.create_endpoint("client").unwrap();

        let payload = svc
            .capture("client", endpoint.id, inbound(br#"{"a":1}"#, Some("application/json")))
            .await
            .unwrap();

        assert_eq!(serde_json::to_value(&payload.body).unwrap(), json!({"a": 1}));
        assert_eq!(payload.content_length, 7);

        let snapshot = endpoint.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].payload_id, payload.payload_id);
    }

    #[tokio::test]
    async fn capture_to_unknown_endpoint_mutates_nothing() {
        let svc = service(10, 100, 100);
        let endpoint = svc.create_endpoint("client").unwrap();

        let err = svc
            .capture("client", Uuid::new_v4(), inbound(b"x", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EndpointNotFound));

        assert!(endpoint.snapshot().await.is_empty());
        assert_eq!(svc.hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn rate_limited_capture_mutates_nothing() {
        let svc = service(10, 100, 2);
        // the create consumes one slot from the shared window
        let endpoint = svc.create_endpoint("client").unwrap();

        svc.capture("client", endpoint.id, inbound(b"one", None))
            .await
            .unwrap();

        let err = svc
            .capture("client", endpoint.id, inbound(b"two", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded(_)));
        assert_eq!(endpoint.payload_count().await, 1);

        // an unrelated client is still admitted
        svc.capture("10.0.0.9", endpoint.id, inbound(b"three", None))
            .await
            .unwrap();
        assert_eq!(endpoint.payload_count().await, 2);
    }

    #[tokio::test]
    async fn rate_limited_creation_is_rejected() {
        let svc = service(10, 100, 1);
        svc.create_endpoint("client").unwrap();

        let err = svc.create_endpoint("client").unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded(_)));
        assert_eq!(svc.registry.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_requires_a_known_endpoint() {
        let svc = service(10, 100, 100);
        let err = svc.subscribe(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::EndpointNotFound));

        let endpoint = svc.create_endpoint("client").unwrap();
        let subscription = svc.subscribe(endpoint.id).unwrap();
        assert_eq!(subscription.endpoint_id(), endpoint.id);
    }

    #[tokio::test]
    async fn history_and_live_stream_agree_on_order() {
        let svc = service(10, 100, 1000);
        let endpoint = svc.create_endpoint("client").unwrap();
        let mut subscription = svc.subscribe(endpoint.id).unwrap();

        for i in 0..5 {
            svc.capture("client", endpoint.id, inbound(format!("p{}", i).as_bytes(), None))
                .await
                .unwrap();
        }

        let snapshot = endpoint.snapshot().await;
        assert_eq!(snapshot.len(), 5);

        // live delivery is oldest-first, the snapshot newest-first
        for i in 0..5 {
            let live = subscription.recv().await.unwrap();
            assert_eq!(live.payload_id, snapshot[4 - i].payload_id);
        }

        // capture time never decreases down the append order
        for pair in snapshot.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn eviction_scenario_end_to_end() {
        let svc = service(10, 100, 100_000);
        let endpoint = svc.create_endpoint("client").unwrap();

        svc.capture("client", endpoint.id, inbound(br#"{"a":1}"#, Some("application/json")))
            .await
            .unwrap();
        assert_eq!(endpoint.payload_count().await, 1);

        for i in 0..99 {
            svc.capture("client", endpoint.id, inbound(format!("p{}", i).as_bytes(), None))
                .await
                .unwrap();
        }
        assert_eq!(endpoint.payload_count().await, 100);

        // subscriber attached right before the capture that evicts the oldest
        let mut subscription = svc.subscribe(endpoint.id).unwrap();
        svc.capture("client", endpoint.id, inbound(b"the-101st", None))
            .await
            .unwrap();

        assert_eq!(endpoint.payload_count().await, 100);
        let snapshot = endpoint.snapshot().await;
        // the original JSON capture was the oldest and is gone
        assert!(snapshot
            .iter()
            .all(|p| serde_json::to_value(&p.body).unwrap() != json!({"a": 1})));

        // exactly one delivery: the capture made after attachment
        let live = subscription.recv().await.unwrap();
        assert_eq!(live.payload_id, snapshot[0].payload_id);
        assert_eq!(subscription.backlog(), 0);
    }

    #[tokio::test]
    async fn concurrent_captures_to_one_endpoint_serialize() {
        let svc = Arc::new(service(10, 100, 100_000));
        let endpoint = svc.create_endpoint("client").unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let svc = svc.clone();
            let id = endpoint.id;
            handles.push(tokio::spawn(async move {
                svc.capture("client", id, inbound(format!("p{}", i).as_bytes(), None))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = endpoint.snapshot().await;
        assert_eq!(snapshot.len(), 32);
        for pair in snapshot.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }
}
