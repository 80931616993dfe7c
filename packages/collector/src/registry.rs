use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::history::PayloadHistory;
use crate::models::{EndpointSummary, Payload};

/// One live capture target: a unique identifier, its public path, and a
/// bounded newest-first payload history behind its own lock.
#[derive(Debug)]
pub struct Endpoint {
    pub id: Uuid,
    pub path: String,
    pub history: RwLock<PayloadHistory>,
}

impl Endpoint {
    fn new(id: Uuid, history_capacity: usize) -> Self {
        Self {
            id,
            path: format!("/capture/{}", id),
            history: RwLock::new(PayloadHistory::new(history_capacity)),
        }
    }

    pub async fn payload_count(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn snapshot(&self) -> Vec<Arc<Payload>> {
        self.history.read().await.snapshot()
    }
}

/// Owner of the identifier → endpoint mapping.
///
/// Endpoints are only ever inserted; the global ceiling rejects creation
/// rather than evicting. Reads run concurrently; each endpoint's history is
/// serialized by its own lock, so unrelated endpoints never contend.
pub struct EndpointRegistry {
    endpoints: DashMap<Uuid, Arc<Endpoint>>,
    ceiling: usize,
    history_capacity: usize,
    live: AtomicUsize,
}

impl EndpointRegistry {
    pub fn new(ceiling: usize, history_capacity: usize) -> Self {
        Self {
            endpoints: DashMap::new(),
            ceiling,
            history_capacity,
            live: AtomicUsize::new(0),
        }
    }

    /// Allocate a fresh endpoint with an empty history.
    ///
    /// The ceiling is claimed atomically before the identifier is generated,
    /// so concurrent creations at the boundary cannot overshoot it.
    pub fn create(&self) -> AppResult<Arc<Endpoint>> {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.ceiling).then_some(live + 1)
            })
            .map_err(|_| AppError::CapacityExceeded(self.ceiling))?;

        loop {
            let id = Uuid::new_v4();
            match self.endpoints.entry(id) {
                // 128-bit collision: retry generation, never fail the create
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let endpoint = Arc::new(Endpoint::new(id, self.history_capacity));
                    slot.insert(endpoint.clone());
                    debug!(endpoint_id = %id, "Created new endpoint");
                    return Ok(endpoint);
                }
            }
        }
    }

    /// Pure read; never mutates.
    pub fn lookup(&self, id: &Uuid) -> Option<Arc<Endpoint>> {
        self.endpoints.get(id).map(|entry| entry.value().clone())
    }

    /// Number of live endpoints.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live endpoint's summary.
    pub async fn list(&self) -> Vec<EndpointSummary> {
        let endpoints: Vec<Arc<Endpoint>> = self
            .endpoints
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut summaries = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            summaries.push(EndpointSummary {
                id: endpoint.id,
                path: endpoint.path.clone(),
                payload_count: endpoint.payload_count().await,
            });
        }
        summaries
    }
}
