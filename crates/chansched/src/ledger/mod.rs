//! Request lifecycle ledger.
//!
//! Requests move `Queued -> Matched -> Completed`, or `Queued -> Cancelled`.
//! Transitions are monotonic; an attempt to move a request from any other
//! state fails with `InvalidState` and leaves the request untouched. A
//! submission is acknowledged only after its payload reached the durable
//! store, and the store entry is removed the moment the request leaves the
//! queue.

pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, SchedError};
use store::RequestStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Matched,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Matched => "matched",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A requester's demand for some number of channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    pub requester: String,
    #[serde(rename = "resources_needed")]
    pub channels_needed: u32,
    /// Optional subset of channel ids the request may be served from.
    pub constraint: Option<Vec<u32>>,
    pub status: RequestStatus,
    /// Set exactly once, when the request is matched; immutable until release.
    pub assigned_channel_ids: Vec<u32>,
    pub submitted_at: DateTime<Utc>,
    /// Monotonic submission sequence, the FIFO tie-break.
    pub seq: u64,
    /// Scheduler-clock timestamp of the match, for hold-time accounting.
    pub matched_at: Option<f64>,
}

struct LedgerInner {
    requests: HashMap<String, Request>,
    next_seq: u64,
}

/// Durable record of submitted requests and their lifecycle state.
pub struct RequestLedger {
    inner: Mutex<LedgerInner>,
    store: Arc<dyn RequestStore>,
}

impl RequestLedger {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                requests: HashMap::new(),
                next_seq: 0,
            }),
            store,
        }
    }

    /// Builds a ledger and replays whatever queued requests the store held
    /// when the previous process stopped.
    pub async fn recover(store: Arc<dyn RequestStore>) -> Result<Self> {
        let ledger = Self::new(store.clone());
        let persisted = store.get_all().await?;
        let mut inner = ledger.inner.lock().await;
        for (request_id, payload) in persisted {
            match serde_json::from_str::<Request>(&payload) {
                Ok(request) => {
                    inner.next_seq = inner.next_seq.max(request.seq + 1);
                    inner.requests.insert(request.request_id.clone(), request);
                }
                Err(e) => {
                    tracing::warn!("Dropping unreadable persisted request {request_id}: {e}");
                }
            }
        }
        let recovered = inner.requests.len();
        drop(inner);
        if recovered > 0 {
            tracing::info!("Recovered {recovered} queued requests from the durable store");
        }
        Ok(ledger)
    }

    /// Submits a request, returning its id once the payload is durable.
    pub async fn submit(
        &self,
        requester: &str,
        channels_needed: u32,
        constraint: Option<Vec<u32>>,
        request_id: Option<String>,
    ) -> Result<String> {
        if channels_needed == 0 {
            return Err(SchedError::invalid_argument(
                "channels_needed must be positive",
            ));
        }
        if requester.is_empty() {
            return Err(SchedError::invalid_argument("requester must not be empty"));
        }

        let mut inner = self.inner.lock().await;
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if inner.requests.contains_key(&request_id) {
            return Err(SchedError::invalid_argument(format!(
                "request id {request_id} already exists"
            )));
        }

        let request = Request {
            request_id: request_id.clone(),
            requester: requester.to_string(),
            channels_needed,
            constraint,
            status: RequestStatus::Queued,
            assigned_channel_ids: Vec::new(),
            submitted_at: Utc::now(),
            seq: inner.next_seq,
            matched_at: None,
        };

        let payload = serde_json::to_string(&request)
            .map_err(|e| SchedError::unavailable(format!("serialize request: {e}")))?;
        // Durable first. If the store write fails nothing becomes visible.
        self.store.add(&request_id, &payload).await?;

        inner.next_seq += 1;
        inner.requests.insert(request_id.clone(), request);
        Ok(request_id)
    }

    /// Queued requests in submission order.
    pub async fn get_pending(&self) -> Vec<Request> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<Request> = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Queued)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.seq);
        pending
    }

    pub async fn get(&self, request_id: &str) -> Option<Request> {
        self.inner.lock().await.requests.get(request_id).cloned()
    }

    pub async fn queue_len(&self) -> usize {
        self.inner
            .lock()
            .await
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Queued)
            .count()
    }

    /// Transitions `Queued -> Matched`, recording the assigned channels.
    pub async fn mark_matched(
        &self,
        request_id: &str,
        channel_ids: Vec<u32>,
        matched_at: f64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::expect_status(&inner, request_id, RequestStatus::Queued, "queued")?;
        // The request leaves the durable queue in the same logical commit.
        self.store.delete(request_id).await?;
        let request = inner
            .requests
            .get_mut(request_id)
            .expect("checked above while locked");
        request.status = RequestStatus::Matched;
        request.assigned_channel_ids = channel_ids;
        request.matched_at = Some(matched_at);
        Ok(())
    }

    /// Transitions `Matched -> Completed`.
    pub async fn mark_completed(&self, request_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::expect_status(&inner, request_id, RequestStatus::Matched, "matched")?;
        let request = inner
            .requests
            .get_mut(request_id)
            .expect("checked above while locked");
        request.status = RequestStatus::Completed;
        Ok(())
    }

    /// Cancels a request that is still queued. Best-effort: once a matching
    /// cycle has picked the request up, the match wins.
    pub async fn cancel(&self, request_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::expect_status(&inner, request_id, RequestStatus::Queued, "queued")?;
        self.store.delete(request_id).await?;
        let request = inner
            .requests
            .get_mut(request_id)
            .expect("checked above while locked");
        request.status = RequestStatus::Cancelled;
        Ok(())
    }

    fn expect_status(
        inner: &LedgerInner,
        request_id: &str,
        expected: RequestStatus,
        expected_name: &'static str,
    ) -> Result<()> {
        let request = inner
            .requests
            .get(request_id)
            .ok_or_else(|| SchedError::NotFound {
                entity: "request",
                id: request_id.to_string(),
            })?;
        if request.status != expected {
            return Err(SchedError::InvalidState {
                request_id: request_id.to_string(),
                expected: expected_name,
                actual: request.status.as_str().to_string(),
            });
        }
        Ok(())
    }
}
