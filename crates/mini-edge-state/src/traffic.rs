//! Traffic recorder and live broadcast.
//!
//! Completed requests are kept newest-first in a fixed-capacity ring buffer
//! and published to every connected observer at record time. Aggregate
//! counters are kept separately so metrics cover every request ever
//! recorded, not only those still in the buffer.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use mini_edge_common::ErrorCode;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::trace;

use crate::now_millis;
use crate::observers::{Observers, Subscription};

/// Outcome of a recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Ok,
    Error,
}

/// Request side of a record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestSnapshot {
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: String,
}

/// Response side of a record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseSnapshot {
    pub body: String,
}

/// One completed request. Immutable once recorded.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficRecord {
    pub id: String,
    /// Unix milliseconds at which the request arrived.
    pub time: i64,
    /// Matched route pattern, or the concrete path when nothing matched.
    pub route: String,
    pub worker: Option<String>,
    pub method: String,
    pub status: RecordStatus,
    pub http_status: u16,
    pub duration_ms: u64,
    pub request: RequestSnapshot,
    pub response: ResponseSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Set for platform endpoints such as webhooks.
    pub system: bool,
}

impl TrafficRecord {
    /// Start a record for a request arriving now. Status defaults to `ok`.
    pub fn new(method: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            time: now_millis(),
            route: route.into(),
            worker: None,
            method: method.into(),
            status: RecordStatus::Ok,
            http_status: 200,
            duration_ms: 0,
            request: RequestSnapshot::default(),
            response: ResponseSnapshot::default(),
            error: None,
            code: None,
            system: false,
        }
    }

    #[must_use]
    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    #[must_use]
    pub fn with_request(mut self, request: RequestSnapshot) -> Self {
        self.request = request;
        self
    }

    #[must_use]
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Mark the request as answered successfully.
    #[must_use]
    pub fn succeeded(mut self, http_status: u16, body: impl Into<String>, duration_ms: u64) -> Self {
        self.status = RecordStatus::Ok;
        self.http_status = http_status;
        self.response.body = body.into();
        self.duration_ms = duration_ms;
        self
    }

    /// Mark the request as failed.
    #[must_use]
    pub fn failed(
        mut self,
        http_status: u16,
        code: ErrorCode,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        self.status = RecordStatus::Error;
        self.http_status = http_status;
        self.code = Some(code);
        self.error = Some(message.into());
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == RecordStatus::Error
    }
}

/// Event pushed to inspector observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum BroadcastEvent {
    Connected,
    Traffic(Arc<TrafficRecord>),
}

/// Per-worker aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub requests: u64,
    pub errors: u64,
    /// Mean duration in milliseconds.
    pub avg_time: f64,
}

/// Aggregates over every record ever made.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStats {
    pub total_requests: u64,
    pub total_errors: u64,
    pub workers: BTreeMap<String, WorkerStats>,
}

#[derive(Default)]
struct Totals {
    requests: u64,
    errors: u64,
    workers: BTreeMap<String, WorkerTotals>,
}

#[derive(Default)]
struct WorkerTotals {
    requests: u64,
    errors: u64,
    total_ms: u64,
}

/// Ring buffer of traffic records with live observers.
pub struct TrafficRecorder {
    buffer: RwLock<VecDeque<Arc<TrafficRecord>>>,
    capacity: usize,
    observers: Arc<Observers<BroadcastEvent>>,
    totals: Mutex<Totals>,
}

impl TrafficRecorder {
    /// Create a recorder holding at most `capacity` records.
    pub fn new(capacity: usize, observer_queue: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            observers: Observers::new(observer_queue),
            totals: Mutex::new(Totals::default()),
        }
    }

    /// Store a record at the front, evicting the oldest past capacity, and
    /// publish it.
    pub fn record(&self, record: TrafficRecord) -> Arc<TrafficRecord> {
        let record = Arc::new(record);

        {
            let mut buffer = self.buffer.write();
            buffer.push_front(Arc::clone(&record));
            buffer.truncate(self.capacity);
        }

        {
            let mut totals = self.totals.lock();
            totals.requests += 1;
            if record.is_error() {
                totals.errors += 1;
            }
            if let Some(worker) = &record.worker {
                let entry = totals.workers.entry(worker.clone()).or_default();
                entry.requests += 1;
                entry.total_ms += record.duration_ms;
                if record.is_error() {
                    entry.errors += 1;
                }
            }
        }

        let delivered = self
            .observers
            .publish(&BroadcastEvent::Traffic(Arc::clone(&record)));
        trace!(id = %record.id, delivered, "traffic recorded");
        record
    }

    /// Buffer contents, newest first.
    pub fn list(&self) -> Vec<Arc<TrafficRecord>> {
        self.buffer.read().iter().cloned().collect()
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<Arc<TrafficRecord>> {
        self.buffer.read().iter().find(|r| r.id == id).cloned()
    }

    /// Register a live observer.
    pub fn subscribe(&self) -> Subscription<BroadcastEvent> {
        self.observers.subscribe()
    }

    /// Remove a live observer by id.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> TrafficStats {
        let totals = self.totals.lock();
        let workers = totals
            .workers
            .iter()
            .map(|(name, t)| {
                let avg_time = if t.requests == 0 {
                    0.0
                } else {
                    t.total_ms as f64 / t.requests as f64
                };
                (
                    name.clone(),
                    WorkerStats {
                        requests: t.requests,
                        errors: t.errors,
                        avg_time,
                    },
                )
            })
            .collect();

        TrafficStats {
            total_requests: totals.requests,
            total_errors: totals.errors,
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(route: &str) -> TrafficRecord {
        TrafficRecord::new("GET", route).with_worker("w").succeeded(200, "ok", 4)
    }

    #[test]
    fn test_newest_first() {
        let recorder = TrafficRecorder::new(10, 4);
        recorder.record(ok("/a"));
        recorder.record(ok("/b"));

        let routes: Vec<String> = recorder.list().iter().map(|r| r.route.clone()).collect();
        assert_eq!(routes, ["/b", "/a"]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let recorder = TrafficRecorder::new(3, 4);
        let first = recorder.record(ok("/0"));
        for i in 1..=3 {
            recorder.record(ok(&format!("/{i}")));
        }

        assert_eq!(recorder.len(), 3);
        assert!(recorder.get(&first.id).is_none());
        let routes: Vec<String> = recorder.list().iter().map(|r| r.route.clone()).collect();
        assert_eq!(routes, ["/3", "/2", "/1"]);
    }

    #[test]
    fn test_get_by_id() {
        let recorder = TrafficRecorder::new(10, 4);
        let rec = recorder.record(ok("/a"));

        assert_eq!(recorder.get(&rec.id).unwrap().route, "/a");
        assert!(recorder.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_observers_receive_records() {
        let recorder = TrafficRecorder::new(10, 4);
        let mut sub = recorder.subscribe();
        assert_eq!(recorder.observer_count(), 1);

        let rec = recorder.record(ok("/a"));
        match sub.recv().await {
            Some(BroadcastEvent::Traffic(received)) => assert_eq!(received.id, rec.id),
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(recorder.unsubscribe(sub.id()));
        assert_eq!(recorder.observer_count(), 0);
    }

    #[test]
    fn test_dead_observer_does_not_block_recording() {
        let recorder = TrafficRecorder::new(10, 1);
        let _slow = recorder.subscribe();
        let dead = recorder.subscribe();
        let id = dead.id();
        drop(dead);

        for i in 0..5 {
            recorder.record(ok(&format!("/{i}")));
        }
        assert_eq!(recorder.len(), 5);
        assert!(!recorder.unsubscribe(id));
    }

    #[test]
    fn test_stats_outlive_buffer() {
        let recorder = TrafficRecorder::new(1, 4);
        recorder.record(ok("/a"));
        recorder.record(
            TrafficRecord::new("GET", "/a")
                .with_worker("w")
                .failed(500, ErrorCode::RuntimeError, "boom", 8),
        );
        recorder.record(TrafficRecord::new("GET", "/nope").failed(
            404,
            ErrorCode::RouteNotFound,
            "Route not found",
            0,
        ));

        let stats = recorder.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_errors, 2);
        let w = &stats.workers["w"];
        assert_eq!(w.requests, 2);
        assert_eq!(w.errors, 1);
        assert!((w.avg_time - 6.0).abs() < f64::EPSILON);
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_record_wire_format() {
        let rec = TrafficRecord::new("POST", "/todo/:id")
            .with_worker("todo")
            .failed(504, ErrorCode::Timeout, "Execution timeout after 50ms", 51);
        let json = serde_json::to_value(&rec).unwrap();

        assert_eq!(json["status"], "error");
        assert_eq!(json["http_status"], 504);
        assert_eq!(json["duration_ms"], 51);
        assert_eq!(json["code"], "TIMEOUT");
        assert_eq!(json["system"], false);

        let event = serde_json::to_value(BroadcastEvent::Connected).unwrap();
        assert_eq!(event, serde_json::json!({"type": "connected"}));

        let event = serde_json::to_value(BroadcastEvent::Traffic(Arc::new(rec))).unwrap();
        assert_eq!(event["type"], "traffic");
        assert_eq!(event["payload"]["worker"], "todo");
    }
}
