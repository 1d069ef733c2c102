//! Engine counters, mirrored into the `metrics` facade.
//!
//! # Metrics
//! - `server_connections_accepted_total` (counter)
//! - `server_active_connections` (gauge)
//! - `server_requests_total` (counter): by bind point port
//! - `server_tasks_total` (counter)
//! - `server_reloads_total` (counter)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::engine::EngineStats;
use crate::net::ConnectionTracker;

#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    start_time: AtomicU64,
    requests: AtomicU64,
    tasks: AtomicU64,
    tasking: Arc<AtomicU64>,
    reloads: AtomicU64,
    workers: AtomicU64,
}

impl EngineCounters {
    pub fn mark_started(&self, workers: usize) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.start_time.store(now, Ordering::SeqCst);
        self.workers.store(workers as u64, Ordering::SeqCst);
    }

    pub fn record_accept(&self, tracker: &ConnectionTracker) {
        metrics::counter!("server_connections_accepted_total").increment(1);
        metrics::gauge!("server_active_connections").set(tracker.active_count() as f64);
    }

    pub fn record_close(&self, tracker: &ConnectionTracker) {
        metrics::gauge!("server_active_connections").set(tracker.active_count() as f64);
    }

    pub fn record_request(&self, port: u16) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("server_requests_total", "port" => port.to_string()).increment(1);
    }

    /// Count a new task; it stays in `tasking_num` until the guard drops.
    pub fn task_queued(&self) -> PendingTask {
        self.tasks.fetch_add(1, Ordering::SeqCst);
        self.tasking.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("server_tasks_total").increment(1);
        PendingTask(Arc::clone(&self.tasking))
    }

    pub fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("server_reloads_total").increment(1);
    }

    pub fn snapshot(&self, tracker: &ConnectionTracker) -> EngineStats {
        let mut stats = EngineStats::new();
        let mut put = |key: &str, value: u64| {
            stats.insert(key.to_string(), Value::from(value));
        };
        put("start_time", self.start_time.load(Ordering::SeqCst));
        put("connection_num", tracker.active_count());
        put("accept_count", tracker.accepted_count());
        put("close_count", tracker.closed_count());
        put("request_count", self.requests.load(Ordering::SeqCst));
        put("tasking_num", self.tasking.load(Ordering::SeqCst));
        put("task_count", self.tasks.load(Ordering::SeqCst));
        put("worker_num", self.workers.load(Ordering::SeqCst));
        put("reload_count", self.reloads.load(Ordering::SeqCst));
        stats
    }
}

/// A task that is queued or running.
#[derive(Debug)]
pub(crate) struct PendingTask(Arc<AtomicU64>);

impl Drop for PendingTask {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_every_counter() {
        let counters = EngineCounters::default();
        let tracker = ConnectionTracker::new();

        counters.mark_started(4);
        let guard = tracker.track();
        counters.record_accept(&tracker);
        counters.record_request(9501);
        let pending = counters.task_queued();
        counters.record_reload();

        let stats = counters.snapshot(&tracker);
        assert_eq!(stats["connection_num"], 1);
        assert_eq!(stats["accept_count"], 1);
        assert_eq!(stats["request_count"], 1);
        assert_eq!(stats["tasking_num"], 1);
        assert_eq!(stats["task_count"], 1);
        assert_eq!(stats["worker_num"], 4);
        assert_eq!(stats["reload_count"], 1);
        assert!(stats["start_time"].as_u64().unwrap() > 0);

        drop(guard);
        drop(pending);
        let stats = counters.snapshot(&tracker);
        assert_eq!(stats["connection_num"], 0);
        assert_eq!(stats["close_count"], 1);
        assert_eq!(stats["tasking_num"], 0);
    }
}
