//! Task workers: `task` runs on the blocking pool, a non-empty reply comes
//! back as `finish`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

use crate::engine::TaskPayload;
use crate::error::EngineError;
use crate::events::{EventContext, EventKind, EventPayload, Reply};
use crate::lifecycle::Shutdown;

use super::stats::PendingTask;
use super::Shared;

/// Tasks still queued when the loop stops are dropped with their guard.
#[derive(Debug)]
pub(crate) struct QueuedTask {
    id: u64,
    data: TaskPayload,
    pending: PendingTask,
}

/// Sending side handed to `dispatch_task`.
#[derive(Debug)]
pub(crate) struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    next_id: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueuedTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            next_id: AtomicU64::new(0),
        };
        (queue, rx)
    }

    /// Queue a payload and return its task id.
    pub fn push(&self, data: TaskPayload, pending: PendingTask) -> Result<u64, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(QueuedTask { id, data, pending })
            .map_err(|_| EngineError::NotStarted)?;
        Ok(id)
    }
}

/// Run queued tasks on at most `workers` blocking threads.
///
/// Task worker ids follow the event workers: `first_worker..first_worker + workers`.
pub(crate) async fn run_task_workers(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<QueuedTask>,
    workers: usize,
    first_worker: usize,
    shutdown: Shutdown,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut stop = shutdown.subscribe();

    loop {
        let task = tokio::select! {
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
            _ = stop.recv() => break,
        };
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let worker_id = first_worker + (task.id as usize % workers);
        let shared = Arc::clone(&shared);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_task(&shared, worker_id, task);
        });
    }
    tracing::debug!("Task workers stopped");
}

fn run_task(shared: &Shared, worker_id: usize, task: QueuedTask) {
    let QueuedTask {
        id,
        data,
        pending: _pending,
    } = task;
    tracing::debug!(task = id, worker = worker_id, "Running task");

    let ctx = EventContext::new(EventKind::Task)
        .with_worker(worker_id)
        .with_payload(EventPayload::Task { id, data });
    if !shared.handlers.notify(&ctx) {
        return;
    }

    let reply = ctx.take_reply();
    if reply.is_empty() {
        return;
    }
    let finish = EventContext::new(EventKind::Finish)
        .with_worker(worker_id)
        .with_payload(EventPayload::Task {
            id,
            data: task_result(&reply),
        });
    shared.handlers.notify(&finish);
}

/// JSON if the reply parses as JSON, a string otherwise.
fn task_result(reply: &Reply) -> Value {
    let body = reply.body();
    serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
}
