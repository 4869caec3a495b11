//! # Event subscription engine (C7)
//!
//! One group worker per known group, scanning newly committed blocks
//! against a filter predicate and pushing matches to the subscribing
//! session. Each worker is a cooperative, single-threaded loop driven as
//! its own `tokio` task; `latestBlockNumber` is updated atomically from
//! outside and never drives the loop directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DEFAULT_EVENT_SUB_MAX_BLOCKS_PER_LOOP;

/// A matched log entry. Left as an opaque JSON value — log shapes are
/// defined by the ledger client, an external collaborator.
pub type MatchedLog = Value;

/// Push status carried alongside a batch of matches, wire-encoded as the
/// plain integer the spec's `{id, status, result}` shape expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PushStatus {
    Running = 0,
    PushCompleted = 1,
}

/// `{id, status, result}` pushed to the subscribing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogPush {
    pub id: String,
    pub status: i32,
    pub result: Vec<MatchedLog>,
}

impl EventLogPush {
    pub fn new(id: impl Into<String>, status: PushStatus, result: Vec<MatchedLog>) -> Self {
        Self {
            id: id.into(),
            status: status as i32,
            result,
        }
    }
}

/// The filter predicate a task matches blocks against: a closed block
/// range plus topic/address constraints.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub from_block: i64,
    pub to_block: i64,
    pub addresses: Vec<String>,
    pub topics: Vec<String>,
}

/// Invoked with each batch of matches (`complete=false`) and a final call
/// with `complete=true`. Returning `false` signals the session is gone and
/// the task should be cancelled.
pub trait EventSubCallback: Send + Sync {
    fn on_push(&self, matches: Vec<MatchedLog>, complete: bool) -> bool;
}

/// Reads committed blocks for filter matching. An external collaborator —
/// this crate fixes only the call shape.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Fetches header + receipts + txs for `block_number` and returns the
    /// subset of logs in it matching `filter`.
    async fn match_block(&self, group_id: &str, block_number: i64, filter: &EventFilter) -> Vec<MatchedLog>;
}

struct EventSubTask {
    id: String,
    filter: EventFilter,
    last_processed: AtomicI64,
    work_in_progress: AtomicBool,
    callback: Arc<dyn EventSubCallback>,
}

impl EventSubTask {
    fn is_complete(&self) -> bool {
        self.filter.to_block <= self.last_processed.load(Ordering::Acquire)
    }
}

/// One group's background worker state: its queues and active task map.
pub struct GroupWorker {
    group_id: String,
    ledger: Arc<dyn LedgerReader>,
    latest_block_number: AtomicI64,
    tasks_to_add: Mutex<Vec<EventSubTask>>,
    tasks_to_cancel: Mutex<Vec<String>>,
    active_tasks: Mutex<HashMap<String, EventSubTask>>,
    max_blocks_per_loop: i64,
}

impl GroupWorker {
    pub fn new(group_id: impl Into<String>, ledger: Arc<dyn LedgerReader>) -> Self {
        Self {
            group_id: group_id.into(),
            ledger,
            latest_block_number: AtomicI64::new(0),
            tasks_to_add: Mutex::new(Vec::new()),
            tasks_to_cancel: Mutex::new(Vec::new()),
            active_tasks: Mutex::new(HashMap::new()),
            max_blocks_per_loop: DEFAULT_EVENT_SUB_MAX_BLOCKS_PER_LOOP as i64,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Overrides the per-loop block-scan window, normally
    /// [`DEFAULT_EVENT_SUB_MAX_BLOCKS_PER_LOOP`], with the `[eventsub]`
    /// config section's `max_blocks_per_loop`.
    pub fn with_max_blocks_per_loop(mut self, max_blocks_per_loop: u64) -> Self {
        self.max_blocks_per_loop = max_blocks_per_loop as i64;
        self
    }

    /// Enqueues a new task, to be adopted on the worker's next iteration.
    pub fn subscribe(&self, id: impl Into<String>, filter: EventFilter, callback: Arc<dyn EventSubCallback>) {
        self.tasks_to_add.lock().push(EventSubTask {
            id: id.into(),
            last_processed: AtomicI64::new(filter.from_block - 1),
            filter,
            work_in_progress: AtomicBool::new(false),
            callback,
        });
    }

    /// Enqueues cancellation of an already-active task.
    pub fn unsubscribe(&self, id: &str) {
        self.tasks_to_cancel.lock().push(id.to_string());
    }

    /// Updates `latestBlockNumber`. Called from outside the worker loop on
    /// every block-number notification; never drives the loop directly.
    pub fn on_block_notify(&self, block_number: i64) {
        self.latest_block_number.fetch_max(block_number, Ordering::AcqRel);
    }

    pub fn active_task_count(&self) -> usize {
        self.active_tasks.lock().len()
    }

    pub fn has_active_task(&self, id: &str) -> bool {
        self.active_tasks.lock().contains_key(id)
    }

    /// One iteration of the worker loop: drain cancellations, drain
    /// additions (rejecting duplicate ids), then advance every active task
    /// by up to `max_blocks_per_loop` blocks.
    pub async fn run_once(&self) {
        {
            let mut to_cancel = self.tasks_to_cancel.lock();
            let mut active = self.active_tasks.lock();
            for id in to_cancel.drain(..) {
                active.remove(&id);
            }
        }
        {
            let mut to_add = self.tasks_to_add.lock();
            let mut active = self.active_tasks.lock();
            for task in to_add.drain(..) {
                active.entry(task.id.clone()).or_insert(task);
            }
        }

        let ids: Vec<String> = self.active_tasks.lock().keys().cloned().collect();
        for id in ids {
            self.drive_task(&id).await;
        }
    }

    async fn drive_task(&self, id: &str) {
        let (probe_alive, is_complete, work_in_progress, next_block) = {
            let active = self.active_tasks.lock();
            let Some(task) = active.get(id) else {
                return;
            };
            let probe_alive = task.callback.on_push(Vec::new(), false);
            (
                probe_alive,
                task.is_complete(),
                task.work_in_progress.load(Ordering::Acquire),
                task.last_processed.load(Ordering::Acquire) + 1,
            )
        };

        if !probe_alive {
            self.tasks_to_cancel.lock().push(id.to_string());
            return;
        }
        if is_complete {
            let callback = {
                let active = self.active_tasks.lock();
                active.get(id).map(|task| task.callback.clone())
            };
            if let Some(callback) = callback {
                callback.on_push(Vec::new(), true);
            }
            self.tasks_to_cancel.lock().push(id.to_string());
            return;
        }
        if work_in_progress {
            return;
        }

        let latest = self.latest_block_number.load(Ordering::Acquire);
        if next_block > latest {
            return;
        }

        {
            let active = self.active_tasks.lock();
            if let Some(task) = active.get(id) {
                task.work_in_progress.store(true, Ordering::Release);
            }
        }

        let (filter, callback) = {
            let active = self.active_tasks.lock();
            let Some(task) = active.get(id) else {
                return;
            };
            (task.filter.clone(), task.callback.clone())
        };

        let window_end = std::cmp::min(latest, filter.to_block).min(next_block + self.max_blocks_per_loop - 1);
        let mut matches = Vec::new();
        for block_number in next_block..=window_end {
            let mut block_matches = self.ledger.match_block(&self.group_id, block_number, &filter).await;
            matches.append(&mut block_matches);
        }

        if !matches.is_empty() {
            callback.on_push(matches, false);
        }

        let active = self.active_tasks.lock();
        if let Some(task) = active.get(id) {
            task.last_processed.store(window_end, Ordering::Release);
            task.work_in_progress.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;

    struct CountingLedger;

    #[async_trait]
    impl LedgerReader for CountingLedger {
        async fn match_block(&self, _group_id: &str, block_number: i64, _filter: &EventFilter) -> Vec<MatchedLog> {
            vec![serde_json::json!({ "block": block_number })]
        }
    }

    struct RecordingCallback {
        pushes: PMutex<Vec<(Vec<MatchedLog>, bool)>>,
        alive: AtomicBool,
    }

    impl RecordingCallback {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pushes: PMutex::new(Vec::new()),
                alive: AtomicBool::new(true),
            })
        }
    }

    impl EventSubCallback for RecordingCallback {
        fn on_push(&self, matches: Vec<MatchedLog>, complete: bool) -> bool {
            self.pushes.lock().push((matches, complete));
            self.alive.load(Ordering::Acquire)
        }
    }

    fn filter(from: i64, to: i64) -> EventFilter {
        EventFilter {
            from_block: from,
            to_block: to,
            addresses: Vec::new(),
            topics: Vec::new(),
        }
    }

    #[tokio::test]
    async fn task_processes_every_block_in_its_range_exactly_once_in_order() {
        let worker = GroupWorker::new("g1", Arc::new(CountingLedger));
        let callback = RecordingCallback::new();
        worker.subscribe("task1", filter(10, 12), callback.clone());
        worker.on_block_notify(15);

        worker.run_once().await; // adopt
        worker.run_once().await; // process window
        worker.run_once().await; // detect completion

        assert!(!worker.has_active_task("task1"));
        let pushes = callback.pushes.lock();
        let completion = pushes.iter().filter(|(_, complete)| *complete).count();
        assert_eq!(completion, 1);
        let blocks: Vec<i64> = pushes
            .iter()
            .flat_map(|(matches, _)| matches.iter().map(|m| m["block"].as_i64().unwrap()))
            .collect();
        assert_eq!(blocks, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn task_waits_when_next_block_exceeds_latest_known() {
        let worker = GroupWorker::new("g1", Arc::new(CountingLedger));
        let callback = RecordingCallback::new();
        worker.subscribe("task1", filter(10, 20), callback.clone());
        worker.run_once().await;
        worker.run_once().await;
        assert!(worker.has_active_task("task1"));
        assert!(callback.pushes.lock().iter().all(|(matches, _)| matches.is_empty()));
    }

    #[tokio::test]
    async fn duplicate_subscribe_ids_do_not_replace_the_active_task() {
        let worker = GroupWorker::new("g1", Arc::new(CountingLedger));
        let callback_a = RecordingCallback::new();
        let callback_b = RecordingCallback::new();
        worker.subscribe("task1", filter(1, 1), callback_a);
        worker.run_once().await;
        worker.subscribe("task1", filter(1, 1), callback_b.clone());
        worker.run_once().await;
        assert_eq!(worker.active_task_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_an_active_task() {
        let worker = GroupWorker::new("g1", Arc::new(CountingLedger));
        let callback = RecordingCallback::new();
        worker.subscribe("task1", filter(1, 100), callback);
        worker.run_once().await;
        assert!(worker.has_active_task("task1"));
        worker.unsubscribe("task1");
        worker.run_once().await;
        assert!(!worker.has_active_task("task1"));
    }

    #[tokio::test]
    async fn a_dead_session_probe_cancels_the_task() {
        let worker = GroupWorker::new("g1", Arc::new(CountingLedger));
        let callback = RecordingCallback::new();
        callback.alive.store(false, Ordering::Release);
        worker.subscribe("task1", filter(1, 1), callback);
        worker.run_once().await;
        worker.run_once().await;
        assert!(!worker.has_active_task("task1"));
    }

    #[tokio::test]
    async fn processing_caps_at_max_blocks_per_loop() {
        let worker = GroupWorker::new("g1", Arc::new(CountingLedger));
        let callback = RecordingCallback::new();
        worker.subscribe("task1", filter(1, 100), callback.clone());
        worker.on_block_notify(100);
        worker.run_once().await;
        let pushes = callback.pushes.lock();
        let processed: usize = pushes.iter().map(|(matches, _)| matches.len()).sum();
        assert_eq!(processed, DEFAULT_EVENT_SUB_MAX_BLOCKS_PER_LOOP as usize);
    }

    #[tokio::test]
    async fn with_max_blocks_per_loop_overrides_the_scan_window() {
        let worker = GroupWorker::new("g1", Arc::new(CountingLedger)).with_max_blocks_per_loop(3);
        let callback = RecordingCallback::new();
        worker.subscribe("task1", filter(1, 100), callback.clone());
        worker.on_block_notify(100);
        worker.run_once().await;
        let processed: usize = callback.pushes.lock().iter().map(|(matches, _)| matches.len()).sum();
        assert_eq!(processed, 3);
    }
}
