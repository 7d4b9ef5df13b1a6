//! Progress Bus (C9, spec §4.9).
//!
//! Per-workflow publish/subscribe of workflow, activity, and task events. A
//! bounded ring buffer backs late subscribers with recent history; publishers
//! never block, and slow subscribers are dropped rather than applying
//! backpressure.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::constants::{PROGRESS_BUS_HISTORY_RETENTION, PROGRESS_BUS_RING_BUFFER};
use crate::ids::WorkflowId;

/// Kind of progress event (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    ActivityStarted,
    ActivityProgress,
    ActivityCompleted,
    ActivityFailed,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    Log,
    Metrics,
    Status,
}

/// A single progress event (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: uuid::Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub workflow_id: WorkflowId,
    pub activity_id: Option<String>,
    pub task_id: Option<crate::ids::TaskId>,
    pub data: serde_json::Value,
}

impl ProgressEvent {
    /// Build an event with the caller's `kind`/`source`/`data`; `id` and
    /// `timestamp` are stamped here.
    pub fn new(workflow_id: WorkflowId, kind: EventKind, source: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            source: source.into(),
            workflow_id,
            activity_id: None,
            task_id: None,
            data,
        }
    }

    #[must_use]
    pub fn with_task(mut self, task_id: crate::ids::TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    #[must_use]
    pub fn with_activity(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }
}

struct WorkflowChannel {
    history: VecDeque<(ProgressEvent, Instant)>,
    sender: broadcast::Sender<ProgressEvent>,
    last_touched: Instant,
}

impl WorkflowChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            history: VecDeque::with_capacity(capacity),
            sender,
            last_touched: Instant::now(),
        }
    }

    fn push(&mut self, event: ProgressEvent, ring_buffer_size: usize) {
        self.history.push_back((event.clone(), Instant::now()));
        while self.history.len() > ring_buffer_size {
            self.history.pop_front();
        }
        self.last_touched = Instant::now();
        // Publishers never block: a broadcast send only fails when there are
        // no receivers, which is not an error condition here.
        let _ = self.sender.send(event);
    }
}

/// Per-workflow event hub with bounded history (spec §4.9).
///
/// One [`ProgressBus`] is shared process-wide; it owns a channel per
/// workflow id, created lazily on first publish or subscribe.
pub struct ProgressBus {
    channels: parking_lot::Mutex<HashMap<WorkflowId, WorkflowChannel>>,
    ring_buffer_size: usize,
    history_retention: Duration,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            channels: parking_lot::Mutex::new(HashMap::new()),
            ring_buffer_size: PROGRESS_BUS_RING_BUFFER,
            history_retention: PROGRESS_BUS_HISTORY_RETENTION,
        }
    }

    /// Build a bus with non-default ring buffer capacity, used in tests to
    /// exercise eviction without publishing hundreds of events.
    pub fn with_ring_buffer(ring_buffer_size: usize) -> Self {
        Self {
            ring_buffer_size,
            ..Self::new()
        }
    }

    /// Publish `event`, fanning it out to live subscribers and appending it
    /// to the workflow's history ring buffer. Never blocks.
    pub fn publish(&self, event: ProgressEvent) {
        let mut channels = self.channels.lock();
        channels
            .entry(event.workflow_id)
            .or_insert_with(|| WorkflowChannel::new(self.ring_buffer_size))
            .push(event, self.ring_buffer_size);
    }

    /// Subscribe to `workflow_id`, returning recent history followed by a
    /// live receiver. Callers should drain history before polling the
    /// receiver so nothing published between the two calls is missed.
    pub fn subscribe(&self, workflow_id: WorkflowId) -> (Vec<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        let mut channels = self.channels.lock();
        let channel = channels
            .entry(workflow_id)
            .or_insert_with(|| WorkflowChannel::new(self.ring_buffer_size));
        let history = channel.history.iter().map(|(e, _)| e.clone()).collect();
        (history, channel.sender.subscribe())
    }

    /// Recent events for `workflow_id`, without subscribing live.
    pub fn history(&self, workflow_id: WorkflowId) -> Vec<ProgressEvent> {
        self.channels
            .lock()
            .get(&workflow_id)
            .map(|c| c.history.iter().map(|(e, _)| e.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop channels with no live subscribers and no events published within
    /// `history_retention`, and age out individually stale history entries.
    /// Run this periodically from a background task (spec §4.9's janitor).
    pub fn run_janitor_pass(&self) {
        let now = Instant::now();
        let mut channels = self.channels.lock();
        channels.retain(|_, channel| {
            channel
                .history
                .retain(|(_, recorded_at)| now.duration_since(*recorded_at) <= self.history_retention);
            let has_subscribers = channel.sender.receiver_count() > 0;
            let touched_recently = now.duration_since(channel.last_touched) <= self.history_retention;
            has_subscribers || touched_recently
        });
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(workflow_id: WorkflowId, kind: EventKind) -> ProgressEvent {
        ProgressEvent::new(workflow_id, kind, "test", serde_json::Value::Null)
    }

    #[test]
    fn history_respects_ring_buffer_capacity() {
        let bus = ProgressBus::with_ring_buffer(3);
        let workflow_id = WorkflowId::new();
        for _ in 0..10 {
            bus.publish(sample(workflow_id, EventKind::TaskProgress));
        }
        assert_eq!(bus.history(workflow_id).len(), 3);
    }

    #[tokio::test]
    async fn subscribers_receive_history_then_live_events() {
        let bus = ProgressBus::new();
        let workflow_id = WorkflowId::new();
        bus.publish(sample(workflow_id, EventKind::WorkflowStarted));

        let (history, mut rx) = bus.subscribe(workflow_id);
        assert_eq!(history.len(), 1);

        bus.publish(sample(workflow_id, EventKind::WorkflowCompleted));
        let live = rx.recv().await.unwrap();
        assert_eq!(live.kind, EventKind::WorkflowCompleted);
    }

    #[test]
    fn distinct_workflows_do_not_share_history() {
        let bus = ProgressBus::new();
        let a = WorkflowId::new();
        let b = WorkflowId::new();
        bus.publish(sample(a, EventKind::WorkflowStarted));
        assert_eq!(bus.history(a).len(), 1);
        assert_eq!(bus.history(b).len(), 0);
    }

    #[test]
    fn janitor_prunes_channels_with_no_subscribers_and_no_recent_history() {
        let bus = ProgressBus::new();
        let workflow_id = WorkflowId::new();
        bus.publish(sample(workflow_id, EventKind::WorkflowStarted));

        {
            let mut channels = bus.channels.lock();
            let channel = channels.get_mut(&workflow_id).unwrap();
            channel.last_touched = Instant::now() - Duration::from_secs(3600 * 2);
            for (_, recorded_at) in channel.history.iter_mut() {
                *recorded_at = Instant::now() - Duration::from_secs(3600 * 2);
            }
        }

        bus.run_janitor_pass();
        assert!(bus.channels.lock().get(&workflow_id).is_none());
    }
}
