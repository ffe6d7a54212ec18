//! Progress hooks for observing stage execution.
//!
//! Hooks are **observers**: they are told when a task starts, how many units
//! it counted, and when each unit starts and ends. They cannot influence the
//! run; cancellation and pausing go through [`TaskControl`](crate::TaskControl).
//!
//! # Lifecycle
//!
//! ```text
//! on_task_start ─► on_counting ─► on_step_count
//!                                      │
//!                      ┌───────────────┘
//!                      ▼
//!               on_step_start ─► on_step_end   (once per unit)
//!                      │
//!                      ▼
//!                 on_task_end   (completed, cancelled or failed)
//! ```

use crossbeam_channel::Sender;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::task::{TaskReport, TaskState};

/// Trait for stage progress observers.
///
/// Hooks must be `Send + Sync`; use interior mutability for hook-owned state.
pub trait ProgressHook: Send + Sync {
    /// Human-readable name for logging and debugging.
    fn name(&self) -> &str;

    #[allow(unused_variables)]
    fn on_task_start(&self, task: &str) {}

    #[allow(unused_variables)]
    fn on_counting(&self, task: &str) {}

    #[allow(unused_variables)]
    fn on_step_count(&self, task: &str, total: u64) {}

    /// Called before unit `step` (zero-based), with a short description of
    /// the unit such as the index or key being processed.
    #[allow(unused_variables)]
    fn on_step_start(&self, task: &str, step: u64, message: fmt::Arguments<'_>) {}

    /// Called after a unit; `done` units of `total` are finished.
    #[allow(unused_variables)]
    fn on_step_end(&self, task: &str, done: u64, total: u64) {}

    #[allow(unused_variables)]
    fn on_task_end(&self, report: &TaskReport) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// HookRunner
// ─────────────────────────────────────────────────────────────────────────────

/// Manages hook registration and sequential invocation.
///
/// Hooks are called in registration order.
#[derive(Default, Clone)]
pub struct HookRunner {
    hooks: Vec<Arc<dyn ProgressHook>>,
}

impl HookRunner {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn add(&mut self, hook: Arc<dyn ProgressHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn hook_names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn on_task_start(&self, task: &str) {
        for hook in &self.hooks {
            hook.on_task_start(task);
        }
    }

    pub fn on_counting(&self, task: &str) {
        for hook in &self.hooks {
            hook.on_counting(task);
        }
    }

    pub fn on_step_count(&self, task: &str, total: u64) {
        for hook in &self.hooks {
            hook.on_step_count(task, total);
        }
    }

    pub fn on_step_start(&self, task: &str, step: u64, message: fmt::Arguments<'_>) {
        for hook in &self.hooks {
            hook.on_step_start(task, step, message);
        }
    }

    pub fn on_step_end(&self, task: &str, done: u64, total: u64) {
        for hook in &self.hooks {
            hook.on_step_end(task, done, total);
        }
    }

    pub fn on_task_end(&self, report: &TaskReport) {
        for hook in &self.hooks {
            hook.on_task_end(report);
        }
    }
}

impl std::fmt::Debug for HookRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRunner")
            .field("hooks", &self.hook_names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in Hooks
// ─────────────────────────────────────────────────────────────────────────────

/// A no-op hook useful for testing.
#[derive(Debug, Default)]
pub struct NoOpHook;

impl ProgressHook for NoOpHook {
    fn name(&self) -> &str {
        "NoOp"
    }
}

/// Logs task lifecycle through `tracing`, with a progress line every
/// `interval` units.
#[derive(Debug)]
pub struct LoggingHook {
    interval: u64,
}

impl LoggingHook {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
        }
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ProgressHook for LoggingHook {
    fn name(&self) -> &str {
        "Logging"
    }

    fn on_task_start(&self, task: &str) {
        info!(task, "Task started");
    }

    fn on_step_count(&self, task: &str, total: u64) {
        info!(task, total, "Units counted");
    }

    fn on_step_start(&self, task: &str, step: u64, message: fmt::Arguments<'_>) {
        trace!(task, step, %message, "Step");
    }

    fn on_step_end(&self, task: &str, done: u64, total: u64) {
        if done % self.interval == 0 {
            debug!(task, done, total, "Progress");
        }
    }

    fn on_task_end(&self, report: &TaskReport) {
        if report.state == TaskState::Cancelled {
            warn!(task = %report.task, done = report.done, total = report.total, "Task cancelled");
        }
    }
}

/// Progress event forwarded to another thread.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { task: String },
    Counting { task: String },
    Counted { task: String, total: u64 },
    Progress { task: String, done: u64, total: u64 },
    Ended(TaskReport),
}

/// Forwards progress over a `crossbeam_channel`.
///
/// `Progress` events are throttled to one every `interval` units (plus the
/// last one). A disconnected receiver is ignored.
pub struct ChannelHook {
    sender: Sender<ProgressEvent>,
    interval: u64,
}

impl ChannelHook {
    pub fn new(sender: Sender<ProgressEvent>, interval: u64) -> Self {
        Self {
            sender,
            interval: interval.max(1),
        }
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

impl ProgressHook for ChannelHook {
    fn name(&self) -> &str {
        "Channel"
    }

    fn on_task_start(&self, task: &str) {
        self.send(ProgressEvent::Started {
            task: task.to_string(),
        });
    }

    fn on_counting(&self, task: &str) {
        self.send(ProgressEvent::Counting {
            task: task.to_string(),
        });
    }

    fn on_step_count(&self, task: &str, total: u64) {
        self.send(ProgressEvent::Counted {
            task: task.to_string(),
            total,
        });
    }

    fn on_step_end(&self, task: &str, done: u64, total: u64) {
        if done % self.interval == 0 || done == total {
            self.send(ProgressEvent::Progress {
                task: task.to_string(),
                done,
                total,
            });
        }
    }

    fn on_task_end(&self, report: &TaskReport) {
        self.send(ProgressEvent::Ended(report.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct CountingHook {
        starts: AtomicU64,
        ends: AtomicU64,
        last_message: Mutex<String>,
    }

    impl CountingHook {
        fn new() -> Self {
            Self {
                starts: AtomicU64::new(0),
                ends: AtomicU64::new(0),
                last_message: Mutex::new(String::new()),
            }
        }
    }

    impl ProgressHook for CountingHook {
        fn name(&self) -> &str {
            "CountingHook"
        }

        fn on_step_start(&self, _task: &str, _step: u64, message: fmt::Arguments<'_>) {
            self.starts.fetch_add(1, Ordering::Relaxed);
            *self.last_message.lock() = message.to_string();
        }

        fn on_step_end(&self, _task: &str, _done: u64, _total: u64) {
            self.ends.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_multiple_hooks() {
        let hook1 = Arc::new(CountingHook::new());
        let hook2 = Arc::new(CountingHook::new());

        let mut runner = HookRunner::new();
        runner.add(hook1.clone());
        runner.add(hook2.clone());
        runner.add(Arc::new(NoOpHook));

        runner.on_step_start("states", 0, format_args!("bar {}", 0));
        runner.on_step_end("states", 1, 2);
        runner.on_step_start("states", 1, format_args!("bar {}", 1));

        assert_eq!(hook1.starts.load(Ordering::Relaxed), 2);
        assert_eq!(hook2.ends.load(Ordering::Relaxed), 1);
        assert_eq!(*hook1.last_message.lock(), "bar 1");
        assert_eq!(runner.hook_names(), vec!["CountingHook", "CountingHook", "NoOp"]);
    }

    #[test]
    fn test_channel_hook_throttles_progress() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let hook = ChannelHook::new(tx, 4);
        hook.on_task_start("ranges");
        for done in 1..=10 {
            hook.on_step_end("ranges", done, 10);
        }
        hook.on_task_end(&TaskReport {
            task: "ranges".into(),
            state: TaskState::Completed,
            total: 10,
            done: 10,
            elapsed: Duration::ZERO,
        });

        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        let progress: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { done, .. } => Some(*done),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![4, 8, 10]);
        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Ended(_))));
    }

    #[test]
    fn test_channel_hook_ignores_disconnect() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(rx);
        let hook = ChannelHook::new(tx, 1);
        hook.on_counting("states");
    }
}
