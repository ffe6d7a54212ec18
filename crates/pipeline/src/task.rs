//! Task state machine shared by every stage.
//!
//! ```text
//! Idle ──► Counting ──► Running ──┬──► Completed
//!              │                  ├──► Cancelled
//!              └──────────────────┴──► Failed
//! ```
//!
//! A task first counts its units of work (and prepares its output table),
//! then executes them one at a time. Before each unit it checks the
//! [`TaskControl`]; after each unit it reports progress to the hooks.

use serde::Serialize;
use std::fmt;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::control::TaskControl;
use crate::error::{PipelineError, Result};
use crate::hooks::HookRunner;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Idle,
    Counting,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Counting => "counting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a successful execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskOutcome {
    Completed,
    /// Stopped at a unit boundary; output written so far is kept.
    Cancelled,
}

impl From<TaskOutcome> for TaskState {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Completed => TaskState::Completed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// Summary of one task run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task: String,
    pub state: TaskState,
    pub total: u64,
    pub done: u64,
    pub elapsed: Duration,
}

/// A resumable unit-of-work loop.
pub trait Task {
    fn name(&self) -> &'static str;

    /// Prepare output and return the number of units to execute.
    fn count(&mut self) -> Result<u64>;

    /// Execute all units, calling [`TaskContext::checkpoint`] before and
    /// [`TaskContext::advance`] after each one.
    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome>;
}

/// Per-run view of control and progress handed to [`Task::execute`].
pub struct TaskContext<'a> {
    task: &'static str,
    total: u64,
    done: u64,
    control: &'a TaskControl,
    hooks: &'a HookRunner,
}

impl<'a> TaskContext<'a> {
    pub fn new(task: &'static str, total: u64, control: &'a TaskControl, hooks: &'a HookRunner) -> Self {
        Self {
            task,
            total,
            done: 0,
            control,
            hooks,
        }
    }

    /// Start of a unit: stop on cancel, wait while paused. `message` names
    /// the unit for the hooks.
    pub fn checkpoint(&mut self, message: fmt::Arguments<'_>) -> ControlFlow<()> {
        let flow = self.control.checkpoint();
        if flow.is_continue() {
            self.hooks.on_step_start(self.task, self.done, message);
        }
        flow
    }

    /// End of a unit.
    pub fn advance(&mut self) {
        self.done += 1;
        self.hooks.on_step_end(self.task, self.done, self.total);
    }

    /// Control handle for checks inside a long unit.
    pub fn control(&self) -> &TaskControl {
        self.control
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Drive a task through its states, reporting to the hooks.
///
/// Errors are logged and wrapped with the task name and failing step.
pub fn run_task(task: &mut dyn Task, control: &TaskControl, hooks: &HookRunner) -> Result<TaskReport> {
    let name = task.name();
    let started = Instant::now();
    let mut report = TaskReport {
        task: name.to_string(),
        state: TaskState::Idle,
        total: 0,
        done: 0,
        elapsed: Duration::ZERO,
    };
    hooks.on_task_start(name);

    report.state = TaskState::Counting;
    hooks.on_counting(name);
    let counted = task.count();
    let total = match counted {
        Ok(total) => total,
        Err(e) => return Err(fail(report, e, started, hooks)),
    };
    report.total = total;
    hooks.on_step_count(name, total);

    report.state = TaskState::Running;
    let mut ctx = TaskContext::new(name, total, control, hooks);
    let executed = task.execute(&mut ctx);
    report.done = ctx.done();
    match executed {
        Ok(outcome) => {
            report.state = outcome.into();
            report.elapsed = started.elapsed();
            info!(
                task = name,
                state = %report.state,
                done = report.done,
                total,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Task finished"
            );
            hooks.on_task_end(&report);
            Ok(report)
        }
        Err(e) => Err(fail(report, e, started, hooks)),
    }
}

fn fail(mut report: TaskReport, e: PipelineError, started: Instant, hooks: &HookRunner) -> PipelineError {
    report.state = TaskState::Failed;
    report.elapsed = started.elapsed();
    error!(task = %report.task, step = report.done, error = %e, "Task failed");
    hooks.on_task_end(&report);
    PipelineError::StageFailed {
        stage: report.task,
        step: report.done,
        source: Box::new(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::ProgressHook;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use storage::StoreError;

    struct Counter {
        units: u64,
        fail_at: Option<u64>,
    }

    impl Task for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn count(&mut self) -> Result<u64> {
            Ok(self.units)
        }

        fn execute(&mut self, ctx: &mut TaskContext<'_>) -> Result<TaskOutcome> {
            for unit in 0..self.units {
                if ctx.checkpoint(format_args!("unit {unit}")).is_break() {
                    return Ok(TaskOutcome::Cancelled);
                }
                if self.fail_at == Some(unit) {
                    return Err(StoreError::TableNotFound("states".into()).into());
                }
                ctx.advance();
            }
            Ok(TaskOutcome::Completed)
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProgressHook for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_counting(&self, task: &str) {
            self.events.lock().push(format!("counting {task}"));
        }

        fn on_step_count(&self, _task: &str, total: u64) {
            self.events.lock().push(format!("total {total}"));
        }

        fn on_step_start(&self, _task: &str, _step: u64, message: fmt::Arguments<'_>) {
            self.events.lock().push(format!("start {message}"));
        }

        fn on_step_end(&self, _task: &str, step: u64, total: u64) {
            self.events.lock().push(format!("{step}/{total}"));
        }

        fn on_task_end(&self, report: &TaskReport) {
            self.events.lock().push(format!("end {}", report.state));
        }
    }

    #[test]
    fn test_completed_run_reports_progress() {
        let recorder = Arc::new(Recorder::default());
        let mut hooks = HookRunner::new();
        hooks.add(recorder.clone());

        let mut task = Counter {
            units: 3,
            fail_at: None,
        };
        let report = run_task(&mut task, &TaskControl::new(), &hooks).unwrap();
        assert_eq!(report.state, TaskState::Completed);
        assert_eq!((report.done, report.total), (3, 3));
        assert_eq!(
            *recorder.events.lock(),
            vec![
                "counting counter",
                "total 3",
                "start unit 0",
                "1/3",
                "start unit 1",
                "2/3",
                "start unit 2",
                "3/3",
                "end completed"
            ]
        );
    }

    #[test]
    fn test_cancelled_before_first_unit() {
        let control = TaskControl::new();
        control.request_cancel();
        let mut task = Counter {
            units: 5,
            fail_at: None,
        };
        let report = run_task(&mut task, &control, &HookRunner::new()).unwrap();
        assert_eq!(report.state, TaskState::Cancelled);
        assert_eq!(report.done, 0);
        assert!(report.state.is_terminal());
    }

    #[test]
    fn test_failure_names_task_and_step() {
        let mut task = Counter {
            units: 5,
            fail_at: Some(2),
        };
        let err = run_task(&mut task, &TaskControl::new(), &HookRunner::new()).unwrap_err();
        match &err {
            PipelineError::StageFailed { stage, step, .. } => {
                assert_eq!(stage, "counter");
                assert_eq!(*step, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root(), PipelineError::Storage(_)));
    }
}
