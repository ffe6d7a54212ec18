//! Cooperative cancel/pause control shared between a running stage and
//! whoever drives it (CLI input thread, tests).
//!
//! A stage calls [`TaskControl::checkpoint`] at every unit boundary. Pausing
//! blocks the stage on a condition variable until `resume` or
//! `request_cancel` is called; nothing spins.

use parking_lot::{Condvar, Mutex};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Flags {
    cancel: bool,
    pause: bool,
}

#[derive(Debug, Default)]
struct Shared {
    flags: Mutex<Flags>,
    changed: Condvar,
}

/// Cloneable handle; every clone controls the same run.
#[derive(Debug, Clone, Default)]
pub struct TaskControl {
    shared: Arc<Shared>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running stage to stop at its next unit boundary.
    /// Also releases a paused stage.
    pub fn request_cancel(&self) {
        let mut flags = self.shared.flags.lock();
        flags.cancel = true;
        self.shared.changed.notify_all();
        debug!("Cancel requested");
    }

    pub fn request_pause(&self) {
        self.shared.flags.lock().pause = true;
        debug!("Pause requested");
    }

    pub fn resume(&self) {
        let mut flags = self.shared.flags.lock();
        flags.pause = false;
        self.shared.changed.notify_all();
        debug!("Resumed");
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.flags.lock().cancel
    }

    pub fn is_pause_requested(&self) -> bool {
        self.shared.flags.lock().pause
    }

    /// Clear both flags so the handle can drive another run.
    pub fn reset(&self) {
        let mut flags = self.shared.flags.lock();
        *flags = Flags::default();
        self.shared.changed.notify_all();
    }

    /// Unit boundary: break on cancel, otherwise block while paused.
    pub fn checkpoint(&self) -> ControlFlow<()> {
        let mut flags = self.shared.flags.lock();
        while flags.pause && !flags.cancel {
            self.shared.changed.wait(&mut flags);
        }
        if flags.cancel {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
