use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::task::{Task, TaskId, TaskStatus};

pub const DEFAULT_SUCCESS_MS: u64 = 3_000;
pub const DEFAULT_ERROR_MS: u64 = 5_000;
pub const DEFAULT_INFO_MS: u64 = 3_000;

pub const SUCCESS_ENV: &str = "TASKDECK_DISMISS_SUCCESS_MS";
pub const ERROR_ENV: &str = "TASKDECK_DISMISS_ERROR_MS";
pub const INFO_ENV: &str = "TASKDECK_DISMISS_INFO_MS";

/// How long terminal tasks linger before removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DismissConfig {
    pub success: Duration,
    pub error: Duration,
    pub info: Duration,
}

impl Default for DismissConfig {
    fn default() -> Self {
        Self {
            success: Duration::from_millis(DEFAULT_SUCCESS_MS),
            error: Duration::from_millis(DEFAULT_ERROR_MS),
            info: Duration::from_millis(DEFAULT_INFO_MS),
        }
    }
}

impl DismissConfig {
    /// Defaults, overridden by `TASKDECK_DISMISS_{SUCCESS,ERROR,INFO}_MS`.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](DismissConfig::from_env) over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(d) = parse_millis(SUCCESS_ENV, lookup(SUCCESS_ENV)) {
            config.success = d;
        }
        if let Some(d) = parse_millis(ERROR_ENV, lookup(ERROR_ENV)) {
            config.error = d;
        }
        if let Some(d) = parse_millis(INFO_ENV, lookup(INFO_ENV)) {
            config.info = d;
        }
        config
    }

    /// Delay for a task that just went terminal. `None` means it stays until
    /// the user dismisses it (still running, or an actionable error).
    pub fn delay_for(&self, task: &Task) -> Option<Duration> {
        match task.status {
            TaskStatus::Loading => None,
            TaskStatus::Success => Some(self.success),
            TaskStatus::Error if task.action.is_some() => None,
            TaskStatus::Error => Some(self.error),
            TaskStatus::Info => Some(self.info),
        }
    }
}

fn parse_millis(key: &str, raw: Option<String>) -> Option<Duration> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

struct Pending {
    seq: u64,
    handle: JoinHandle<()>,
}

/// Per-task dismiss timers. At most one is pending per id; arming again
/// aborts the previous one.
#[derive(Default)]
pub struct DismissTimers {
    pending: HashMap<TaskId, Pending>,
    next_seq: u64,
}

impl DismissTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a timer that calls `fire(seq)` after `delay`. The callee must
    /// confirm the timer is still current via [`take_if_current`] before
    /// acting. Returns the sequence number, or `None` outside a runtime.
    ///
    /// [`take_if_current`]: DismissTimers::take_if_current
    pub fn arm<F>(&mut self, id: &TaskId, delay: Duration, fire: F) -> Option<u64>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No tokio runtime; auto-dismiss for {} not armed", id);
            return None;
        };

        self.cancel(id);
        self.next_seq += 1;
        let seq = self.next_seq;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire(seq);
        });
        debug!("Dismiss timer #{} armed for {} ({:?})", seq, id, delay);
        self.pending.insert(id.clone(), Pending { seq, handle });
        Some(seq)
    }

    /// Abort the pending timer for `id`, if any.
    pub fn cancel(&mut self, id: &TaskId) -> bool {
        match self.pending.remove(id) {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Consume the pending entry if `seq` is still the latest timer for `id`.
    pub fn take_if_current(&mut self, id: &TaskId, seq: u64) -> bool {
        match self.pending.get(id) {
            Some(p) if p.seq == seq => {
                self.pending.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, id: &TaskId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn clear(&mut self) {
        for (_, p) in self.pending.drain() {
            p.handle.abort();
        }
    }
}

impl Drop for DismissTimers {
    fn drop(&mut self) {
        self.clear();
    }
}
