//! Sync-over-async bridge.
//!
//! Legacy sandbox code calls HTTP as if it were synchronous and reads the
//! result by coercing it to a string. A [`BridgeHandle`] starts the host call
//! on the caller's tokio runtime immediately (so it makes progress while the
//! isolate thread is busy) and only blocks when sandbox code forces it.
//!
//! A handle makes exactly one transition out of `Pending`. After that every
//! read returns the cached terminal state. The wait is bounded by a per-call
//! ceiling and by the table's budget deadline, which is fixed when the
//! isolate starts. However many handles are forced in sequence, no wait runs
//! past that deadline, so the isolate watchdog still fires inside the budget.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use jscell_error::HostError;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::host::HostResponse;

/// Interval between host-state polls while a coercion is blocked.
pub const BRIDGE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Result delivered by the host call.
pub type BridgeOutcome = Result<HostResponse, HostError>;

/// Lifecycle of one bridged host call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BridgeState {
    /// The host call is in flight.
    Pending,
    /// The host call succeeded.
    Resolved {
        /// HTTP status.
        status: u16,
        /// Response body text.
        body: String,
        /// Response headers.
        headers: Vec<(String, String)>,
    },
    /// The host call failed; raised at the point of coercion.
    Failed {
        /// Error message, including status and body for HTTP failures.
        message: String,
    },
    /// The ceiling elapsed first; coercion yields an empty string.
    TimedOut,
}

impl BridgeState {
    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One in-flight host call that sandbox code can force to a value.
pub struct BridgeHandle {
    state: BridgeState,
    rx: Option<oneshot::Receiver<BridgeOutcome>>,
    deadline: Instant,
    task: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Start `call` on `runtime` without blocking.
    pub fn start<F>(runtime: &Handle, call: F, ceiling: Duration) -> Self
    where
        F: Future<Output = BridgeOutcome> + Send + 'static,
    {
        Self::start_until(runtime, call, Instant::now() + ceiling)
    }

    /// Start `call` on `runtime`, giving up at the absolute `deadline`.
    pub fn start_until<F>(runtime: &Handle, call: F, deadline: Instant) -> Self
    where
        F: Future<Output = BridgeOutcome> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = runtime.spawn(async move {
            if tx.send(call.await).is_err() {
                tracing::debug!("bridge handle dropped before host call completed");
            }
        });
        Self {
            state: BridgeState::Pending,
            rx: Some(rx),
            deadline,
            task: Some(task),
        }
    }

    /// Current state, without polling.
    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    /// Check the host call once, performing the terminal transition if it
    /// has finished or the ceiling has passed.
    pub fn poll_once(&mut self) -> &BridgeState {
        if self.state.is_terminal() {
            return &self.state;
        }
        let next = match self.rx.as_mut().map(|rx| rx.try_recv()) {
            Some(Ok(Ok(response))) => Some(BridgeState::Resolved {
                status: response.status,
                body: response.body,
                headers: response.headers,
            }),
            Some(Ok(Err(e))) => Some(BridgeState::Failed {
                message: e.to_string(),
            }),
            Some(Err(TryRecvError::Closed)) | None => Some(BridgeState::Failed {
                message: "host call was cancelled before completing".into(),
            }),
            Some(Err(TryRecvError::Empty)) => {
                (Instant::now() >= self.deadline).then_some(BridgeState::TimedOut)
            }
        };
        if let Some(next) = next {
            self.transition(next);
        }
        &self.state
    }

    /// Block the current thread until the handle reaches a terminal state.
    ///
    /// Polls at `interval` for at most `remaining / interval + 1` iterations;
    /// whatever is still pending after that times out.
    pub fn wait_blocking(&mut self, interval: Duration) -> &BridgeState {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let max_polls = remaining.as_millis() / interval.as_millis().max(1) + 1;

        for _ in 0..max_polls {
            if self.poll_once().is_terminal() {
                return &self.state;
            }
            let left = self.deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(interval.min(left));
        }

        if !self.poll_once().is_terminal() {
            self.transition(BridgeState::TimedOut);
        }
        &self.state
    }

    fn transition(&mut self, next: BridgeState) {
        debug_assert!(!self.state.is_terminal(), "bridge handle transitioned twice");
        if matches!(next, BridgeState::TimedOut) {
            tracing::warn!("bridge host call exceeded its ceiling, yielding empty result");
            if let Some(task) = &self.task {
                task.abort();
            }
        }
        self.state = next;
        self.rx = None;
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Per-isolate registry of bridge handles, keyed by the id sandbox code holds.
///
/// Dropped with the isolate, which aborts any host call still in flight.
pub struct BridgeTable {
    runtime: Handle,
    ceiling: Duration,
    budget_deadline: Instant,
    next_id: u32,
    handles: HashMap<u32, BridgeHandle>,
}

impl BridgeTable {
    /// Create an empty table that spawns host calls on `runtime`.
    ///
    /// Each handle waits at most `ceiling`, and never past `budget_deadline`.
    pub fn new(runtime: Handle, ceiling: Duration, budget_deadline: Instant) -> Self {
        Self {
            runtime,
            ceiling,
            budget_deadline,
            next_id: 1,
            handles: HashMap::new(),
        }
    }

    /// Start a host call and register its handle.
    pub fn start<F>(&mut self, call: F) -> u32
    where
        F: Future<Output = BridgeOutcome> + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        let deadline = (Instant::now() + self.ceiling).min(self.budget_deadline);
        self.handles
            .insert(id, BridgeHandle::start_until(&self.runtime, call, deadline));
        id
    }

    /// Look up a handle by id.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut BridgeHandle> {
        self.handles.get_mut(&id)
    }

    /// Number of handles created in this isolate.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no handle has been created.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
