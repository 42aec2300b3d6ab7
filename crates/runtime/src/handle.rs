use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use market_core::{PushListener, StorageError};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::{events::EngineEvent, metrics::LatencyPercentiles};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("failed to reload instruments")]
    Reload(#[from] StorageError),
    #[error("engine task has shut down")]
    Closed,
}

/// Summary of the most recently completed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickLatency {
    pub tick: u64,
    pub duration_micros: u64,
    pub pushed: usize,
    pub failed: usize,
}

/// Snapshot the engine publishes after every state change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub tracked: usize,
    pub ticks: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_tick_at: Option<OffsetDateTime>,
    pub last_tick: Option<TickLatency>,
    pub latency: Option<LatencyPercentiles>,
}

pub(crate) type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Command {
    Start {
        at: Option<OffsetDateTime>,
        reply: Option<Reply<Result<(), EngineError>>>,
    },
    Stop {
        seq: u64,
        reply: Option<Reply<()>>,
    },
    Reload {
        reply: Reply<Result<usize, EngineError>>,
    },
    Subscribe {
        listener: Arc<dyn PushListener>,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Cloneable front door to the engine task. Every lifecycle call is queued and
/// applied on the engine's own turn.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    stop_requests: Arc<AtomicU64>,
    status: watch::Receiver<EngineStatus>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        stop_requests: Arc<AtomicU64>,
        status: watch::Receiver<EngineStatus>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            commands,
            stop_requests,
            status,
            events,
        }
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Closed)
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply))?;
        response.await.map_err(|_| EngineError::Closed)
    }

    fn next_stop_seq(&self) -> u64 {
        self.stop_requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Schedules the first tick at `at`, or one second from now.
    pub async fn start(&self, at: Option<OffsetDateTime>) -> Result<(), EngineError> {
        self.call(|reply| Command::Start {
            at,
            reply: Some(reply),
        })
        .await?
    }

    /// Idempotent. A tick already in flight finishes but does not reschedule.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let seq = self.next_stop_seq();
        self.call(|reply| Command::Stop {
            seq,
            reply: Some(reply),
        })
        .await
    }

    pub async fn reload(&self) -> Result<usize, EngineError> {
        self.call(|reply| Command::Reload { reply }).await?
    }

    /// Registers a listener with every tracked instrument and every
    /// instrument loaded later.
    pub async fn add_listener(&self, listener: Arc<dyn PushListener>) -> Result<(), EngineError> {
        self.call(|reply| Command::Subscribe { listener, reply })
            .await
    }

    /// Stops the engine and ends its task.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    /// Queues a start and returns without waiting. A start that finds the
    /// engine running is logged and dropped.
    pub fn request_start(&self, at: Option<OffsetDateTime>) -> Result<(), EngineError> {
        self.send(Command::Start { at, reply: None })
    }

    /// Queues a stop and returns without waiting.
    pub fn request_stop(&self) -> Result<(), EngineError> {
        let seq = self.next_stop_seq();
        self.send(Command::Stop { seq, reply: None })
    }

    pub fn is_running(&self) -> bool {
        self.status.borrow().running
    }

    pub fn tracked_count(&self) -> usize {
        self.status.borrow().tracked
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}
