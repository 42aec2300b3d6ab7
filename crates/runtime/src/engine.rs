use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use market_core::{
    Clock, Instrument, PriceStore, PushListener, PushListeners, DEFAULT_HISTORY_WINDOW,
};
use rand::{rngs::StdRng, SeedableRng};
use strategy::{GenerationContext, PriceGenerator};
use time::OffsetDateTime;
use tokio::{
    sync::{broadcast, mpsc, watch},
    time::{Instant, Sleep},
};

use crate::{
    events::EngineEvent,
    handle::{Command, EngineError, EngineHandle, EngineStatus, TickLatency},
    metrics::TickLatencyMetrics,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_START_DELAY: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub interval: Duration,
    pub history_window: usize,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            history_window: DEFAULT_HISTORY_WINDOW,
            seed: None,
        }
    }
}

/// State owned by the engine task. Nothing outside the task touches the
/// timer or the tracked instruments.
pub struct MarketEngine {
    config: EngineConfig,
    generator: Box<dyn PriceGenerator>,
    store: Arc<dyn PriceStore>,
    clock: Arc<dyn Clock>,
    instruments: Vec<Instrument>,
    listeners: PushListeners,
    timer: Option<Pin<Box<Sleep>>>,
    next_tick_at: Option<OffsetDateTime>,
    rng: StdRng,
    metrics: TickLatencyMetrics,
    ticks: u64,
    last_tick: Option<TickLatency>,
    stop_requests: Arc<AtomicU64>,
    stops_seen: u64,
    events: broadcast::Sender<EngineEvent>,
    status: watch::Sender<EngineStatus>,
}

impl MarketEngine {
    /// Spawns the engine task on the current tokio runtime. The engine starts
    /// stopped and tracks nothing until the first reload.
    pub fn spawn(
        config: EngineConfig,
        generator: impl PriceGenerator + 'static,
        store: Arc<dyn PriceStore>,
        clock: Arc<dyn Clock>,
    ) -> EngineHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, status_rx) = watch::channel(EngineStatus::default());
        let stop_requests = Arc::new(AtomicU64::new(0));
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let engine = Self {
            config,
            generator: Box::new(generator),
            store,
            clock,
            instruments: Vec::new(),
            listeners: PushListeners::new(),
            timer: None,
            next_tick_at: None,
            rng,
            metrics: TickLatencyMetrics::new(),
            ticks: 0,
            last_tick: None,
            stop_requests: stop_requests.clone(),
            stops_seen: 0,
            events: events.clone(),
            status,
        };
        tokio::spawn(engine.run(commands_rx));

        EngineHandle::new(commands_tx, stop_requests, status_rx, events)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(interval = ?self.config.interval, "engine task started");
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.halt();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.halt();
                        break;
                    }
                },
                () = next_tick(&mut self.timer) => self.tick(),
            }
        }
        tracing::debug!(ticks = self.ticks, "engine task finished");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start { at, reply } => {
                let result = self.start(at);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            tracing::warn!(error = %err, "queued start ignored");
                        }
                    }
                }
            }
            Command::Stop { seq, reply } => {
                self.stop(seq);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Command::Reload { reply } => {
                let _ = reply.send(self.reload());
            }
            Command::Subscribe { listener, reply } => {
                self.subscribe(listener);
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.halt();
                let _ = reply.send(());
            }
        }
    }

    fn start(&mut self, at: Option<OffsetDateTime>) -> Result<(), EngineError> {
        if self.timer.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let now = self.clock.now();
        let first_tick_at = at.unwrap_or(now + DEFAULT_START_DELAY);
        let delay = Duration::try_from(first_tick_at - now).unwrap_or(Duration::ZERO);
        self.schedule(delay);

        tracing::info!(%first_tick_at, tracked = self.instruments.len(), "engine started");
        self.emit(EngineEvent::Started { first_tick_at });
        self.publish_status();
        Ok(())
    }

    fn stop(&mut self, seq: u64) {
        self.stops_seen = self.stops_seen.max(seq);
        if self.halt() {
            tracing::info!(ticks = self.ticks, "engine stopped");
            self.emit(EngineEvent::Stopped);
        }
        self.publish_status();
    }

    /// Drops the pending timer. Returns whether one was pending.
    fn halt(&mut self) -> bool {
        self.next_tick_at = None;
        self.timer.take().is_some()
    }

    fn reload(&mut self) -> Result<usize, EngineError> {
        let ids = self.store.list_instrument_ids()?;
        let instruments = ids
            .into_iter()
            .map(|id| {
                Instrument::load(
                    id,
                    self.store.as_ref(),
                    self.config.history_window,
                    self.listeners.clone(),
                )
                .map_err(|err| err.source)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = instruments.len();
        self.instruments = instruments;

        tracing::info!(count, "instruments reloaded");
        self.emit(EngineEvent::Reloaded { count });
        self.publish_status();
        Ok(count)
    }

    fn subscribe(&mut self, listener: Arc<dyn PushListener>) {
        self.listeners.push(listener.clone());
        for instrument in &mut self.instruments {
            instrument.listeners_mut().push(listener.clone());
        }
        tracing::debug!(listeners = self.listeners.len(), "push listener registered");
    }

    fn schedule(&mut self, delay: Duration) {
        self.timer = Some(Box::pin(tokio::time::sleep(delay)));
        self.next_tick_at = Some(self.clock.now() + delay);
    }

    fn tick(&mut self) {
        self.timer = None;
        self.next_tick_at = None;
        self.ticks += 1;
        let tick = self.ticks;
        let started = Instant::now();
        self.emit(EngineEvent::TickStarted { tick });

        let now = self.clock.now();
        let valid_after = now + self.config.interval;
        let mut pushed = 0;
        let mut failed = 0;

        for instrument in &mut self.instruments {
            if instrument.is_stale() {
                if let Err(err) = instrument.refresh(self.store.as_ref()) {
                    failed += 1;
                    tracing::warn!(
                        tick,
                        instrument = %err.id,
                        kind = err.source.kind(),
                        error = %err,
                        "stale instrument skipped"
                    );
                    let _ = self.events.send(EngineEvent::RefreshFailed {
                        tick,
                        instrument: err.id,
                        message: err.to_string(),
                    });
                    continue;
                }
            }

            let price = {
                let mut ctx = GenerationContext::new(now, valid_after, &mut self.rng);
                self.generator.generate(instrument, &mut ctx)
            };

            match instrument.push(self.store.as_ref(), price, valid_after) {
                Ok(outcome) => {
                    pushed += 1;
                    tracing::debug!(
                        tick,
                        instrument = %instrument.id(),
                        %price,
                        %valid_after,
                        listener_failures = outcome.listener_failures,
                        "price pushed"
                    );
                    let _ = self.events.send(EngineEvent::PricePushed {
                        tick,
                        instrument: instrument.id(),
                        price,
                        valid_after,
                    });
                }
                Err(err) => {
                    failed += 1;
                    tracing::warn!(
                        tick,
                        instrument = %err.instrument(),
                        kind = err.kind(),
                        landed = err.landed(),
                        error = %err,
                        "price push failed"
                    );
                    let _ = self.events.send(EngineEvent::PushFailed {
                        tick,
                        instrument: err.instrument(),
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let elapsed = started.elapsed();
        self.metrics.record(elapsed);
        self.last_tick = Some(TickLatency {
            tick,
            duration_micros: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            pushed,
            failed,
        });
        self.emit(EngineEvent::TickCompleted {
            tick,
            pushed,
            failed,
        });

        if self.stop_requests.load(Ordering::SeqCst) > self.stops_seen {
            tracing::info!(tick, "stop requested during tick, not rescheduling");
            self.emit(EngineEvent::RescheduleSkipped { tick });
        } else {
            self.schedule(self.config.interval);
            if let Some(next_tick_at) = self.next_tick_at {
                self.emit(EngineEvent::Rescheduled { tick, next_tick_at });
            }
        }
        self.publish_status();
    }

    fn emit(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_status(&self) {
        self.status.send_replace(EngineStatus {
            running: self.timer.is_some(),
            tracked: self.instruments.len(),
            ticks: self.ticks,
            next_tick_at: self.next_tick_at,
            last_tick: self.last_tick,
            latency: self.metrics.percentiles(),
        });
    }
}

async fn next_tick(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
