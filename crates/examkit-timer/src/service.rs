//! Timer registry running on its own task.
//!
//! The registry owns every [`Timer`]. Requests arrive over a channel and are
//! answered in order; each running timer has a ticker task that feeds ticks
//! back into the same loop. Events go out on a one-way channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use examkit_core::config::TimerSettings;

use crate::clock::Clock;
use crate::error::TimerError;
use crate::protocol::{decode_request, TimerRequest, TimerResponse};
use crate::timer::{Timer, TimerConfig, TimerConfigPatch, TimerEvent, TimerStatus};

const REQUEST_BUFFER: usize = 256;

struct Envelope {
    request: TimerRequest,
    reply: oneshot::Sender<Result<TimerResponse, TimerError>>,
}

struct Tick {
    timer_id: String,
    generation: u64,
}

struct Entry {
    timer: Timer,
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

impl Entry {
    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn restart_ticker(&mut self, ticks: &mpsc::UnboundedSender<Tick>, next_generation: &mut u64) {
        self.stop_ticker();
        *next_generation += 1;
        self.generation = *next_generation;
        self.ticker = Some(spawn_ticker(
            ticks.clone(),
            self.timer.id().to_string(),
            self.generation,
            self.timer.precision_ms(),
        ));
    }
}

fn spawn_ticker(
    ticks: mpsc::UnboundedSender<Tick>,
    timer_id: String,
    generation: u64,
    precision_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(precision_ms);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let tick = Tick {
                timer_id: timer_id.clone(),
                generation,
            };
            if ticks.send(tick).is_err() {
                break;
            }
        }
    })
}

/// The timer registry. Owned by the task started with [`TimerService::spawn`].
pub struct TimerService {
    clock: Arc<dyn Clock>,
    settings: TimerSettings,
    timers: HashMap<String, Entry>,
    next_generation: u64,
    ticks: mpsc::UnboundedSender<Tick>,
    events: mpsc::UnboundedSender<TimerEvent>,
}

impl TimerService {
    /// Start the registry task.
    ///
    /// Returns the request handle and the event stream. The task exits, and
    /// every ticker with it, once all handles are dropped.
    pub fn spawn(
        clock: impl Clock,
        settings: TimerSettings,
    ) -> (TimerHandle, mpsc::UnboundedReceiver<TimerEvent>) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER);
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let service = TimerService {
            clock: Arc::new(clock),
            settings,
            timers: HashMap::new(),
            next_generation: 0,
            ticks: tick_tx,
            events: event_tx,
        };
        tokio::spawn(service.run(request_rx, tick_rx));

        (TimerHandle { tx: request_tx }, event_rx)
    }

    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Envelope>,
        mut ticks: mpsc::UnboundedReceiver<Tick>,
    ) {
        loop {
            tokio::select! {
                envelope = requests.recv() => match envelope {
                    Some(Envelope { request, reply }) => {
                        let response = self.handle(request);
                        let _ = reply.send(response);
                    }
                    None => break,
                },
                Some(tick) = ticks.recv() => self.on_tick(tick),
            }
        }
        let count = self.clear_all();
        tracing::debug!(count, "timer service stopped");
    }

    fn entry(&mut self, timer_id: &str) -> Result<&mut Entry, TimerError> {
        self.timers
            .get_mut(timer_id)
            .ok_or_else(|| TimerError::NotFound(timer_id.to_string()))
    }

    fn handle(&mut self, request: TimerRequest) -> Result<TimerResponse, TimerError> {
        let now = self.clock.now_ms();
        match request {
            TimerRequest::CreateTimer { timer_id, config } => {
                if self.timers.contains_key(&timer_id) {
                    return Err(TimerError::Exists(timer_id));
                }
                let timer = Timer::new(timer_id.clone(), config, &self.settings)?;
                self.timers.insert(
                    timer_id.clone(),
                    Entry {
                        timer,
                        generation: 0,
                        ticker: None,
                    },
                );
                tracing::debug!(%timer_id, "timer created");
                Ok(TimerResponse::TimerCreated { timer_id })
            }
            TimerRequest::StartTimer { timer_id } => {
                let entry = self
                    .timers
                    .get_mut(&timer_id)
                    .ok_or_else(|| TimerError::NotFound(timer_id.clone()))?;
                let changed = entry.timer.start(now);
                if changed {
                    entry.restart_ticker(&self.ticks, &mut self.next_generation);
                }
                Ok(TimerResponse::TimerStarted { timer_id, changed })
            }
            TimerRequest::PauseTimer { timer_id } => {
                let entry = self.entry(&timer_id)?;
                let changed = entry.timer.pause(now);
                if changed {
                    entry.stop_ticker();
                }
                Ok(TimerResponse::TimerPaused { timer_id, changed })
            }
            TimerRequest::ResumeTimer { timer_id } => {
                let entry = self
                    .timers
                    .get_mut(&timer_id)
                    .ok_or_else(|| TimerError::NotFound(timer_id.clone()))?;
                let changed = entry.timer.resume(now);
                if changed {
                    entry.restart_ticker(&self.ticks, &mut self.next_generation);
                }
                Ok(TimerResponse::TimerResumed { timer_id, changed })
            }
            TimerRequest::StopTimer { timer_id } => {
                let entry = self.entry(&timer_id)?;
                let changed = entry.timer.stop(now);
                entry.stop_ticker();
                Ok(TimerResponse::TimerStopped { timer_id, changed })
            }
            TimerRequest::GetTimerStatus { timer_id } => {
                let status = self.entry(&timer_id)?.timer.status(now);
                Ok(TimerResponse::TimerStatus { status })
            }
            TimerRequest::GetAllTimers => {
                let mut timers: Vec<TimerStatus> =
                    self.timers.values().map(|e| e.timer.status(now)).collect();
                timers.sort_by(|a, b| a.timer_id.cmp(&b.timer_id));
                Ok(TimerResponse::AllTimers { timers })
            }
            TimerRequest::UpdateConfig { timer_id, config } => {
                let entry = self
                    .timers
                    .get_mut(&timer_id)
                    .ok_or_else(|| TimerError::NotFound(timer_id.clone()))?;
                let precision_changed = entry.timer.update_config(config)?;
                if precision_changed && entry.timer.is_ticking() {
                    entry.restart_ticker(&self.ticks, &mut self.next_generation);
                }
                let status = entry.timer.status(now);
                tracing::debug!(%timer_id, precision_changed, "timer config updated");
                Ok(TimerResponse::ConfigUpdated { timer_id, status })
            }
            TimerRequest::ClearAllTimers => Ok(TimerResponse::TimersCleared {
                count: self.clear_all(),
            }),
        }
    }

    fn on_tick(&mut self, tick: Tick) {
        let now = self.clock.now_ms();
        let Some(entry) = self.timers.get_mut(&tick.timer_id) else {
            return;
        };
        // A tick queued by a ticker that has since been replaced.
        if entry.generation != tick.generation {
            return;
        }

        for event in entry.timer.tick(now) {
            tracing::trace!(timer_id = %tick.timer_id, ?event, "timer event");
            if self.events.send(event).is_err() {
                tracing::debug!(timer_id = %tick.timer_id, "timer event dropped: no listener");
            }
        }
        if entry.timer.is_finished() {
            entry.stop_ticker();
        }
    }

    fn clear_all(&mut self) -> usize {
        let count = self.timers.len();
        for entry in self.timers.values_mut() {
            entry.stop_ticker();
        }
        self.timers.clear();
        count
    }
}

/// Cloneable client for a running [`TimerService`].
#[derive(Clone)]
pub struct TimerHandle {
    tx: mpsc::Sender<Envelope>,
}

fn unexpected(response: TimerResponse) -> TimerError {
    TimerError::UnexpectedResponse(format!("{response:?}"))
}

impl TimerHandle {
    /// Send a request and wait for the registry's answer.
    pub async fn request(&self, request: TimerRequest) -> Result<TimerResponse, TimerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| TimerError::ServiceClosed)?;
        rx.await.map_err(|_| TimerError::ServiceClosed)?
    }

    /// Raw JSON entry point. Failures come back as an `error` response.
    pub async fn handle_json(&self, raw: &str) -> serde_json::Result<String> {
        let response = match decode_request(raw) {
            Ok(request) => self
                .request(request)
                .await
                .unwrap_or_else(TimerResponse::from),
            Err(e) => {
                tracing::warn!(error = %e, "rejected timer message");
                e.into()
            }
        };
        serde_json::to_string(&response)
    }

    pub async fn create(&self, timer_id: impl Into<String>, config: TimerConfig) -> Result<(), TimerError> {
        let request = TimerRequest::CreateTimer {
            timer_id: timer_id.into(),
            config,
        };
        match self.request(request).await? {
            TimerResponse::TimerCreated { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Returns false if the timer was already running.
    pub async fn start(&self, timer_id: impl Into<String>) -> Result<bool, TimerError> {
        let timer_id = timer_id.into();
        match self.request(TimerRequest::StartTimer { timer_id }).await? {
            TimerResponse::TimerStarted { changed, .. } => Ok(changed),
            other => Err(unexpected(other)),
        }
    }

    /// Returns false if the timer was not running or already paused.
    pub async fn pause(&self, timer_id: impl Into<String>) -> Result<bool, TimerError> {
        let timer_id = timer_id.into();
        match self.request(TimerRequest::PauseTimer { timer_id }).await? {
            TimerResponse::TimerPaused { changed, .. } => Ok(changed),
            other => Err(unexpected(other)),
        }
    }

    /// Returns false if the timer was not paused.
    pub async fn resume(&self, timer_id: impl Into<String>) -> Result<bool, TimerError> {
        let timer_id = timer_id.into();
        match self.request(TimerRequest::ResumeTimer { timer_id }).await? {
            TimerResponse::TimerResumed { changed, .. } => Ok(changed),
            other => Err(unexpected(other)),
        }
    }

    /// Returns false if the timer was already stopped.
    pub async fn stop(&self, timer_id: impl Into<String>) -> Result<bool, TimerError> {
        let timer_id = timer_id.into();
        match self.request(TimerRequest::StopTimer { timer_id }).await? {
            TimerResponse::TimerStopped { changed, .. } => Ok(changed),
            other => Err(unexpected(other)),
        }
    }

    pub async fn status(&self, timer_id: impl Into<String>) -> Result<TimerStatus, TimerError> {
        let timer_id = timer_id.into();
        match self.request(TimerRequest::GetTimerStatus { timer_id }).await? {
            TimerResponse::TimerStatus { status } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn all(&self) -> Result<Vec<TimerStatus>, TimerError> {
        match self.request(TimerRequest::GetAllTimers).await? {
            TimerResponse::AllTimers { timers } => Ok(timers),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_config(
        &self,
        timer_id: impl Into<String>,
        config: TimerConfigPatch,
    ) -> Result<TimerStatus, TimerError> {
        let request = TimerRequest::UpdateConfig {
            timer_id: timer_id.into(),
            config,
        };
        match self.request(request).await? {
            TimerResponse::ConfigUpdated { status, .. } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Stop and remove every timer. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize, TimerError> {
        match self.request(TimerRequest::ClearAllTimers).await? {
            TimerResponse::TimersCleared { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }
}
