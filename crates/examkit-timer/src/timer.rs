//! Countdown timer state machine.
//!
//! Every method takes the current time in epoch milliseconds, so a timer can
//! be driven by a real ticker or stepped deterministically in tests.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use examkit_core::config::TimerSettings;

use crate::error::TimerError;

/// Warning to emit when the remaining time reaches a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningThreshold {
    pub threshold_seconds: u64,
    pub message: String,
}

impl WarningThreshold {
    pub fn new(threshold_seconds: u64, message: impl Into<String>) -> Self {
        Self {
            threshold_seconds,
            message: message.into(),
        }
    }
}

/// Timer configuration as carried by `create_timer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    /// Epoch milliseconds the countdown is measured from; the start call's
    /// time when absent.
    #[serde(default)]
    pub start_time: Option<u64>,
    /// Countdown length in milliseconds.
    pub duration: u64,
    /// Tick interval in milliseconds.
    #[serde(default = "default_precision")]
    pub precision: u64,
    #[serde(default)]
    pub warnings: Vec<WarningThreshold>,
    #[serde(default = "default_true")]
    pub auto_submit: bool,
}

fn default_precision() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl TimerConfig {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            start_time: None,
            duration: duration_ms,
            precision: default_precision(),
            warnings: Vec::new(),
            auto_submit: true,
        }
    }

    fn validate(&self) -> Result<(), TimerError> {
        if self.duration == 0 {
            return Err(TimerError::InvalidConfig("duration must be positive".into()));
        }
        if self.precision == 0 {
            return Err(TimerError::InvalidConfig("precision must be positive".into()));
        }
        Ok(())
    }
}

/// Fields `update_config` may change on a live timer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfigPatch {
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub precision: Option<u64>,
    #[serde(default)]
    pub warnings: Option<Vec<WarningThreshold>>,
    #[serde(default)]
    pub auto_submit: Option<bool>,
}

/// Events a timer emits while ticking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TimerEvent {
    TimeUpdate {
        timer_id: String,
        time_left: u64,
        elapsed_time: u64,
        drift: i64,
    },
    Warning {
        timer_id: String,
        threshold_seconds: u64,
        message: String,
        time_left: u64,
    },
    /// Terminal: the countdown reached zero with auto-submit enabled.
    AutoSubmit { timer_id: String, elapsed_time: u64 },
    /// Terminal: the countdown reached zero with auto-submit disabled.
    TimeExpired { timer_id: String, elapsed_time: u64 },
}

impl TimerEvent {
    pub fn timer_id(&self) -> &str {
        match self {
            TimerEvent::TimeUpdate { timer_id, .. }
            | TimerEvent::Warning { timer_id, .. }
            | TimerEvent::AutoSubmit { timer_id, .. }
            | TimerEvent::TimeExpired { timer_id, .. } => timer_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TimerEvent::AutoSubmit { .. } | TimerEvent::TimeExpired { .. })
    }
}

/// Point-in-time view of a timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStatus {
    pub timer_id: String,
    pub is_running: bool,
    pub is_paused: bool,
    pub is_finished: bool,
    pub duration: u64,
    pub precision: u64,
    pub time_left: u64,
    pub elapsed_time: u64,
    pub paused_time: u64,
    pub average_drift: f64,
    pub drift_samples: usize,
    pub warnings_triggered: Vec<u64>,
    pub auto_submit: bool,
}

/// Rolling window of drift samples above a noise threshold.
///
/// Reported only; never used to shift the tick schedule.
#[derive(Debug, Clone)]
struct DriftTracker {
    threshold_ms: u64,
    window: usize,
    samples: VecDeque<i64>,
    average: f64,
}

impl DriftTracker {
    fn new(settings: &TimerSettings) -> Self {
        Self {
            threshold_ms: settings.drift_threshold_ms,
            window: settings.drift_window.max(1),
            samples: VecDeque::new(),
            average: 0.0,
        }
    }

    fn record(&mut self, drift: i64) -> bool {
        if drift.unsigned_abs() <= self.threshold_ms {
            return false;
        }
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(drift);
        self.average = self.samples.iter().sum::<i64>() as f64 / self.samples.len() as f64;
        true
    }
}

/// One countdown.
#[derive(Debug, Clone)]
pub struct Timer {
    id: String,
    config: TimerConfig,
    start_time: Option<u64>,
    running: bool,
    paused_at: Option<u64>,
    paused_time: u64,
    ended_at: Option<u64>,
    finished: bool,
    last_tick: Option<u64>,
    drift: DriftTracker,
    warnings_triggered: BTreeSet<u64>,
}

impl Timer {
    pub fn new(
        id: impl Into<String>,
        config: TimerConfig,
        settings: &TimerSettings,
    ) -> Result<Self, TimerError> {
        config.validate()?;
        Ok(Self {
            id: id.into(),
            config,
            start_time: None,
            running: false,
            paused_at: None,
            paused_time: 0,
            ended_at: None,
            finished: false,
            last_tick: None,
            drift: DriftTracker::new(settings),
            warnings_triggered: BTreeSet::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn precision_ms(&self) -> u64 {
        self.config.precision
    }

    /// Running and not paused, so ticks should be delivered.
    pub fn is_ticking(&self) -> bool {
        self.running && self.paused_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Begin counting down. Returns false if the timer was already started
    /// or has been stopped.
    pub fn start(&mut self, now: u64) -> bool {
        if self.running || self.ended_at.is_some() {
            return false;
        }
        self.start_time = Some(self.config.start_time.unwrap_or(now));
        self.running = true;
        self.last_tick = Some(now);
        tracing::info!(timer_id = %self.id, duration = self.config.duration, "timer started");
        true
    }

    /// Returns false when not running or already paused.
    pub fn pause(&mut self, now: u64) -> bool {
        if !self.running || self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(now);
        tracing::debug!(timer_id = %self.id, "timer paused");
        true
    }

    /// Returns false when not paused or once the timer has ended.
    pub fn resume(&mut self, now: u64) -> bool {
        if self.ended_at.is_some() {
            return false;
        }
        let Some(paused_at) = self.paused_at.take() else {
            return false;
        };
        self.paused_time += now.saturating_sub(paused_at);
        self.last_tick = Some(now);
        tracing::debug!(timer_id = %self.id, paused_time = self.paused_time, "timer resumed");
        true
    }

    /// Halt the countdown for good. Returns false if already stopped.
    pub fn stop(&mut self, now: u64) -> bool {
        if self.ended_at.is_some() || !self.running {
            return false;
        }
        // A paused timer ends where it was paused.
        self.ended_at = Some(self.paused_at.take().unwrap_or(now));
        self.running = false;
        tracing::info!(timer_id = %self.id, "timer stopped");
        true
    }

    /// Milliseconds counted so far, clamped to `[0, duration]`.
    pub fn elapsed(&self, now: u64) -> u64 {
        let Some(start) = self.start_time else {
            return 0;
        };
        let end = self.ended_at.or(self.paused_at).unwrap_or(now);
        end.saturating_sub(start)
            .saturating_sub(self.paused_time)
            .min(self.config.duration)
    }

    pub fn time_left(&self, now: u64) -> u64 {
        self.config.duration - self.elapsed(now)
    }

    /// Advance the timer to `now` and return the events this tick produces.
    pub fn tick(&mut self, now: u64) -> Vec<TimerEvent> {
        if !self.is_ticking() {
            return Vec::new();
        }

        let drift = self
            .last_tick
            .map(|last| now as i64 - (last + self.config.precision) as i64)
            .unwrap_or(0);
        if self.drift.record(drift) {
            tracing::warn!(
                timer_id = %self.id,
                drift,
                average_drift = self.drift.average,
                "timer drift above threshold"
            );
        }
        self.last_tick = Some(now);

        let elapsed_time = self.elapsed(now);
        let time_left = self.config.duration - elapsed_time;
        let mut events = vec![TimerEvent::TimeUpdate {
            timer_id: self.id.clone(),
            time_left,
            elapsed_time,
            drift,
        }];

        // Only the exact (rounded) second fires; a skipped second is not replayed.
        let seconds_left = (time_left + 500) / 1000;
        for warning in &self.config.warnings {
            if warning.threshold_seconds == seconds_left
                && self.warnings_triggered.insert(warning.threshold_seconds)
            {
                tracing::info!(timer_id = %self.id, threshold = warning.threshold_seconds, "timer warning");
                events.push(TimerEvent::Warning {
                    timer_id: self.id.clone(),
                    threshold_seconds: warning.threshold_seconds,
                    message: warning.message.clone(),
                    time_left,
                });
            }
        }

        if time_left == 0 {
            self.running = false;
            self.finished = true;
            self.ended_at = Some(now);
            let timer_id = self.id.clone();
            if self.config.auto_submit {
                tracing::info!(%timer_id, "time up, auto-submitting");
                events.push(TimerEvent::AutoSubmit {
                    timer_id,
                    elapsed_time,
                });
            } else {
                tracing::info!(%timer_id, "time up");
                events.push(TimerEvent::TimeExpired {
                    timer_id,
                    elapsed_time,
                });
            }
        }

        events
    }

    /// Apply a config patch. Returns whether the tick interval changed.
    ///
    /// Thresholds that already fired stay fired. A timer that has ended no
    /// longer accepts patches.
    pub fn update_config(&mut self, patch: TimerConfigPatch) -> Result<bool, TimerError> {
        if self.ended_at.is_some() {
            return Err(TimerError::Ended(self.id.clone()));
        }
        let mut config = self.config.clone();
        if let Some(duration) = patch.duration {
            config.duration = duration;
        }
        if let Some(precision) = patch.precision {
            config.precision = precision;
        }
        if let Some(warnings) = patch.warnings {
            config.warnings = warnings;
        }
        if let Some(auto_submit) = patch.auto_submit {
            config.auto_submit = auto_submit;
        }
        config.validate()?;

        let precision_changed = config.precision != self.config.precision;
        self.config = config;
        Ok(precision_changed)
    }

    pub fn status(&self, now: u64) -> TimerStatus {
        let elapsed_time = self.elapsed(now);
        TimerStatus {
            timer_id: self.id.clone(),
            is_running: self.running,
            is_paused: self.paused_at.is_some(),
            is_finished: self.finished,
            duration: self.config.duration,
            precision: self.config.precision,
            time_left: self.config.duration - elapsed_time,
            elapsed_time,
            paused_time: self.paused_time,
            average_drift: self.drift.average,
            drift_samples: self.drift.samples.len(),
            warnings_triggered: self.warnings_triggered.iter().copied().collect(),
            auto_submit: self.config.auto_submit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_000;

    fn timer(config: TimerConfig) -> Timer {
        Timer::new("t1", config, &TimerSettings::default()).unwrap()
    }

    fn count<F: Fn(&TimerEvent) -> bool>(events: &[TimerEvent], f: F) -> usize {
        events.iter().filter(|e| f(e)).count()
    }

    #[test]
    fn auto_submits_once_after_full_duration() {
        let mut t = timer(TimerConfig::new(1_800_000));
        t.start(T0);

        let mut events = Vec::new();
        for k in 1..=1800u64 {
            let now = T0 + k * 1000;
            for e in t.tick(now) {
                if let TimerEvent::TimeUpdate { time_left, elapsed_time, .. } = e {
                    assert!(elapsed_time <= 1_800_000);
                    assert_eq!(time_left, 1_800_000 - elapsed_time);
                }
                if e.is_terminal() {
                    assert_eq!(k, 1800);
                }
                events.push(e);
            }
        }
        assert_eq!(count(&events, |e| matches!(e, TimerEvent::AutoSubmit { .. })), 1);
        assert!(t.is_finished());

        // Further ticks and stops are no-ops.
        assert!(t.tick(T0 + 1_801_000).is_empty());
        assert!(!t.stop(T0 + 1_802_000));
        assert_eq!(t.status(T0 + 1_900_000).time_left, 0);
    }

    #[test]
    fn expires_without_auto_submit() {
        let mut config = TimerConfig::new(3_000);
        config.auto_submit = false;
        let mut t = timer(config);
        t.start(T0);
        let events: Vec<_> = (1..=3).flat_map(|k| t.tick(T0 + k * 1000)).collect();
        assert_eq!(count(&events, |e| matches!(e, TimerEvent::TimeExpired { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, TimerEvent::AutoSubmit { .. })), 0);
    }

    #[test]
    fn warning_fires_once_across_pause_resume() {
        let mut config = TimerConfig::new(10_000);
        config.warnings = vec![WarningThreshold::new(5, "five seconds left")];
        let mut t = timer(config);
        t.start(T0);

        let mut events = Vec::new();
        for k in 1..=5 {
            events.extend(t.tick(T0 + k * 1000));
        }
        // Pause right after the warning, then resume: time_left is still 5s.
        assert!(t.pause(T0 + 5_000));
        assert!(t.resume(T0 + 8_000));
        events.extend(t.tick(T0 + 8_400));
        events.extend(t.tick(T0 + 9_000));

        assert_eq!(count(&events, |e| matches!(e, TimerEvent::Warning { .. })), 1);
        assert_eq!(t.status(T0 + 9_000).warnings_triggered, vec![5]);
    }

    #[test]
    fn skipped_threshold_is_not_replayed() {
        let mut config = TimerConfig::new(10_000);
        config.warnings = vec![WarningThreshold::new(5, "five")];
        let mut t = timer(config);
        t.start(T0);
        let mut events = t.tick(T0 + 4_000);
        // Suspended across the threshold.
        events.extend(t.tick(T0 + 7_000));
        events.extend(t.tick(T0 + 8_000));
        assert_eq!(count(&events, |e| matches!(e, TimerEvent::Warning { .. })), 0);
    }

    #[test]
    fn warning_matches_rounded_second() {
        let mut config = TimerConfig::new(10_000);
        config.warnings = vec![WarningThreshold::new(5, "five")];
        let mut t = timer(config);
        t.start(T0);
        // 5_300ms left rounds to 5s.
        let events = t.tick(T0 + 4_700);
        assert_eq!(count(&events, |e| matches!(e, TimerEvent::Warning { .. })), 1);
    }

    #[test]
    fn pause_excludes_paused_time() {
        let mut t = timer(TimerConfig::new(60_000));
        t.start(T0);
        assert!(t.pause(T0 + 10_000));
        assert!(!t.pause(T0 + 12_000));
        assert_eq!(t.elapsed(T0 + 20_000), 10_000);
        assert!(t.tick(T0 + 20_000).is_empty());
        assert!(t.resume(T0 + 30_000));
        assert!(!t.resume(T0 + 31_000));
        assert_eq!(t.elapsed(T0 + 35_000), 15_000);
        assert_eq!(t.status(T0 + 35_000).paused_time, 20_000);
    }

    #[test]
    fn stop_is_idempotent_and_freezes_elapsed() {
        let mut t = timer(TimerConfig::new(60_000));
        assert!(!t.stop(T0));
        t.start(T0);
        assert!(t.stop(T0 + 5_000));
        assert!(!t.stop(T0 + 6_000));
        assert!(!t.start(T0 + 7_000));
        assert_eq!(t.elapsed(T0 + 50_000), 5_000);
    }

    #[test]
    fn stopped_while_paused_cannot_resume() {
        let mut t = timer(TimerConfig::new(60_000));
        t.start(T0);
        assert!(t.pause(T0 + 10_000));
        assert!(t.stop(T0 + 20_000));

        let before = t.status(T0 + 100_000);
        assert_eq!(before.elapsed_time, 10_000);
        assert_eq!(before.time_left, 50_000);
        assert!(!before.is_paused);

        assert!(!t.resume(T0 + 100_000));
        assert!(!t.is_ticking());
        let after = t.status(T0 + 200_000);
        assert_eq!(after.elapsed_time, 10_000);
        assert_eq!(after.time_left, 50_000);
        assert_eq!(after.paused_time, 0);
    }

    #[test]
    fn ended_timer_rejects_config_patches() {
        let mut t = timer(TimerConfig::new(2_000));
        t.start(T0);
        t.tick(T0 + 1_000);
        assert!(t.tick(T0 + 2_000).last().is_some_and(TimerEvent::is_terminal));

        let err = t
            .update_config(TimerConfigPatch {
                duration: Some(60_000),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, TimerError::Ended("t1".into()));
        assert_eq!(t.status(T0 + 3_000).time_left, 0);
        assert_eq!(t.config().duration, 2_000);

        let mut stopped = timer(TimerConfig::new(60_000));
        stopped.start(T0);
        stopped.stop(T0 + 1_000);
        assert!(stopped
            .update_config(TimerConfigPatch {
                precision: Some(250),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn elapsed_is_clamped_to_duration() {
        let mut config = TimerConfig::new(5_000);
        config.start_time = Some(T0 - 60_000);
        let mut t = timer(config);
        t.start(T0);
        let events = t.tick(T0 + 1_000);
        assert!(matches!(events[0], TimerEvent::TimeUpdate { time_left: 0, elapsed_time: 5_000, .. }));
        assert!(events.last().is_some_and(TimerEvent::is_terminal));
    }

    #[test]
    fn drift_is_recorded_above_threshold_only() {
        let mut t = timer(TimerConfig::new(60_000));
        t.start(T0);
        t.tick(T0 + 1_030); // +30ms, under threshold
        t.tick(T0 + 2_130); // +100ms
        t.tick(T0 + 3_030); // -100ms
        let status = t.status(T0 + 3_030);
        assert_eq!(status.drift_samples, 2);
        assert_eq!(status.average_drift, 0.0);

        for k in 4..20 {
            t.tick(T0 + k * 1000 + 30 + 200 * (k - 3));
        }
        assert_eq!(t.status(T0 + 20_000).drift_samples, 10);
    }

    #[test]
    fn update_config_keeps_fired_thresholds() {
        let mut config = TimerConfig::new(10_000);
        config.warnings = vec![WarningThreshold::new(8, "eight")];
        let mut t = timer(config);
        t.start(T0);
        assert_eq!(t.tick(T0 + 2_000).len(), 2);

        let changed = t
            .update_config(TimerConfigPatch {
                duration: Some(20_000),
                precision: Some(500),
                warnings: Some(vec![WarningThreshold::new(8, "eight again")]),
                ..Default::default()
            })
            .unwrap();
        assert!(changed);
        let events = t.tick(T0 + 12_000);
        assert_eq!(count(&events, |e| matches!(e, TimerEvent::Warning { .. })), 0);

        assert!(t
            .update_config(TimerConfigPatch {
                precision: Some(0),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn rejects_zero_duration() {
        let err = Timer::new("t", TimerConfig::new(0), &TimerSettings::default()).unwrap_err();
        assert!(matches!(err, TimerError::InvalidConfig(_)));
    }

    #[test]
    fn event_wire_format() {
        let event = TimerEvent::TimeUpdate {
            timer_id: "t1".into(),
            time_left: 1000,
            elapsed_time: 2000,
            drift: -3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "time_update");
        assert_eq!(json["timerId"], "t1");
        assert_eq!(json["timeLeft"], 1000);
        assert_eq!(json["elapsedTime"], 2000);
    }
}
