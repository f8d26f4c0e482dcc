//! examkit-timer: Drift-tracking countdown timers behind a message protocol.
//!
//! A [`Timer`] is a pure state machine driven by explicit timestamps. The
//! [`TimerService`] owns every timer in one registry task, feeds them ticks
//! from per-timer tickers, and answers [`TimerRequest`]s one at a time, so
//! operations on the same timer never interleave.

pub mod clock;
pub mod error;
pub mod protocol;
pub mod service;
pub mod timer;

pub use clock::{Clock, SystemClock, TokioClock};
pub use error::TimerError;
pub use protocol::{ErrorCode, TimerRequest, TimerResponse};
pub use service::{TimerHandle, TimerService};
pub use timer::{Timer, TimerConfig, TimerConfigPatch, TimerEvent, TimerStatus, WarningThreshold};
