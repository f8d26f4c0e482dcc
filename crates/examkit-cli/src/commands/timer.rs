//! The `examkit timer` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use examkit_core::config::load_config_from;
use examkit_timer::{SystemClock, TimerConfig, TimerEvent, TimerService, WarningThreshold};

const TIMER_ID: &str = "cli";

pub async fn execute(
    duration_secs: u64,
    precision_ms: Option<u64>,
    warnings: Vec<String>,
    auto_submit: bool,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let duration_ms = duration_to_ms(duration_secs)?;
    let settings = load_config_from(config_path.as_deref())?.timer;

    let config = TimerConfig {
        precision: precision_ms.unwrap_or(settings.precision_ms),
        warnings: warnings
            .iter()
            .map(|w| parse_warning(w))
            .collect::<Result<Vec<_>>>()?,
        auto_submit,
        ..TimerConfig::new(duration_ms)
    };

    let (timers, mut events) = TimerService::spawn(SystemClock, settings);
    timers.create(TIMER_ID, config).await?;
    timers.start(TIMER_ID).await?;

    while let Some(event) = events.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
        if event.is_terminal() {
            break;
        }
    }

    let status = timers.status(TIMER_ID).await?;
    eprintln!(
        "Timer finished: elapsed {}ms, average drift {:.1}ms over {} sample(s)",
        status.elapsed_time, status.average_drift, status.drift_samples
    );
    Ok(())
}

fn duration_to_ms(duration_secs: u64) -> Result<u64> {
    anyhow::ensure!(duration_secs > 0, "duration must be at least one second");
    duration_secs
        .checked_mul(1000)
        .with_context(|| format!("duration of {duration_secs}s is too long"))
}

fn parse_warning(raw: &str) -> Result<WarningThreshold> {
    let (secs, message) = raw
        .split_once(':')
        .with_context(|| format!("invalid warning '{raw}', expected SECS:MESSAGE"))?;
    let secs: u64 = secs
        .trim()
        .parse()
        .with_context(|| format!("invalid warning threshold '{}'", secs.trim()))?;
    Ok(WarningThreshold::new(secs, message.trim()))
}

fn print_event(event: &TimerEvent) {
    match event {
        TimerEvent::TimeUpdate {
            time_left, drift, ..
        } => {
            let secs = time_left / 1000;
            println!("{:02}:{:02} remaining (drift {drift}ms)", secs / 60, secs % 60);
        }
        TimerEvent::Warning { message, .. } => println!("WARNING: {message}"),
        TimerEvent::AutoSubmit { elapsed_time, .. } => {
            println!("Time is up, submitting ({elapsed_time}ms elapsed)")
        }
        TimerEvent::TimeExpired { elapsed_time, .. } => {
            println!("Time expired ({elapsed_time}ms elapsed)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_checked() {
        assert_eq!(duration_to_ms(90).unwrap(), 90_000);
        assert!(duration_to_ms(0).is_err());
        let err = duration_to_ms(u64::MAX).unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn parses_warning_spec() {
        let w = parse_warning("300: Five minutes left").unwrap();
        assert_eq!(w.threshold_seconds, 300);
        assert_eq!(w.message, "Five minutes left");

        let w = parse_warning("60:Last minute: hurry").unwrap();
        assert_eq!(w.message, "Last minute: hurry");

        assert!(parse_warning("soon").is_err());
        assert!(parse_warning("x:msg").is_err());
    }
}
