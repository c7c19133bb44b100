//! Human-friendly durations for settings and flags.

use std::time::Duration;

use crate::error::{Error, Result};

/// Parse `"500ms"`, `"1.5s"` or `"2m"`. A bare integer means milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || Error::Config(format!("invalid duration: '{}'", s));

    if let Ok(millis) = s.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }

    // "ms" has to be tried before "m" and "s"
    let (amount, nanos_per_unit) = if let Some(amount) = s.strip_suffix("ms") {
        (amount, 1e6)
    } else if let Some(amount) = s.strip_suffix('s') {
        (amount, 1e9)
    } else if let Some(amount) = s.strip_suffix('m') {
        (amount, 60e9)
    } else {
        return Err(invalid());
    };

    let amount: f64 = amount.trim().parse().map_err(|_| invalid())?;
    let nanos = amount * nanos_per_unit;
    if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(nanos as u64))
}
