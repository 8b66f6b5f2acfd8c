//! Go-style duration strings ("30s", "1h30m", "168h0m0s")
//!
//! Durations on the PullSubscription spec and in the ops job environment use
//! the format Kubernetes tooling already speaks. A `d` (day) unit is accepted
//! on input as a convenience.

use std::time::Duration;

const NANOS_PER_UNIT: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 3_600 * 1_000_000_000),
    ("d", 86_400 * 1_000_000_000),
];

/// Parse a Go-style duration string
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("duration cannot be empty".to_string());
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    if trimmed.starts_with('-') {
        return Err(format!("duration '{trimmed}' must not be negative"));
    }

    let mut rest = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let mut total_nanos: u128 = 0;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{trimmed}'"))?;
        if number_len == 0 {
            return Err(format!("expected a number in duration '{trimmed}'"));
        }
        let (number, after) = rest.split_at(number_len);

        let unit_len = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let (unit, remaining) = after.split_at(unit_len);

        let scale = NANOS_PER_UNIT
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| format!("unknown unit '{unit}' in duration '{trimmed}'"))?;

        total_nanos += scaled_nanos(number, scale)
            .ok_or_else(|| format!("invalid number '{number}' in duration '{trimmed}'"))?;
        rest = remaining;
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000)
        .map_err(|_| format!("duration '{trimmed}' overflows"))?;
    let nanos = (total_nanos % 1_000_000_000) as u32;
    Ok(Duration::new(secs, nanos))
}

fn scaled_nanos(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(scale)?;

    if !fraction.is_empty() {
        let digits: u32 = fraction.len().min(18) as u32;
        let frac: u128 = fraction[..digits as usize].parse().ok()?;
        nanos = nanos.checked_add(frac * scale / 10u128.pow(digits))?;
    }
    Some(nanos)
}

/// Format a duration the way Go's `time.Duration.String` does for whole-second values
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let nanos = duration.subsec_nanos();

    let seconds = if nanos == 0 {
        (total % 60).to_string()
    } else {
        let s = format!("{}.{:09}", total % 60, nanos);
        s.trim_end_matches('0').to_string()
    };

    if total < 60 {
        if total == 0 && nanos == 0 {
            return "0s".to_string();
        }
        return format!("{seconds}s");
    }

    let minutes = (total / 60) % 60;
    let hours = total / 3600;
    if hours == 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{hours}h{minutes}m{seconds}s")
    }
}
