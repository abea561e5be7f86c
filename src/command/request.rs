//! Per-request dispatch parameters

use std::time::Duration;

/// Where a command goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One backend, looked up by `ip` or `ip:port`
    Single { ip: String, port: Option<u16> },
    /// Every registered backend
    All,
}

/// One dispatch, built from a single HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub target: Target,
    pub command: String,
    pub delay: Duration,
    pub wait: bool,
}

/// Leading integer of a string: `"500ms"` is 500, `"abc"` is nothing
fn parse_leading_int(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let (sign, digits) = match raw.as_bytes().first() {
        Some(b'-') => (-1, &raw[1..]),
        Some(b'+') => (1, &raw[1..]),
        _ => (1, raw),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    // Saturate absurd values instead of failing
    let value = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(sign * value)
}

/// Missing, non-numeric and negative delays are all zero
pub fn normalize_delay(raw: Option<&str>) -> Duration {
    let millis = raw.and_then(parse_leading_int).unwrap_or(0).max(0);
    Duration::from_millis(millis as u64)
}

/// A usable port, or `None` when the parameter is missing, zero or not a number
pub fn parse_port(raw: Option<&str>) -> Option<u16> {
    raw.and_then(parse_leading_int)
        .filter(|port| *port != 0)
        .and_then(|port| u16::try_from(port).ok())
}
