//! Transfer measurements and human-readable formatting.

use std::fmt;
use std::time::{Duration, Instant};

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Bytes moved over a measured interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStats {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferStats {
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        Self { bytes, elapsed }
    }

    /// Measure from `start` until now.
    pub fn since(start: Instant, bytes: u64) -> Self {
        Self::new(bytes, start.elapsed())
    }

    /// Average throughput, or 0 for an empty interval.
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {:.2}s ({})",
            format_bytes(self.bytes),
            self.elapsed.as_secs_f64(),
            format_rate(self.bytes_per_sec())
        )
    }
}

fn scale(mut value: f64) -> (f64, &'static str) {
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    (value, UNITS[unit])
}

/// Format a byte count with a binary unit, e.g. `100.00 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    let (value, unit) = scale(bytes as f64);
    format!("{value:.2} {unit}")
}

/// Format a rate in bytes per second, e.g. `11.20 MiB/s`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    let (value, unit) = scale(bytes_per_sec);
    format!("{value:.2} {unit}/s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_sec() {
        let stats = TransferStats::new(1024 * 1024, Duration::from_millis(500));
        assert!((stats.bytes_per_sec() - 2.0 * 1024.0 * 1024.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_elapsed() {
        let stats = TransferStats::new(10, Duration::ZERO);
        assert_eq!(stats.bytes_per_sec(), 0.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(10), "10.00 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(100 * 1024 * 1024), "100.00 MiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0.0), "0.00 B/s");
        assert_eq!(format_rate(11.5 * 1024.0 * 1024.0), "11.50 MiB/s");
    }

    #[test]
    fn test_display() {
        let stats = TransferStats::new(2 * 1024 * 1024, Duration::from_secs(2));
        assert_eq!(stats.to_string(), "2.00 MiB in 2.00s (1.00 MiB/s)");
    }
}
