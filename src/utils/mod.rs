use std::time::{Duration, Instant};
use tracing::info;

/// Wall-clock timer for a run step. Logs on start and on finish; `finish`
/// hands the elapsed time back so the caller can record it.
pub struct Timer {
    label: String,
    start: Instant,
    finished: bool,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
            finished: false,
        }
    }

    pub fn finish(mut self) -> Duration {
        self.finished = true;
        let elapsed = self.start.elapsed();
        info!("⏱  Finished: {} ({})", self.label, fmt_elapsed(elapsed));
        elapsed
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.finished {
            info!("⏱  Finished: {} ({})", self.label, fmt_elapsed(self.start.elapsed()));
        }
    }
}

/// Seconds below a minute, minutes above.
pub fn fmt_elapsed(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 60.0 { format!("{:.1}m", secs / 60.0) } else { format!("{:.2}s", secs) }
}

/// Thousands separators: share counts, universe sizes, row counts.
pub fn fmt_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let groups: Vec<&str> = digits
        .as_bytes()
        .rchunks(3)
        .rev()
        .filter_map(|g| std::str::from_utf8(g).ok())
        .collect();
    let sign = if n < 0 { "-" } else { "" };
    format!("{}{}", sign, groups.join(","))
}

/// Market cap in the units the run report uses: `1.2T`, `350.0B`, or the
/// full figure below a billion. Unknown (zero or NaN) caps print as `-`.
pub fn fmt_market_cap(cap: f64) -> String {
    if cap >= 1e12 {
        format!("{:.1}T", cap / 1e12)
    } else if cap >= 1e9 {
        format!("{:.1}B", cap / 1e9)
    } else if cap > 0.0 {
        fmt_number(cap.round() as i64)
    } else {
        "-".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(-42_000), "-42,000");
        assert_eq!(fmt_number(999), "999");
        assert_eq!(fmt_number(30_000), "30,000");
    }

    #[test]
    fn test_fmt_market_cap_units() {
        assert_eq!(fmt_market_cap(4.3e14), "430.0T");
        assert_eq!(fmt_market_cap(5e11), "500.0B");
        assert_eq!(fmt_market_cap(12_500_000.0), "12,500,000");
        assert_eq!(fmt_market_cap(0.0), "-");
        assert_eq!(fmt_market_cap(f64::NAN), "-");
    }

    #[test]
    fn test_fmt_elapsed_switches_to_minutes() {
        assert_eq!(fmt_elapsed(Duration::from_millis(1_250)), "1.25s");
        assert_eq!(fmt_elapsed(Duration::from_secs(90)), "1.5m");
    }

    #[test]
    fn test_finish_returns_elapsed() {
        let timer = Timer::start("step");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.finish() >= Duration::from_millis(5));
    }
}
