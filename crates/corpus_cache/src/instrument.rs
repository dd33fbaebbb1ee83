//! src/instrument.rs
//!
//! Wall-clock timing and process memory sampling for long-running commands.

use std::time::{Duration, Instant};
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tracing::{info, warn};

/// Runs `f` and logs its total execution time, whether it succeeds or fails.
pub fn timed<T, F>(label: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    let started = Instant::now();
    let out = f();
    info!(
        label,
        seconds = started.elapsed().as_secs(),
        "Total execution time"
    );
    out
}

/// Samples this process's resident memory and remembers the peak.
///
/// # Example
/// ```ignore
/// let mut probe = MemoryProbe::new();
/// for batch in session {
///     consume(batch?);
///     let now = probe.sample_mb();
///     tracing::debug!(now, peak = probe.peak_mb());
/// }
/// ```
pub struct MemoryProbe {
    system: System,
    pid: Option<Pid>,
    baseline_mb: f64,
    peak_mb: f64,
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Memory sampling unavailable: {}", e);
                None
            }
        };
        let mut probe = Self {
            system: System::new(),
            pid,
            baseline_mb: 0.0,
            peak_mb: 0.0,
        };
        probe.baseline_mb = probe.sample_mb();
        probe
    }

    /// Current resident memory in MB (0.0 if it cannot be read).
    pub fn sample_mb(&mut self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        if !self.system.refresh_process(pid) {
            return 0.0;
        }
        let current = self
            .system
            .process(pid)
            .map(|process| process.memory() as f64 / 1024.0 / 1024.0)
            .unwrap_or(0.0);
        self.peak_mb = self.peak_mb.max(current);
        current
    }

    /// Resident memory when the probe was created.
    pub fn baseline_mb(&self) -> f64 {
        self.baseline_mb
    }

    /// Highest value returned by [`sample_mb`](Self::sample_mb) so far.
    pub fn peak_mb(&self) -> f64 {
        self.peak_mb
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.map(|pid| pid.as_u32())
    }
}

/// Formats a duration as fractional seconds for log fields.
pub fn secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}
