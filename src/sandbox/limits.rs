//! Translation of a [`RunSpec`] into the runtime's limit vocabulary.
//!
//! The same values are consumed by the invocation builder and by the
//! classifier, so the thresholds the runtime enforces and the thresholds the
//! verdict is judged against never drift apart.

use std::time::Duration;

use super::config::SandboxConfig;
use super::spec::RunSpec;
use crate::core::SandboxError;

/// Upper bound of the extra-time grace window, in seconds
pub const MAX_EXTRA_TIME_GRACE_SECS: f64 = 0.5;

/// Minimum wall-clock margin the outer timeout must leave, in seconds
const MIN_WALL_MARGIN_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeLimits {
    pub cpu_limit_secs: f64,
    pub io_allowance_secs: f64,
    pub wall_grace_secs: f64,
}

impl TimeLimits {
    pub fn new(cpu_limit_secs: f64, io_allowance_secs: f64, wall_grace_secs: f64) -> Self {
        Self {
            cpu_limit_secs,
            io_allowance_secs,
            wall_grace_secs,
        }
    }

    /// `min(t / 2, 0.5)`
    pub fn extra_time_grace(&self) -> f64 {
        (self.cpu_limit_secs / 2.0).min(MAX_EXTRA_TIME_GRACE_SECS)
    }

    /// CPU time enforced by the runtime: limit plus I/O allowance
    pub fn cpu_cap(&self) -> f64 {
        self.cpu_limit_secs + self.io_allowance_secs
    }

    pub fn wall_cap(&self) -> f64 {
        self.cpu_cap() + self.cpu_limit_secs + self.wall_grace_secs
    }

    /// Point at which the runtime kills on CPU time
    pub fn extra_time_cap(&self) -> f64 {
        self.cpu_cap() + self.extra_time_grace()
    }

    /// Extra-time threshold in I/O-adjusted time, as seen by the classifier.
    /// Rounded to milliseconds like the effective time it is compared with.
    pub fn extra_time_threshold(&self) -> f64 {
        round_millis(self.cpu_limit_secs + self.extra_time_grace())
    }

    /// Supervisor deadline, strictly past anything the runtime enforces
    pub fn outer_timeout(&self, slack_secs: f64) -> Result<Duration, SandboxError> {
        let floor = 2.0 * self.cpu_limit_secs + self.io_allowance_secs + MIN_WALL_MARGIN_SECS;
        let inner = (self.wall_cap() + self.extra_time_grace()).max(floor);
        Duration::try_from_secs_f64(inner + slack_secs).map_err(|e| {
            SandboxError::InvalidLimit(format!(
                "outer timeout of {}s is not representable: {}",
                inner + slack_secs,
                e
            ))
        })
    }
}

pub fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    pub limit_mb: u32,
    pub margin_mb: u32,
}

impl MemoryLimits {
    pub fn new(limit_mb: u32, margin_mb: u32) -> Self {
        Self {
            limit_mb,
            margin_mb,
        }
    }

    /// Limit the program is judged against, in KB
    pub fn limit_kb(&self) -> u64 {
        u64::from(self.limit_mb) * 1024
    }

    /// Cap handed to the runtime, in KB
    pub fn cap_kb(&self) -> u64 {
        (u64::from(self.limit_mb) + u64::from(self.margin_mb)) * 1024
    }

    /// Memory figure reported to the caller: at or past the cap the raw
    /// peak is unreliable and `-cap` is reported instead.
    pub fn report(&self, peak_kb: u64) -> i64 {
        if peak_kb >= self.cap_kb() {
            -saturating_kb(self.cap_kb())
        } else {
            saturating_kb(peak_kb)
        }
    }
}

/// KB figure as a signed report; out-of-range values saturate instead of
/// wrapping into the negative sentinel range.
pub fn saturating_kb(kb: u64) -> i64 {
    i64::try_from(kb).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveLimits {
    pub time: TimeLimits,
    pub memory: Option<MemoryLimits>,
    pub processes: u32,
    pub outer_timeout: Duration,
}

impl EffectiveLimits {
    pub fn from_spec(spec: &RunSpec, config: &SandboxConfig) -> Result<Self, SandboxError> {
        let time = TimeLimits::new(
            spec.cpu_time_limit_secs(),
            spec.io_time_allowance_secs(),
            spec.wall_clock_grace_secs(),
        );
        let memory = spec
            .memory_limit_mb()
            .map(|limit| MemoryLimits::new(limit, spec.extra_memory_margin_mb()));
        let processes = if spec.trusted() {
            spec.process_limit().max(config.trusted_process_limit)
        } else {
            spec.process_limit()
        };

        Ok(Self {
            time,
            memory,
            processes,
            outer_timeout: time.outer_timeout(config.outer_timeout_slack_secs)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_time_translation() {
        let time = TimeLimits::new(2.0, 0.5, 1.0);

        assert!(approx(time.cpu_cap(), 2.5));
        assert!(approx(time.wall_cap(), 5.5));
        assert!(approx(time.extra_time_grace(), 0.5));
        assert!(approx(time.extra_time_cap(), 3.0));
        assert!(approx(time.extra_time_threshold(), 2.5));
    }

    #[test]
    fn test_extra_time_grace_for_short_limits() {
        let time = TimeLimits::new(0.4, 0.0, 1.0);
        assert!(approx(time.extra_time_grace(), 0.2));
        assert!(approx(time.extra_time_threshold(), 0.6));
    }

    #[test]
    fn test_runtime_and_classifier_thresholds_agree() {
        for (cpu, io) in [(0.3, 0.0), (1.0, 0.25), (2.0, 0.0), (7.5, 3.0)] {
            let time = TimeLimits::new(cpu, io, 1.0);
            assert!(approx(
                time.extra_time_cap() - time.io_allowance_secs,
                time.extra_time_threshold()
            ));
        }
    }

    #[test]
    fn test_outer_timeout_exceeds_wall_cap() {
        for (cpu, io, grace) in [(0.1, 0.0, 0.0), (1.0, 0.0, 1.0), (3.0, 2.0, 1.0)] {
            let time = TimeLimits::new(cpu, io, grace);
            let outer = time.outer_timeout(5.0).unwrap().as_secs_f64();
            assert!(outer > time.wall_cap() + time.extra_time_grace());
            assert!(outer >= 2.0 * cpu + io + 1.0 + 5.0 - 1e-6);
        }
    }

    #[test]
    fn test_extra_time_threshold_is_whole_millis() {
        assert_eq!(TimeLimits::new(0.1, 0.0, 1.0).extra_time_threshold(), 0.15);
        assert_eq!(TimeLimits::new(0.2, 0.0, 1.0).extra_time_threshold(), 0.3);
        assert_eq!(TimeLimits::new(0.3, 0.7, 1.0).extra_time_threshold(), 0.45);
    }

    #[test]
    fn test_unrepresentable_outer_timeout() {
        let time = TimeLimits::new(1e20, 0.0, 1.0);
        assert!(matches!(
            time.outer_timeout(5.0),
            Err(SandboxError::InvalidLimit(_))
        ));

        let time = TimeLimits::new(1.0, 0.0, 1.0);
        assert!(time.outer_timeout(f64::NAN).is_err());
        assert!(time.outer_timeout(-100.0).is_err());
    }

    #[test]
    fn test_memory_cap_and_report() {
        let memory = MemoryLimits::new(64, 5);

        assert_eq!(memory.limit_kb(), 64 * 1024);
        assert_eq!(memory.cap_kb(), 69 * 1024);
        assert_eq!(memory.report(10 * 1024), 10 * 1024);
        assert_eq!(memory.report(66 * 1024), 66 * 1024);
        assert_eq!(memory.report(69 * 1024), -69 * 1024);
        assert_eq!(memory.report(100 * 1024), -69 * 1024);
        assert_eq!(memory.report(u64::MAX), -69 * 1024);
    }

    #[test]
    fn test_huge_peak_saturates() {
        assert_eq!(saturating_kb(u64::MAX), i64::MAX);
        assert_eq!(saturating_kb(1024), 1024);
    }

    #[test]
    fn test_trusted_relaxes_process_limit() {
        let config = SandboxConfig::default();
        let untrusted = RunSpec::builder("/tmp/judge", ["./a"]).build().unwrap();
        let trusted = RunSpec::builder("/tmp/judge", ["g++", "main.cpp"])
            .with_trusted(true)
            .build()
            .unwrap();

        assert_eq!(EffectiveLimits::from_spec(&untrusted, &config).unwrap().processes, 1);
        assert_eq!(
            EffectiveLimits::from_spec(&trusted, &config).unwrap().processes,
            config.trusted_process_limit
        );
    }

    #[test]
    fn test_memory_absent_when_unlimited() {
        let spec = RunSpec::builder("/tmp/judge", ["./a"]).build().unwrap();
        let limits = EffectiveLimits::from_spec(&spec, &SandboxConfig::default()).unwrap();
        assert_eq!(limits.memory, None);
    }
}
