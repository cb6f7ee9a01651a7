//! Outcome classification
//!
//! Maps a runtime report to a judge verdict. Several conditions can hold at
//! once (a program killed for time may also have a non-zero exit code and a
//! high memory peak), so the rules in [`RULES`] are evaluated in order and the
//! first one that matches decides the verdict.

use nix::sys::signal::Signal;
use tracing::debug;

use crate::core::{Verdict, VerdictStatus};
use crate::sandbox::limits::{round_millis, saturating_kb, MemoryLimits, TimeLimits};
use crate::sandbox::meta::{ExecutionMetadata, SandboxStatus};

/// Everything a rule looks at
pub struct Observation<'a> {
    pub meta: &'a ExecutionMetadata,
    pub error_text: Option<&'a str>,
    pub time: TimeLimits,
    pub memory: Option<MemoryLimits>,
    /// CPU time minus I/O time, rounded to milliseconds
    pub effective_time: f64,
}

impl<'a> Observation<'a> {
    pub fn new(
        meta: &'a ExecutionMetadata,
        error_text: Option<&'a str>,
        time: TimeLimits,
        memory: Option<MemoryLimits>,
    ) -> Self {
        Self {
            meta,
            error_text,
            time,
            memory,
            effective_time: round_millis((meta.time - meta.io_time).max(0.0)),
        }
    }

    fn reported_memory(&self) -> i64 {
        match self.memory {
            Some(memory) => memory.report(self.meta.memory_peak_kb),
            None => saturating_kb(self.meta.memory_peak_kb),
        }
    }

    /// Verdict carrying the standard diagnostics
    fn verdict(&self, status: VerdictStatus) -> Verdict {
        Verdict::new(status)
            .with_exit_code(self.meta.exit_code)
            .with_time(self.effective_time)
            .with_memory(self.reported_memory())
    }

    fn error_or_message(&self) -> Option<String> {
        self.error_text
            .map(str::to_string)
            .or_else(|| self.meta.message.clone())
    }
}

pub type Rule = fn(&Observation) -> Option<Verdict>;

/// Classification rules, highest priority first
pub const RULES: [(&str, Rule); 7] = [
    ("sandbox-error", sandbox_error),
    ("wall-clock", wall_clock_limit),
    ("extra-time", extra_time_exceeded),
    ("time-limit", time_limit_exceeded),
    ("memory-limit", memory_limit_exceeded),
    ("signaled", signaled),
    ("exit-code", nonzero_exit),
];

/// Classify one run
pub fn classify(
    meta: &ExecutionMetadata,
    error_text: Option<&str>,
    time: TimeLimits,
    memory: Option<MemoryLimits>,
) -> Verdict {
    let observation = Observation::new(meta, error_text, time, memory);
    if meta.oom_killed {
        debug!("Runtime reports cgroup OOM kill at {} KB", meta.memory_peak_kb);
    }

    for (name, rule) in RULES {
        if let Some(verdict) = rule(&observation) {
            debug!("Classified by {} rule as {}", name, verdict.status);
            return verdict;
        }
    }

    success(&observation)
}

pub fn sandbox_error(obs: &Observation) -> Option<Verdict> {
    (obs.meta.status == SandboxStatus::SandboxError).then(|| {
        Verdict::new(VerdictStatus::SandboxError).with_optional_reason(obs.error_or_message())
    })
}

pub fn wall_clock_limit(obs: &Observation) -> Option<Verdict> {
    let mentions_wall_clock = obs.error_text.is_some_and(mentions_wall_clock)
        || obs.meta.message.as_deref().is_some_and(mentions_wall_clock);

    (obs.meta.status == SandboxStatus::TimeLimit && mentions_wall_clock).then(|| {
        obs.verdict(VerdictStatus::TimeLimitExceeded)
            .with_reason("wall clock limit")
            .with_time(negated(obs.effective_time))
    })
}

pub fn extra_time_exceeded(obs: &Observation) -> Option<Verdict> {
    let threshold = obs.time.extra_time_threshold();
    (obs.effective_time >= threshold).then(|| {
        obs.verdict(VerdictStatus::TimeLimitExceeded)
            .with_reason("extra time exceeded")
            .with_time(negated(threshold))
    })
}

pub fn time_limit_exceeded(obs: &Observation) -> Option<Verdict> {
    (obs.effective_time > obs.time.cpu_limit_secs).then(|| {
        obs.verdict(VerdictStatus::TimeLimitExceeded)
            .with_reason("time limit exceeded")
    })
}

pub fn memory_limit_exceeded(obs: &Observation) -> Option<Verdict> {
    let memory = obs.memory?;
    (obs.meta.memory_peak_kb >= memory.limit_kb())
        .then(|| obs.verdict(VerdictStatus::MemoryLimitExceeded))
}

pub fn signaled(obs: &Observation) -> Option<Verdict> {
    (obs.meta.status == SandboxStatus::Signaled).then(|| {
        let reason = obs.error_text.map(str::to_string).or_else(|| {
            obs.meta
                .exit_signal
                .map(describe_signal)
                .or_else(|| obs.meta.message.clone())
        });
        obs.verdict(VerdictStatus::ProgramError)
            .with_optional_reason(reason)
    })
}

pub fn nonzero_exit(obs: &Observation) -> Option<Verdict> {
    (obs.meta.exit_code.unwrap_or(0) != 0).then(|| {
        obs.verdict(VerdictStatus::ProgramError)
            .with_optional_reason(obs.error_or_message())
    })
}

/// Fallback when no rule matched; stderr is kept as a diagnostic
fn success(obs: &Observation) -> Verdict {
    obs.verdict(VerdictStatus::Success)
        .with_exit_code(Some(obs.meta.exit_code.unwrap_or(0)))
        .with_optional_reason(obs.error_text)
}

fn mentions_wall_clock(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("wall clock") || text.contains("wall-clock")
}

fn describe_signal(signo: i32) -> String {
    match Signal::try_from(signo) {
        Ok(signal) => format!("killed by signal {} ({})", signo, signal.as_str()),
        Err(_) => format!("killed by signal {}", signo),
    }
}

/// Negative time marks a killed run; zero stays `0.0`, never `-0.0`
fn negated(secs: f64) -> f64 {
    if secs == 0.0 {
        0.0
    } else {
        -secs
    }
}
