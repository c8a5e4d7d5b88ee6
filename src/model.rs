use crate::error::GrabError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Poll interval floor; anything lower is clamped up to this.
pub const MIN_POLL_INTERVAL_SECS: f64 = 0.5;
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 2.0;
/// Poll interval ceiling (one day); larger values are rejected.
pub const MAX_POLL_INTERVAL_SECS: f64 = 86_400.0;

/// One enrollable course section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabTarget {
    /// The portal's `class_id`.
    pub section_id: String,
    /// The portal's `do_id`.
    pub execution_id: String,
    #[serde(default)]
    pub display_name: String,
}

impl GrabTarget {
    pub fn new(
        section_id: impl Into<String>,
        execution_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            section_id: section_id.into(),
            execution_id: execution_id.into(),
            display_name: display_name.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), GrabError> {
        if self.section_id.trim().is_empty() {
            return Err(GrabError::InvalidTarget("section id is empty".into()));
        }
        if self.execution_id.trim().is_empty() {
            return Err(GrabError::InvalidTarget("execution id is empty".into()));
        }
        Ok(())
    }

    /// Name used in log lines; falls back to the section id.
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.section_id
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrabConfig {
    pub poll_interval_secs: f64,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl GrabConfig {
    pub fn new(poll_interval_secs: f64) -> Self {
        Self { poll_interval_secs }
    }

    /// Effective interval: non-finite values and values above the ceiling are
    /// rejected, values under the floor are clamped.
    pub fn poll_interval(&self) -> Result<Duration, GrabError> {
        let secs = self.poll_interval_secs;
        if !secs.is_finite() {
            return Err(GrabError::InvalidConfig(format!(
                "poll interval must be a finite number of seconds, got {secs}"
            )));
        }
        if secs > MAX_POLL_INTERVAL_SECS {
            return Err(GrabError::InvalidConfig(format!(
                "poll interval must be at most {MAX_POLL_INTERVAL_SECS}s, got {secs}"
            )));
        }
        Duration::try_from_secs_f64(secs.max(MIN_POLL_INTERVAL_SECS))
            .map_err(|e| GrabError::InvalidConfig(format!("poll interval {secs}: {e}")))
    }
}

impl FromStr for GrabConfig {
    type Err = GrabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let secs: f64 = raw.parse().map_err(|_| {
            GrabError::InvalidConfig(format!("poll interval {raw:?} is not a number"))
        })?;
        let cfg = GrabConfig::new(secs);
        cfg.poll_interval()?;
        Ok(cfg)
    }
}

/// Seat snapshot returned by a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatStatus {
    #[serde(alias = "jxbrl")]
    pub capacity: u32,
    #[serde(alias = "selected_number", alias = "yxzrs")]
    pub enrolled_count: u32,
}

impl SeatStatus {
    pub fn remaining(&self) -> i64 {
        i64::from(self.capacity) - i64::from(self.enrolled_count)
    }

    pub fn has_open_seat(&self) -> bool {
        self.remaining() > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Stopping,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

/// A single progress line produced by the grab loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub message: String,
}

impl LogEvent {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()),
            message: message.into(),
        }
    }

    /// Render as `[HH:MM:SS] message`.
    pub fn to_line(&self) -> String {
        let fmt = time::macros::format_description!("[hour]:[minute]:[second]");
        let ts = self
            .timestamp
            .format(&fmt)
            .unwrap_or_else(|_| "--:--:--".into());
        format!("[{ts}] {}", self.message)
    }
}

/// Counters for one run, reported alongside the terminal outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub queries: u64,
    pub failed_queries: u64,
    pub enroll_attempts: u64,
}

/// Everything the observer receives. `Log`, `Seats` and the `Succeeded`/`Cancelled`
/// outcomes come only from the loop; `StateChanged`, `Info` and `Error` come from
/// the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GrabEvent {
    Log(LogEvent),
    Seats {
        status: SeatStatus,
    },
    Succeeded {
        target: GrabTarget,
        stats: RunStats,
    },
    Cancelled {
        stats: RunStats,
    },
    Error {
        message: String,
    },
    StateChanged(RunState),
    Info(String),
}

impl GrabEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GrabEvent::Succeeded { .. } | GrabEvent::Cancelled { .. } | GrabEvent::Error { .. }
        )
    }
}

/// A course offered in an enrollment block, as listed by the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub teacher: String,
    #[serde(default)]
    pub class_id: String,
    #[serde(default)]
    pub do_id: String,
}

impl CourseEntry {
    pub fn to_target(&self) -> GrabTarget {
        GrabTarget::new(&self.class_id, &self.do_id, &self.title)
    }
}
