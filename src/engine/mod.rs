//! The grab loop: poll a section's seats, enroll the moment one opens.

use crate::model::{GrabEvent, GrabTarget, LogEvent, RunState, RunStats};
use crate::portal::{ApiReply, Portal};
use anyhow::{Context, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Granularity of cancellation checks while waiting between polls.
const CANCEL_POLL: Duration = Duration::from_millis(50);

enum Step {
    Enrolled,
    Retry,
}

pub struct GrabEngine<P: Portal> {
    portal: Arc<P>,
    target: GrabTarget,
    interval: Duration,
}

fn log(event_tx: &mpsc::UnboundedSender<GrabEvent>, message: impl Into<String>) {
    let _ = event_tx.send(GrabEvent::Log(LogEvent::now(message)));
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Sleep for `total`, waking early if `cancel` is set. Returns false when cancelled.
pub(crate) async fn wait_or_cancelled(total: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
    }
}

impl<P: Portal> GrabEngine<P> {
    pub fn new(portal: Arc<P>, target: GrabTarget, interval: Duration) -> Self {
        Self {
            portal,
            target,
            interval,
        }
    }

    /// Run until enrolled or cancelled. Emits exactly one terminal event.
    pub async fn run(
        self,
        event_tx: mpsc::UnboundedSender<GrabEvent>,
        cancel: Arc<AtomicBool>,
    ) -> RunState {
        let mut stats = RunStats::default();
        log(&event_tx, format!("Start grabbing: {}", self.target.label()));
        log(
            &event_tx,
            format!("Poll interval: {}s", self.interval.as_secs_f64()),
        );
        tracing::info!(
            section = %self.target.section_id,
            execution = %self.target.execution_id,
            interval_ms = self.interval.as_millis() as u64,
            "grab loop started"
        );

        loop {
            if cancel.load(Ordering::Relaxed) {
                break;
            }

            let step = AssertUnwindSafe(self.iterate(&event_tx, &mut stats))
                .catch_unwind()
                .await;
            match step {
                Ok(Ok(Step::Enrolled)) => {
                    log(&event_tx, format!("✓ {} enrolled!", self.target.label()));
                    tracing::info!(section = %self.target.section_id, ?stats, "enrolled");
                    let _ = event_tx.send(GrabEvent::Succeeded {
                        target: self.target.clone(),
                        stats,
                    });
                    return RunState::Succeeded;
                }
                Ok(Ok(Step::Retry)) => {}
                Ok(Err(e)) => {
                    tracing::debug!("iteration failed: {e:#}");
                    log(&event_tx, format!("{e:#}"));
                }
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    tracing::warn!("iteration panicked: {msg}");
                    log(&event_tx, format!("Unexpected failure: {msg}"));
                }
            }

            if !wait_or_cancelled(self.interval, &cancel).await {
                break;
            }
        }

        log(&event_tx, "Grab stopped");
        tracing::info!(section = %self.target.section_id, ?stats, "grab loop cancelled");
        let _ = event_tx.send(GrabEvent::Cancelled { stats });
        RunState::Cancelled
    }

    async fn iterate(
        &self,
        event_tx: &mpsc::UnboundedSender<GrabEvent>,
        stats: &mut RunStats,
    ) -> Result<Step> {
        let t = &self.target;
        log(event_tx, format!("Checking seats for {}...", t.label()));

        stats.queries += 1;
        let status = self
            .portal
            .query_status(&t.section_id, &t.execution_id)
            .await
            .and_then(ApiReply::into_data);
        let seats = match status {
            Ok(s) => s,
            Err(e) => {
                stats.failed_queries += 1;
                return Err(e).context("Status query failed");
            }
        };

        let remaining = seats.remaining();
        let _ = event_tx.send(GrabEvent::Seats { status: seats });
        log(
            event_tx,
            format!(
                "Capacity {} | enrolled {} | remaining {}",
                seats.capacity, seats.enrolled_count, remaining
            ),
        );
        if !seats.has_open_seat() {
            return Ok(Step::Retry);
        }

        log(
            event_tx,
            format!("Found {remaining} open seat(s), trying to enroll..."),
        );
        stats.enroll_attempts += 1;
        let reply = self
            .portal
            .attempt_enroll(&t.section_id, &t.execution_id)
            .await
            .context("Enrollment request failed")?;
        if reply.is_success() {
            return Ok(Step::Enrolled);
        }
        log(
            event_tx,
            format!(
                "Enrollment failed: {} (code {})",
                reply.message, reply.code
            ),
        );
        Ok(Step::Retry)
    }
}
