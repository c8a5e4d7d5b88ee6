//! Grab run lifecycle controller.
//!
//! Owns start/stop of the background grab loop and emits state changes for
//! presentation layers. Only the cancel flag and the task's join result cross
//! between the foreground and the loop.

use crate::engine::GrabEngine;
use crate::error::GrabError;
use crate::model::{GrabConfig, GrabEvent, GrabTarget, RunState};
use crate::portal::Portal;
use anyhow::Result;
use futures::FutureExt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Commands emitted by UI layers to drive the controller.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start,
    Stop,
    Quit,
}

/// Internal handle for a live grab loop.
struct RunCtx {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<RunState>,
}

pub struct GrabController<P: Portal> {
    portal: Arc<P>,
    event_tx: UnboundedSender<GrabEvent>,
    state: RunState,
    run: Option<RunCtx>,
}

impl<P: Portal> GrabController<P> {
    pub fn new(portal: Arc<P>, event_tx: UnboundedSender<GrabEvent>) -> Self {
        Self {
            portal,
            event_tx,
            state: RunState::Idle,
            run: None,
        }
    }

    fn set_state(&mut self, state: RunState) {
        if self.state != state {
            self.state = state;
            let _ = self.event_tx.send(GrabEvent::StateChanged(state));
        }
    }

    /// Validate inputs and launch the grab loop. Returns immediately.
    ///
    /// A loop that is still unwinding after `stop` counts as active: only one loop
    /// instance may exist per controller.
    pub fn start(&mut self, target: GrabTarget, config: GrabConfig) -> Result<(), GrabError> {
        self.reap();
        if self.run.is_some() {
            return Err(GrabError::AlreadyRunning);
        }
        target.validate()?;
        let interval = config.poll_interval()?;

        let cancel = Arc::new(AtomicBool::new(false));
        let engine = GrabEngine::new(self.portal.clone(), target, interval);
        let handle = tokio::spawn(engine.run(self.event_tx.clone(), cancel.clone()));
        self.run = Some(RunCtx { cancel, handle });
        self.set_state(RunState::Running);
        Ok(())
    }

    /// Request cancellation. Never blocks; a no-op without a running loop.
    pub fn stop(&mut self) {
        self.reap();
        if self.state != RunState::Running {
            return;
        }
        if let Some(ctx) = &self.run {
            ctx.cancel.store(true, Ordering::Relaxed);
            tracing::debug!("cancel requested");
            self.set_state(RunState::Stopping);
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
            && self
                .run
                .as_ref()
                .is_some_and(|ctx| !ctx.handle.is_finished())
    }

    /// True while a loop task exists, including one still unwinding after `stop`.
    pub fn has_active_loop(&self) -> bool {
        self.run.is_some()
    }

    pub fn state(&mut self) -> RunState {
        self.reap();
        self.state
    }

    /// Wait for the current loop to exit and return its terminal state.
    ///
    /// Cancel-safe: the join handle is only released once it has completed.
    pub async fn wait(&mut self) -> RunState {
        let joined = match self.run.as_mut() {
            Some(ctx) => (&mut ctx.handle).await,
            None => return self.state,
        };
        self.finish(joined)
    }

    /// Collect a finished loop without blocking.
    fn reap(&mut self) {
        let joined = match self.run.as_mut() {
            Some(ctx) if ctx.handle.is_finished() => (&mut ctx.handle).now_or_never(),
            _ => None,
        };
        if let Some(joined) = joined {
            self.finish(joined);
        }
    }

    fn finish(&mut self, joined: Result<RunState, tokio::task::JoinError>) -> RunState {
        self.run = None;
        let state = match joined {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("grab loop task failed: {e}");
                let _ = self.event_tx.send(GrabEvent::Error {
                    message: format!("Grab loop failed: {e}"),
                });
                RunState::Failed
            }
        };
        self.set_state(state);
        state
    }
}

fn start_or_report<P: Portal>(
    controller: &mut GrabController<P>,
    target: &GrabTarget,
    config: GrabConfig,
    event_tx: &UnboundedSender<GrabEvent>,
) {
    if let Err(e) = controller.start(target.clone(), config) {
        let _ = event_tx.send(GrabEvent::Info(e.to_string()));
    }
}

/// Drive a controller from UI commands until the UI quits.
pub(crate) async fn run_controller<P: Portal>(
    controller: &mut GrabController<P>,
    target: GrabTarget,
    config: GrabConfig,
    start_on_launch: bool,
    event_tx: UnboundedSender<GrabEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let info = |msg: &str| {
        let _ = event_tx.send(GrabEvent::Info(msg.to_string()));
    };

    if start_on_launch {
        start_or_report(controller, &target, config, &event_tx);
    }
    let mut start_pending = false;
    let mut quit_pending = false;
    // Stop watchdog: a request in flight can delay the loop's exit; keep the UI informed.
    let mut stop_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    let res = loop {
        let active = controller.has_active_loop();
        tokio::select! {
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Start) => {
                        if controller.state() == RunState::Stopping {
                            // Serialized: launch once the previous loop has exited.
                            start_pending = true;
                            info("Waiting for the previous run to stop…");
                        } else {
                            start_or_report(controller, &target, config, &event_tx);
                        }
                    }
                    Some(UiCommand::Stop) => {
                        start_pending = false;
                        if controller.is_running() {
                            controller.stop();
                            info("Stopping…");
                            stop_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        quit_pending = true;
                        controller.stop();
                        if !controller.has_active_loop() {
                            break Ok(());
                        }
                    }
                }
            }
            _ = controller.wait(), if active => {
                stop_deadline = None;
                if quit_pending {
                    break Ok(());
                }
                if start_pending {
                    start_pending = false;
                    start_or_report(controller, &target, config, &event_tx);
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = stop_deadline {
                    if tokio::time::Instant::now() >= deadline && controller.has_active_loop() {
                        info("Still stopping…");
                        stop_deadline = None;
                    }
                }
            }
        }
    };

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::testing::{code, enrolled, seats, slow_seats, ScriptedPortal};
    use tokio::sync::mpsc;

    fn target() -> GrabTarget {
        GrabTarget::new("C1", "D1", "Compilers")
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<GrabEvent>) -> Vec<GrabEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn full_portal() -> Arc<ScriptedPortal> {
        Arc::new(ScriptedPortal::new(vec![seats(30, 30)], vec![enrolled()]))
    }

    #[tokio::test(start_paused = true)]
    async fn start_validates_inputs_without_spawning() {
        let portal = full_portal();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctl = GrabController::new(portal.clone(), tx);

        let err = ctl
            .start(GrabTarget::new("", "D1", "x"), GrabConfig::default())
            .unwrap_err();
        assert!(matches!(err, GrabError::InvalidTarget(_)));
        let err = ctl
            .start(target(), GrabConfig::new(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, GrabError::InvalidConfig(_)));
        let err = ctl.start(target(), GrabConfig::new(1e20)).unwrap_err();
        assert!(matches!(err, GrabError::InvalidConfig(_)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ctl.state(), RunState::Idle);
        assert!(!ctl.is_running());
        assert_eq!(portal.status_calls(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_and_spawns_nothing() {
        let portal = full_portal();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctl = GrabController::new(portal.clone(), tx);

        ctl.start(target(), GrabConfig::new(1.0)).unwrap();
        assert!(ctl.is_running());
        assert_eq!(
            ctl.start(target(), GrabConfig::new(1.0)),
            Err(GrabError::AlreadyRunning)
        );
        assert_eq!(ctl.state(), RunState::Running);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        ctl.stop();
        assert_eq!(ctl.wait().await, RunState::Cancelled);

        let banners = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, GrabEvent::Log(l) if l.message.starts_with("Start grabbing")))
            .count();
        assert_eq!(banners, 1);
        assert_eq!(portal.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_cancels_once() {
        let portal = full_portal();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctl = GrabController::new(portal.clone(), tx);

        ctl.stop();
        assert_eq!(ctl.state(), RunState::Idle);

        ctl.start(target(), GrabConfig::new(0.5)).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        ctl.stop();
        assert!(!ctl.is_running());
        ctl.stop();

        assert_eq!(ctl.wait().await, RunState::Cancelled);
        assert_eq!(ctl.state(), RunState::Cancelled);
        ctl.stop();
        assert_eq!(ctl.state(), RunState::Cancelled);

        let calls = portal.status_calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(portal.status_calls(), calls);

        let events = drain(&mut rx);
        let cancelled = events
            .iter()
            .filter(|e| matches!(e, GrabEvent::Cancelled { .. }))
            .count();
        assert_eq!(cancelled, 1);
        let states: Vec<RunState> = events
            .iter()
            .filter_map(|e| match e {
                GrabEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![RunState::Running, RunState::Stopping, RunState::Cancelled]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_ends_run_and_allows_fresh_start() {
        let portal = Arc::new(ScriptedPortal::new(
            vec![seats(30, 30), seats(30, 29)],
            vec![enrolled()],
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctl = GrabController::new(portal.clone(), tx);

        ctl.start(target(), GrabConfig::new(0.1)).unwrap();
        assert_eq!(ctl.wait().await, RunState::Succeeded);
        assert!(!ctl.has_active_loop());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(portal.status_calls(), 2);
        assert_eq!(portal.enroll_calls(), 1);
        let succeeded = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e, GrabEvent::Succeeded { .. }))
            .count();
        assert_eq!(succeeded, 1);

        ctl.start(target(), GrabConfig::new(1.0)).unwrap();
        assert_eq!(ctl.state(), RunState::Running);
        ctl.stop();
        assert_eq!(ctl.wait().await, RunState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_stopping_is_rejected() {
        let portal = Arc::new(ScriptedPortal::new(
            vec![code(999, "busy")],
            vec![enrolled()],
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut ctl = GrabController::new(portal, tx);

        ctl.start(target(), GrabConfig::new(1.0)).unwrap();
        ctl.stop();
        assert_eq!(ctl.state(), RunState::Stopping);
        assert_eq!(
            ctl.start(target(), GrabConfig::new(1.0)),
            Err(GrabError::AlreadyRunning)
        );
        assert_eq!(ctl.wait().await, RunState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_request_stays_stopping_until_the_call_returns() {
        let portal = Arc::new(ScriptedPortal::new(
            vec![slow_seats(Duration::from_secs(4), 30, 30)],
            vec![enrolled()],
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctl = GrabController::new(portal.clone(), tx);

        ctl.start(target(), GrabConfig::new(2.0)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctl.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ctl.state(), RunState::Stopping);

        let stopped = tokio::time::Instant::now();
        assert_eq!(ctl.wait().await, RunState::Cancelled);
        // Remaining latency only; the poll interval is not slept out.
        assert!(stopped.elapsed() < Duration::from_secs(2));
        assert_eq!(portal.status_calls(), 1);
        let cancelled = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e, GrabEvent::Cancelled { .. }))
            .count();
        assert_eq!(cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn command_loop_serializes_restart_and_quits() {
        let portal = full_portal();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let mut ctl = GrabController::new(portal.clone(), event_tx.clone());

        let driver = tokio::spawn(async move {
            run_controller(
                &mut ctl,
                target(),
                GrabConfig::new(1.0),
                true,
                event_tx,
                cmd_rx,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        cmd_tx.send(UiCommand::Start).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cmd_tx.send(UiCommand::Stop).unwrap();
        cmd_tx.send(UiCommand::Start).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        cmd_tx.send(UiCommand::Quit).unwrap();
        driver.await.unwrap().unwrap();

        let events = drain(&mut event_rx);
        let banners = events
            .iter()
            .filter(|e| matches!(e, GrabEvent::Log(l) if l.message.starts_with("Start grabbing")))
            .count();
        assert_eq!(banners, 2);
        let cancelled = events
            .iter()
            .filter(|e| matches!(e, GrabEvent::Cancelled { .. }))
            .count();
        assert_eq!(cancelled, 2);
        assert!(events
            .iter()
            .any(|e| matches!(e, GrabEvent::Info(m) if m.contains("already active"))));
        assert!(events
            .iter()
            .any(|e| matches!(e, GrabEvent::Info(m) if m.starts_with("Waiting for the previous run"))));
    }
}
