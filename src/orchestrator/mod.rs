//! Grab run orchestration.
//!
//! This module owns the grab run lifecycle (start/stop, one loop at a time) and the
//! command loop UI layers drive it through.

mod controller;

pub(crate) use controller::{run_controller, GrabController, UiCommand};
