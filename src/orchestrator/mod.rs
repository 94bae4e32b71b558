//! Application-level orchestration.
//!
//! This module owns the query/assessment lifecycle for interactive front ends. UI
//! layers send commands and render events; they never call the engine themselves.

mod controller;

pub(crate) use controller::{run_controller, UiCommand};
