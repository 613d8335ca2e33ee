//! Orchestration layer: the Live Event Loop, its per-symbol throttle, the
//! periodic Reconciliation Workers, and the Process Supervisor. Nothing
//! under `domain/` is aware any of this exists.

pub mod event_loop;
pub mod reconciliation;
pub mod supervisor;
pub mod throttle;

pub use event_loop::EventLoop;
