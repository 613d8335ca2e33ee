//! Four independent, idempotent periodic jobs that repair drift between
//! the Cycle Store and the broker's view of the world. Each acquires its
//! own fresh view of cycles/orders/positions on every run; none depend on
//! the others' ordering.

pub mod consistency_checker;
pub mod cooldown_releaser;
pub mod position_synchronizer;
pub mod stale_order_canceller;

pub use consistency_checker::ConsistencyChecker;
pub use cooldown_releaser::CooldownReleaser;
pub use position_synchronizer::PositionSynchronizer;
pub use stale_order_canceller::StaleOrderCanceller;
