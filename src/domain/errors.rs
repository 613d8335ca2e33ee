use thiserror::Error;

/// The five error kinds the core distinguishes, mapped to the handling
/// policy of each: transient errors retry on the next scheduled pass,
/// rejections clear the per-symbol throttle, store conflicts wait for
/// reconciliation, invariant violations halt the asset and alert, and
/// orphan events are simply dropped.
#[derive(Debug, Error)]
pub enum DcaError {
    #[error("transient broker error: {detail}")]
    TransientBroker { detail: String },

    #[error("order rejected: {detail}")]
    OrderRejected { detail: String },

    #[error("store conflict: {detail}")]
    StoreConflict { detail: String },

    #[error("protocol invariant violated: {detail}")]
    ProtocolInvariantViolation { detail: String },

    #[error("orphan trade-update event: order {order_id} is not referenced by any cycle")]
    OrphanEvent { order_id: String },
}
