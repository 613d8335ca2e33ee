//! Cancels orphaned limit buys and stuck market sells that the trade-update
//! stream never resolved.

use crate::domain::model::CycleStatus;
use crate::domain::ports::BrokerGateway;
use crate::domain::repositories::CycleStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct StaleOrderCanceller {
    broker: Arc<dyn BrokerGateway>,
    store: Arc<dyn CycleStore>,
    stale_buy_limit_seconds: i64,
    stuck_market_sell_seconds: i64,
    dry_run: bool,
}

impl StaleOrderCanceller {
    pub fn new(
        broker: Arc<dyn BrokerGateway>,
        store: Arc<dyn CycleStore>,
        stale_buy_limit_seconds: i64,
        stuck_market_sell_seconds: i64,
        dry_run: bool,
    ) -> Self {
        Self { broker, store, stale_buy_limit_seconds, stuck_market_sell_seconds, dry_run }
    }

    pub async fn run(&self) -> Result<()> {
        self.cancel_orphaned_limit_buys().await?;
        self.cancel_stuck_market_sells().await?;
        Ok(())
    }

    async fn cancel_orphaned_limit_buys(&self) -> Result<()> {
        let open_orders = self.broker.list_open_orders().await?;
        let now = Utc::now();

        let buying = self.store.list_cycles_by_status(CycleStatus::Buying).await?;
        let selling = self.store.list_cycles_by_status(CycleStatus::Selling).await?;
        let tracked_order_ids: std::collections::HashSet<String> = buying
            .iter()
            .chain(selling.iter())
            .filter_map(|c| c.latest_order_id.clone())
            .collect();

        for order in open_orders {
            if order.order_type != crate::domain::model::OrderType::Limit
                || order.side != crate::domain::model::OrderSide::Buy
            {
                continue;
            }
            let age_seconds = now.signed_duration_since(order.created_at).num_seconds();
            if age_seconds < self.stale_buy_limit_seconds {
                continue;
            }
            if tracked_order_ids.contains(&order.id) {
                continue;
            }

            if self.dry_run {
                info!(order_id = %order.id, age_seconds, "dry run: would cancel orphaned stale limit buy");
            } else {
                info!(order_id = %order.id, age_seconds, "cancelling orphaned stale limit buy");
                if let Err(e) = self.broker.cancel_order(&order.id).await {
                    warn!(order_id = %order.id, "failed to cancel orphaned order: {e}");
                }
            }
        }
        Ok(())
    }

    async fn cancel_stuck_market_sells(&self) -> Result<()> {
        let now = Utc::now();
        let selling = self.store.list_cycles_by_status(CycleStatus::Selling).await?;

        for cycle in selling {
            let Some(created_at) = cycle.latest_order_created_at else { continue };
            let age_seconds = now.signed_duration_since(created_at).num_seconds();
            if age_seconds < self.stuck_market_sell_seconds {
                continue;
            }
            let Some(order_id) = &cycle.latest_order_id else { continue };

            match self.broker.get_order(order_id).await {
                Ok(Some(order)) if !order.status.is_terminal() => {
                    if self.dry_run {
                        info!(cycle_id = cycle.id, order_id, age_seconds, "dry run: would cancel stuck market sell");
                    } else {
                        info!(cycle_id = cycle.id, order_id, age_seconds, "cancelling stuck market sell");
                        if let Err(e) = self.broker.cancel_order(order_id).await {
                            warn!(cycle_id = cycle.id, order_id, "failed to cancel stuck market sell: {e}");
                        }
                    }
                }
                Ok(_) => {
                    // Already terminal or gone; the trade-update stream will deliver the event.
                }
                Err(e) => warn!(cycle_id = cycle.id, order_id, "failed to look up stuck market sell: {e}"),
            }
        }
        Ok(())
    }
}
