//! Repairs "stuck buying" cycles and "watching divergence" from the
//! broker's authoritative position.

use crate::domain::model::CycleStatus;
use crate::domain::ports::BrokerGateway;
use crate::domain::repositories::{CycleStore, CycleUpdate, NewCycle};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct ConsistencyChecker {
    broker: Arc<dyn BrokerGateway>,
    store: Arc<dyn CycleStore>,
    stuck_buying_threshold_minutes: i64,
    dry_run: bool,
}

impl ConsistencyChecker {
    pub fn new(broker: Arc<dyn BrokerGateway>, store: Arc<dyn CycleStore>, stuck_buying_threshold_minutes: i64, dry_run: bool) -> Self {
        Self { broker, store, stuck_buying_threshold_minutes, dry_run }
    }

    pub async fn run(&self) -> Result<()> {
        self.repair_stuck_buying().await?;
        self.repair_watching_divergence().await?;
        Ok(())
    }

    async fn repair_stuck_buying(&self) -> Result<()> {
        let now = Utc::now();
        for cycle in self.store.list_cycles_by_status(CycleStatus::Buying).await? {
            let revert = match &cycle.latest_order_id {
                None => true,
                Some(order_id) => match self.broker.get_order(order_id).await {
                    Ok(Some(order)) => {
                        order.status.is_terminal()
                            || now.signed_duration_since(order.created_at).num_minutes() >= self.stuck_buying_threshold_minutes
                    }
                    Ok(None) => true,
                    Err(e) => {
                        warn!(cycle_id = cycle.id, "failed to look up stuck-buying order: {e}");
                        false
                    }
                },
            };

            if !revert {
                continue;
            }

            if self.dry_run {
                info!(cycle_id = cycle.id, "dry run: would revert stuck buying cycle to watching");
                continue;
            }
            let update = CycleUpdate::new().status(CycleStatus::Watching).latest_order_id(None).latest_order_created_at(None);
            if let Err(e) = self.store.update_cycle(cycle.id, update).await {
                error!(cycle_id = cycle.id, "failed to revert stuck buying cycle: {e}");
            }
        }
        Ok(())
    }

    async fn repair_watching_divergence(&self) -> Result<()> {
        for cycle in self.store.list_cycles_by_status(CycleStatus::Watching).await? {
            let Some(asset) = self.store.get_asset_by_id(cycle.asset_id).await? else { continue };

            let position = match self.broker.get_position(&asset.symbol).await {
                Ok(position) => position,
                Err(e) => {
                    warn!(cycle_id = cycle.id, symbol = %asset.symbol, "failed to fetch position: {e}");
                    continue;
                }
            };

            match position {
                Some(position) => {
                    if position.qty != cycle.quantity || position.avg_entry_price != cycle.average_purchase_price {
                        if self.dry_run {
                            info!(cycle_id = cycle.id, "dry run: would overwrite quantity/average_purchase_price from broker position");
                            continue;
                        }
                        let update = CycleUpdate::new().quantity(position.qty).average_purchase_price(position.avg_entry_price);
                        if let Err(e) = self.store.update_cycle(cycle.id, update).await {
                            error!(cycle_id = cycle.id, "failed to reconcile watching divergence: {e}");
                        }
                    }
                }
                None if cycle.quantity > Decimal::ZERO => {
                    if self.dry_run {
                        info!(cycle_id = cycle.id, "dry run: would mark cycle error and open a fresh watching cycle");
                        continue;
                    }
                    if let Err(e) = self.store.update_cycle(cycle.id, CycleUpdate::new().status(CycleStatus::Error)).await {
                        error!(cycle_id = cycle.id, "failed to mark cycle error on missing position: {e}");
                        continue;
                    }
                    if let Err(e) = self.store.create_cycle(NewCycle::watching(cycle.asset_id)).await {
                        error!(asset_id = cycle.asset_id, "failed to open replacement watching cycle: {e}");
                    }
                }
                None => {
                    // Position absent, cycle already flat: consistent, no-op.
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{AssetConfig, BrokerPosition};
    use crate::infrastructure::mock::{InMemoryCycleStore, MockBrokerGateway};
    use rust_decimal_macros::dec;

    fn asset() -> AssetConfig {
        AssetConfig {
            id: 1,
            symbol: "BTC/USD".into(),
            enabled: true,
            base_order_amount: dec!(100),
            safety_order_amount: dec!(50),
            max_safety_orders: 2,
            safety_order_deviation_pct: dec!(2),
            take_profit_pct: dec!(1),
            ttp_enabled: false,
            ttp_deviation_pct: dec!(0),
            cooldown_seconds: 60,
            last_sell_price: None,
        }
    }

    #[tokio::test]
    async fn overwrites_watching_cycle_from_broker_position() {
        let broker = Arc::new(MockBrokerGateway::new());
        let in_memory = Arc::new(InMemoryCycleStore::new());
        in_memory.seed_asset(asset()).await;
        let cycle = in_memory.create_cycle(NewCycle::watching(1)).await.unwrap();
        broker.set_position(BrokerPosition { symbol: "BTC/USD".into(), qty: dec!(0.5), avg_entry_price: dec!(99) });

        let checker = ConsistencyChecker::new(broker, in_memory.clone(), 5, false);
        checker.run().await.unwrap();

        let updated = in_memory.get_latest_cycle(1).await.unwrap().unwrap();
        assert_eq!(updated.id, cycle.id);
        assert_eq!(updated.quantity, dec!(0.5));
        assert_eq!(updated.average_purchase_price, dec!(99));
    }

    #[tokio::test]
    async fn marks_error_and_opens_fresh_cycle_when_position_vanished() {
        let broker = Arc::new(MockBrokerGateway::new());
        let in_memory = Arc::new(InMemoryCycleStore::new());
        in_memory.seed_asset(asset()).await;
        let cycle = in_memory.create_cycle(NewCycle::watching(1)).await.unwrap();
        in_memory
            .update_cycle(cycle.id, CycleUpdate::new().quantity(dec!(1)).average_purchase_price(dec!(100)))
            .await
            .unwrap();

        let checker = ConsistencyChecker::new(broker, in_memory.clone(), 5, false);
        checker.run().await.unwrap();

        let errored = in_memory.get_latest_cycle(1).await.unwrap().unwrap();
        assert_eq!(errored.status, CycleStatus::Watching);
        // A fresh watching cycle with later created_at now exists alongside the errored one.
        let all_watching = in_memory.list_cycles_by_status(CycleStatus::Watching).await.unwrap();
        assert_eq!(all_watching.len(), 1);
        let errored_cycles = in_memory.list_cycles_by_status(CycleStatus::Error).await.unwrap();
        assert_eq!(errored_cycles.len(), 1);
        assert_eq!(errored_cycles[0].id, cycle.id);
    }
}
