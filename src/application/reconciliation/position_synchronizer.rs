//! Runs the same watching-divergence check as the Consistency Checker's
//! Scenario 2, packaged separately so it can run at a higher cadence
//! without the more expensive stuck-buying scan.

use crate::domain::model::CycleStatus;
use crate::domain::ports::BrokerGateway;
use crate::domain::repositories::{CycleStore, CycleUpdate, NewCycle};
use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct PositionSynchronizer {
    broker: Arc<dyn BrokerGateway>,
    store: Arc<dyn CycleStore>,
    dry_run: bool,
}

impl PositionSynchronizer {
    pub fn new(broker: Arc<dyn BrokerGateway>, store: Arc<dyn CycleStore>, dry_run: bool) -> Self {
        Self { broker, store, dry_run }
    }

    pub async fn run(&self) -> Result<()> {
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
                            error!(cycle_id = cycle.id, "failed to synchronize position: {e}");
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
                None => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{AssetConfig, BrokerPosition};
    use crate::domain::repositories::NewCycle;
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
    async fn leaves_consistent_flat_cycle_untouched() {
        let broker = Arc::new(MockBrokerGateway::new());
        let store = Arc::new(InMemoryCycleStore::new());
        store.seed_asset(asset()).await;
        let cycle = store.create_cycle(NewCycle::watching(1)).await.unwrap();

        let synchronizer = PositionSynchronizer::new(broker, store.clone(), false);
        synchronizer.run().await.unwrap();

        let unchanged = store.get_latest_cycle(1).await.unwrap().unwrap();
        assert_eq!(unchanged.id, cycle.id);
        assert_eq!(unchanged.quantity, Decimal::ZERO);
    }

    #[tokio::test]
    async fn dry_run_does_not_mutate_diverged_cycle() {
        let broker = Arc::new(MockBrokerGateway::new());
        let store = Arc::new(InMemoryCycleStore::new());
        store.seed_asset(asset()).await;
        let cycle = store.create_cycle(NewCycle::watching(1)).await.unwrap();
        broker.set_position(BrokerPosition { symbol: "BTC/USD".into(), qty: dec!(1), avg_entry_price: dec!(100) });

        let synchronizer = PositionSynchronizer::new(broker, store.clone(), true);
        synchronizer.run().await.unwrap();

        let untouched = store.get_latest_cycle(1).await.unwrap().unwrap();
        assert_eq!(untouched.id, cycle.id);
        assert_eq!(untouched.quantity, Decimal::ZERO);
    }
}
