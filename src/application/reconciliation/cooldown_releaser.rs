//! Promotes `cooldown` cycles to `watching` once their predecessor's
//! cooldown window has elapsed.

use crate::domain::model::CycleStatus;
use crate::domain::repositories::{CycleStore, CycleUpdate};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

pub struct CooldownReleaser {
    store: Arc<dyn CycleStore>,
    dry_run: bool,
}

impl CooldownReleaser {
    pub fn new(store: Arc<dyn CycleStore>, dry_run: bool) -> Self {
        Self { store, dry_run }
    }

    pub async fn run(&self) -> Result<()> {
        let now = Utc::now();

        for cycle in self.store.list_cycles_by_status(CycleStatus::Cooldown).await? {
            let Some(asset) = self.store.get_asset_by_id(cycle.asset_id).await? else { continue };

            let predecessor = {
                let completed = self.store.list_cycles_by_status(CycleStatus::Complete).await?;
                let errored = self.store.list_cycles_by_status(CycleStatus::Error).await?;
                completed
                    .into_iter()
                    .chain(errored)
                    .filter(|c| {
                        c.asset_id == cycle.asset_id && c.completed_at.is_some() && c.created_at < cycle.created_at
                    })
                    .max_by_key(|c| c.completed_at)
            };

            let Some(predecessor) = predecessor else { continue };
            let Some(completed_at) = predecessor.completed_at else { continue };

            let release_at = completed_at + chrono::Duration::seconds(asset.cooldown_seconds);
            if now < release_at {
                continue;
            }

            if self.dry_run {
                info!(cycle_id = cycle.id, "dry run: would release cooldown to watching");
                continue;
            }

            let update = CycleUpdate::new().status(CycleStatus::Watching).quantity(Default::default()).average_purchase_price(Default::default());
            if let Err(e) = self.store.update_cycle(cycle.id, update).await {
                error!(cycle_id = cycle.id, "failed to release cooldown cycle: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::AssetConfig;
    use crate::domain::repositories::NewCycle;
    use crate::infrastructure::mock::InMemoryCycleStore;
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
            cooldown_seconds: 0,
            last_sell_price: None,
        }
    }

    #[tokio::test]
    async fn releases_cooldown_once_predecessor_window_has_elapsed() {
        let store = Arc::new(InMemoryCycleStore::new());
        store.seed_asset(asset()).await;

        let predecessor = store.create_cycle(NewCycle::watching(1)).await.unwrap();
        store
            .update_cycle(
                predecessor.id,
                CycleUpdate::new().status(CycleStatus::Complete).completed_at(Some(Utc::now() - chrono::Duration::seconds(5))),
            )
            .await
            .unwrap();

        let cooldown = store.create_cycle(NewCycle::cooldown(1)).await.unwrap();

        let releaser = CooldownReleaser::new(store.clone(), false);
        releaser.run().await.unwrap();

        let released = store.get_latest_cycle(1).await.unwrap().unwrap();
        assert_eq!(released.id, cooldown.id);
        assert_eq!(released.status, CycleStatus::Watching);
    }
}
