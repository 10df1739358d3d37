use std::sync::Arc;

use error_stack::Report;
use tracing::debug;

use crate::error::StorageError;
use crate::model::Alert;
use crate::storage::Storage;

/// In-memory mirror of the persisted alerts.
///
/// `insert` and `remove_batch` are the only mutators and each one persists
/// the full collection before returning.
pub struct AlertStore {
    alerts: Vec<Alert>,
    storage: Arc<dyn Storage>,
}

impl AlertStore {
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Self, Report<StorageError>> {
        let alerts = storage.load().await?;
        debug!(count = alerts.len(), "alerts loaded");
        Ok(Self { alerts, storage })
    }

    /// Alerts in insertion order.
    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn find(&self, symbol: &str, target_price: f64) -> Option<&Alert> {
        self.alerts
            .iter()
            .find(|a| a.same_target(symbol, target_price))
    }

    pub async fn insert(&mut self, alert: Alert) -> Result<(), Report<StorageError>> {
        self.alerts.push(alert);
        self.save().await
    }

    /// Remove the alerts at `indices` (positions in [`alerts`](Self::alerts))
    /// and persist once. Returns how many were removed; nothing is written
    /// when that is zero.
    pub async fn remove_batch(&mut self, indices: &[usize]) -> Result<usize, Report<StorageError>> {
        let before = self.alerts.len();
        let mut position = 0;
        self.alerts.retain(|_| {
            let keep = !indices.contains(&position);
            position += 1;
            keep
        });

        let removed = before - self.alerts.len();
        if removed > 0 {
            self.save().await?;
        }
        Ok(removed)
    }

    pub async fn save(&self) -> Result<(), Report<StorageError>> {
        self.storage.save(&self.alerts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelId;
    use crate::testing::MemoryStorage;

    fn alert(symbol: &str, price: f64) -> Alert {
        Alert::new(symbol, price, ChannelId(1))
    }

    #[tokio::test]
    async fn load_reads_existing_alerts() {
        let storage = Arc::new(MemoryStorage::with(vec![alert("EURUSD", 1.1)]));
        let store = AlertStore::load(storage).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.find("EURUSD", 1.1).is_some());
    }

    #[tokio::test]
    async fn insert_persists_full_collection() {
        let storage = Arc::new(MemoryStorage::default());
        let mut store = AlertStore::load(storage.clone()).await.unwrap();

        store.insert(alert("EURUSD", 1.1)).await.unwrap();
        store.insert(alert("GBPUSD", 1.3)).await.unwrap();

        assert_eq!(storage.saves(), 2);
        assert_eq!(storage.snapshot(), store.alerts());
    }

    #[tokio::test]
    async fn remove_batch_saves_once_and_keeps_order() {
        let storage = Arc::new(MemoryStorage::with(vec![
            alert("A", 1.0),
            alert("B", 2.0),
            alert("C", 3.0),
            alert("D", 4.0),
        ]));
        let mut store = AlertStore::load(storage.clone()).await.unwrap();

        let removed = store.remove_batch(&[0, 2]).await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(storage.saves(), 1);
        let symbols: Vec<_> = store.alerts().iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(symbols, ["B", "D"]);
        assert_eq!(storage.snapshot(), store.alerts());
    }

    #[tokio::test]
    async fn empty_batch_does_not_save() {
        let storage = Arc::new(MemoryStorage::with(vec![alert("A", 1.0)]));
        let mut store = AlertStore::load(storage.clone()).await.unwrap();

        assert_eq!(store.remove_batch(&[]).await.unwrap(), 0);
        assert_eq!(storage.saves(), 0);
    }

    #[tokio::test]
    async fn save_failure_propagates() {
        let storage = Arc::new(MemoryStorage::failing());
        let mut store = AlertStore::load(storage).await.unwrap();
        assert!(store.insert(alert("EURUSD", 1.1)).await.is_err());
    }
}
