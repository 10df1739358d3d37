pub mod csv_file;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::Alert;

/// Durable backing for the alert collection.
///
/// Writes always replace the whole collection; there is no partial update.
pub trait Storage: Send + Sync {
    /// Read every persisted alert. Missing data yields an empty collection.
    fn load(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>>;

    fn save(&self, alerts: &[Alert]) -> BoxFuture<'_, Result<(), Report<StorageError>>>;
}
