use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::Alert;
use crate::storage::Storage;

const HEADER: [&str; 3] = ["symbol", "target_price", "channel_id"];

/// Alerts kept in a comma-separated file with a fixed three-column header.
pub struct CsvFileStorage {
    path: PathBuf,
}

impl CsvFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for CsvFileStorage {
    fn load(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>> {
        Box::pin(async move {
            let bytes = match tokio::fs::read(&self.path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(Report::new(e)
                        .change_context(StorageError::Read)
                        .attach(format!("path: {}", self.path.display())));
                }
            };
            parse_alerts(&bytes).attach_with(|| format!("path: {}", self.path.display()))
        })
    }

    fn save(&self, alerts: &[Alert]) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let rendered = render_alerts(alerts);
        Box::pin(async move {
            let bytes = rendered?;
            tokio::fs::write(&self.path, bytes)
                .await
                .change_context(StorageError::Write)
                .attach_with(|| format!("path: {}", self.path.display()))
        })
    }
}

fn parse_alerts(bytes: &[u8]) -> Result<Vec<Alert>, Report<StorageError>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .change_context(StorageError::Parse { line: 1 })?
        .clone();

    let mut alerts: Vec<Alert> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(0);
            Report::new(e).change_context(StorageError::Parse { line })
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row: Alert = record
            .deserialize(Some(&headers))
            .change_context(StorageError::Parse { line })?;

        if !row.target_price.is_finite() {
            return Err(Report::new(StorageError::Parse { line })
                .attach(format!("non-finite target price for {}", row.symbol)));
        }
        // Hand-edited rows may be lower-case; the stored key is always upper-case.
        let alert = Alert::new(&row.symbol, row.target_price, row.channel_id);
        if alerts
            .iter()
            .any(|a| a.same_target(&alert.symbol, alert.target_price))
        {
            return Err(Report::new(StorageError::Parse { line }).attach(format!(
                "duplicate alert for {} at {}",
                alert.symbol, alert.target_price
            )));
        }
        alerts.push(alert);
    }
    Ok(alerts)
}

fn render_alerts(alerts: &[Alert]) -> Result<Vec<u8>, Report<StorageError>> {
    // Header is written by hand so an empty collection still gets one.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(HEADER)
        .change_context(StorageError::Write)?;
    for alert in alerts {
        writer.serialize(alert).change_context(StorageError::Write)?;
    }

    writer
        .into_inner()
        .map_err(|e| Report::new(e.into_error()).change_context(StorageError::Write))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelId;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("fx-alert-bot-{}.csv", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let storage = CsvFileStorage::new(temp_path());
        let alerts = storage.load().await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_preserves_alerts() {
        let path = temp_path();
        let storage = CsvFileStorage::new(&path);
        let alerts = vec![
            Alert::new("EURUSD", 1.2345, ChannelId(1_234_567_890_123_456_789)),
            Alert::new("GBPJPY", 190.0, ChannelId(42)),
            Alert::new("USDCHF", -0.5, ChannelId(42)),
        ];

        storage.save(&alerts).await.unwrap();
        let loaded = storage.load().await.unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, alerts);
    }

    #[tokio::test]
    async fn empty_collection_writes_header_only() {
        let path = temp_path();
        let storage = CsvFileStorage::new(&path);
        storage.save(&[]).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(content.trim_end(), "symbol,target_price,channel_id");
    }

    #[test]
    fn rendered_rows_use_text_fields() {
        let bytes = render_alerts(&[Alert::new("EURUSD", 1.1, ChannelId(99))]).unwrap();
        let content = String::from_utf8(bytes).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("symbol,target_price,channel_id"));
        assert_eq!(lines.next(), Some("EURUSD,1.1,99"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn columns_are_matched_by_header_name() {
        let data = b"channel_id,symbol,target_price\n7,EURUSD,1.5\n";
        let alerts = parse_alerts(data).unwrap();
        assert_eq!(alerts, vec![Alert::new("EURUSD", 1.5, ChannelId(7))]);
    }

    #[test]
    fn malformed_price_is_rejected() {
        let data = b"symbol,target_price,channel_id\nEURUSD,abc,7\n";
        let err = parse_alerts(data).unwrap_err();
        assert!(matches!(err.current_context(), StorageError::Parse { line: 2 }));
    }

    #[test]
    fn malformed_channel_id_is_rejected() {
        let data = b"symbol,target_price,channel_id\nEURUSD,1.1,general\n";
        assert!(parse_alerts(data).is_err());
    }

    #[test]
    fn missing_column_is_rejected() {
        let data = b"symbol,target_price\nEURUSD,1.1\n";
        assert!(parse_alerts(data).is_err());
    }

    #[test]
    fn lower_case_symbols_are_normalized() {
        let data = b"symbol,target_price,channel_id\neurusd,1.1,5\n";
        let alerts = parse_alerts(data).unwrap();
        assert_eq!(alerts, vec![Alert::new("EURUSD", 1.1, ChannelId(5))]);
    }

    #[test]
    fn duplicate_key_is_rejected_with_its_line() {
        let data = b"symbol,target_price,channel_id\neurusd,1.1,5\nGBPUSD,1.3,5\nEURUSD,1.1,6\n";
        let err = parse_alerts(data).unwrap_err();
        assert!(matches!(err.current_context(), StorageError::Parse { line: 4 }));
    }

    #[test]
    fn same_symbol_at_other_price_is_not_a_duplicate() {
        let data = b"symbol,target_price,channel_id\nEURUSD,1.1,5\nEURUSD,1.2,5\n";
        assert_eq!(parse_alerts(data).unwrap().len(), 2);
    }

    #[test]
    fn non_finite_price_is_rejected() {
        let data = b"symbol,target_price,channel_id\nEURUSD,NaN,7\n";
        assert!(parse_alerts(data).is_err());
    }
}
