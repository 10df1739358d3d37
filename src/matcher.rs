use error_stack::Report;
use tracing::{debug, error, info, warn};

use crate::chat::ChatClient;
use crate::error::StorageError;
use crate::market::MarketData;
use crate::model::{Alert, PriceRange};
use crate::store::AlertStore;

/// Counters for one pass over the stored alerts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub checked: usize,
    pub matched: usize,
    pub failed: usize,
}

enum Evaluation {
    Matched(PriceRange),
    NoMatch(PriceRange),
    FetchFailed,
}

/// Check every alert once, in stored order.
///
/// Alerts whose target lies inside the latest candle are announced in their
/// channel and then removed together, with a single save at the end. A fetch
/// failure only skips the alert it belongs to. Storage errors are returned.
pub async fn run_once(
    store: &mut AlertStore,
    market: &dyn MarketData,
    chat: &dyn ChatClient,
) -> Result<PassSummary, Report<StorageError>> {
    if store.is_empty() {
        info!("no alerts registered, skipping price check");
        return Ok(PassSummary::default());
    }
    info!(alerts = store.len(), "price check started");

    let mut summary = PassSummary::default();
    let mut matched = Vec::new();

    for (index, alert) in store.alerts().iter().enumerate() {
        summary.checked += 1;
        match evaluate(alert, market).await {
            Evaluation::Matched(range) => {
                summary.matched += 1;
                debug!(
                    symbol = %alert.symbol,
                    target_price = alert.target_price,
                    low = range.low,
                    high = range.high,
                    "target touched"
                );
                notify(alert, market.describe_interval(), chat).await;
                matched.push(index);
            }
            Evaluation::NoMatch(range) => {
                debug!(
                    symbol = %alert.symbol,
                    target_price = alert.target_price,
                    low = range.low,
                    high = range.high,
                    "target not touched"
                );
            }
            Evaluation::FetchFailed => summary.failed += 1,
        }
    }

    store.remove_batch(&matched).await?;

    info!(
        checked = summary.checked,
        matched = summary.matched,
        failed = summary.failed,
        remaining = store.len(),
        "price check finished"
    );
    Ok(summary)
}

async fn evaluate(alert: &Alert, market: &dyn MarketData) -> Evaluation {
    match market.fetch_range(&alert.symbol).await {
        Ok(range) if range.contains(alert.target_price) => Evaluation::Matched(range),
        Ok(range) => Evaluation::NoMatch(range),
        Err(e) => {
            error!(symbol = %alert.symbol, error = ?e, "failed to fetch price range");
            Evaluation::FetchFailed
        }
    }
}

async fn notify(alert: &Alert, interval: &str, chat: &dyn ChatClient) {
    let text = notification_text(alert, interval);
    // The alert is consumed even if its channel can no longer be reached.
    if let Err(e) = chat.send_message(alert.channel_id, &text).await {
        warn!(
            symbol = %alert.symbol,
            channel = %alert.channel_id,
            error = ?e,
            "failed to deliver alert notification"
        );
    }
}

fn notification_text(alert: &Alert, interval: &str) -> String {
    format!(
        "🚨 Alert: **{}** touched the target price **{}** within the last {} candle!",
        alert.symbol, alert.target_price, interval
    )
}
