pub mod tradingview;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::FetchError;
use crate::model::PriceRange;

/// Source of the latest candle bounds for a symbol.
///
/// Uses `BoxFuture` instead of `async fn` in trait to keep the trait
/// object-safe (`dyn MarketData`).
pub trait MarketData: Send + Sync {
    /// Low/high of the most recent candle for `symbol`.
    fn fetch_range(&self, symbol: &str) -> BoxFuture<'_, Result<PriceRange, Report<FetchError>>>;

    /// Human-readable candle interval used in notifications (e.g. `"15m"`).
    fn describe_interval(&self) -> &str;
}
