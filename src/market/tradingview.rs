use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::Deserialize;
use tracing::debug;

use crate::config::MarketConfig;
use crate::error::FetchError;
use crate::market::MarketData;
use crate::model::{PriceRange, TimeFrame};

const SCANNER_BASE_URL: &str = "https://scanner.tradingview.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Candle bounds from the TradingView scanner endpoint.
pub struct TradingViewScanner {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    base_url: String,
    screener: String,
    exchange: String,
    timeframe: TimeFrame,
}

impl TradingViewScanner {
    pub fn new(config: &MarketConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(nonzero!(1u32));
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            base_url: SCANNER_BASE_URL.to_owned(),
            screener: config.screener.clone(),
            exchange: config.exchange.clone(),
            timeframe: config.timeframe(),
        }
    }

    /// `EURUSD` becomes `OANDA:EURUSD`; already qualified tickers pass through.
    fn ticker(&self, symbol: &str) -> String {
        if symbol.contains(':') {
            symbol.to_owned()
        } else {
            format!("{}:{}", self.exchange, symbol)
        }
    }

    fn columns(&self) -> [String; 2] {
        let suffix = self.timeframe.tradingview_suffix();
        [format!("low{suffix}"), format!("high{suffix}")]
    }

    async fn scan(&self, symbol: &str) -> Result<PriceRange, Report<FetchError>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}/scan", self.base_url, self.screener);
        let ticker = self.ticker(symbol);
        let columns = self.columns();
        let body = build_scan_request(&ticker, &columns);

        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .change_context_lazy(|| FetchError::Request {
                symbol: symbol.to_owned(),
            })?;

        if !response.status().is_success() {
            return Err(Report::new(FetchError::Status {
                symbol: symbol.to_owned(),
            })
            .attach(format!("HTTP status: {}", response.status())));
        }

        let scan: ScanResponse =
            response
                .json()
                .await
                .change_context_lazy(|| FetchError::ResponseParse {
                    symbol: symbol.to_owned(),
                })?;

        let range = parse_range(symbol, &columns, scan)?;
        debug!(
            symbol,
            ticker = %ticker,
            timeframe = %self.timeframe,
            low = range.low,
            high = range.high,
            "candle range fetched"
        );
        Ok(range)
    }
}

impl MarketData for TradingViewScanner {
    fn fetch_range(&self, symbol: &str) -> BoxFuture<'_, Result<PriceRange, Report<FetchError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move { self.scan(&symbol).await })
    }

    fn describe_interval(&self) -> &str {
        self.timeframe.as_str()
    }
}

fn build_scan_request(ticker: &str, columns: &[String]) -> serde_json::Value {
    serde_json::json!({
        "symbols": {
            "tickers": [ticker],
            "query": { "types": [] }
        },
        "columns": columns
    })
}

fn parse_range(
    symbol: &str,
    columns: &[String; 2],
    scan: ScanResponse,
) -> Result<PriceRange, Report<FetchError>> {
    let row = scan.data.unwrap_or_default().into_iter().next().ok_or_else(|| {
        Report::new(FetchError::UnknownSymbol {
            symbol: symbol.to_owned(),
        })
    })?;

    let value = |index: usize| -> Result<f64, Report<FetchError>> {
        row.d
            .get(index)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                Report::new(FetchError::MissingField {
                    symbol: symbol.to_owned(),
                    column: columns[index].clone(),
                })
                .attach(format!("ticker: {}", row.s))
            })
    };

    Ok(PriceRange {
        low: value(0)?,
        high: value(1)?,
    })
}

// ── Scanner response types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    data: Option<Vec<ScanRow>>,
}

#[derive(Debug, Deserialize)]
struct ScanRow {
    s: String,
    d: Vec<Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> TradingViewScanner {
        TradingViewScanner::new(&MarketConfig::default())
    }

    fn columns() -> [String; 2] {
        ["low|15".to_owned(), "high|15".to_owned()]
    }

    fn response(json: &str) -> ScanResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn ticker_is_prefixed_with_exchange() {
        let scanner = scanner();
        assert_eq!(scanner.ticker("EURUSD"), "OANDA:EURUSD");
        assert_eq!(scanner.ticker("FX_IDC:EURUSD"), "FX_IDC:EURUSD");
    }

    #[test]
    fn default_columns_use_fifteen_minute_candle() {
        assert_eq!(scanner().columns(), columns());
        assert_eq!(scanner().describe_interval(), "15m");
    }

    #[test]
    fn scan_request_body_shape() {
        let body = build_scan_request("OANDA:EURUSD", &columns());
        assert_eq!(body["symbols"]["tickers"][0], "OANDA:EURUSD");
        assert_eq!(body["columns"][0], "low|15");
        assert_eq!(body["columns"][1], "high|15");
        assert!(body["symbols"]["query"]["types"].as_array().unwrap().is_empty());
    }

    #[test]
    fn parses_low_and_high() {
        let scan = response(r#"{"totalCount":1,"data":[{"s":"OANDA:EURUSD","d":[1.05,1.15]}]}"#);
        let range = parse_range("EURUSD", &columns(), scan).unwrap();
        assert_eq!(range, PriceRange { low: 1.05, high: 1.15 });
    }

    #[test]
    fn empty_data_is_unknown_symbol() {
        let scan = response(r#"{"totalCount":0,"data":[]}"#);
        let err = parse_range("XXXYYY", &columns(), scan).unwrap_err();
        assert!(matches!(err.current_context(), FetchError::UnknownSymbol { .. }));
    }

    #[test]
    fn missing_data_field_is_unknown_symbol() {
        let scan = response(r#"{"error":"bad request"}"#);
        assert!(parse_range("EURUSD", &columns(), scan).is_err());
    }

    #[test]
    fn null_value_is_missing_field() {
        let scan = response(r#"{"data":[{"s":"OANDA:EURUSD","d":[1.05,null]}]}"#);
        let err = parse_range("EURUSD", &columns(), scan).unwrap_err();
        match err.current_context() {
            FetchError::MissingField { column, .. } => assert_eq!(column, "high|15"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn short_row_is_missing_field() {
        let scan = response(r#"{"data":[{"s":"OANDA:EURUSD","d":[1.05]}]}"#);
        assert!(parse_range("EURUSD", &columns(), scan).is_err());
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_range() {
        let range = scanner().fetch_range("EURUSD").await.unwrap();
        assert!(range.low <= range.high);
    }
}
