//! In-memory fakes for the storage, market and chat seams.

use std::collections::HashMap;
use std::sync::Mutex;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::chat::ChatClient;
use crate::error::{ChatError, FetchError, StorageError};
use crate::market::MarketData;
use crate::model::{Alert, ChannelId, PriceRange};
use crate::storage::Storage;

#[derive(Default)]
pub struct MemoryStorage {
    alerts: Mutex<Vec<Alert>>,
    saves: Mutex<usize>,
    fail_saves: bool,
}

impl MemoryStorage {
    pub fn with(alerts: Vec<Alert>) -> Self {
        Self {
            alerts: Mutex::new(alerts),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }

    pub fn snapshot(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>> {
        let alerts = self.snapshot();
        Box::pin(async move { Ok(alerts) })
    }

    fn save(&self, alerts: &[Alert]) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let alerts = alerts.to_vec();
        Box::pin(async move {
            if self.fail_saves {
                return Err(Report::new(StorageError::Write));
            }
            *self.alerts.lock().unwrap() = alerts;
            *self.saves.lock().unwrap() += 1;
            Ok(())
        })
    }
}

/// Market fake answering from a fixed table; unknown symbols fail.
#[derive(Default)]
pub struct StubMarket {
    ranges: HashMap<String, PriceRange>,
    requests: Mutex<Vec<String>>,
}

impl StubMarket {
    pub fn with_range(mut self, symbol: &str, low: f64, high: f64) -> Self {
        self.ranges
            .insert(symbol.to_owned(), PriceRange { low, high });
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl MarketData for StubMarket {
    fn fetch_range(&self, symbol: &str) -> BoxFuture<'_, Result<PriceRange, Report<FetchError>>> {
        self.requests.lock().unwrap().push(symbol.to_owned());
        let result = self
            .ranges
            .get(symbol)
            .copied()
            .ok_or_else(|| {
                Report::new(FetchError::UnknownSymbol {
                    symbol: symbol.to_owned(),
                })
            });
        Box::pin(async move { result })
    }

    fn describe_interval(&self) -> &str {
        "15m"
    }
}

/// Chat fake that records every outbound message.
#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(ChannelId, String)>>,
    unreachable: Vec<ChannelId>,
}

impl RecordingChat {
    pub fn unreachable(channel: ChannelId) -> Self {
        Self {
            unreachable: vec![channel],
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel: ChannelId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, text)| text)
            .collect()
    }
}

impl ChatClient for RecordingChat {
    fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> BoxFuture<'_, Result<(), Report<ChatError>>> {
        let text = text.to_owned();
        Box::pin(async move {
            if self.unreachable.contains(&channel) {
                return Err(Report::new(ChatError::Send { channel: channel.0 }));
            }
            self.sent.lock().unwrap().push((channel, text));
            Ok(())
        })
    }
}
