use std::fmt;

use serde::{Deserialize, Serialize};

/// Discord snowflake of a text channel.
///
/// `0` is reserved to mean "no channel configured".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub const NONE: ChannelId = ChannelId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered price-target alert. Field order matches the file columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: String,
    pub target_price: f64,
    pub channel_id: ChannelId,
}

impl Alert {
    pub fn new(symbol: &str, target_price: f64, channel_id: ChannelId) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            target_price,
            channel_id,
        }
    }

    /// Uniqueness key: symbol and exact target price.
    pub fn same_target(&self, symbol: &str, target_price: f64) -> bool {
        self.symbol == symbol && self.target_price == target_price
    }
}

/// Low/high bounds of the most recent candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub low: f64,
    pub high: f64,
}

impl PriceRange {
    /// Inclusive on both ends.
    pub fn contains(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Candle timeframe supported by the scanner.
///
/// String representations match the config file format (e.g. `"15m"`, `"1h"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeFrame {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour2,
    Hour4,
    Day1,
    Week1,
    Month1,
}

impl TimeFrame {
    /// Parse a config-format string into a `TimeFrame`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::Min1),
            "5m" => Some(Self::Min5),
            "15m" => Some(Self::Min15),
            "30m" => Some(Self::Min30),
            "1h" => Some(Self::Hour1),
            "2h" => Some(Self::Hour2),
            "4h" => Some(Self::Hour4),
            "1d" => Some(Self::Day1),
            "1W" => Some(Self::Week1),
            "1M" => Some(Self::Month1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour2 => "2h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
            Self::Week1 => "1W",
            Self::Month1 => "1M",
        }
    }

    /// Suffix appended to scanner column names (`"low|15"`). Daily has none.
    pub fn tradingview_suffix(self) -> &'static str {
        match self {
            Self::Min1 => "|1",
            Self::Min5 => "|5",
            Self::Min15 => "|15",
            Self::Min30 => "|30",
            Self::Hour1 => "|60",
            Self::Hour2 => "|120",
            Self::Hour4 => "|240",
            Self::Day1 => "",
            Self::Week1 => "|1W",
            Self::Month1 => "|1M",
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub channel_id: ChannelId,
    pub author: String,
    pub content: String,
}

/// Events produced by the chat gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Ready { user: String },
    Message(IncomingMessage),
}
