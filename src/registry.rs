use error_stack::Report;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::model::{Alert, ChannelId};
use crate::store::AlertStore;

const ALERT_COMMAND: &str = "alert";

/// A chat command addressed to the bot.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Alert { symbol: String, target_price: f64 },
    /// Recognised command with unusable arguments; carries the usage hint.
    Invalid { usage: String },
}

impl Command {
    /// Parse `<prefix>alert <SYMBOL> <TARGET_PRICE>`. Words after the price
    /// are ignored.
    ///
    /// Returns `None` for anything that is not addressed to a known command.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let rest = content.trim().strip_prefix(prefix)?;
        let mut parts = rest.split_whitespace();
        if parts.next()? != ALERT_COMMAND {
            return None;
        }

        let usage = || Command::Invalid {
            usage: format!("Usage: {prefix}{ALERT_COMMAND} <SYMBOL> <TARGET_PRICE>"),
        };

        let (Some(symbol), Some(price)) = (parts.next(), parts.next()) else {
            return Some(usage());
        };
        match price.parse::<f64>() {
            Ok(target_price) if target_price.is_finite() => Some(Command::Alert {
                symbol: symbol.to_owned(),
                target_price,
            }),
            _ => Some(usage()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Created(Alert),
    /// An alert with the same symbol and target already exists.
    Duplicate(Alert),
}

impl RegisterOutcome {
    /// Text sent back to the channel that issued the command.
    pub fn reply(&self) -> String {
        match self {
            Self::Created(alert) => format!(
                "Alert set for **{}** at **{}** in this channel.",
                alert.symbol, alert.target_price
            ),
            Self::Duplicate(alert) => format!(
                "An alert for **{}** at **{}** already exists.",
                alert.symbol, alert.target_price
            ),
        }
    }
}

/// Store a new alert bound to `origin`, unless `(symbol, target_price)` is
/// already registered. The symbol is upper-cased first; the price is not
/// range-checked.
pub async fn register(
    store: &mut AlertStore,
    symbol: &str,
    target_price: f64,
    origin: ChannelId,
) -> Result<RegisterOutcome, Report<StorageError>> {
    let alert = Alert::new(symbol, target_price, origin);

    if let Some(existing) = store.find(&alert.symbol, alert.target_price) {
        debug!(symbol = %alert.symbol, target_price, "duplicate alert rejected");
        return Ok(RegisterOutcome::Duplicate(existing.clone()));
    }

    store.insert(alert.clone()).await?;
    info!(
        symbol = %alert.symbol,
        target_price,
        channel = %origin,
        "alert registered"
    );
    Ok(RegisterOutcome::Created(alert))
}
