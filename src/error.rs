use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("failed to read alert file")]
    Read,
    #[display("failed to write alert file")]
    Write,
    #[display("malformed alert row at line {line}")]
    Parse { line: u64 },
}

/// Failure to obtain a price range for one symbol.
#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[display("request for {symbol} failed")]
    Request { symbol: String },
    #[display("provider rejected request for {symbol}")]
    Status { symbol: String },
    #[display("failed to parse response for {symbol}")]
    ResponseParse { symbol: String },
    #[display("unknown symbol {symbol}")]
    UnknownSymbol { symbol: String },
    #[display("response for {symbol} has no {column} value")]
    MissingField { symbol: String, column: String },
}

#[derive(Debug, Display, Error)]
pub enum ChatError {
    #[display("failed to connect to chat gateway")]
    Connection,
    #[display("unexpected gateway payload")]
    Protocol,
    #[display("gateway rejected the session (close code {code})")]
    Rejected { code: u16 },
    #[display("failed to send message to channel {channel}")]
    Send { channel: u64 },
    #[display("chat session closed")]
    Closed,
}
