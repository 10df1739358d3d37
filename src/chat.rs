pub mod discord;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::ChatError;
use crate::model::ChannelId;

/// Outbound side of the chat platform.
pub trait ChatClient: Send + Sync {
    fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> BoxFuture<'_, Result<(), Report<ChatError>>>;
}
