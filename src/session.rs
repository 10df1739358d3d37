use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::ChatClient;
use crate::config::{AfterCheck, AppConfig};
use crate::error::StorageError;
use crate::market::MarketData;
use crate::matcher::{self, PassSummary};
use crate::model::{ChannelId, ChatEvent, IncomingMessage};
use crate::registry::{self, Command};
use crate::store::AlertStore;

/// Session policy, resolved from configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub after_check: AfterCheck,
    pub control_channel: ChannelId,
    pub prompt_timeout: Duration,
    pub close_token: String,
    pub continue_token: String,
    pub command_prefix: String,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            after_check: config.session.after_check,
            control_channel: config.discord.control_channel(),
            prompt_timeout: Duration::from_secs(config.session.prompt_timeout_secs),
            close_token: config.session.close_token.clone(),
            continue_token: config.session.continue_token.clone(),
            command_prefix: config.discord.command_prefix.clone(),
        }
    }
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// `after_check = "close"`: finished right after the price check.
    ClosedAfterCheck,
    /// The close token was received in the control channel.
    ClosedByControl,
    /// Nobody answered the prompt in time.
    PromptTimedOut,
    /// No control channel configured, so the prompt could not be asked.
    NoControlChannel,
    /// Interrupted locally (Ctrl+C).
    Interrupted,
    /// The event stream ended.
    Disconnected,
}

enum PromptReply {
    Close,
    Continue,
}

/// Outcome of waiting on the event stream.
enum Wait<T> {
    Done(T),
    Ended(SessionOutcome),
}

/// Drives one chat session: a single price check after `Ready`, the
/// keep-running prompt, then command dispatch until shutdown.
///
/// Events are handled one at a time, so the store is never mutated
/// concurrently.
pub struct SessionController {
    settings: SessionSettings,
    store: AlertStore,
    market: Arc<dyn MarketData>,
    chat: Arc<dyn ChatClient>,
}

impl SessionController {
    pub fn new(
        settings: SessionSettings,
        store: AlertStore,
        market: Arc<dyn MarketData>,
        chat: Arc<dyn ChatClient>,
    ) -> Self {
        Self {
            settings,
            store,
            market,
            chat,
        }
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ChatEvent>,
        interrupt: CancellationToken,
    ) -> Result<SessionOutcome, Report<StorageError>> {
        match self.wait_ready(&mut events, &interrupt).await? {
            Wait::Done(user) => info!(user = %user, "chat session ready"),
            Wait::Ended(outcome) => return Ok(outcome),
        }

        let summary =
            matcher::run_once(&mut self.store, self.market.as_ref(), self.chat.as_ref()).await?;

        if self.settings.after_check == AfterCheck::Close {
            info!("closing after price check");
            return Ok(SessionOutcome::ClosedAfterCheck);
        }

        let control = self.settings.control_channel;
        if control.is_none() {
            warn!("no control channel configured, closing after price check");
            return Ok(SessionOutcome::NoControlChannel);
        }

        self.say(control, &self.prompt_text(&summary)).await;

        match self.wait_prompt_reply(&mut events, &interrupt).await? {
            Wait::Done(Some(PromptReply::Close)) => {
                self.say(control, "Shutting down.").await;
                return Ok(SessionOutcome::ClosedByControl);
            }
            Wait::Done(Some(PromptReply::Continue)) => {
                let text = format!(
                    "Staying online. Send **{}** here at any time to shut down.",
                    self.settings.close_token
                );
                self.say(control, &text).await;
            }
            Wait::Done(None) => {
                let text = format!(
                    "No reply within {} seconds, shutting down.",
                    self.settings.prompt_timeout.as_secs()
                );
                self.say(control, &text).await;
                return Ok(SessionOutcome::PromptTimedOut);
            }
            Wait::Ended(outcome) => return Ok(outcome),
        }

        self.serve(&mut events, &interrupt).await
    }

    async fn wait_ready(
        &mut self,
        events: &mut mpsc::Receiver<ChatEvent>,
        interrupt: &CancellationToken,
    ) -> Result<Wait<String>, Report<StorageError>> {
        loop {
            let event = tokio::select! {
                _ = interrupt.cancelled() => return Ok(Wait::Ended(SessionOutcome::Interrupted)),
                event = events.recv() => event,
            };
            match event {
                None => return Ok(Wait::Ended(SessionOutcome::Disconnected)),
                Some(ChatEvent::Ready { user }) => return Ok(Wait::Done(user)),
                Some(ChatEvent::Message(message)) => self.dispatch(&message).await?,
            }
        }
    }

    /// Wait for one of the two tokens in the control channel, at most
    /// `prompt_timeout`. Anything else is dispatched as usual. `None` means
    /// the deadline passed.
    async fn wait_prompt_reply(
        &mut self,
        events: &mut mpsc::Receiver<ChatEvent>,
        interrupt: &CancellationToken,
    ) -> Result<Wait<Option<PromptReply>>, Report<StorageError>> {
        let deadline = Instant::now() + self.settings.prompt_timeout;

        loop {
            let event = tokio::select! {
                _ = interrupt.cancelled() => return Ok(Wait::Ended(SessionOutcome::Interrupted)),
                _ = sleep_until(deadline) => {
                    info!("no reply to keep-running prompt");
                    return Ok(Wait::Done(None));
                }
                event = events.recv() => event,
            };
            let message = match event {
                None => return Ok(Wait::Ended(SessionOutcome::Disconnected)),
                Some(ChatEvent::Ready { .. }) => {
                    debug!("gateway session resumed");
                    continue;
                }
                Some(ChatEvent::Message(message)) => message,
            };

            if self.is_control_token(&message, &self.settings.close_token) {
                info!(author = %message.author, "close requested from control channel");
                return Ok(Wait::Done(Some(PromptReply::Close)));
            }
            if self.is_control_token(&message, &self.settings.continue_token) {
                info!(author = %message.author, "keep running requested from control channel");
                return Ok(Wait::Done(Some(PromptReply::Continue)));
            }
            self.dispatch(&message).await?;
        }
    }

    /// Handle commands until a lone close token arrives in the control
    /// channel, the stream ends or the process is interrupted.
    async fn serve(
        &mut self,
        events: &mut mpsc::Receiver<ChatEvent>,
        interrupt: &CancellationToken,
    ) -> Result<SessionOutcome, Report<StorageError>> {
        loop {
            let event = tokio::select! {
                _ = interrupt.cancelled() => return Ok(SessionOutcome::Interrupted),
                event = events.recv() => event,
            };
            let message = match event {
                None => return Ok(SessionOutcome::Disconnected),
                Some(ChatEvent::Ready { .. }) => {
                    debug!("gateway session resumed");
                    continue;
                }
                Some(ChatEvent::Message(message)) => message,
            };

            if self.is_control_token(&message, &self.settings.close_token) {
                info!(author = %message.author, "close requested from control channel");
                self.say(message.channel_id, "Shutting down.").await;
                return Ok(SessionOutcome::ClosedByControl);
            }
            self.dispatch(&message).await?;
        }
    }

    fn is_control_token(&self, message: &IncomingMessage, token: &str) -> bool {
        message.channel_id == self.settings.control_channel && message.content.trim() == token
    }

    async fn dispatch(&mut self, message: &IncomingMessage) -> Result<(), Report<StorageError>> {
        let reply = match Command::parse(&self.settings.command_prefix, &message.content) {
            None => return Ok(()),
            Some(Command::Invalid { usage }) => usage,
            Some(Command::Alert {
                symbol,
                target_price,
            }) => {
                registry::register(&mut self.store, &symbol, target_price, message.channel_id)
                    .await?
                    .reply()
            }
        };
        self.say(message.channel_id, &reply).await;
        Ok(())
    }

    fn prompt_text(&self, summary: &PassSummary) -> String {
        format!(
            "Price check finished: {} checked, {} triggered, {} failed. \
             Reply **{}** to shut down now or **{}** to keep running. \
             Shutting down automatically in {} seconds.",
            summary.checked,
            summary.matched,
            summary.failed,
            self.settings.close_token,
            self.settings.continue_token,
            self.settings.prompt_timeout.as_secs()
        )
    }

    async fn say(&self, channel: ChannelId, text: &str) {
        if let Err(e) = self.chat.send_message(channel, text).await {
            warn!(channel = %channel, error = ?e, "failed to send message");
        }
    }
}
