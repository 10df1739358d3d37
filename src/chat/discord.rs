use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use futures::{SinkExt, Stream, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::ChatClient;
use crate::error::ChatError;
use crate::model::{ChannelId, ChatEvent, IncomingMessage};

const DISCORD_API_URL: &str = "https://discord.com/api/v10";
const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Global bot limit is 50 req/s; messages from this bot are rare.
const DISCORD_REQUESTS_PER_SECOND: u32 = 5;

// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close codes after which reconnecting cannot succeed.
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

/// REST side of the bot: posts messages to channels.
pub struct DiscordRest {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    token: String,
}

impl DiscordRest {
    pub fn new(token: &str) -> Self {
        let quota = Quota::per_second(nonzero!(DISCORD_REQUESTS_PER_SECOND));
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            token: token.to_owned(),
        }
    }
}

impl ChatClient for DiscordRest {
    fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> BoxFuture<'_, Result<(), Report<ChatError>>> {
        let body = serde_json::json!({ "content": text });
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!("{DISCORD_API_URL}/channels/{channel}/messages");
            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bot {}", self.token))
                .json(&body)
                .send()
                .await
                .change_context(ChatError::Send { channel: channel.0 })?;

            if !response.status().is_success() {
                return Err(Report::new(ChatError::Send { channel: channel.0 })
                    .attach(format!("HTTP status: {}", response.status())));
            }

            debug!(channel = %channel, "message sent");
            Ok(())
        })
    }
}

/// Gateway side of the bot: turns the WebSocket feed into [`ChatEvent`]s.
pub struct DiscordGateway {
    token: String,
}

impl DiscordGateway {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_owned(),
        }
    }

    /// Forward events into `tx` until `cancel` is triggered or the receiver
    /// is dropped. Dropped connections are retried with exponential backoff;
    /// a rejected identify (bad token, disallowed intents) is returned.
    pub async fn run(
        &self,
        tx: mpsc::Sender<ChatEvent>,
        cancel: CancellationToken,
    ) -> Result<(), Report<ChatError>> {
        let mut backoff = Backoff::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match run_session(&self.token, &tx, &cancel, &mut backoff).await {
                Ok(()) => break,
                Err(e) if matches!(e.current_context(), ChatError::Rejected { .. }) => {
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, retry_in = ?delay, "discord gateway disconnected, retrying...");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        debug!("discord gateway stopped");
        Ok(())
    }
}

/// Reconnect delay: doubles up to [`MAX_BACKOFF`] and starts over once a
/// connection gets as far as `Hello`.
#[derive(Debug)]
struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }
}

/// A heartbeat due before the previous one was acknowledged means the
/// connection is dead even if the socket is still open.
#[derive(Debug, Default)]
struct HeartbeatMonitor {
    awaiting_ack: bool,
}

impl HeartbeatMonitor {
    fn beat(&mut self) -> Result<(), Report<ChatError>> {
        if self.awaiting_ack {
            return Err(Report::new(ChatError::Protocol)
                .attach("previous heartbeat was not acknowledged"));
        }
        self.awaiting_ack = true;
        Ok(())
    }

    fn ack(&mut self) {
        self.awaiting_ack = false;
    }
}

async fn run_session(
    token: &str,
    tx: &mpsc::Sender<ChatEvent>,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> Result<(), Report<ChatError>> {
    let (ws_stream, _) = connect_async(DISCORD_GATEWAY_URL)
        .await
        .change_context(ChatError::Connection)?;

    let (mut write, mut read) = ws_stream.split();

    let heartbeat_ms = read_hello(&mut read).await?;
    backoff.reset();
    write
        .send(Message::Text(identify_payload(token).into()))
        .await
        .change_context(ChatError::Connection)?;

    info!(heartbeat_ms, "discord gateway identified");

    let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
    heartbeat.tick().await; // skip immediate first tick
    let mut monitor = HeartbeatMonitor::default();
    let mut sequence: Option<u64> = None;
    // Events wait here while the receiver is full so heartbeats keep flowing.
    let mut pending: VecDeque<ChatEvent> = VecDeque::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("discord gateway cancelled");
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            _ = tx.closed() => {
                debug!("event receiver dropped, closing gateway");
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            _ = heartbeat.tick() => {
                monitor.beat()?;
                write.send(Message::Text(heartbeat_payload(sequence).into())).await
                    .change_context(ChatError::Connection)?;
            }
            permit = tx.reserve(), if !pending.is_empty() => {
                let Ok(permit) = permit else {
                    debug!("event receiver dropped, closing gateway");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                if let Some(event) = pending.pop_front() {
                    permit.send(event);
                }
            }
            msg = read.next() => {
                match msg {
                    None => return Err(Report::new(ChatError::Closed)),
                    Some(Err(e)) => return Err(Report::new(e).change_context(ChatError::Connection)),
                    Some(Ok(Message::Text(text))) => {
                        let payload = match serde_json::from_str::<GatewayPayload>(text.as_str()) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(error = %e, "discord payload parse error");
                                continue;
                            }
                        };
                        if payload.s.is_some() {
                            sequence = payload.s;
                        }
                        match payload.op {
                            OP_DISPATCH => {
                                if let Some(event) = decode_dispatch(payload.t.as_deref(), payload.d) {
                                    pending.push_back(event);
                                }
                            }
                            OP_HEARTBEAT => {
                                write.send(Message::Text(heartbeat_payload(sequence).into())).await
                                    .change_context(ChatError::Connection)?;
                            }
                            OP_HEARTBEAT_ACK => monitor.ack(),
                            OP_RECONNECT | OP_INVALID_SESSION => {
                                return Err(Report::new(ChatError::Protocol)
                                    .attach(format!("gateway requested reconnect (op {})", payload.op)));
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code)).unwrap_or(1000);
                        if FATAL_CLOSE_CODES.contains(&code) {
                            return Err(Report::new(ChatError::Rejected { code }));
                        }
                        return Err(Report::new(ChatError::Closed)
                            .attach(format!("close code: {code}")));
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    Ok(())
}

/// Wait for the `Hello` frame and return the heartbeat interval in ms.
async fn read_hello<S>(read: &mut S) -> Result<u64, Report<ChatError>>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        let msg = msg.change_context(ChatError::Connection)?;
        let Message::Text(text) = msg else {
            continue;
        };
        return parse_hello(text.as_str());
    }
    Err(Report::new(ChatError::Closed).attach("connection closed before hello"))
}

fn parse_hello(text: &str) -> Result<u64, Report<ChatError>> {
    let payload: GatewayPayload =
        serde_json::from_str(text).change_context(ChatError::Protocol)?;
    if payload.op != OP_HELLO {
        return Err(Report::new(ChatError::Protocol)
            .attach(format!("expected hello, got op {}", payload.op)));
    }
    let hello: HelloData =
        serde_json::from_value(payload.d).change_context(ChatError::Protocol)?;
    Ok(hello.heartbeat_interval)
}

fn identify_payload(token: &str) -> String {
    serde_json::json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": env!("CARGO_PKG_NAME"),
                "device": env!("CARGO_PKG_NAME")
            }
        }
    })
    .to_string()
}

fn heartbeat_payload(sequence: Option<u64>) -> String {
    serde_json::json!({ "op": OP_HEARTBEAT, "d": sequence }).to_string()
}

fn decode_dispatch(event: Option<&str>, data: serde_json::Value) -> Option<ChatEvent> {
    match event? {
        "READY" => {
            let ready: ReadyData = serde_json::from_value(data)
                .inspect_err(|e| warn!(error = %e, "discord READY parse error"))
                .ok()?;
            Some(ChatEvent::Ready {
                user: ready.user.username,
            })
        }
        "MESSAGE_CREATE" => {
            let message: MessageData = serde_json::from_value(data)
                .inspect_err(|e| warn!(error = %e, "discord MESSAGE_CREATE parse error"))
                .ok()?;
            if message.author.bot {
                return None;
            }
            let channel_id = message.channel_id.parse().ok().map(ChannelId)?;
            Some(ChatEvent::Message(IncomingMessage {
                channel_id,
                author: message.author.username,
                content: message.content,
            }))
        }
        _ => None,
    }
}

// ── Gateway payload types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
    s: Option<u64>,
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelloData {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    username: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct ReadyData {
    user: DiscordUser,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    channel_id: String,
    #[serde(default)]
    content: String,
    author: DiscordUser,
}
