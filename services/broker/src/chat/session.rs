//! Per-tenant chat session.
//!
//! Connects to the IRC-over-WebSocket chat endpoint as the tenant,
//! requests the tags capability (badges drive command authorization),
//! joins the tenant's channel, routes inbound commands to the dispatcher,
//! and drains outbound messages through the per-channel rate limit.
//!
//! Protocol replies (PONG) bypass the rate limit; chat text does not.

use crate::chat::commands;
use crate::chat::irc::{IrcMessage, lines};
use crate::chat::rate_limit::RateLimit;
use crate::chat::ChatOutbox;
use crate::config::ChatConfig;
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::rooms::Rooms;
use crate::token_broker::TokenBroker;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use ov_protocol::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

pub struct ChatSessionContext {
    pub tenant_id: String,
    /// Channel (= login name, lowercase) the session joins and speaks as.
    pub channel: String,
    pub cfg: ChatConfig,
    pub broker: Arc<TokenBroker>,
    pub dispatcher: Arc<Dispatcher>,
    pub outbox: Arc<ChatOutbox>,
    pub rooms: Arc<Rooms>,
}

/// A running chat session. Stop is idempotent at the supervisor level: the
/// handle is consumed and the outbox entry removed exactly once.
pub struct ChatSession {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ChatSession {
    pub fn spawn(ctx: ChatSessionContext) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(ctx, shutdown_rx));
        ChatSession { shutdown, task }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

async fn run(ctx: ChatSessionContext, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if *shutdown.borrow() {
            break;
        }
        match run_connection(&ctx, &mut shutdown).await {
            ConnEnd::Shutdown => break,
            ConnEnd::NoCredentials => {
                // Nothing to retry against; the supervisor restarts the
                // session after tokens are re-bound.
                warn!(tenant_id = %ctx.tenant_id, "chat session has no usable credentials, giving up");
                break;
            }
            ConnEnd::Retry => {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => break,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

enum ConnEnd {
    Shutdown,
    Retry,
    NoCredentials,
}

async fn run_connection(ctx: &ChatSessionContext, shutdown: &mut watch::Receiver<bool>) -> ConnEnd {
    use tokio_tungstenite::connect_async;

    let token = match ctx.broker.get_access_token(&ctx.tenant_id).await {
        Ok(token) => token,
        Err(CoreError::NoCredentials | CoreError::AuthRevoked) => return ConnEnd::NoCredentials,
        Err(e) => {
            debug!(tenant_id = %ctx.tenant_id, error = %e, "token unavailable for chat connect");
            return ConnEnd::Retry;
        }
    };

    let ws = match connect_async(ctx.cfg.ws_url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            debug!(tenant_id = %ctx.tenant_id, error = %e, "chat connect failed");
            return ConnEnd::Retry;
        }
    };
    let (mut sink, mut stream) = ws.split();

    // Handshake: auth, identity, tags capability, channel join.
    let handshake = [
        format!("PASS oauth:{token}"),
        format!("NICK {}", ctx.channel),
        "CAP REQ :twitch.tv/tags twitch.tv/commands".to_owned(),
        format!("JOIN #{}", ctx.channel),
    ];
    for line in handshake {
        if sink.send(Message::Text(line.into())).await.is_err() {
            return ConnEnd::Retry;
        }
    }

    // Writer: protocol replies are sent immediately, chat text obeys the
    // per-channel window.
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<String>();
    let (chat_tx, mut chat_rx) = mpsc::unbounded_channel::<String>();
    let channel = ctx.channel.clone();
    let writer = tokio::spawn(async move {
        let mut limit = RateLimit::default();
        loop {
            tokio::select! {
                biased;
                raw = raw_rx.recv() => match raw {
                    Some(line) => {
                        if send_line(&mut sink, &line).await.is_err() { break; }
                    }
                    None => break,
                },
                text = chat_rx.recv() => match text {
                    Some(text) => {
                        let now = std::time::Instant::now();
                        if !limit.try_consume(now) {
                            tokio::time::sleep(limit.until_reset(now)).await;
                            let _ = limit.try_consume(std::time::Instant::now());
                        }
                        let line = format!("PRIVMSG #{channel} :{text}");
                        if send_line(&mut sink, &line).await.is_err() { break; }
                    }
                    None => break,
                },
            }
        }
    });

    ctx.outbox.register(&ctx.tenant_id, chat_tx.clone()).await;
    ctx.rooms
        .broadcast(
            &ctx.tenant_id,
            &ServerMessage::TwitchBotStatusChanged { connected: true },
        )
        .await;
    info!(tenant_id = %ctx.tenant_id, channel = %ctx.channel, "chat session connected");

    let end = reader_loop(ctx, &mut stream, &raw_tx, &chat_tx, shutdown).await;

    ctx.outbox.unregister(&ctx.tenant_id).await;
    ctx.rooms
        .broadcast(
            &ctx.tenant_id,
            &ServerMessage::TwitchBotStatusChanged { connected: false },
        )
        .await;
    writer.abort();
    info!(tenant_id = %ctx.tenant_id, "chat session disconnected");
    end
}

async fn send_line(sink: &mut WsSink, line: &str) -> Result<(), ()> {
    sink.send(Message::Text(format!("{line}\r\n").into()))
        .await
        .map_err(|_| ())
}

async fn reader_loop(
    ctx: &ChatSessionContext,
    stream: &mut futures_util::stream::SplitStream<WsStream>,
    raw_tx: &mpsc::UnboundedSender<String>,
    chat_tx: &mpsc::UnboundedSender<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnEnd {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = raw_tx.send(format!("PART #{}", ctx.channel));
                return ConnEnd::Shutdown;
            }
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return ConnEnd::Retry,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(tenant_id = %ctx.tenant_id, error = %e, "chat socket error");
                        return ConnEnd::Retry;
                    }
                };
                for line in lines(&text) {
                    let Some(message) = IrcMessage::parse(line) else { continue };
                    match message.command {
                        "PING" => {
                            let _ = raw_tx.send(format!("PONG :{}", message.data.unwrap_or("")));
                        }
                        "PRIVMSG" => {
                            handle_privmsg(ctx, &message, chat_tx).await;
                        }
                        // NOTICE with a login failure means the token the
                        // upstream saw is bad; reconnect goes through the
                        // broker again.
                        "NOTICE" => {
                            if message.data.is_some_and(|d| d.contains("Login authentication failed")) {
                                warn!(tenant_id = %ctx.tenant_id, "chat login rejected");
                                return ConnEnd::Retry;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

async fn handle_privmsg(
    ctx: &ChatSessionContext,
    message: &IrcMessage<'_>,
    chat_tx: &mpsc::UnboundedSender<String>,
) {
    let Some(text) = message.data else { return };
    let Some(command) = commands::parse(text) else { return };

    // Broadcaster-or-mod commands from anyone else are silently ignored.
    if command.requires_privilege() && !message.is_privileged() {
        debug!(
            tenant_id = %ctx.tenant_id,
            sender = message.sender.unwrap_or("?"),
            "unprivileged command ignored"
        );
        return;
    }

    match ctx.dispatcher.handle_chat_command(&ctx.tenant_id, command).await {
        Ok(Some(reply)) => {
            let _ = chat_tx.send(reply);
        }
        Ok(None) => {}
        Err(e) => {
            // Chat echo failures never propagate.
            warn!(tenant_id = %ctx.tenant_id, error = %e, "chat command failed");
        }
    }
}
