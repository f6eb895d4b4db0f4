//! Event normalizer & dispatcher.
//!
//! The single consumer of the event channel: upstream sessions publish
//! normalized `StreamEvent`s, the dispatcher decides counter effects and
//! sinks (room fan-out, chat echo, external webhook). Chat commands, the
//! HTTP layer and the subscriber protocol all mutate counters through
//! `apply_counter`, so milestone ordering is enforced in one place.

use crate::chat::ChatOutbox;
use crate::chat::commands::ChatCommand;
use crate::counters::{CounterEngine, MutationOutcome};
use crate::error::CoreError;
use crate::rooms::Rooms;
use crate::webhook::{WebhookDocument, WebhookSink};
use chrono::Utc;
use ov_protocol::{
    AlertDefinition, CounterKind, EventPayload, ServerMessage, StreamEvent,
};
use ov_store::defaults::{default_alert, default_event_mapping};
use ov_store::{Records, TenantRecord};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Depth of the bounded event channel between sessions and dispatcher.
pub const EVENT_QUEUE_DEPTH: usize = 1024;

pub fn event_channel() -> (mpsc::Sender<StreamEvent>, mpsc::Receiver<StreamEvent>) {
    mpsc::channel(EVENT_QUEUE_DEPTH)
}

/// Counter mutations accepted from every surface (HTTP, chat, subscriber
/// protocol, reward redemptions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterOp {
    Increment(CounterKind),
    Decrement(CounterKind),
    Reset,
    AddBits(u64),
    LoadSeries(String),
}

pub struct Dispatcher {
    records: Records,
    engine: Arc<CounterEngine>,
    rooms: Arc<Rooms>,
    chat: Arc<ChatOutbox>,
    webhook: WebhookSink,
}

impl Dispatcher {
    pub fn new(
        records: Records,
        engine: Arc<CounterEngine>,
        rooms: Arc<Rooms>,
        chat: Arc<ChatOutbox>,
    ) -> Self {
        Dispatcher {
            records,
            engine,
            rooms,
            chat,
            webhook: WebhookSink::new(),
        }
    }

    /// Consume the event channel until every sender is dropped. Events for
    /// one tenant are handled in arrival order; a failed event is logged
    /// and never stalls the loop.
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::Receiver<StreamEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let tenant_id = event.tenant_id.clone();
                let kind = event.payload.kind();
                if let Err(e) = self.handle_event(event).await {
                    warn!(tenant_id, kind, error = %e, "event dispatch failed");
                }
            }
            debug!("event channel closed, dispatcher stopping");
        })
    }

    // -----------------------------------------------------------------------
    // Counter mutation path (shared by all surfaces)
    // -----------------------------------------------------------------------

    /// Apply one counter mutation and fan out its effects: milestone
    /// records first, then the `counterUpdate` for the same mutation.
    pub async fn apply_counter(
        &self,
        tenant_id: &str,
        op: CounterOp,
        source: &str,
    ) -> Result<MutationOutcome, CoreError> {
        let outcome = match op {
            CounterOp::Increment(kind) => self.engine.increment(tenant_id, kind).await?,
            CounterOp::Decrement(kind) => self.engine.decrement(tenant_id, kind).await?,
            CounterOp::Reset => self.engine.reset(tenant_id).await?,
            CounterOp::AddBits(amount) => self.engine.add_bits(tenant_id, amount).await?,
            CounterOp::LoadSeries(series_id) => {
                self.engine.load_series(tenant_id, &series_id).await?
            }
        };

        for milestone in &outcome.milestones {
            self.rooms
                .broadcast(
                    tenant_id,
                    &ServerMessage::MilestoneReached {
                        kind: milestone.kind,
                        threshold: milestone.threshold,
                        previous_milestone: milestone.previous_milestone,
                    },
                )
                .await;
            self.chat
                .send(
                    tenant_id,
                    format!(
                        "🎉 Milestone reached: {} {}! (previous milestone: {})",
                        milestone.threshold,
                        milestone.kind.as_str(),
                        milestone.previous_milestone
                    ),
                )
                .await;
        }

        self.rooms
            .broadcast(
                tenant_id,
                &ServerMessage::CounterUpdate {
                    counters: outcome.record.snapshot(),
                    change: outcome.change,
                    source: source.to_owned(),
                },
            )
            .await;
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Upstream events
    // -----------------------------------------------------------------------

    async fn handle_event(&self, event: StreamEvent) -> Result<(), CoreError> {
        let tenant_id = event.tenant_id.as_str();
        match &event.payload {
            EventPayload::Follow { username } => {
                self.rooms
                    .broadcast(
                        tenant_id,
                        &ServerMessage::NewFollower {
                            username: username.clone(),
                        },
                    )
                    .await;
                self.dispatch_alert(tenant_id, "follow", json!({ "username": username }))
                    .await?;
            }
            EventPayload::Subscribe {
                username,
                tier,
                is_gift,
            } => {
                self.rooms
                    .broadcast(
                        tenant_id,
                        &ServerMessage::NewSubscription {
                            username: username.clone(),
                            tier: tier.clone(),
                            is_gift: *is_gift,
                        },
                    )
                    .await;
                self.dispatch_alert(
                    tenant_id,
                    "subscribe",
                    json!({ "username": username, "tier": tier }),
                )
                .await?;
            }
            EventPayload::SubscribeGift {
                gifter,
                total,
                tier,
            } => {
                self.rooms
                    .broadcast(
                        tenant_id,
                        &ServerMessage::NewGiftSub {
                            gifter: gifter.clone(),
                            total: *total,
                            tier: tier.clone(),
                        },
                    )
                    .await;
                self.dispatch_alert(
                    tenant_id,
                    "subscribe-gift",
                    json!({ "username": gifter, "amount": total, "tier": tier }),
                )
                .await?;
            }
            EventPayload::SubscribeMessage {
                username,
                months,
                tier,
                message,
            } => {
                self.rooms
                    .broadcast(
                        tenant_id,
                        &ServerMessage::NewResub {
                            username: username.clone(),
                            months: *months,
                            tier: tier.clone(),
                            message: message.clone(),
                        },
                    )
                    .await;
                self.dispatch_alert(
                    tenant_id,
                    "subscribe-message",
                    json!({ "username": username, "months": months, "tier": tier }),
                )
                .await?;
            }
            EventPayload::Cheer {
                username,
                bits,
                message,
            } => {
                self.apply_counter(tenant_id, CounterOp::AddBits(*bits), "cheer")
                    .await?;
                // Legacy clients listen for newCheer, current ones for
                // bitsReceived; both go out.
                self.rooms
                    .broadcast(
                        tenant_id,
                        &ServerMessage::NewCheer {
                            username: username.clone(),
                            bits: *bits,
                            message: message.clone(),
                        },
                    )
                    .await;
                self.rooms
                    .broadcast(
                        tenant_id,
                        &ServerMessage::BitsReceived {
                            username: username.clone(),
                            bits: *bits,
                            message: message.clone(),
                        },
                    )
                    .await;
                self.dispatch_alert(
                    tenant_id,
                    "cheer",
                    json!({ "username": username, "amount": bits, "message": message }),
                )
                .await?;
            }
            EventPayload::Raid { raider, viewers } => {
                self.rooms
                    .broadcast(
                        tenant_id,
                        &ServerMessage::RaidReceived {
                            raider: raider.clone(),
                            viewers: *viewers,
                        },
                    )
                    .await;
                self.chat
                    .send(
                        tenant_id,
                        format!("⚔️ {raider} is raiding with {viewers} viewers — welcome!"),
                    )
                    .await;
                self.dispatch_alert(
                    tenant_id,
                    "raid",
                    json!({ "username": raider, "amount": viewers }),
                )
                .await?;
            }
            EventPayload::StreamOnline { stream_id, .. } => {
                self.handle_stream_online(tenant_id, stream_id).await?;
            }
            EventPayload::StreamOffline {} => {
                self.engine
                    .set_last_notified_stream_id(tenant_id, None)
                    .await?;
                self.rooms
                    .broadcast(tenant_id, &ServerMessage::StreamOffline {})
                    .await;
            }
            EventPayload::RewardRedeemed {
                username,
                reward_title,
                cost,
                user_input,
                ..
            } => {
                if let Some(kind) = counter_kind_for_reward(reward_title) {
                    self.apply_counter(tenant_id, CounterOp::Increment(kind), "reward")
                        .await?;
                }
                self.rooms
                    .broadcast(
                        tenant_id,
                        &ServerMessage::RewardRedeemed {
                            username: username.clone(),
                            reward_title: reward_title.clone(),
                            cost: *cost,
                            user_input: user_input.clone(),
                        },
                    )
                    .await;
                self.dispatch_alert(
                    tenant_id,
                    "reward-redeemed",
                    json!({ "username": username, "reward": reward_title }),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Stream-start notifications are at-most-once per opaque stream id: a
    /// replayed event after a reconnect matches `last_notified_stream_id`
    /// and produces nothing.
    async fn handle_stream_online(
        &self,
        tenant_id: &str,
        stream_id: &str,
    ) -> Result<(), CoreError> {
        let last = self.engine.get_last_notified_stream_id(tenant_id).await?;
        if last.as_deref() == Some(stream_id) {
            debug!(tenant_id, stream_id, "duplicate stream-online suppressed");
            return Ok(());
        }

        self.rooms
            .broadcast(
                tenant_id,
                &ServerMessage::StreamOnline {
                    stream_id: stream_id.to_owned(),
                },
            )
            .await;
        self.chat
            .send(tenant_id, "📡 Stream is live — overlay is connected!")
            .await;

        if let Some(tenant) = self.records.get_tenant(tenant_id).await? {
            self.post_live_webhook(&tenant).await;
        }

        self.engine
            .set_last_notified_stream_id(tenant_id, Some(stream_id.to_owned()))
            .await?;
        info!(tenant_id, stream_id, "stream-start notifications dispatched");
        Ok(())
    }

    async fn post_live_webhook(&self, tenant: &TenantRecord) {
        if !tenant.features.discord_notifications {
            return;
        }
        let Some(url) = tenant.external_webhook_url.as_deref().filter(|u| !u.is_empty()) else {
            return;
        };
        let document = WebhookDocument::new(
            format!("{} is live!", tenant.display_name),
            "The stream just started — come hang out!".to_owned(),
            0x91_46_ff,
        )
        .field("Channel", tenant.username.clone());
        self.webhook.post(url, &document).await;
    }

    // -----------------------------------------------------------------------
    // Overlay alerts
    // -----------------------------------------------------------------------

    /// Resolve the tenant's mapping and alert definition for an event name;
    /// `None` when the event is unmapped, mapped to `"none"`, or the alert
    /// is disabled.
    async fn resolve_alert(
        &self,
        tenant_id: &str,
        event_name: &str,
    ) -> Result<Option<AlertDefinition>, CoreError> {
        let mapping = self
            .records
            .get_event_mapping(tenant_id)
            .await?
            .unwrap_or_else(default_event_mapping);
        let Some(alert_id) = mapping.alert_for(event_name) else {
            return Ok(None);
        };
        let alert = match self.records.get_alert(tenant_id, alert_id).await? {
            Some(alert) => Some(alert),
            None => default_alert(alert_id),
        };
        Ok(alert.filter(|a| a.enabled))
    }

    async fn dispatch_alert(
        &self,
        tenant_id: &str,
        event_name: &str,
        data: Value,
    ) -> Result<(), CoreError> {
        if let Some(alert) = self.resolve_alert(tenant_id, event_name).await? {
            self.rooms
                .broadcast(tenant_id, &ServerMessage::CustomAlert { alert, data })
                .await;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chat commands
    // -----------------------------------------------------------------------

    /// Execute a parsed chat command and return the reply text, if any.
    /// Counter adjustments fan out silently; reads and series operations
    /// answer in channel.
    pub async fn handle_chat_command(
        &self,
        tenant_id: &str,
        command: ChatCommand,
    ) -> Result<Option<String>, CoreError> {
        let reply = match command {
            ChatCommand::Adjust { kind, delta } => {
                let op = if delta > 0 {
                    CounterOp::Increment(kind)
                } else {
                    CounterOp::Decrement(kind)
                };
                self.apply_counter(tenant_id, op, "chat").await?;
                None
            }
            ChatCommand::ResetCounters => {
                self.apply_counter(tenant_id, CounterOp::Reset, "chat").await?;
                Some("🔄 Counters reset.".to_owned())
            }
            ChatCommand::SaveSeries { name } => {
                let snapshot = self.engine.save_series(tenant_id, &name, "").await?;
                Some(format!("💾 Series saved: {}", snapshot.series_id))
            }
            ChatCommand::LoadSeries { series_id } => {
                match self
                    .apply_counter(tenant_id, CounterOp::LoadSeries(series_id), "load")
                    .await
                {
                    Ok(outcome) => Some(format!(
                        "📂 Series loaded — 💀 {} | 🤬 {} | 💎 {}",
                        outcome.record.deaths, outcome.record.swears, outcome.record.bits
                    )),
                    Err(CoreError::NotFound(_)) => Some("⚠️ No series with that id.".to_owned()),
                    Err(e) => return Err(e),
                }
            }
            ChatCommand::ListSeries => {
                let series = self.engine.list_series(tenant_id).await?;
                if series.is_empty() {
                    Some("🗂 No saved series.".to_owned())
                } else {
                    let names: Vec<String> = series
                        .iter()
                        .map(|s| format!("{} ({})", s.series_name, s.series_id))
                        .collect();
                    Some(format!("🗂 Saved series: {}", names.join(", ")))
                }
            }
            ChatCommand::DeleteSeries { series_id } => {
                match self.engine.delete_series(tenant_id, &series_id).await {
                    Ok(()) => Some("🗑 Series deleted.".to_owned()),
                    Err(CoreError::NotFound(_)) => Some("⚠️ No series with that id.".to_owned()),
                    Err(e) => return Err(e),
                }
            }
            ChatCommand::ReadCounter(kind) => {
                let record = self.engine.get(tenant_id).await?;
                let (emoji, label) = counter_emoji(kind);
                Some(format!("{emoji} Current {label}: {}", record.get(kind)))
            }
            ChatCommand::ReadBits => {
                let record = self.engine.get(tenant_id).await?;
                Some(format!("💎 Bits this stream: {}", record.bits))
            }
            ChatCommand::Stats => {
                let record = self.engine.get(tenant_id).await?;
                Some(format!(
                    "📊 Deaths: {} | Swears: {} | Screams: {} | Bits: {}",
                    record.deaths, record.swears, record.screams, record.bits
                ))
            }
            ChatCommand::StreamStats => {
                let record = self.engine.get(tenant_id).await?;
                match record.stream_started {
                    Some(started) => {
                        let uptime = Utc::now() - started;
                        Some(format!(
                            "⏱ Live for {} — 💀 {} | 🤬 {} | 😱 {} | 💎 {}",
                            format_uptime(uptime),
                            record.deaths,
                            record.swears,
                            record.screams,
                            record.bits
                        ))
                    }
                    None => Some("⏱ Stream is not live.".to_owned()),
                }
            }
        };
        Ok(reply)
    }
}

/// Reward-title heuristic for channel-point counter rewards: a title
/// containing a counter alias increments that counter.
fn counter_kind_for_reward(reward_title: &str) -> Option<CounterKind> {
    let title = reward_title.to_ascii_lowercase();
    if title.contains("death") {
        Some(CounterKind::Deaths)
    } else if title.contains("swear") {
        Some(CounterKind::Swears)
    } else if title.contains("scream") {
        Some(CounterKind::Screams)
    } else {
        None
    }
}

fn counter_emoji(kind: CounterKind) -> (&'static str, &'static str) {
    match kind {
        CounterKind::Deaths => ("💀", "deaths"),
        CounterKind::Swears => ("🤬", "swears"),
        CounterKind::Screams => ("😱", "screams"),
    }
}

fn format_uptime(uptime: chrono::Duration) -> String {
    let minutes = uptime.num_minutes().max(0);
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}
