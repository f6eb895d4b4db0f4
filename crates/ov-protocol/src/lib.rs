// ov-protocol: Overlay broker wire types and serialization.
//
// Three protocol surfaces share this crate:
// - the subscriber WebSocket protocol (dashboard / overlay / mobile clients),
//   discriminated by a top-level `type` field with camelCase names;
// - the upstream event-bus WebSocket frames as consumed by the broker
//   (welcome / keepalive / notification / reconnect / revocation);
// - the HTTP API record schemas (counters, series, alerts, mappings).
//
// Everything here is pure data; no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Tenant-visible enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a tenant's stream.
///
/// Transitions are owned by the lifecycle controller; everything else reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Offline,
    Prepping,
    Live,
    Ending,
}

impl StreamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::Offline => "offline",
            StreamStatus::Prepping => "prepping",
            StreamStatus::Live => "live",
            StreamStatus::Ending => "ending",
        }
    }
}

/// Per-tenant feature switches.
///
/// Centralized gate: the lifecycle controller and session supervisor consult
/// these; individual handlers do not re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    pub chat_commands: bool,
    pub channel_points: bool,
    pub discord_notifications: bool,
    pub stream_overlay: bool,
    pub alert_animations: bool,
    pub analytics: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            chat_commands: true,
            channel_points: false,
            discord_notifications: false,
            stream_overlay: true,
            alert_animations: true,
            analytics: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// The three user-adjustable counter kinds.
///
/// `bits` is tracked alongside these but only accumulates from cheer events;
/// it has no increment/decrement surface and no milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    Deaths,
    Swears,
    Screams,
}

impl CounterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterKind::Deaths => "deaths",
            CounterKind::Swears => "swears",
            CounterKind::Screams => "screams",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deaths" => Some(CounterKind::Deaths),
            "swears" => Some(CounterKind::Swears),
            "screams" => Some(CounterKind::Screams),
            _ => None,
        }
    }
}

/// Public view of a tenant's counters, embedded in snapshots and
/// `counterUpdate` messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub deaths: u64,
    pub swears: u64,
    pub screams: u64,
    pub bits: u64,
    pub stream_started: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Signed delta applied by one counter mutation.
///
/// A decrement at zero reports 0, not -1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterChange {
    pub deaths: i64,
    pub swears: i64,
    pub screams: i64,
    pub bits: i64,
}

impl CounterChange {
    pub fn is_zero(self) -> bool {
        self.deaths == 0 && self.swears == 0 && self.screams == 0 && self.bits == 0
    }
}

/// A single milestone crossing produced by a counter increment.
///
/// `previous_milestone` is the largest configured threshold below
/// `threshold`, or 0 when none exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneRecord {
    pub kind: CounterKind,
    pub threshold: u64,
    pub previous_milestone: u64,
}

/// Per-tenant milestone threshold configuration, one ordered list per
/// counter kind. An empty list disables milestones for that kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MilestoneThresholds {
    pub deaths: Vec<u64>,
    pub swears: Vec<u64>,
    pub screams: Vec<u64>,
}

impl MilestoneThresholds {
    pub fn for_kind(&self, kind: CounterKind) -> &[u64] {
        match kind {
            CounterKind::Deaths => &self.deaths,
            CounterKind::Swears => &self.swears,
            CounterKind::Screams => &self.screams,
        }
    }
}

// ---------------------------------------------------------------------------
// Series snapshots
// ---------------------------------------------------------------------------

/// A named capture of `{deaths, swears, bits}` restorable onto the current
/// counters. `screams` and `stream_started` are deliberately not captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSnapshot {
    /// `<millis>_<sanitized name>`; sanitization maps every character
    /// outside `[A-Za-z0-9]` to `_`.
    pub series_id: String,
    pub series_name: String,
    #[serde(default)]
    pub description: String,
    pub deaths: u64,
    pub swears: u64,
    pub bits: u64,
    pub saved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alert definitions and event mappings
// ---------------------------------------------------------------------------

/// Event classes an alert template can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Follow,
    Subscription,
    Resub,
    Giftsub,
    Bits,
    Raid,
    Hypetrain,
    Custom,
}

/// Visual effect toggles carried opaque to the broker; the overlay client
/// interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertEffects {
    pub confetti: bool,
    pub screen_shake: bool,
    pub sound: Option<String>,
}

/// A reusable alert template.
///
/// Template placeholders (`{username}`, `{amount}`, `{months}`, `{tier}`)
/// are resolved client-side; the broker never pre-renders them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDefinition {
    pub alert_id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub name: String,
    pub enabled: bool,
    pub text_template: String,
    /// Display duration; valid range [1000, 30000].
    pub duration_ms: u32,
    pub background_color: String,
    pub text_color: String,
    pub border_color: String,
    #[serde(default)]
    pub effects: AlertEffects,
    /// Default templates are read-only: edit or delete is a conflict.
    #[serde(default)]
    pub is_default: bool,
}

pub const DURATION_MS_MIN: u32 = 1_000;
pub const DURATION_MS_MAX: u32 = 30_000;

/// Per-tenant mapping from upstream event name to an alert id.
///
/// The value `"none"` disables the overlay alert for that event while other
/// effects (counter updates, fan-out) still run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMapping {
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}

pub const MAPPING_NONE: &str = "none";

impl EventMapping {
    /// Resolve the alert id for an event name. `None` means no overlay
    /// alert (absent entry or an explicit `"none"`).
    pub fn alert_for(&self, event_name: &str) -> Option<&str> {
        self.mappings
            .get(event_name)
            .map(String::as_str)
            .filter(|id| *id != MAPPING_NONE)
    }
}

// ---------------------------------------------------------------------------
// Normalized events (upstream sessions -> dispatcher)
// ---------------------------------------------------------------------------

/// Event-specific data, discriminated by `kind`.
///
/// These names are the catalog the dispatcher and event mappings key on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    Follow {
        username: String,
    },
    Subscribe {
        username: String,
        tier: String,
        #[serde(default)]
        is_gift: bool,
    },
    SubscribeGift {
        gifter: String,
        total: u64,
        tier: String,
    },
    /// A resub share message ("subscribe-message" upstream).
    SubscribeMessage {
        username: String,
        months: u64,
        tier: String,
        #[serde(default)]
        message: String,
    },
    Cheer {
        username: String,
        bits: u64,
        #[serde(default)]
        message: String,
    },
    Raid {
        raider: String,
        viewers: u64,
    },
    StreamOnline {
        /// Opaque upstream stream id; the duplicate-suppression key.
        stream_id: String,
        started_at: Option<DateTime<Utc>>,
    },
    StreamOffline {},
    RewardRedeemed {
        username: String,
        reward_id: String,
        reward_title: String,
        cost: u64,
        #[serde(default)]
        user_input: String,
    },
}

impl EventPayload {
    /// The catalog name for this event, matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Follow { .. } => "follow",
            EventPayload::Subscribe { .. } => "subscribe",
            EventPayload::SubscribeGift { .. } => "subscribe-gift",
            EventPayload::SubscribeMessage { .. } => "subscribe-message",
            EventPayload::Cheer { .. } => "cheer",
            EventPayload::Raid { .. } => "raid",
            EventPayload::StreamOnline { .. } => "stream-online",
            EventPayload::StreamOffline {} => "stream-offline",
            EventPayload::RewardRedeemed { .. } => "reward-redeemed",
        }
    }
}

/// The full event-name catalog; event mappings key on these.
pub const EVENT_NAMES: &[&str] = &[
    "follow",
    "subscribe",
    "subscribe-gift",
    "subscribe-message",
    "cheer",
    "raid",
    "stream-online",
    "stream-offline",
    "reward-redeemed",
];

/// A normalized event flowing from an upstream session to the dispatcher.
/// Every event belongs to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub tenant_id: String,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub received_at: DateTime<Utc>,
}

impl StreamEvent {
    pub fn new(tenant_id: impl Into<String>, payload: EventPayload) -> Self {
        StreamEvent {
            tenant_id: tenant_id.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream event-bus frames (as consumed)
// ---------------------------------------------------------------------------

/// Frame kinds carried in `metadata.message_type`.
pub mod frame_types {
    pub const WELCOME: &str = "session_welcome";
    pub const KEEPALIVE: &str = "session_keepalive";
    pub const NOTIFICATION: &str = "notification";
    pub const RECONNECT: &str = "session_reconnect";
    pub const REVOCATION: &str = "revocation";
}

/// Envelope metadata present on every event-bus frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub message_id: String,
    pub message_type: String,
    pub message_timestamp: String,
    /// Set on notification frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
}

/// A raw event-bus frame: typed metadata plus an uninterpreted payload.
/// The session parses the payload according to `metadata.message_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusFrame {
    pub metadata: FrameMetadata,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `payload.session` of welcome and reconnect frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSession {
    pub id: String,
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub reconnect_url: Option<String>,
}

/// `payload.session` wrapper for welcome / reconnect frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSessionPayload {
    pub session: BusSession,
}

/// `payload.subscription` of notification and revocation frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSubscription {
    pub id: String,
    #[serde(rename = "type")]
    pub sub_type: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Payload of a notification frame: which subscription fired, plus the raw
/// event object (shape varies per subscription type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusNotification {
    pub subscription: BusSubscription,
    #[serde(default)]
    pub event: serde_json::Value,
}

/// Payload of a revocation frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusRevocation {
    pub subscription: BusSubscription,
}

/// Body for the subscription-creation POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCreateRequest {
    #[serde(rename = "type")]
    pub sub_type: String,
    pub version: String,
    pub condition: BTreeMap<String, String>,
    pub transport: SubscriptionTransport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTransport {
    /// Always `"websocket"` for this broker.
    pub method: String,
    pub session_id: String,
}

/// 201 response body of the subscription-creation POST (subset consumed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCreateResponse {
    pub data: Vec<BusSubscription>,
}

// ---------------------------------------------------------------------------
// Subscriber protocol: server -> client
// ---------------------------------------------------------------------------

/// All server-to-subscriber message kinds, discriminated by `type`.
///
/// ```json
/// { "type": "counterUpdate", ... }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    CounterUpdate {
        counters: CounterSnapshot,
        change: CounterChange,
        /// What caused the mutation, e.g. "api", "chat", "reward", "load".
        source: String,
    },
    StreamStatusChanged {
        status: StreamStatus,
    },
    /// Legacy companion of `streamStatusChanged { live }`.
    StreamStarted {},
    /// Legacy companion of `streamStatusChanged { offline }`.
    StreamEnded {},
    EventSubStatusChanged {
        connected: bool,
    },
    TwitchBotStatusChanged {
        connected: bool,
    },
    NewFollower {
        username: String,
    },
    NewSubscription {
        username: String,
        tier: String,
        is_gift: bool,
    },
    NewGiftSub {
        gifter: String,
        total: u64,
        tier: String,
    },
    NewResub {
        username: String,
        months: u64,
        tier: String,
        message: String,
    },
    /// Legacy companion of `bitsReceived`.
    NewCheer {
        username: String,
        bits: u64,
        message: String,
    },
    BitsReceived {
        username: String,
        bits: u64,
        message: String,
    },
    RaidReceived {
        raider: String,
        viewers: u64,
    },
    RewardRedeemed {
        username: String,
        reward_title: String,
        cost: u64,
        user_input: String,
    },
    CustomAlert {
        alert: AlertDefinition,
        /// Event-specific data for client-side template resolution.
        data: serde_json::Value,
    },
    MilestoneReached {
        kind: CounterKind,
        threshold: u64,
        previous_milestone: u64,
    },
    StreamOnline {
        stream_id: String,
    },
    StreamOffline {},
    AuthRevoked {},
    OverlaySettingsUpdate {
        /// Opaque to the broker; the overlay subsystem owns the shape.
        settings: serde_json::Value,
    },
    /// Join acknowledgement carrying the initial state snapshot.
    RoomJoined {
        tenant_id: String,
        counters: CounterSnapshot,
        status: StreamStatus,
        features: Features,
    },
    StreamModeStatus {
        active: bool,
    },
    Pong {},
    Error {
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Subscriber protocol: client -> server
// ---------------------------------------------------------------------------

/// All client-to-server message kinds. Counter mutations require an
/// authenticated subscriber; the rest are open to anonymous members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    IncrementDeaths {},
    DecrementDeaths {},
    IncrementSwears {},
    DecrementSwears {},
    ResetCounters {},
    ConnectTwitch {},
    JoinRoom {
        tenant_id: String,
    },
    GetStreamStatus {
        tenant_id: String,
    },
    Ping {},
    StreamModeHeartbeat {},
    OverlaySettingsUpdate {
        settings: serde_json::Value,
    },
}

// ---------------------------------------------------------------------------
// HTTP error envelope (frozen schema)
// ---------------------------------------------------------------------------

/// Every non-2xx API response carries this body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
}
