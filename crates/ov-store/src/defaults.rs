//! Built-in alert templates and the default event mapping.
//!
//! Defaults are read-only: the HTTP layer rejects edits and deletes with a
//! conflict. Tenants override behavior by creating their own alerts and
//! repointing the event mapping.

use ov_protocol::{AlertDefinition, AlertEffects, AlertType, EventMapping};

fn template(
    alert_id: &str,
    alert_type: AlertType,
    name: &str,
    text_template: &str,
    border_color: &str,
) -> AlertDefinition {
    AlertDefinition {
        alert_id: alert_id.to_owned(),
        alert_type,
        name: name.to_owned(),
        enabled: true,
        text_template: text_template.to_owned(),
        duration_ms: 5_000,
        background_color: "#1a1a2e".to_owned(),
        text_color: "#ffffff".to_owned(),
        border_color: border_color.to_owned(),
        effects: AlertEffects::default(),
        is_default: true,
    }
}

/// The built-in alert templates every tenant starts with.
pub fn default_alerts() -> Vec<AlertDefinition> {
    vec![
        template(
            "default-follow",
            AlertType::Follow,
            "New Follower",
            "{username} just followed!",
            "#9146ff",
        ),
        template(
            "default-subscription",
            AlertType::Subscription,
            "New Subscriber",
            "{username} subscribed at tier {tier}!",
            "#00c8af",
        ),
        template(
            "default-resub",
            AlertType::Resub,
            "Resub",
            "{username} resubscribed for {months} months!",
            "#00c8af",
        ),
        template(
            "default-giftsub",
            AlertType::Giftsub,
            "Gift Subs",
            "{username} gifted {amount} subs!",
            "#f2a600",
        ),
        template(
            "default-bits",
            AlertType::Bits,
            "Bits",
            "{username} cheered {amount} bits!",
            "#b084f7",
        ),
        template(
            "default-raid",
            AlertType::Raid,
            "Raid",
            "{username} is raiding with {amount} viewers!",
            "#ff5e5b",
        ),
    ]
}

/// Event name -> default alert id. Events absent here (stream lifecycle,
/// reward redemptions) have no overlay alert by default.
pub fn default_event_mapping() -> EventMapping {
    let mut mapping = EventMapping::default();
    let pairs = [
        ("follow", "default-follow"),
        ("subscribe", "default-subscription"),
        ("subscribe-message", "default-resub"),
        ("subscribe-gift", "default-giftsub"),
        ("cheer", "default-bits"),
        ("raid", "default-raid"),
    ];
    for (event, alert) in pairs {
        mapping.mappings.insert(event.to_owned(), alert.to_owned());
    }
    mapping
}

/// Look up a default alert by id.
pub fn default_alert(alert_id: &str) -> Option<AlertDefinition> {
    default_alerts().into_iter().find(|a| a.alert_id == alert_id)
}
