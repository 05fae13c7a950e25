use serde_json::{Value, json};

use super::bundle::{Manifest, TriggerPattern};

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Five-field cron default for a manifest category.
pub fn default_cron_for(category: &str) -> &'static str {
    match category {
        "monitoring" => "*/5 * * * *",
        "data-analysis" => "0 */6 * * *",
        "content" => "0 6 * * 1-5",
        "research" => "0 2 * * *",
        _ => "0 6 * * *",
    }
}

/// Trigger configuration derived from the manifest alone.
pub fn trigger_config(manifest: &Manifest) -> Value {
    let kind = manifest.trigger_pattern.as_str();
    match manifest.trigger_pattern {
        TriggerPattern::Cron => json!({
            "type": kind,
            "expression": default_cron_for(&manifest.category),
            "timezone": DEFAULT_TIMEZONE,
            "enabled": true,
        }),
        TriggerPattern::Webhook => json!({
            "type": kind,
            "endpoint": format!("/api/webhooks/{}", manifest.slug),
            "method": "POST",
            "auth": { "type": "bearer" },
        }),
        TriggerPattern::Messaging => json!({
            "type": kind,
            "channels": [
                { "platform": "slack", "enabled": true },
                { "platform": "discord", "enabled": false },
                { "platform": "telegram", "enabled": false },
            ],
        }),
        TriggerPattern::AlwaysOn => json!({
            "type": kind,
            "healthCheck": {
                "intervalSeconds": HEALTH_CHECK_INTERVAL_SECS,
                "endpoint": format!("/health/{}", manifest.slug),
            },
        }),
    }
}
