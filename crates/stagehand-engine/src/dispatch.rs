//! Notification dispatch — actually sends notifications to configured targets.
//! Supports: Slack `chat.postMessage`, generic HTTP webhook, log-only.

use async_trait::async_trait;
use stagehand_core::config::StagehandConfig;
use stagehand_core::error::{Result, StagehandError};

use crate::notify::{Notification, Notifier, NotifyPriority};

const SLACK_POST_MESSAGE: &str = "https://slack.com/api/chat.postMessage";
const SLACK_LOOKUP_BY_EMAIL: &str = "https://slack.com/api/users.lookupByEmail";

/// Notification target configuration.
#[derive(Debug, Clone)]
pub enum NotifyTarget {
    /// Slack Web API, posting to one channel. Notifications with a
    /// recipient go to that user's DM instead.
    Slack { bot_token: String, channel: String },
    /// Generic HTTP webhook, POSTed a JSON body.
    Webhook { url: String, headers: Vec<(String, String)> },
    /// Nothing configured: write to the log only.
    Log,
}

/// Dispatch a notification to one target.
pub async fn dispatch(
    client: &reqwest::Client,
    notification: &Notification,
    target: &NotifyTarget,
) -> Result<()> {
    match target {
        NotifyTarget::Slack { bot_token, channel } => {
            send_slack(client, bot_token, channel, notification).await
        }
        NotifyTarget::Webhook { url, headers } => {
            send_webhook(client, url, headers, notification).await
        }
        NotifyTarget::Log => {
            tracing::warn!(
                recipient = notification.recipient.as_deref().unwrap_or("operators"),
                "📭 No notification channel configured, logging instead: {} | {}",
                notification.title,
                notification.body
            );
            Ok(())
        }
    }
}

async fn send_slack(
    client: &reqwest::Client,
    bot_token: &str,
    channel: &str,
    notification: &Notification,
) -> Result<()> {
    let emoji = match notification.priority {
        NotifyPriority::Urgent => "🚨",
        NotifyPriority::High => "❌",
        NotifyPriority::Normal => "📢",
        NotifyPriority::Low => "ℹ️",
    };
    let text = format!("{} *{}*\n\n{}", emoji, notification.title, notification.body);
    let channel = match notification.recipient.as_deref() {
        Some(email) => slack_user_id(client, bot_token, email).await?,
        None => channel.to_string(),
    };

    let resp = client
        .post(SLACK_POST_MESSAGE)
        .bearer_auth(bot_token)
        .json(&serde_json::json!({
            "channel": channel,
            "text": text,
        }))
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| StagehandError::external("slack", format!("send failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(StagehandError::external("slack", format!("HTTP {status}")));
    }
    let body: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| StagehandError::external("slack", format!("bad response: {e}")))?;
    if body["ok"].as_bool() != Some(true) {
        let reason = body["error"].as_str().unwrap_or("unknown_error");
        return Err(StagehandError::external("slack", reason.to_string()));
    }
    tracing::info!(channel = %channel, "✅ Slack notification sent: {}", notification.title);
    Ok(())
}

/// Resolve a Slack user id from an email address.
async fn slack_user_id(client: &reqwest::Client, bot_token: &str, email: &str) -> Result<String> {
    let body: serde_json::Value = client
        .get(SLACK_LOOKUP_BY_EMAIL)
        .bearer_auth(bot_token)
        .query(&[("email", email)])
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| StagehandError::external("slack", format!("user lookup failed: {e}")))?
        .json()
        .await
        .map_err(|e| StagehandError::external("slack", format!("bad response: {e}")))?;
    parse_user_lookup(&body)
}

fn parse_user_lookup(body: &serde_json::Value) -> Result<String> {
    if body["ok"].as_bool() != Some(true) {
        let reason = body["error"].as_str().unwrap_or("unknown_error");
        return Err(StagehandError::external("slack", format!("user lookup: {reason}")));
    }
    body["user"]["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| StagehandError::external("slack", "user lookup returned no id"))
}

async fn send_webhook(
    client: &reqwest::Client,
    url: &str,
    headers: &[(String, String)],
    notification: &Notification,
) -> Result<()> {
    let mut req = client
        .post(url)
        .json(&serde_json::json!({
            "title": notification.title,
            "body": notification.body,
            "priority": format!("{:?}", notification.priority),
            "source": notification.source,
            "timestamp": notification.timestamp.to_rfc3339(),
            "recipient": notification.recipient,
        }))
        .timeout(std::time::Duration::from_secs(10));

    for (key, value) in headers {
        req = req.header(key.as_str(), value.as_str());
    }

    let resp = req
        .send()
        .await
        .map_err(|e| StagehandError::external("webhook", format!("send failed: {e}")))?;

    if resp.status().is_success() {
        tracing::info!("✅ Webhook notification sent to {}: {}", url, notification.title);
        Ok(())
    } else {
        Err(StagehandError::external("webhook", format!("HTTP {}", resp.status())))
    }
}

/// Build targets from the `[notify]` section. Falls back to log-only.
pub fn targets_from_config(config: &StagehandConfig) -> Vec<(String, NotifyTarget)> {
    let mut targets = Vec::new();
    let notify = &config.notify;

    match (&notify.slack_bot_token, &notify.admin_channel_id) {
        (Some(token), Some(channel)) if !token.is_empty() && !channel.is_empty() => {
            targets.push((
                "slack".to_string(),
                NotifyTarget::Slack { bot_token: token.clone(), channel: channel.clone() },
            ));
        }
        (Some(_), None) => {
            tracing::warn!("⚠️ slack_bot_token set but admin_channel_id is not; Slack disabled");
        }
        _ => {}
    }

    if let Some(url) = notify.webhook_url.as_ref().filter(|u| !u.is_empty()) {
        targets.push((
            "webhook".to_string(),
            NotifyTarget::Webhook { url: url.clone(), headers: Vec::new() },
        ));
    }

    if targets.is_empty() {
        targets.push(("log".to_string(), NotifyTarget::Log));
    }
    targets
}

/// Fans one notification out to every configured target.
pub struct DispatchNotifier {
    client: reqwest::Client,
    targets: Vec<(String, NotifyTarget)>,
}

impl DispatchNotifier {
    pub fn new(client: reqwest::Client, targets: Vec<(String, NotifyTarget)>) -> Self {
        Self { client, targets }
    }

    pub fn from_config(config: &StagehandConfig) -> Self {
        Self::new(reqwest::Client::new(), targets_from_config(config))
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|(name, _)| name.as_str()).collect()
    }
}

#[async_trait]
impl Notifier for DispatchNotifier {
    /// Succeeds when at least one target accepted the notification.
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut last_error = None;
        let mut delivered = false;
        for (name, target) in &self.targets {
            match dispatch(&self.client, notification, target).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    tracing::warn!("⚠️ Notification via {name} failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        match (delivered, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_default_to_log() {
        let cfg = StagehandConfig::default();
        let targets = targets_from_config(&cfg);
        assert_eq!(targets.len(), 1);
        assert!(matches!(targets[0].1, NotifyTarget::Log));
    }

    #[test]
    fn test_targets_from_config() {
        let mut cfg = StagehandConfig::default();
        cfg.notify.slack_bot_token = Some("xoxb-test".into());
        cfg.notify.admin_channel_id = Some("C0ADMIN".into());
        cfg.notify.webhook_url = Some("https://hooks.example/notify".into());
        let notifier = DispatchNotifier::from_config(&cfg);
        assert_eq!(notifier.target_names(), vec!["slack", "webhook"]);
    }

    #[test]
    fn test_parse_user_lookup() {
        let ok = serde_json::json!({ "ok": true, "user": { "id": "U123" } });
        assert_eq!(parse_user_lookup(&ok).unwrap(), "U123");
        let missing = serde_json::json!({ "ok": false, "error": "users_not_found" });
        let err = parse_user_lookup(&missing).unwrap_err();
        assert!(err.to_string().contains("users_not_found"));
    }

    #[tokio::test]
    async fn test_log_target_always_delivers() {
        let notifier = DispatchNotifier::new(reqwest::Client::new(), vec![("log".into(), NotifyTarget::Log)]);
        let n = Notification::new("t", "b", "test", NotifyPriority::Low, chrono::Utc::now());
        assert!(notifier.notify(&n).await.is_ok());
    }
}
