//! Discord notification sink (§6 "Discord: POST JSON `{content: text}` to
//! the configured webhook; HTML tags converted to Markdown").

use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{error, warn};

use super::Notification;

/// Sends every [`Notification`] to one configured Discord webhook.
pub struct DiscordNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl DiscordNotifier {
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(worker(webhook_url, receiver));
        Self { sender }
    }
}

impl super::Notifier for DiscordNotifier {
    fn notify(&self, event: Notification) {
        if self.sender.send(event).is_err() {
            warn!("discord notifier channel closed");
        }
    }
}

async fn worker(webhook_url: String, mut receiver: mpsc::UnboundedReceiver<Notification>) {
    let client = Client::new();

    while let Some(event) = receiver.recv().await {
        let content = html_to_markdown(&format_message(&event));
        let resp = client.post(&webhook_url).json(&serde_json::json!({ "content": content })).send().await;
        match resp {
            Ok(r) if !r.status().is_success() => {
                error!(status = %r.status(), "discord webhook rejected message");
            }
            Err(e) => error!(error = %e, "failed to send discord webhook"),
            Ok(_) => {}
        }
    }

    warn!("discord notifier worker shutting down");
}

fn format_message(event: &Notification) -> String {
    match event {
        Notification::LockedTask { task } => format!("<b>Locked task skipped:</b> {task}"),
        Notification::UnavailableNode { node_remark, reason, .. } => {
            format!("<b>Node unavailable:</b> {node_remark}\n{reason}")
        }
        Notification::ActivatedExpire { subscription_username, expire_at, .. } => {
            format!("<b>Expiry activated:</b> {subscription_username} (expires at {expire_at})")
        }
        Notification::FirstRequestedSubscription { subscription_username, .. } => {
            format!("<b>First request:</b> {subscription_username}")
        }
        Notification::AdminFailedLogin { username, submitted_password, .. } => {
            format!("<b>Failed login:</b> {username} (password: {submitted_password})")
        }
        Notification::UsageWarning { admin_id, percent_used } => {
            format!("<b>Usage warning:</b> admin {admin_id} at {percent_used}%")
        }
        Notification::ResellerQuotaExceeded { admin_id } => {
            format!("<b>Reseller quota exceeded:</b> admin {admin_id}")
        }
        Notification::SystemLog { message } => format!("<b>System:</b> {message}"),
    }
}

/// Converts the small set of tags used by [`format_message`] into Discord
/// Markdown (§6 "`<b>→**`, `<i>→*`, `<code>→` `` ` ``, `<pre>→` ```` ``` ````").
fn html_to_markdown(s: &str) -> String {
    s.replace("<b>", "**")
        .replace("</b>", "**")
        .replace("<i>", "*")
        .replace("</i>", "*")
        .replace("<pre>", "```")
        .replace("</pre>", "```")
        .replace("<code>", "`")
        .replace("</code>", "`")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_markdown_converts_known_tags() {
        assert_eq!(html_to_markdown("<b>bold</b> <i>italic</i>"), "**bold** *italic*");
        assert_eq!(html_to_markdown("<code>x</code>"), "`x`");
        assert_eq!(html_to_markdown("<pre>block</pre>"), "```block```");
    }
}
