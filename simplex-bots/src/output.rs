//! Log lines that also reach the bot admins inside the chat.
//!
//! Every module owns a [`Reporter`]. Each line goes to `tracing` at the
//! matching level and, best effort, to the module's admin contacts and
//! groups. Forwarding failures are logged and go no further.

use simplex_sdk::client::ChatClient;

use crate::config::AdminRecipients;

#[derive(Clone)]
pub struct Reporter {
    client: ChatClient,
    /// Module name shown in front of every forwarded line.
    module: String,
    admins: AdminRecipients,
}

impl Reporter {
    pub fn new(client: ChatClient, module: impl Into<String>, admins: AdminRecipients) -> Self {
        Self {
            client,
            module: module.into(),
            admins,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub async fn info(&self, text: &str) {
        tracing::info!(module = %self.module, "{text}");
        self.forward("", text).await;
    }

    pub async fn warn(&self, text: &str) {
        tracing::warn!(module = %self.module, "{text}");
        self.forward("[WARNING] ", text).await;
    }

    pub async fn error(&self, text: &str) {
        tracing::error!(module = %self.module, "{text}");
        self.forward("[ERROR] ", text).await;
    }

    /// Send text to the admins without logging it.
    pub async fn forward_raw(&self, text: &str) {
        self.client
            .send_to_recipients(&self.admins.report_to_contacts, &self.admins.report_to_groups, text)
            .await;
    }

    async fn forward(&self, level: &str, text: &str) {
        if self.admins.report_to_contacts.is_empty() && self.admins.report_to_groups.is_empty() {
            return;
        }
        let line = format!("{level}{}: {text}", self.module);
        self.forward_raw(&line).await;
    }
}
