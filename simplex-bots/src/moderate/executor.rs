//! Carries out queued moderation actions against the daemon.

use std::sync::Arc;

use simplex_sdk::client::ChatClient;
use simplex_sdk::error::SdkError;

use super::queue::{ActionItem, ActionKind, ActionQueue};
use crate::output::Reporter;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("member '{0}' is not in the group roster")]
    MemberNotFound(String),
    #[error(transparent)]
    Sdk(#[from] SdkError),
}

pub struct ActionExecutor {
    client: ChatClient,
    group: String,
    reporter: Reporter,
}

impl ActionExecutor {
    pub fn new(client: ChatClient, group: impl Into<String>, reporter: Reporter) -> Self {
        Self {
            client,
            group: group.into(),
            reporter,
        }
    }

    /// Execute queued actions forever. Failures of single actions are
    /// reported and skipped.
    pub async fn run(self, queue: Arc<ActionQueue>) {
        loop {
            let item = queue.pop().await;
            if let Err(e) = self.execute(&item).await {
                self.reporter
                    .error(&format!("{:?} of message {} failed: {e}", item.kind, item.message.id))
                    .await;
            }
        }
    }

    pub async fn execute(&self, item: &ActionItem) -> Result<(), ActionError> {
        let verb = match item.kind {
            ActionKind::Block => "Blocking member",
            ActionKind::Moderate => "Moderating message of member",
            ActionKind::Report => "Reporting message of member",
        };
        let author = &item.message.author;
        let suffix = if item.message.text.is_empty() { "" } else { " Original message:" };
        self.reporter
            .info(&format!(
                "{verb} '{}' [{}] in group '{}' because of {}!{suffix}",
                author.display_name, author.local_name, self.group, item.reason
            ))
            .await;
        if !item.message.text.is_empty() {
            self.reporter.forward_raw(&item.message.text).await;
        }

        match item.kind {
            ActionKind::Report => Ok(()),
            ActionKind::Block => self.block(item).await,
            ActionKind::Moderate => self.moderate(item).await,
        }
    }

    async fn block(&self, item: &ActionItem) -> Result<(), ActionError> {
        let author = &item.message.author;
        if author.role.is_elevated() {
            self.reporter.warn("Member has privileges: blocking is rejected").await;
            return Ok(());
        }

        // The roster tells whether an earlier action already blocked them.
        let roster = self.client.group_members(&self.group).await?;
        let current = roster
            .iter()
            .find(|m| *m == author)
            .ok_or_else(|| ActionError::MemberNotFound(author.local_name.clone()))?;
        if current.blocked_by_admin {
            tracing::debug!(member = %author.local_name, "Member is already blocked");
            return Ok(());
        }

        self.client.block_for_all(&self.group, &author.local_name).await?;
        Ok(())
    }

    async fn moderate(&self, item: &ActionItem) -> Result<(), ActionError> {
        if item.message.author.role.is_elevated() {
            self.reporter.warn("Member has privileges: moderation is rejected").await;
            return Ok(());
        }
        self.client
            .delete_member_message(item.message.container_id, item.message.id)
            .await?;
        Ok(())
    }
}
