//! Typed client for the chat daemon's command API.
//!
//! [`ChatClient`] is the entry point for bot modules. It renders a
//! [`Command`], sends it over a [`CommandTransport`] and checks the reply.
//! Clones share the same transport.

use std::sync::Arc;

use crate::error::{Result, SdkError};
use crate::model::{Member, MemberRole};
use crate::protocol::{self, ChatResponse, Command};
use crate::transport::CommandTransport;

/// A handle to the daemon on one port.
#[derive(Clone)]
pub struct ChatClient {
    transport: Arc<dyn CommandTransport>,
}

impl ChatClient {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self { transport }
    }

    pub async fn execute(&self, command: &Command) -> Result<ChatResponse> {
        self.transport.send(&command.to_string()).await
    }

    pub async fn send_to_contact(&self, contact: &str, text: &str) -> Result<()> {
        self.execute(&Command::SendToContact {
            contact: contact.to_string(),
            text: text.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn send_to_group(&self, group: &str, text: &str) -> Result<()> {
        self.execute(&Command::SendToGroup {
            group: group.to_string(),
            text: text.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Send `text` to every listed contact and group.
    ///
    /// Failures are logged per recipient and never returned.
    pub async fn send_to_recipients(&self, contacts: &[String], groups: &[String], text: &str) {
        for contact in contacts {
            if let Err(e) = self.send_to_contact(contact, text).await {
                tracing::warn!(contact = %contact, error = %e, "Failed to notify contact");
            }
        }
        for group in groups {
            if let Err(e) = self.send_to_group(group, text).await {
                tracing::warn!(group = %group, error = %e, "Failed to notify group");
            }
        }
    }

    /// Current roster of a group. An empty roster is an error.
    pub async fn group_members(&self, group: &str) -> Result<Vec<Member>> {
        let resp = self
            .execute(&Command::ListMembers {
                group: group.to_string(),
            })
            .await?
            .expect_kind(protocol::TYPE_GROUP_MEMBERS)?;
        let members = Member::roster_from_value(&resp.body)
            .map_err(|e| SdkError::Decode(format!("group members of '{group}': {e}")))?;
        if members.is_empty() {
            return Err(SdkError::Decode(format!("empty member list for group '{group}'")));
        }
        Ok(members)
    }

    pub async fn change_member_role(&self, group: &str, member: &str, role: &MemberRole) -> Result<()> {
        self.execute(&Command::ChangeMemberRole {
            group: group.to_string(),
            member: member.to_string(),
            role: role.to_string(),
        })
        .await?;
        Ok(())
    }

    /// The latest `count` items of a group, as a raw `chatItems` reply.
    pub async fn tail_group(&self, group: &str, count: usize) -> Result<ChatResponse> {
        self.execute(&Command::TailGroup {
            group: group.to_string(),
            count,
        })
        .await?
        .expect_kind(protocol::TYPE_CHAT_ITEMS)
    }

    /// Delete a member's message for everyone in the group.
    pub async fn delete_member_message(&self, group_id: i64, item_id: i64) -> Result<()> {
        self.execute(&Command::DeleteMemberItem { group_id, item_id }).await?;
        Ok(())
    }

    pub async fn block_for_all(&self, group: &str, member: &str) -> Result<()> {
        self.execute(&Command::BlockForAll {
            group: group.to_string(),
            member: member.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn remove_member(&self, group: &str, member: &str) -> Result<()> {
        self.execute(&Command::RemoveMember {
            group: group.to_string(),
            member: member.to_string(),
        })
        .await?;
        Ok(())
    }
}
