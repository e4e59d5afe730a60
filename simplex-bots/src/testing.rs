//! Test doubles shared by the module tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value, json};
use simplex_sdk::error::SdkError;
use simplex_sdk::model::{ContentKind, Member, MemberRole, MemberStatus, Message};
use simplex_sdk::protocol::ChatResponse;
use simplex_sdk::transport::CommandTransport;

/// Records every command and answers with canned replies.
#[derive(Default)]
pub struct FakeDaemon {
    commands: Mutex<Vec<String>>,
    roster: Mutex<Vec<Value>>,
    items: Mutex<Vec<Value>>,
    /// Upcoming `/tail` commands that time out instead of answering.
    failing_tails: Mutex<usize>,
}

impl FakeDaemon {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_roster(&self, members: Vec<Value>) {
        *self.roster.lock() = members;
    }

    /// Items returned by the next `/tail` commands.
    pub fn set_items(&self, items: Vec<Value>) {
        *self.items.lock() = items;
    }

    /// Let the next `count` `/tail` commands fail with a timeout.
    pub fn fail_next_tails(&self, count: usize) {
        *self.failing_tails.lock() = count;
    }

    /// Number of `/tail` commands sent so far, failed ones included.
    pub fn tail_count(&self) -> usize {
        self.commands.lock().iter().filter(|c| c.starts_with("/tail ")).count()
    }

    /// Commands sent so far, `/tail` polls excluded.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .filter(|c| !c.starts_with("/tail "))
            .cloned()
            .collect()
    }

    fn reply(&self, command: &str) -> ChatResponse {
        if command.starts_with("/members ") {
            let members = self.roster.lock().clone();
            response(json!({"type": "groupMembers", "group": {"members": members}}))
        } else if command.starts_with("/tail ") {
            let items = self.items.lock().clone();
            response(json!({"type": "chatItems", "chatItems": items}))
        } else {
            response(json!({"type": "cmdOk"}))
        }
    }
}

impl CommandTransport for FakeDaemon {
    fn send<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<ChatResponse, SdkError>> {
        self.commands.lock().push(command.to_string());
        if command.starts_with("/tail ") {
            let mut failing = self.failing_tails.lock();
            if *failing > 0 {
                *failing -= 1;
                let err = SdkError::Timeout {
                    command: command.to_string(),
                    after: std::time::Duration::from_secs(60),
                };
                return Box::pin(async move { Err(err) });
            }
        }
        let reply = self.reply(command);
        Box::pin(async move { Ok(reply) })
    }
}

fn response(body: Value) -> ChatResponse {
    ChatResponse {
        kind: body["type"].as_str().unwrap_or_default().to_string(),
        body,
    }
}

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z").unwrap().with_timezone(&Utc)
}

pub fn member(local: &str, display: &str, role: MemberRole) -> Member {
    Member {
        local_name: local.to_string(),
        display_name: display.to_string(),
        id: 1,
        role,
        status: MemberStatus::Present("memConnected".into()),
        blocked_by_admin: false,
        created_at: None,
    }
}

pub fn message(id: i64, kind: ContentKind, text: &str, display: &str) -> Message {
    Message {
        id,
        container_id: 4,
        kind,
        text: text.to_string(),
        author: member(&display.to_lowercase(), display, MemberRole::Member),
        timestamp: base_time(),
        quoted: None,
    }
}

/// A text message stamped `minutes` after [`base_time`].
pub fn message_at(id: i64, minutes: i64) -> Message {
    let mut m = message(id, ContentKind::Text, "hello", "Ann");
    m.timestamp = base_time() + Duration::minutes(minutes);
    m
}

pub fn message_by(local: &str, role: MemberRole) -> Message {
    let mut m = message(5, ContentKind::Text, "buy cheap pills", local);
    m.author = member(local, &format!("{local} display"), role);
    m
}

pub fn member_json(local: &str, role: &str, blocked: bool) -> Value {
    json!({
        "localDisplayName": local,
        "memberProfile": {"displayName": format!("{local} display")},
        "groupMemberId": 1,
        "memberRole": role,
        "memberStatus": "memConnected",
        "blockedByAdmin": blocked
    })
}

/// A received group text item as the daemon lists it in `chatItems`.
pub fn chat_item(id: i64, local: &str, text: &str, ts: &str) -> Value {
    json!({
        "chatInfo": {"type": "group", "groupInfo": {"groupId": 4}},
        "chatItem": {
            "chatDir": {"type": "groupRcv", "groupMember": member_json(local, "member", false)},
            "meta": {"itemId": id, "itemTs": ts},
            "content": {"type": "rcvMsgContent", "msgContent": {"type": "text", "text": text}}
        }
    })
}
