//! Group members and messages as the bots see them.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

// ── Roles and statuses ─────────────────────────────────────────────

/// A member's role inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberRole {
    Owner,
    Admin,
    Moderator,
    Member,
    Observer,
    Other(String),
}

impl MemberRole {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "owner" => MemberRole::Owner,
            "admin" => MemberRole::Admin,
            "moderator" => MemberRole::Moderator,
            "member" => MemberRole::Member,
            "observer" => MemberRole::Observer,
            other => MemberRole::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Moderator => "moderator",
            MemberRole::Member => "member",
            MemberRole::Observer => "observer",
            MemberRole::Other(raw) => raw,
        }
    }

    /// Owners, admins and moderators are never blocked or moderated by a bot.
    pub fn is_elevated(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin | MemberRole::Moderator)
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership status. Anything other than left/removed counts as present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberStatus {
    Left,
    Removed,
    Present(String),
}

impl MemberStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "left" | "memLeft" => MemberStatus::Left,
            "removed" | "memRemoved" => MemberStatus::Removed,
            other => MemberStatus::Present(other.to_string()),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, MemberStatus::Present(_))
    }
}

/// What a message carries, from `msgContent.type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Image,
    Video,
    File,
    Link,
    Voice,
    Report,
    Other(String),
}

impl ContentKind {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "text" => ContentKind::Text,
            "image" => ContentKind::Image,
            "video" => ContentKind::Video,
            "file" => ContentKind::File,
            "link" => ContentKind::Link,
            "voice" => ContentKind::Voice,
            "report" => ContentKind::Report,
            _ => ContentKind::Other(raw.to_string()),
        }
    }
}

// ── Members ────────────────────────────────────────────────────────

/// A group member snapshot.
///
/// Two snapshots are the same member when their local handles match, even
/// if role or status changed in between.
#[derive(Debug, Clone)]
pub struct Member {
    /// The daemon-local display name used to address the member in commands.
    pub local_name: String,
    /// The name the member chose for their profile.
    pub display_name: String,
    pub id: i64,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub blocked_by_admin: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.local_name == other.local_name
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local_name.hash(state);
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMember {
    local_display_name: String,
    member_profile: RawProfile,
    group_member_id: i64,
    member_role: String,
    member_status: String,
    #[serde(default)]
    blocked_by_admin: bool,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    display_name: String,
}

impl Member {
    /// Decode a member object as it appears in rosters and chat items.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let raw = RawMember::deserialize(value)?;
        Ok(Member {
            local_name: raw.local_display_name,
            display_name: raw.member_profile.display_name,
            id: raw.group_member_id,
            role: MemberRole::parse(&raw.member_role),
            status: MemberStatus::parse(&raw.member_status),
            blocked_by_admin: raw.blocked_by_admin,
            created_at: raw
                .created_at
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
        })
    }

    /// Decode the `group.members` array of a `groupMembers` response body.
    pub fn roster_from_value(body: &Value) -> Result<Vec<Self>, serde_json::Error> {
        match body.pointer("/group/members") {
            Some(Value::Array(members)) => members.iter().map(Member::from_value).collect(),
            _ => Err(serde::de::Error::missing_field("group.members")),
        }
    }
}

// ── Messages ───────────────────────────────────────────────────────

/// Identity of a message: item id plus the group it was posted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    pub id: i64,
    pub container_id: i64,
}

/// A received group message.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    /// Numeric id of the group the message was posted in.
    pub container_id: i64,
    pub kind: ContentKind,
    pub text: String,
    pub author: Member,
    pub timestamp: DateTime<Utc>,
    pub quoted: Option<QuotedMessage>,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            id: self.id,
            container_id: self.container_id,
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Message {}

/// The message a reply quotes. Older daemons omit id and author.
#[derive(Debug, Clone)]
pub struct QuotedMessage {
    pub id: Option<i64>,
    pub kind: ContentKind,
    pub text: String,
    pub author: Option<Member>,
}

/// Parse an item timestamp such as `2024-05-01T10:00:00Z` or
/// `2024-05-01T11:00:00+01`.
///
/// The zone is `Z` or a numeric offset. Fractional seconds are not accepted.
pub fn parse_item_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Some(naive) = raw.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|ts| ts.and_utc());
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%#z")
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
