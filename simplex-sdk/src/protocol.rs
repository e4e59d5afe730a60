//! Wire format of the chat daemon's websocket API.
//!
//! Every request is a JSON text frame `{"corrId": "<id>", "cmd": "<command>"}`.
//! The daemon answers with a frame carrying the same `corrId` and a `resp`
//! object. Two generations of the daemon disagree on the shape of `resp`:
//!
//! - generation A puts the result directly in `resp` (`resp.type`);
//! - generation B wraps it in an either-style union, `resp.Left` for failures
//!   and `resp.Right` for successes.
//!
//! [`decode_response`] collapses both into one [`ChatResponse`].

use std::fmt;

use serde_json::Value;

use crate::error::{Result, SdkError};

pub const KEY_CORR_ID: &str = "corrId";
pub const KEY_CMD: &str = "cmd";
pub const KEY_RESP: &str = "resp";
pub const KEY_TYPE: &str = "type";
pub const KEY_CHAT_ERROR: &str = "chatError";

pub const TYPE_CHAT_CMD_ERROR: &str = "chatCmdError";
pub const TYPE_CHAT_ITEMS: &str = "chatItems";
pub const TYPE_GROUP_MEMBERS: &str = "groupMembers";

/// Commands understood by the daemon.
///
/// Group and member names are quoted with single quotes, the way the
/// daemon's terminal syntax expects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendToContact { contact: String, text: String },
    SendToGroup { group: String, text: String },
    ListMembers { group: String },
    ChangeMemberRole { group: String, member: String, role: String },
    /// Fetch the latest `count` items of a group chat.
    TailGroup { group: String, count: usize },
    /// Moderate (delete for everyone) a member's message.
    DeleteMemberItem { group_id: i64, item_id: i64 },
    BlockForAll { group: String, member: String },
    RemoveMember { group: String, member: String },
    Raw(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SendToContact { contact, text } => write!(f, "@'{contact}' {text}"),
            Command::SendToGroup { group, text } => write!(f, "#'{group}' {text}"),
            Command::ListMembers { group } => write!(f, "/members '{group}'"),
            Command::ChangeMemberRole { group, member, role } => {
                write!(f, "/member role #'{group}' '{member}' {role}")
            }
            Command::TailGroup { group, count } => write!(f, "/tail #'{group}' {count}"),
            Command::DeleteMemberItem { group_id, item_id } => {
                write!(f, "/_delete member item #{group_id} {item_id}")
            }
            Command::BlockForAll { group, member } => {
                write!(f, "/block for all #'{group}' @'{member}'")
            }
            Command::RemoveMember { group, member } => write!(f, "/remove '{group}' '{member}'"),
            Command::Raw(line) => f.write_str(line),
        }
    }
}

/// Build the outbound request frame.
pub fn request_frame(corr_id: &str, command: &str) -> String {
    serde_json::json!({ KEY_CORR_ID: corr_id, KEY_CMD: command }).to_string()
}

/// Correlation id of an inbound frame, if it carries one.
///
/// The daemon echoes the id as a string; numeric ids are accepted too.
pub fn frame_corr_id(frame: &Value) -> Option<String> {
    match frame.get(KEY_CORR_ID)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A successful daemon reply, normalized across schema generations.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// The result's `type` discriminator, e.g. `chatItems`.
    pub kind: String,
    /// The canonical result object (the one carrying `type`).
    pub body: Value,
}

impl ChatResponse {
    /// Fail with a decode error unless the reply is of the given type.
    pub fn expect_kind(self, kind: &str) -> Result<Self> {
        if self.kind == kind {
            Ok(self)
        } else {
            Err(SdkError::Decode(format!(
                "expected '{kind}' response, got '{}'",
                self.kind
            )))
        }
    }
}

/// Decode a reply frame into a success or a [`SdkError::Command`].
pub fn decode_response(frame: &Value) -> Result<ChatResponse> {
    let resp = frame
        .get(KEY_RESP)
        .and_then(Value::as_object)
        .ok_or_else(|| SdkError::Decode(format!("response does not contain '{KEY_RESP}': {frame}")))?;

    let result = typed_object(frame.get(KEY_RESP))
        .or_else(|| typed_object(resp.get("Left")))
        .or_else(|| typed_object(resp.get("Right")))
        .ok_or_else(|| SdkError::Decode(format!("response does not contain '{KEY_TYPE}': {frame}")))?;

    let kind = result
        .get(KEY_TYPE)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if kind == TYPE_CHAT_CMD_ERROR {
        let detail = match result.get(KEY_CHAT_ERROR) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        return Err(SdkError::Command(format!("{TYPE_CHAT_CMD_ERROR}: {detail}")));
    }

    Ok(ChatResponse {
        kind,
        body: result.clone(),
    })
}

fn typed_object(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| v.get(KEY_TYPE).and_then(Value::as_str).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_command_vocabulary() {
        let cases = [
            (
                Command::SendToContact { contact: "alice".into(), text: "hi there".into() },
                "@'alice' hi there",
            ),
            (Command::SendToGroup { group: "Rust Chat".into(), text: "hello".into() }, "#'Rust Chat' hello"),
            (Command::ListMembers { group: "g".into() }, "/members 'g'"),
            (
                Command::ChangeMemberRole { group: "g".into(), member: "bob".into(), role: "observer".into() },
                "/member role #'g' 'bob' observer",
            ),
            (Command::TailGroup { group: "g".into(), count: 500 }, "/tail #'g' 500"),
            (Command::DeleteMemberItem { group_id: 4, item_id: 812 }, "/_delete member item #4 812"),
            (Command::BlockForAll { group: "g".into(), member: "bob".into() }, "/block for all #'g' @'bob'"),
            (Command::RemoveMember { group: "g".into(), member: "bob".into() }, "/remove 'g' 'bob'"),
            (Command::Raw("/help".into()), "/help"),
        ];
        for (command, expected) in cases {
            assert_eq!(command.to_string(), expected);
        }
    }

    #[test]
    fn request_frame_carries_corr_id_and_command() {
        let frame: Value = serde_json::from_str(&request_frame("1700000000000", "/tail #'g' 5")).unwrap();
        assert_eq!(frame["corrId"], "1700000000000");
        assert_eq!(frame["cmd"], "/tail #'g' 5");
    }

    #[test]
    fn decodes_direct_success() {
        let frame = json!({"corrId": "1", "resp": {"type": "chatItems", "chatItems": []}});
        let resp = decode_response(&frame).unwrap();
        assert_eq!(resp.kind, "chatItems");
        assert!(resp.body["chatItems"].is_array());
    }

    #[test]
    fn decodes_right_wrapped_success() {
        let frame = json!({"corrId": "1", "resp": {"Right": {"type": "groupMembers", "group": {"members": []}}}});
        let resp = decode_response(&frame).unwrap();
        assert_eq!(resp.kind, "groupMembers");
        assert!(resp.body["group"]["members"].is_array());
    }

    #[test]
    fn both_generations_give_identical_command_error() {
        let error = json!({"type": "error", "errorType": {"type": "groupNotFound"}});
        let direct = json!({"corrId": "1", "resp": {"type": "chatCmdError", "chatError": error}});
        let wrapped = json!({"corrId": "1", "resp": {"Left": {"type": "chatCmdError", "chatError": error}}});

        let a = decode_response(&direct).unwrap_err().to_string();
        let b = decode_response(&wrapped).unwrap_err().to_string();
        assert_eq!(a, b);
        assert!(a.starts_with("chatCmdError: "));
        assert!(a.contains("groupNotFound"));
    }

    #[test]
    fn missing_resp_or_type_is_a_decode_error() {
        let no_resp = json!({"corrId": "1"});
        assert!(matches!(decode_response(&no_resp), Err(SdkError::Decode(_))));

        let no_type = json!({"corrId": "1", "resp": {"Right": {"chatItems": []}}});
        assert!(matches!(decode_response(&no_type), Err(SdkError::Decode(_))));
    }

    #[test]
    fn expect_kind_rejects_other_types() {
        let resp = ChatResponse { kind: "newChatItems".into(), body: json!({"type": "newChatItems"}) };
        assert!(matches!(resp.expect_kind("chatItems"), Err(SdkError::Decode(_))));
    }

    #[test]
    fn corr_id_accepts_string_and_number() {
        assert_eq!(frame_corr_id(&json!({"corrId": "42"})), Some("42".to_string()));
        assert_eq!(frame_corr_id(&json!({"corrId": 42})), Some("42".to_string()));
        assert_eq!(frame_corr_id(&json!({"resp": {}})), None);
    }
}
