//! Turning chat-history snapshots into a stream of new and edited messages.
//!
//! The daemon only offers "give me the latest N items". Each poll returns a
//! window that overlaps the previous one, so [`reconcile`] compares every
//! item against a [`SlidingCache`] of identities already seen and hands on
//! only the messages that are new or whose text changed.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::cache_file::{CacheFile, CacheLoad};
use crate::client::ChatClient;
use crate::error::{Result, SdkError};
use crate::model::{ContentKind, Member, Message, MessageKey, QuotedMessage, parse_item_timestamp};
use crate::protocol::ChatResponse;

/// Items requested per poll unless configured otherwise.
pub const DEFAULT_RETRIEVE_COUNT: usize = 500;

/// Extra identities kept beyond the retrieve window so that items shifting
/// in and out of the window are not mistaken for new ones.
pub const CACHE_MARGIN: usize = 500;

pub fn cache_bound(retrieve_count: usize) -> usize {
    retrieve_count + CACHE_MARGIN
}

// ── Sliding cache ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    key: MessageKey,
    /// `None` for identities restored from disk.
    text: Option<String>,
}

/// Seen message identities in arrival order, with their last known text.
///
/// Lookup goes through a slot index; eviction happens at the front only,
/// so slots are absolute sequence numbers offset by `base`.
#[derive(Debug, Default)]
pub struct SlidingCache {
    entries: VecDeque<Entry>,
    slots: HashMap<MessageKey, u64>,
    base: u64,
}

impl SlidingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding identities with unknown text, e.g. from a cache file.
    pub fn from_keys(keys: impl IntoIterator<Item = MessageKey>) -> Self {
        let mut cache = Self::new();
        for key in keys {
            if !cache.contains(&key) {
                cache.push(key, None);
            }
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Last known text of a message, `None` if unknown or never seen.
    pub fn text_of(&self, key: &MessageKey) -> Option<&str> {
        self.entry(key).and_then(|e| e.text.as_deref())
    }

    /// Identities in arrival order.
    pub fn keys(&self) -> impl Iterator<Item = MessageKey> + '_ {
        self.entries.iter().map(|e| e.key)
    }

    /// Drop the oldest identities until at most `bound` remain.
    pub fn trim_to(&mut self, bound: usize) {
        while self.entries.len() > bound {
            if let Some(evicted) = self.entries.pop_front() {
                self.slots.remove(&evicted.key);
                self.base += 1;
            }
        }
    }

    fn push(&mut self, key: MessageKey, text: Option<String>) {
        let slot = self.base + self.entries.len() as u64;
        self.entries.push_back(Entry { key, text });
        self.slots.insert(key, slot);
    }

    fn entry(&self, key: &MessageKey) -> Option<&Entry> {
        let slot = *self.slots.get(key)?;
        self.entries.get((slot - self.base) as usize)
    }

    fn entry_mut(&mut self, key: &MessageKey) -> Option<&mut Entry> {
        let slot = *self.slots.get(key)?;
        self.entries.get_mut((slot - self.base) as usize)
    }
}

// ── Raw item shape ─────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    chat_info: RawChatInfo,
    chat_item: RawChatItem,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChatInfo {
    group_info: RawGroupInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroupInfo {
    group_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChatItem {
    chat_dir: RawChatDir,
    meta: RawMeta,
    content: RawContent,
    #[serde(default)]
    quoted_item: Option<RawQuotedItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChatDir {
    group_member: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    item_id: i64,
    item_ts: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContent {
    msg_content: RawMsgContent,
}

#[derive(Deserialize)]
struct RawMsgContent {
    #[serde(rename = "type")]
    kind: String,
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuotedItem {
    #[serde(default)]
    item_id: Option<i64>,
    content: RawMsgContent,
    #[serde(default)]
    chat_dir: Option<RawQuotedDir>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuotedDir {
    #[serde(default)]
    group_member: Option<Value>,
}

// ── Reconciliation ─────────────────────────────────────────────────

enum Decoded {
    Message(Message),
    /// Not a received group message; ignored.
    Irrelevant,
    /// Timestamp in an unexpected format; logged and ignored.
    BadTimestamp(String),
}

fn decode_item(item: &Value) -> Result<Decoded> {
    let is_group = item.pointer("/chatInfo/type").and_then(Value::as_str) == Some("group");
    let is_received =
        item.pointer("/chatItem/content/type").and_then(Value::as_str) == Some("rcvMsgContent");
    if !is_group || !is_received {
        return Ok(Decoded::Irrelevant);
    }

    let shape_error = |e: serde_json::Error| SdkError::Reconciliation(format!("{e}: {item}"));
    let raw = RawItem::deserialize(item).map_err(shape_error)?;

    let Some(timestamp) = parse_item_timestamp(&raw.chat_item.meta.item_ts) else {
        return Ok(Decoded::BadTimestamp(raw.chat_item.meta.item_ts));
    };

    let author = Member::from_value(&raw.chat_item.chat_dir.group_member).map_err(shape_error)?;
    let quoted = match raw.chat_item.quoted_item {
        Some(q) => Some(QuotedMessage {
            id: q.item_id,
            kind: ContentKind::parse(&q.content.kind),
            text: q.content.text,
            author: match q.chat_dir.and_then(|d| d.group_member) {
                Some(member) => Some(Member::from_value(&member).map_err(shape_error)?),
                None => None,
            },
        }),
        None => None,
    };

    Ok(Decoded::Message(Message {
        id: raw.chat_item.meta.item_id,
        container_id: raw.chat_info.group_info.group_id,
        kind: ContentKind::parse(&raw.chat_item.content.msg_content.kind),
        text: raw.chat_item.content.msg_content.text,
        author,
        timestamp,
        quoted,
    }))
}

/// Reconcile one `chatItems` reply against the cache.
///
/// Returns messages that are new or edited since they were last seen, in
/// the order the daemon listed them. When the cache starts out empty and
/// `surface_backlog` is false the cache is primed and nothing is returned.
pub fn reconcile(
    cache: &mut SlidingCache,
    response: &ChatResponse,
    retrieve_count: usize,
    surface_backlog: bool,
    now: DateTime<Utc>,
) -> Result<Vec<Message>> {
    let items = response
        .body
        .get("chatItems")
        .and_then(Value::as_array)
        .ok_or_else(|| SdkError::Reconciliation("reply has no 'chatItems' array".to_string()))?;

    let first_pass = cache.is_empty();
    let mut fresh: Vec<Message> = Vec::new();
    // Position in `fresh` of every identity emitted during this pass.
    let mut emitted: HashMap<MessageKey, usize> = HashMap::new();

    for item in items {
        let message = match decode_item(item)? {
            Decoded::Message(message) => message,
            Decoded::Irrelevant => continue,
            Decoded::BadTimestamp(ts) => {
                tracing::warn!(item_ts = %ts, "Skipping chat item with unexpected timestamp format");
                continue;
            }
        };

        if message.timestamp > now {
            tracing::warn!(
                id = message.id,
                group_id = message.container_id,
                item_ts = %message.timestamp,
                "Chat item is stamped in the future"
            );
        }

        let key = message.key();
        let surfaced = match cache.entry_mut(&key) {
            None => {
                cache.push(key, Some(message.text.clone()));
                true
            }
            Some(entry) => {
                // Restored identities have no text yet and are not edits.
                let edited = entry.text.as_deref().is_some_and(|text| text != message.text);
                entry.text = Some(message.text.clone());
                edited
            }
        };
        if !surfaced {
            continue;
        }
        match emitted.get(&key) {
            // Listed twice in one reply: the later copy wins.
            Some(&at) => fresh[at] = message,
            None => {
                emitted.insert(key, fresh.len());
                fresh.push(message);
            }
        }
    }

    cache.trim_to(cache_bound(retrieve_count));

    if first_pass && !surface_backlog {
        return Ok(Vec::new());
    }
    Ok(fresh)
}

// ── Per-group poller ───────────────────────────────────────────────

/// Reconciliation state of one group for one module.
pub struct GroupHistory {
    group: String,
    retrieve_count: usize,
    surface_backlog: bool,
    cache: SlidingCache,
    cache_file: Option<CacheFile>,
}

impl GroupHistory {
    pub fn new(group: impl Into<String>, retrieve_count: usize, surface_backlog: bool) -> Self {
        Self {
            group: group.into(),
            retrieve_count,
            surface_backlog,
            cache: SlidingCache::new(),
            cache_file: None,
        }
    }

    /// Restore and record processed identities through `file`.
    pub fn with_cache_file(mut self, file: CacheFile) -> Self {
        self.cache_file = Some(file);
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn retrieve_count(&self) -> usize {
        self.retrieve_count
    }

    pub fn cache(&self) -> &SlidingCache {
        &self.cache
    }

    pub fn cache_file(&self) -> Option<&CacheFile> {
        self.cache_file.as_ref()
    }

    /// Load the cache file, or rebuild it from live history when it is
    /// missing or stale. Does nothing without a cache file.
    pub async fn prime(&mut self, client: &ChatClient) -> Result<()> {
        let Some(file) = self.cache_file.clone() else {
            return Ok(());
        };

        let load = file.load(self.retrieve_count).unwrap_or_else(|e| {
            CacheLoad::Stale(format!("unreadable: {e}"))
        });
        match load {
            CacheLoad::Loaded(keys) => {
                self.cache = SlidingCache::from_keys(keys);
                tracing::info!(
                    group = %self.group,
                    path = %file.path().display(),
                    entries = self.cache.len(),
                    "Restored message cache"
                );
                return Ok(());
            }
            CacheLoad::Missing => {
                tracing::info!(path = %file.path().display(), "No message cache file, building one");
            }
            CacheLoad::Stale(reason) => {
                tracing::warn!(path = %file.path().display(), reason = %reason, "Resetting message cache file");
            }
        }

        let mut cache = SlidingCache::new();
        let response = client.tail_group(&self.group, self.retrieve_count).await?;
        reconcile(&mut cache, &response, self.retrieve_count, true, Utc::now())?;
        let keys: Vec<MessageKey> = cache.keys().collect();
        if let Err(e) = file.write(self.retrieve_count, &keys) {
            tracing::error!(path = %file.path().display(), error = %e, "Failed to write message cache file");
        }
        self.cache = cache;
        Ok(())
    }

    /// Fetch the latest items and return what is new or edited.
    pub async fn poll(&mut self, client: &ChatClient) -> Result<Vec<Message>> {
        let response = client.tail_group(&self.group, self.retrieve_count).await?;
        reconcile(
            &mut self.cache,
            &response,
            self.retrieve_count,
            self.surface_backlog,
            Utc::now(),
        )
    }

    /// Persist one processed identity, if a cache file is configured.
    pub fn record_processed(&self, key: MessageKey) {
        let Some(file) = &self.cache_file else {
            return;
        };
        if let Err(e) = file.add_processed(key, self.retrieve_count) {
            tracing::error!(path = %file.path().display(), error = %e, "Failed to update message cache file");
        }
    }
}
