//! Message quota module: downgrade members who post too much.
//!
//! Members are tracked by local handle over a rolling 24 hour window. A
//! member who exceeds the hourly or daily message quota, or who repeats the
//! same text more often than the spam quotas allow, is changed to observer
//! unless they hold an elevated role or already left the group.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use simplex_sdk::client::ChatClient;
use simplex_sdk::history::GroupHistory;
use simplex_sdk::model::{Member, MemberRole, Message};

use crate::config::QuotaConfig;
use crate::output::Reporter;

const HOUR: i64 = 60 * 60;
const DAY: i64 = 24 * HOUR;

#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub messages_per_hour: usize,
    pub messages_per_day: usize,
    pub spam_per_hour: usize,
    pub spam_per_day: usize,
}

impl From<&QuotaConfig> for QuotaLimits {
    fn from(config: &QuotaConfig) -> Self {
        Self {
            messages_per_hour: config.message_quota_per_hour,
            messages_per_day: config.message_quota_per_day,
            spam_per_hour: config.spam_quota_per_hour,
            spam_per_day: config.spam_quota_per_day,
        }
    }
}

/// Counts over one member's recent messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub within_hour: usize,
    pub within_day: usize,
    /// Highest number of identical texts.
    pub max_repeat_hour: usize,
    pub max_repeat_day: usize,
}

impl Usage {
    pub fn is_spam(&self, limits: &QuotaLimits) -> bool {
        self.max_repeat_hour > limits.spam_per_hour || self.max_repeat_day > limits.spam_per_day
    }

    pub fn exceeds(&self, limits: &QuotaLimits) -> bool {
        self.within_hour > limits.messages_per_hour
            || self.within_day > limits.messages_per_day
            || self.is_spam(limits)
    }
}

impl std::fmt::Display for Usage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "messages within hour={} within day={}, max repeats within hour={} within day={}",
            self.within_hour, self.within_day, self.max_repeat_hour, self.max_repeat_day
        )
    }
}

#[derive(Debug, Clone)]
pub struct Violation {
    /// Latest known snapshot of the member.
    pub member: Member,
    pub usage: Usage,
    pub spam: bool,
}

#[derive(Debug, Default)]
pub struct Assessment {
    pub violations: Vec<Violation>,
    /// Members with messages stamped after `now`.
    pub from_the_future: Vec<Member>,
}

/// Recent messages per member.
#[derive(Debug, Default)]
pub struct QuotaRecord {
    members: HashMap<String, (Member, Vec<Message>)>,
}

impl QuotaRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Track a message, refreshing the author's role and status.
    pub fn add(&mut self, message: Message) {
        let author = message.author.clone();
        let entry = self
            .members
            .entry(author.local_name.clone())
            .or_insert_with(|| (author.clone(), Vec::new()));
        entry.0 = author;
        entry.1.push(message);
    }

    /// Count usage, drop messages older than a day and forget members who
    /// violated a quota or have nothing left.
    pub fn assess(&mut self, now: DateTime<Utc>, limits: &QuotaLimits) -> Assessment {
        let mut assessment = Assessment::default();

        self.members.retain(|_, (member, messages)| {
            let mut usage = Usage::default();
            let mut repeats_hour: HashMap<&str, usize> = HashMap::new();
            let mut repeats_day: HashMap<&str, usize> = HashMap::new();
            let mut future = false;

            for message in messages.iter() {
                let age = (now - message.timestamp).num_seconds();
                if age < 0 {
                    future = true;
                }
                let text = message.text.as_str();
                if age < HOUR {
                    usage.within_hour += 1;
                    if !text.is_empty() {
                        *repeats_hour.entry(text).or_default() += 1;
                    }
                }
                if age < DAY {
                    usage.within_day += 1;
                    if !text.is_empty() {
                        *repeats_day.entry(text).or_default() += 1;
                    }
                }
            }
            usage.max_repeat_hour = repeats_hour.values().copied().max().unwrap_or(0);
            usage.max_repeat_day = repeats_day.values().copied().max().unwrap_or(0);

            if future {
                assessment.from_the_future.push(member.clone());
            }

            if usage.exceeds(limits) {
                assessment.violations.push(Violation {
                    member: member.clone(),
                    usage,
                    spam: usage.is_spam(limits),
                });
                return false;
            }

            messages.retain(|m| (now - m.timestamp).num_seconds() < DAY);
            !messages.is_empty()
        });

        assessment
    }
}

pub struct QuotaModule {
    config: QuotaConfig,
    limits: QuotaLimits,
    client: ChatClient,
    reporter: Reporter,
    record: QuotaRecord,
}

impl QuotaModule {
    pub fn new(config: QuotaConfig, client: ChatClient) -> Self {
        let reporter = Reporter::new(client.clone(), "quota", config.admins.clone());
        Self {
            limits: QuotaLimits::from(&config),
            config,
            client,
            reporter,
            record: QuotaRecord::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        self.reporter
            .info(&format!(
                "Starting message quota for group '{}' on port {} (per hour {}, per day {}, spam per hour {}, spam per day {}, silent {})",
                self.config.group,
                self.config.port,
                self.limits.messages_per_hour,
                self.limits.messages_per_day,
                self.limits.spam_per_hour,
                self.limits.spam_per_day,
                self.config.silent,
            ))
            .await;

        // Backlog counts towards the quota.
        let mut history = GroupHistory::new(
            self.config.group.clone(),
            self.config.number_of_messages_to_retrieve,
            true,
        );
        let sleep = Duration::from_secs(self.config.sleep_time_seconds);
        loop {
            self.cycle(&mut history, Utc::now()).await?;
            tokio::time::sleep(sleep).await;
        }
    }

    pub(crate) async fn cycle(&mut self, history: &mut GroupHistory, now: DateTime<Utc>) -> Result<()> {
        let messages = match history.poll(&self.client).await {
            Ok(messages) => messages,
            Err(e) if e.is_fatal() => {
                self.reporter.error(&format!("Message quota has finished with error: {e}")).await;
                return Err(e.into());
            }
            Err(e) => {
                self.reporter.error(&format!("Polling group '{}' failed: {e}", self.config.group)).await;
                return Ok(());
            }
        };
        if messages.is_empty() {
            return Ok(());
        }

        for message in messages {
            self.record.add(message);
        }
        let assessment = self.record.assess(now, &self.limits);

        for member in &assessment.from_the_future {
            self.reporter
                .error(&format!(
                    "Message from the future detected from member '{}' [{}] in group '{}'",
                    member.display_name, member.local_name, self.config.group
                ))
                .await;
        }
        for violation in &assessment.violations {
            self.enforce(violation).await;
        }
        Ok(())
    }

    async fn enforce(&self, violation: &Violation) {
        let member = &violation.member;
        if !member.status.is_present() || member.role.is_elevated() {
            return;
        }
        if member.role == MemberRole::Observer {
            self.reporter
                .warn(&format!(
                    "Member '{}' [{}] in group '{}' is already downgraded: {}",
                    member.display_name, member.local_name, self.config.group, violation.usage
                ))
                .await;
            return;
        }

        self.reporter
            .info(&format!(
                "Downgrading member '{}' [{}] in group '{}' to observer: {}",
                member.display_name, member.local_name, self.config.group, violation.usage
            ))
            .await;
        if let Err(e) = self
            .client
            .change_member_role(&self.config.group, &member.local_name, &MemberRole::Observer)
            .await
        {
            self.reporter.error(&format!("Failed to downgrade '{}': {e}", member.local_name)).await;
            return;
        }

        if !self.config.silent {
            let reason = if violation.spam { "Spam detected" } else { "Message quota reached" };
            let notice = format!(
                "{reason} by member '{}' => downgrading to 'observer'!",
                member.display_name
            );
            if let Err(e) = self.client.send_to_group(&self.config.group, &notice).await {
                self.reporter.error(&format!("Failed to announce downgrade: {e}")).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::config::BotConfig;
    use crate::testing::{FakeDaemon, base_time, chat_item, member, message_at};

    fn limits() -> QuotaLimits {
        QuotaLimits {
            messages_per_hour: 3,
            messages_per_day: 5,
            spam_per_hour: 1,
            spam_per_day: 2,
        }
    }

    fn texted(id: i64, minutes_ago: i64, text: &str, now: DateTime<Utc>) -> Message {
        let mut m = message_at(id, 0);
        m.timestamp = now - ChronoDuration::minutes(minutes_ago);
        m.text = text.to_string();
        m
    }

    #[test]
    fn within_quota_keeps_member_and_prunes_old_messages() {
        let now = base_time();
        let mut record = QuotaRecord::new();
        record.add(texted(1, 2 * 24 * 60, "ancient", now));
        record.add(texted(2, 5, "a", now));
        record.add(texted(3, 90, "b", now));

        let assessment = record.assess(now, &limits());
        assert!(assessment.violations.is_empty());
        assert_eq!(record.len(), 1);

        // Only the two recent messages remain, so two more stay within quota.
        record.add(texted(4, 1, "c", now));
        assert!(record.assess(now, &limits()).violations.is_empty());
    }

    #[test]
    fn hourly_quota_violation_clears_member() {
        let now = base_time();
        let mut record = QuotaRecord::new();
        for id in 0..4 {
            record.add(texted(id, id, &format!("text {id}"), now));
        }
        let assessment = record.assess(now, &limits());
        assert_eq!(assessment.violations.len(), 1);
        let v = &assessment.violations[0];
        assert_eq!(v.usage.within_hour, 4);
        assert!(!v.spam);
        assert!(record.is_empty());
    }

    #[test]
    fn repeated_text_is_spam() {
        let now = base_time();
        let mut record = QuotaRecord::new();
        record.add(texted(1, 1, "buy now", now));
        record.add(texted(2, 2, "buy now", now));
        let v = &record.assess(now, &limits()).violations[0];
        assert!(v.spam);
        assert_eq!(v.usage.max_repeat_hour, 2);
    }

    #[test]
    fn future_messages_are_flagged() {
        let now = base_time();
        let mut record = QuotaRecord::new();
        record.add(texted(1, -10, "hello", now));
        let assessment = record.assess(now, &limits());
        assert_eq!(assessment.from_the_future.len(), 1);
    }

    #[test]
    fn latest_member_snapshot_wins() {
        let now = base_time();
        let mut record = QuotaRecord::new();
        record.add(texted(1, 1, "a", now));
        let mut promoted = texted(2, 1, "b", now);
        promoted.author = member("ann", "Ann", MemberRole::Admin);
        record.add(promoted);
        record.add(texted(3, 1, "c", now));
        record.add(texted(4, 1, "d", now));
        let violations = record.assess(now, &limits()).violations;
        // The last message came from a plain member snapshot again.
        assert_eq!(violations[0].member.role, MemberRole::Member);
    }

    fn quota_config(silent: bool) -> QuotaConfig {
        let text = format!(
            "[[quota]]\nport = 5225\ngroup = \"g\"\nmessage_quota_per_hour = 2\nmessage_quota_per_day = 10\n\
             spam_quota_per_hour = 5\nspam_quota_per_day = 5\nsilent = {silent}\n"
        );
        BotConfig::parse(&text).unwrap().quota.remove(0)
    }

    #[tokio::test]
    async fn downgrades_and_announces() {
        let daemon = FakeDaemon::new();
        let mut module = QuotaModule::new(quota_config(false), ChatClient::new(daemon.clone()));
        let mut history = GroupHistory::new("g", 500, true);
        daemon.set_items(vec![
            chat_item(1, "bob", "one", "2024-05-01T09:50:00Z"),
            chat_item(2, "bob", "two", "2024-05-01T09:55:00Z"),
            chat_item(3, "bob", "three", "2024-05-01T09:59:00Z"),
        ]);

        module.cycle(&mut history, base_time()).await.unwrap();
        assert_eq!(
            daemon.commands(),
            vec![
                "/member role #'g' 'bob' observer".to_string(),
                "#'g' Message quota reached by member 'bob display' => downgrading to 'observer'!".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn silent_mode_and_privileged_members() {
        let daemon = FakeDaemon::new();
        let mut module = QuotaModule::new(quota_config(true), ChatClient::new(daemon.clone()));
        let mut history = GroupHistory::new("g", 500, true);
        let mut items: Vec<_> = (1..=3)
            .map(|i| chat_item(i, "bob", &format!("m{i}"), "2024-05-01T09:58:00Z"))
            .collect();
        let mut admin: Vec<_> = (4..=6)
            .map(|i| chat_item(i, "root", &format!("m{i}"), "2024-05-01T09:58:00Z"))
            .collect();
        for item in &mut admin {
            item["chatItem"]["chatDir"]["groupMember"]["memberRole"] = "owner".into();
        }
        items.append(&mut admin);
        daemon.set_items(items);

        module.cycle(&mut history, base_time()).await.unwrap();
        assert_eq!(daemon.commands(), vec!["/member role #'g' 'bob' observer".to_string()]);
    }
}
