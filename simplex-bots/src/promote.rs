//! Promote module: lift observers to full members once they have been
//! connected to the group for a minimum number of days.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use simplex_sdk::client::ChatClient;
use simplex_sdk::model::{Member, MemberRole};

use crate::config::PromoteConfig;
use crate::output::Reporter;

pub struct PromoteModule {
    config: PromoteConfig,
    client: ChatClient,
    reporter: Reporter,
}

impl PromoteModule {
    pub fn new(config: PromoteConfig, client: ChatClient) -> Self {
        let reporter = Reporter::new(client.clone(), "promote", config.admins.clone());
        Self {
            config,
            client,
            reporter,
        }
    }

    pub async fn run(self) -> Result<()> {
        self.reporter
            .info(&format!(
                "Starting promotion of observers in group '{}' on port {} (minimum wait {} day(s))",
                self.config.group, self.config.port, self.config.min_wait_days,
            ))
            .await;

        let sleep = Duration::from_secs(self.config.sleep_time_seconds);
        loop {
            self.cycle(Utc::now()).await;
            tokio::time::sleep(sleep).await;
        }
    }

    /// One pass over the roster. Returns the number of promoted members.
    pub(crate) async fn cycle(&self, now: DateTime<Utc>) -> usize {
        let group = &self.config.group;
        self.reporter
            .info(&format!("Promoting members in group '{group}' from 'observer' to 'member'"))
            .await;

        let roster = match self.client.group_members(group).await {
            Ok(roster) => roster,
            Err(e) => {
                self.reporter.error(&format!("Failed to list members of group '{group}': {e}")).await;
                return 0;
            }
        };

        let mut promoted = 0;
        for member in roster
            .iter()
            .filter(|m| m.status.is_present() && m.role == MemberRole::Observer)
        {
            if !self.waited_long_enough(member, now).await {
                continue;
            }
            match self.client.change_member_role(group, &member.local_name, &MemberRole::Member).await {
                Ok(()) => promoted += 1,
                Err(e) => {
                    self.reporter
                        .error(&format!("Failed to promote '{}' in group '{group}': {e}", member.local_name))
                        .await;
                }
            }
        }

        let summary = format!("Promoted {promoted} member(s) in group '{group}'");
        self.reporter.info(&summary).await;
        if promoted > 0 {
            self.client
                .send_to_recipients(&self.config.output_to_contacts, &self.config.output_to_groups, &summary)
                .await;
        }
        promoted
    }

    /// Members without a connection time are promoted, with a warning.
    async fn waited_long_enough(&self, member: &Member, now: DateTime<Utc>) -> bool {
        let Some(connected) = member.created_at else {
            self.reporter
                .warn(&format!(
                    "Member '{}' [{}] in group '{}' is not connected!",
                    member.display_name, member.local_name, self.config.group
                ))
                .await;
            return true;
        };
        let min_wait = TimeDelta::days(self.config.min_wait_days as i64);
        now.signed_duration_since(connected).abs() >= min_wait
    }
}
