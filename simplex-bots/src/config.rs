//! Module configuration for simplex-bots.
//!
//! One TOML file lists every module instance to run. Each `[[moderate]]`,
//! `[[quota]]` or `[[promote]]` table starts one module watching one group
//! on one daemon port. Relative rule and cache file paths resolve against the directory
//! of the config file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use simplex_sdk::history::DEFAULT_RETRIEVE_COUNT;

/// Default config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "bot-config/simplex-bots.toml";
pub const DEFAULT_SLEEP_SECONDS: u64 = 60;
pub const DEFAULT_MIN_WAIT_DAYS: u64 = 1;
/// Upper bound for `min_wait_days`, about a century.
pub const MAX_MIN_WAIT_DAYS: u64 = 36_500;

pub const BLOCK_RULES_FILE: &str = "moderate-bot-block-blacklist.txt";
pub const MODERATE_RULES_FILE: &str = "moderate-bot-moderate-blacklist.txt";
pub const REPORT_RULES_FILE: &str = "moderate-bot-report-blacklist.txt";
pub const MODERATE_CACHE_FILE: &str = "moderate-bot-message-cache.tmp";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    #[serde(default)]
    pub moderate: Vec<ModerateConfig>,
    #[serde(default)]
    pub quota: Vec<QuotaConfig>,
    #[serde(default)]
    pub promote: Vec<PromoteConfig>,
}

/// Who receives the bot's log lines inside the chat.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminRecipients {
    #[serde(default)]
    pub report_to_contacts: Vec<String>,
    #[serde(default)]
    pub report_to_groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModerateConfig {
    pub port: u16,
    pub group: String,
    #[serde(default = "default_sleep")]
    pub sleep_time_seconds: u64,
    #[serde(flatten)]
    pub admins: AdminRecipients,
    #[serde(default = "default_block_rules")]
    pub block_rules: PathBuf,
    #[serde(default = "default_moderate_rules")]
    pub moderate_rules: PathBuf,
    #[serde(default = "default_report_rules")]
    pub report_rules: PathBuf,
    #[serde(default = "default_retrieve_count")]
    pub number_of_messages_to_retrieve: usize,
    /// Remember processed messages across restarts.
    #[serde(default)]
    pub persist_state: bool,
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    pub port: u16,
    pub group: String,
    pub message_quota_per_hour: usize,
    pub message_quota_per_day: usize,
    pub spam_quota_per_hour: usize,
    pub spam_quota_per_day: usize,
    /// Do not announce downgrades in the group.
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_sleep")]
    pub sleep_time_seconds: u64,
    #[serde(default = "default_retrieve_count")]
    pub number_of_messages_to_retrieve: usize,
    #[serde(flatten)]
    pub admins: AdminRecipients,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromoteConfig {
    pub port: u16,
    pub group: String,
    #[serde(default = "default_sleep")]
    pub sleep_time_seconds: u64,
    /// Days an observer must have been connected before promotion.
    #[serde(default = "default_min_wait_days")]
    pub min_wait_days: u64,
    /// Where the number of promoted members is announced.
    #[serde(default)]
    pub output_to_contacts: Vec<String>,
    #[serde(default)]
    pub output_to_groups: Vec<String>,
    #[serde(flatten)]
    pub admins: AdminRecipients,
}

fn default_sleep() -> u64 {
    DEFAULT_SLEEP_SECONDS
}

fn default_retrieve_count() -> usize {
    DEFAULT_RETRIEVE_COUNT
}

fn default_min_wait_days() -> u64 {
    DEFAULT_MIN_WAIT_DAYS
}

fn default_block_rules() -> PathBuf {
    PathBuf::from(BLOCK_RULES_FILE)
}

fn default_moderate_rules() -> PathBuf {
    PathBuf::from(MODERATE_RULES_FILE)
}

fn default_report_rules() -> PathBuf {
    PathBuf::from(REPORT_RULES_FILE)
}

fn default_cache_file() -> PathBuf {
    PathBuf::from(MODERATE_CACHE_FILE)
}

impl BotConfig {
    /// Read, validate and resolve a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("can't read config file {}", path.display()))?;
        let mut config = Self::parse(&text)
            .with_context(|| format!("bad config file {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut config: BotConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_empty(&self) -> bool {
        self.moderate.is_empty() && self.quota.is_empty() && self.promote.is_empty()
    }

    fn validate(&mut self) -> Result<()> {
        for (i, m) in self.moderate.iter_mut().enumerate() {
            let name = format!("moderate[{i}]");
            check_target(&name, m.port, &m.group)?;
            fix_sleep(&name, &mut m.sleep_time_seconds);
            check_positive(&name, "number_of_messages_to_retrieve", m.number_of_messages_to_retrieve)?;
        }
        for (i, q) in self.quota.iter_mut().enumerate() {
            let name = format!("quota[{i}]");
            check_target(&name, q.port, &q.group)?;
            fix_sleep(&name, &mut q.sleep_time_seconds);
            check_positive(&name, "number_of_messages_to_retrieve", q.number_of_messages_to_retrieve)?;
            check_positive(&name, "message_quota_per_hour", q.message_quota_per_hour)?;
            check_positive(&name, "message_quota_per_day", q.message_quota_per_day)?;
            check_positive(&name, "spam_quota_per_hour", q.spam_quota_per_hour)?;
            check_positive(&name, "spam_quota_per_day", q.spam_quota_per_day)?;
        }
        for (i, p) in self.promote.iter_mut().enumerate() {
            let name = format!("promote[{i}]");
            check_target(&name, p.port, &p.group)?;
            fix_sleep(&name, &mut p.sleep_time_seconds);
            if p.min_wait_days > MAX_MIN_WAIT_DAYS {
                bail!("{name}: 'min_wait_days' must be at most {MAX_MIN_WAIT_DAYS}");
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for m in &mut self.moderate {
            for path in [&mut m.block_rules, &mut m.moderate_rules, &mut m.report_rules, &mut m.cache_file] {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        }
    }
}

fn check_target(name: &str, port: u16, group: &str) -> Result<()> {
    if port == 0 {
        bail!("{name}: 'port' must be greater than 0");
    }
    if group.trim().is_empty() {
        bail!("{name}: 'group' must not be blank");
    }
    Ok(())
}

fn check_positive(name: &str, field: &str, value: usize) -> Result<()> {
    if value == 0 {
        bail!("{name}: '{field}' must be greater than 0");
    }
    Ok(())
}

fn fix_sleep(name: &str, sleep: &mut u64) {
    if *sleep == 0 {
        tracing::warn!(module = %name, "sleep_time_seconds is 0, using {DEFAULT_SLEEP_SECONDS}");
        *sleep = DEFAULT_SLEEP_SECONDS;
    }
}
