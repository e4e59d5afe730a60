//! Moderation module: watch a group, match messages against blacklists,
//! and block members, delete messages or report them to the admins.
//!
//! The poll loop classifies new and edited messages into [`ActionItem`]s
//! and pushes them onto a shared [`ActionQueue`]. A separate consumer task
//! executes them in priority order, so a burst of reports never delays a
//! block.

pub mod executor;
pub mod queue;
pub mod rules;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use simplex_sdk::cache_file::CacheFile;
use simplex_sdk::client::ChatClient;
use simplex_sdk::history::GroupHistory;

use crate::config::ModerateConfig;
use crate::output::Reporter;
use executor::ActionExecutor;
pub use queue::{ActionItem, ActionKind, ActionQueue};
pub use rules::{RuleSet, Rules};

pub struct ModerateModule {
    config: ModerateConfig,
    rules: Rules,
    client: ChatClient,
    reporter: Reporter,
}

impl ModerateModule {
    /// Load the three rule files named in `config`.
    pub fn new(config: ModerateConfig, client: ChatClient) -> Result<Self> {
        let rules = Rules {
            block: RuleSet::load(&config.block_rules)?,
            moderate: RuleSet::load(&config.moderate_rules)?,
            report: RuleSet::load(&config.report_rules)?,
        };
        Ok(Self::with_rules(config, client, rules))
    }

    pub fn with_rules(config: ModerateConfig, client: ChatClient, rules: Rules) -> Self {
        let reporter = Reporter::new(client.clone(), "moderate", config.admins.clone());
        Self {
            config,
            rules,
            client,
            reporter,
        }
    }

    fn history(&self) -> GroupHistory {
        let history = GroupHistory::new(
            self.config.group.clone(),
            self.config.number_of_messages_to_retrieve,
            false,
        );
        if self.config.persist_state {
            return history.with_cache_file(CacheFile::new(&self.config.cache_file));
        }
        // With persistence off no cache file may outlive this run.
        discard_cache_file(&self.config.cache_file);
        history
    }

    /// Poll until a fatal error. Transport errors are reported and retried
    /// on the next cycle, priming included.
    pub async fn run(self) -> Result<()> {
        self.reporter
            .info(&format!(
                "Starting moderation of group '{}' on port {} (block: {} keywords, moderate: {} keywords, report: {} keywords)",
                self.config.group,
                self.config.port,
                self.rules.block.keywords.len(),
                self.rules.moderate.keywords.len(),
                self.rules.report.keywords.len(),
            ))
            .await;

        let queue = Arc::new(ActionQueue::new());
        let executor = ActionExecutor::new(self.client.clone(), self.config.group.clone(), self.reporter.clone());
        let mut consumer = tokio::spawn(executor.run(queue.clone()));

        let mut history = self.history();
        let mut primed = false;

        let sleep = Duration::from_secs(self.config.sleep_time_seconds);
        loop {
            if !primed {
                match self.prime(&mut history).await {
                    Ok(ready) => primed = ready,
                    Err(e) => {
                        consumer.abort();
                        return Err(e);
                    }
                }
            }
            if primed {
                if let Err(e) = self.cycle(&mut history, &queue).await {
                    consumer.abort();
                    return Err(e);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                joined = &mut consumer => {
                    let reason = match joined {
                        Ok(()) => "finished".to_string(),
                        Err(e) => e.to_string(),
                    };
                    self.reporter.error(&format!("Action executor has stopped: {reason}")).await;
                    return Err(anyhow!("action executor stopped: {reason}"));
                }
            }
        }
    }

    /// Restore or rebuild the message cache. `Ok(false)` when the daemon
    /// could not be queried; the caller tries again next cycle.
    pub(crate) async fn prime(&self, history: &mut GroupHistory) -> Result<bool> {
        match history.prime(&self.client).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_fatal() => {
                self.reporter.error(&format!("Moderation has finished with error: {e}")).await;
                Err(e.into())
            }
            Err(e) => {
                self.reporter
                    .error(&format!("Failed to initialise message cache, retrying next cycle: {e}"))
                    .await;
                Ok(false)
            }
        }
    }

    /// One poll: fetch, reconcile, classify, enqueue.
    pub(crate) async fn cycle(&self, history: &mut GroupHistory, queue: &ActionQueue) -> Result<()> {
        let messages = match history.poll(&self.client).await {
            Ok(messages) => messages,
            Err(e) if e.is_fatal() => {
                self.reporter.error(&format!("Moderation has finished with error: {e}")).await;
                return Err(e.into());
            }
            Err(e) => {
                self.reporter.error(&format!("Polling group '{}' failed: {e}", self.config.group)).await;
                return Ok(());
            }
        };

        for message in messages {
            tracing::debug!(id = message.id, author = %message.author.local_name, "Classifying message");
            for action in self.rules.classify(&message) {
                queue.push(action);
            }
            history.record_processed(message.key());
        }
        Ok(())
    }
}

fn discard_cache_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "Removed message cache file, persistence is off"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove message cache file"),
    }
}
