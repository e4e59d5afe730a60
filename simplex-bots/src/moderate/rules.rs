//! Blacklist rule sets and message classification.
//!
//! A rule file holds one rule per line:
//!
//! ```text
//! # comment
//! "#hashtag        <- keyword "#hashtag" (leading quote escapes the comment)
//! @image           <- every image message
//! @video / @file / @link / @voice
//! @regex ^buy .*$  <- whole-text regular expression
//! @user Spammer    <- exact sender display name
//! cheap pills      <- case-insensitive substring
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use simplex_sdk::model::{ContentKind, Message};

use super::queue::{ActionItem, ActionKind};

const IMAGE_RULE: &str = "@image";
const VIDEO_RULE: &str = "@video";
const FILE_RULE: &str = "@file";
const LINK_RULE: &str = "@link";
const VOICE_RULE: &str = "@voice";
const REGEX_RULE: &str = "@regex ";
const USER_RULE: &str = "@user ";

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    anchored: Regex,
}

/// One blacklist.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub images: bool,
    pub videos: bool,
    pub files: bool,
    pub links: bool,
    pub voice: bool,
    /// Lowercased.
    pub keywords: Vec<String>,
    patterns: Vec<Pattern>,
    pub users: Vec<String>,
}

impl RuleSet {
    /// Load a rule file. A missing file is an empty rule set.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No rule file, rule set is empty");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("can't read rule file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("bad rule file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Self::default();
        for line in text.lines() {
            if line.starts_with('#') {
                continue;
            }
            let line = if line.starts_with("\"#") { &line[1..] } else { line };

            if line.starts_with(IMAGE_RULE) {
                rules.images = true;
            } else if line.starts_with(VIDEO_RULE) {
                rules.videos = true;
            } else if line.starts_with(FILE_RULE) {
                rules.files = true;
            } else if line.starts_with(LINK_RULE) {
                rules.links = true;
            } else if line.starts_with(VOICE_RULE) {
                rules.voice = true;
            } else if let Some(source) = line.strip_prefix(REGEX_RULE) {
                rules.add_pattern(source.trim())?;
            } else if let Some(user) = line.strip_prefix(USER_RULE) {
                rules.users.push(user.trim().to_string());
            } else if !line.trim().is_empty() {
                rules.keywords.push(line.to_lowercase());
            }
        }
        Ok(rules)
    }

    pub fn add_pattern(&mut self, source: &str) -> Result<()> {
        let anchored = Regex::new(&format!("^(?:{source})$"))
            .with_context(|| format!("invalid regex '{source}'"))?;
        self.patterns.push(Pattern {
            source: source.to_string(),
            anchored,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        !(self.images || self.videos || self.files || self.links || self.voice)
            && self.keywords.is_empty()
            && self.patterns.is_empty()
            && self.users.is_empty()
    }

    /// First matching rule's reason: content kinds, then keywords, then
    /// regexes, then display names.
    pub fn first_match(&self, message: &Message) -> Option<String> {
        let kind_reason = match message.kind {
            ContentKind::Image if self.images => Some("*IMAGE*"),
            ContentKind::Video if self.videos => Some("*VIDEO*"),
            ContentKind::File if self.files => Some("*FILE*"),
            ContentKind::Link if self.links => Some("*LINK*"),
            ContentKind::Voice if self.voice => Some("*VOICE*"),
            _ => None,
        };
        if let Some(reason) = kind_reason {
            return Some(reason.to_string());
        }

        let text = message.text.to_lowercase();
        if let Some(keyword) = self.keywords.iter().find(|k| text.contains(k.as_str())) {
            return Some(format!("*KEYWORD* '{keyword}'"));
        }
        if let Some(pattern) = self.patterns.iter().find(|p| p.anchored.is_match(&message.text)) {
            return Some(format!("*REGEX* '{}'", pattern.source));
        }
        self.users
            .iter()
            .find(|u| **u == message.author.display_name)
            .map(|user| format!("*USER* '{user}'"))
    }
}

/// The three rule sets of a moderation module.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    pub block: RuleSet,
    pub moderate: RuleSet,
    pub report: RuleSet,
}

impl Rules {
    /// At most one action per rule set for a message.
    pub fn classify(&self, message: &Message) -> Vec<ActionItem> {
        let mut actions = Vec::new();
        let moderatable = is_moderatable(&message.kind);
        for (kind, rules) in [
            (ActionKind::Block, &self.block),
            (ActionKind::Moderate, &self.moderate),
            (ActionKind::Report, &self.report),
        ] {
            if kind != ActionKind::Report && !moderatable {
                continue;
            }
            if let Some(reason) = rules.first_match(message) {
                actions.push(ActionItem::new(kind, message.clone(), reason));
            }
        }
        actions
    }
}

/// Kinds that block and moderate rules apply to. Reports see everything.
fn is_moderatable(kind: &ContentKind) -> bool {
    matches!(
        kind,
        ContentKind::Text
            | ContentKind::Image
            | ContentKind::Video
            | ContentKind::File
            | ContentKind::Link
            | ContentKind::Voice
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::message;

    #[test]
    fn parses_every_rule_form() {
        let rules = RuleSet::parse(
            "# spam list\n\
             \"#crypto\n\
             @image\n\
             @voice\n\
             @regex ^buy .*$\n\
             @user  Spam Bot \n\
             \n\
             Cheap Pills\n",
        )
        .unwrap();
        assert!(rules.images && rules.voice);
        assert!(!rules.videos && !rules.files && !rules.links);
        assert_eq!(rules.keywords, vec!["#crypto".to_string(), "cheap pills".to_string()]);
        assert_eq!(rules.users, vec!["Spam Bot".to_string()]);
        assert_eq!(rules.patterns.len(), 1);
    }

    #[test]
    fn invalid_regex_is_an_error() {
        assert!(RuleSet::parse("@regex (unclosed\n").is_err());
    }

    #[test]
    fn missing_file_is_empty_rule_set() {
        let dir = tempfile::tempdir().unwrap();
        let rules = RuleSet::load(&dir.path().join("absent.txt")).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn checks_in_fixed_order() {
        let rules = RuleSet::parse("@image\nbad\n@regex .*bad.*\n@user Bob\n").unwrap();

        let image = message(1, ContentKind::Image, "bad", "Bob");
        assert_eq!(rules.first_match(&image).as_deref(), Some("*IMAGE*"));

        let text = message(2, ContentKind::Text, "so BAD", "Bob");
        assert_eq!(rules.first_match(&text).as_deref(), Some("*KEYWORD* 'bad'"));

        let rules = RuleSet::parse("@regex .*bad.*\n@user Bob\n").unwrap();
        assert_eq!(rules.first_match(&text).as_deref(), Some("*USER* 'Bob'"));
        let lower = message(3, ContentKind::Text, "so bad", "Ann");
        assert_eq!(rules.first_match(&lower).as_deref(), Some("*REGEX* '.*bad.*'"));
    }

    #[test]
    fn regex_must_match_whole_text() {
        let rules = RuleSet::parse("@regex buy now\n").unwrap();
        assert!(rules.first_match(&message(1, ContentKind::Text, "buy now", "a")).is_some());
        assert!(rules.first_match(&message(2, ContentKind::Text, "please buy now", "a")).is_none());
    }

    #[test]
    fn user_match_is_exact() {
        let rules = RuleSet::parse("@user Bob\n").unwrap();
        assert!(rules.first_match(&message(1, ContentKind::Text, "hi", "bob")).is_none());
    }

    #[test]
    fn report_rules_see_every_kind() {
        let rules = Rules {
            block: RuleSet::parse("spam\n").unwrap(),
            moderate: RuleSet::parse("spam\n").unwrap(),
            report: RuleSet::parse("spam\n").unwrap(),
        };
        let report = message(1, ContentKind::Report, "spam", "a");
        let actions = rules.classify(&report);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Report);

        let text = message(2, ContentKind::Text, "spam", "a");
        let kinds: Vec<_> = rules.classify(&text).iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Block, ActionKind::Moderate, ActionKind::Report]);
    }
}
