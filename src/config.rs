//! Buildbot configuration.
//!
//! Loaded from `~/.buildbot/config.toml`. Every key has a default, so a
//! missing file is fine. `BUILDBOT_CHANNEL` and `BUILDBOT_BOT_NAME` override
//! the file.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};

use crate::correlate::{DEFAULT_HISTORY_LIMIT, DEFAULT_LOOKBACK, Scope};
use crate::slack::DEFAULT_API_BASE;

/// Longest history lookback accepted: one week.
const MAX_LOOKBACK_MINUTES: i64 = 7 * 24 * 60;

/// Buildbot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Channel the status documents are posted to.
    pub channel: String,

    /// Name the bot posts as. History scans only trust messages from this
    /// user.
    pub bot_name: String,

    pub bot_icon: String,

    /// Emoji in front of the default title.
    pub title_emoji: String,

    /// How far back to look for an execution's document.
    pub lookback_minutes: i64,

    /// Most messages read per history scan.
    pub history_limit: usize,

    /// Title overrides by pipeline name.
    pub titles: BTreeMap<String, String>,

    /// Chat user names by GitHub handle, for pinging PR authors.
    pub authors: BTreeMap<String, String>,

    pub slack: SlackConfig,

    pub aws: AwsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SlackConfig {
    pub api_base: String,

    /// Environment variable holding the bot token.
    pub token_env: String,

    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub profile: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel: "deployments".to_string(),
            bot_name: "BuildBot".to_string(),
            bot_icon: ":robot_face:".to_string(),
            title_emoji: ":rocket:".to_string(),
            lookback_minutes: DEFAULT_LOOKBACK.as_mins(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            titles: BTreeMap::new(),
            authors: BTreeMap::new(),
            slack: SlackConfig::default(),
            aws: AwsConfig::default(),
        }
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token_env: "SLACK_BOT_TOKEN".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load config from `~/.buildbot/config.toml`, then apply environment
    /// overrides.
    pub fn load() -> Result<Self, String> {
        let path = Self::path().ok_or("could not determine home directory")?;

        let config = if path.exists() {
            let contents = fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            Self::parse(&contents)
                .map_err(|e| format!("invalid config at {}: {e}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Parse a config file's contents.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Applies overrides looked up by environment variable name, then
    /// validates.
    pub fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        if let Some(channel) = var("BUILDBOT_CHANNEL").filter(|v| !v.is_empty()) {
            self.channel = channel;
        }
        if let Some(name) = var("BUILDBOT_BOT_NAME").filter(|v| !v.is_empty()) {
            self.bot_name = name;
        }

        if self.channel.is_empty() {
            return Err("channel is empty; set it in the config file or BUILDBOT_CHANNEL".into());
        }
        if self.bot_name.is_empty() {
            return Err("bot-name is empty; set it in the config file or BUILDBOT_BOT_NAME".into());
        }
        if self.lookback_minutes <= 0 {
            return Err(format!(
                "lookback-minutes must be positive, got {}",
                self.lookback_minutes
            ));
        }
        if self.lookback_minutes > MAX_LOOKBACK_MINUTES {
            return Err(format!(
                "lookback-minutes must be at most {MAX_LOOKBACK_MINUTES}, got {}",
                self.lookback_minutes
            ));
        }
        Ok(self)
    }

    /// The config file path: `~/.buildbot/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".buildbot").join("config.toml"))
    }

    /// Title block text for a pipeline.
    pub fn title_for(&self, pipeline: &str) -> String {
        match self.titles.get(pipeline) {
            Some(title) => title.clone(),
            None => format!("{} *{pipeline}*", self.title_emoji),
        }
    }

    /// Chat user name for a GitHub handle.
    pub fn author_user(&self, handle: &str) -> Option<&str> {
        self.authors.get(handle).map(String::as_str)
    }

    /// Where documents live and who posts them.
    pub fn scope(&self) -> Scope {
        Scope {
            channel: self.channel.clone(),
            poster: self.bot_name.clone(),
            lookback: SignedDuration::from_mins(self.lookback_minutes),
            history_limit: self.history_limit,
        }
    }

    /// The Slack bot token, read from the configured environment variable.
    pub fn slack_token(&self) -> Result<String, String> {
        std::env::var(&self.slack.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                format!(
                    "no Slack token: set {} or use --local <DB>",
                    self.slack.token_env
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.scope().lookback, SignedDuration::from_mins(30));
        assert_eq!(config.scope().history_limit, 200);
    }

    #[test]
    fn parses_kebab_case_keys() {
        let config = Config::parse(
            r#"
            channel = "ci"
            bot-name = "Deployer"
            lookback-minutes = 45

            [titles]
            airflow-pipeline = ":airflow: *Airflow*"

            [authors]
            alice = "alice.smith"

            [slack]
            token-env = "CI_SLACK_TOKEN"

            [aws]
            region = "eu-west-1"
            "#,
        )
        .unwrap();

        assert_eq!(config.channel, "ci");
        assert_eq!(config.bot_name, "Deployer");
        assert_eq!(config.lookback_minutes, 45);
        assert_eq!(config.slack.token_env, "CI_SLACK_TOKEN");
        assert_eq!(config.slack.api_base, DEFAULT_API_BASE);
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.author_user("alice"), Some("alice.smith"));
        assert_eq!(config.author_user("bob"), None);
    }

    #[test]
    fn titles_fall_back_to_emoji_and_name() {
        let mut config = Config::default();
        config
            .titles
            .insert("airflow".into(), ":airflow: *Airflow DAGs*".into());

        assert_eq!(config.title_for("airflow"), ":airflow: *Airflow DAGs*");
        assert_eq!(config.title_for("app-pipeline"), ":rocket: *app-pipeline*");
    }

    #[test]
    fn environment_overrides_file() {
        let config = Config::default()
            .with_overrides(|key| match key {
                "BUILDBOT_CHANNEL" => Some("releases".into()),
                "BUILDBOT_BOT_NAME" => Some(String::new()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.channel, "releases");
        assert_eq!(config.bot_name, "BuildBot");
    }

    #[test]
    fn rejects_empty_channel_and_bad_lookback() {
        let config = Config::parse("channel = \"\"").unwrap();
        assert!(config.with_overrides(no_env).unwrap_err().contains("channel"));

        let config = Config::parse("lookback-minutes = 0").unwrap();
        assert!(
            config
                .with_overrides(no_env)
                .unwrap_err()
                .contains("lookback-minutes")
        );
    }

    #[test]
    fn rejects_lookback_beyond_a_week() {
        let config = Config::parse(&format!("lookback-minutes = {}", i64::MAX)).unwrap();
        let err = config.with_overrides(no_env).unwrap_err();
        assert!(err.contains("at most 10080"), "{err}");

        let config = Config::parse("lookback-minutes = 10080").unwrap();
        let scope = config.with_overrides(no_env).unwrap().scope();
        assert_eq!(scope.lookback, SignedDuration::from_hours(168));
    }

    #[test]
    fn rejects_unparseable_file() {
        assert!(Config::parse("history-limit = \"lots\"").is_err());
    }
}
