//! CLI interface for buildbot.
//!
//! Two commands:
//!
//! - `buildbot process [FILE]` feeds CI/CD events to the notifier. The input
//!   is one event or a JSON array of events, replayed in order.
//! - `buildbot show <EXECUTION_ID>` prints an execution's live document.
//!
//! Documents go to Slack unless `--local` names a `SQLite` channel file.

mod format;

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::correlate::CorrelationIndex;
use crate::model::{Event, ExecutionInfo};
use crate::notify::Notifier;
use crate::pipeline::{AwsCli, Offline, PipelineSource};
use crate::slack::SlackTransport;
use crate::storage::ChannelStore;
use crate::transport::Transport;

use format::{format_outcome, show_json};

/// Buildbot: one live chat message per pipeline execution.
#[derive(Debug, Parser)]
#[command(name = "buildbot", version, after_long_help = USAGE_HELP)]
pub struct Cli {
    /// Post to a local `SQLite` channel instead of Slack.
    /// Defaults to `~/.buildbot/channel.sqlite` when no path is given.
    #[arg(long, global = true, value_name = "DB")]
    #[allow(clippy::option_option)]
    local: Option<Option<PathBuf>>,

    /// Don't call `aws`: no revision banners, and build events are ignored.
    #[arg(long, global = true)]
    offline: bool,

    /// Debug logging (unless `RUST_LOG` says otherwise).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Command,
}

const USAGE_HELP: &str = r#"Examples:
  buildbot process events.json
  aws events ... | buildbot process
  buildbot --local /tmp/channel.sqlite --offline process full_test.json
  buildbot --local /tmp/channel.sqlite show 3f1c9a2e-0b7d-4c55-9a61-2d8e4f7b1a90"#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process CI/CD events: one event object or an array of them.
    Process {
        /// Event file. Reads stdin when omitted.
        file: Option<PathBuf>,
    },

    /// Print the live document for a pipeline execution as JSON.
    Show {
        /// Pipeline execution id.
        execution_id: String,
    },
}

/// Where documents are published.
enum Backend {
    Local(ChannelStore),
    Slack(SlackTransport),
}

impl Backend {
    fn transport(&self) -> &dyn Transport {
        match self {
            Self::Local(store) => store,
            Self::Slack(slack) => slack,
        }
    }
}

/// Run the CLI, returning an error message on failure.
pub fn run(cli: Cli, config: &Config) -> Result<(), String> {
    let backend = open_backend(cli.local.as_ref(), config)?;
    let pipelines: Box<dyn PipelineSource> = if cli.offline {
        Box::new(Offline)
    } else {
        Box::new(AwsCli {
            region: config.aws.region.clone(),
            profile: config.aws.profile.clone(),
        })
    };
    let index = CorrelationIndex::new();
    let notifier = Notifier::new(backend.transport(), pipelines.as_ref(), &index, config);

    match cli.command {
        Command::Process { file } => cmd_process(&notifier, file.as_ref()),
        Command::Show { execution_id } => cmd_show(&notifier, &backend, config, &execution_id),
    }
}

fn open_backend(local: Option<&Option<PathBuf>>, config: &Config) -> Result<Backend, String> {
    let Some(path) = local else {
        let token = config.slack_token()?;
        let slack = SlackTransport::new(
            &config.slack.api_base,
            &token,
            &config.bot_name,
            &config.bot_icon,
            Duration::from_secs(config.slack.timeout_secs),
        )
        .map_err(|e| format!("failed to create Slack client: {e}"))?;
        return Ok(Backend::Slack(slack));
    };

    let path = match path {
        Some(path) => path.clone(),
        None => ChannelStore::default_path().ok_or("could not determine home directory")?,
    };
    let store = ChannelStore::open(&path, &config.bot_name)
        .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
    store
        .ensure_channel(&config.channel)
        .map_err(|e| format!("failed to create channel {}: {e}", config.channel))?;
    Ok(Backend::Local(store))
}

fn cmd_process(notifier: &Notifier<'_>, file: Option<&PathBuf>) -> Result<(), String> {
    let input = match file {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?,
        None => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            input
        }
    };

    let events = parse_events(&input).map_err(|e| format!("invalid event input: {e}"))?;
    if events.is_empty() {
        return Err("no events in input".to_string());
    }

    for (i, event) in events.iter().enumerate() {
        let outcome = notifier
            .process(event)
            .map_err(|e| format!("event {} ({}): {e}", i + 1, event.source))?;
        println!("{}", format_outcome(&outcome));
    }
    Ok(())
}

fn cmd_show(
    notifier: &Notifier<'_>,
    backend: &Backend,
    config: &Config,
    execution_id: &str,
) -> Result<(), String> {
    // Resolution only reads the execution id.
    let execution = ExecutionInfo::new(String::new(), execution_id);
    let doc = notifier
        .document(&execution)
        .map_err(|e| format!("failed to look up {execution_id}: {e}"))?
        .ok_or_else(|| {
            format!(
                "no document for {execution_id} in #{} within the last {} minutes",
                config.channel, config.lookback_minutes
            )
        })?;

    let replies = match (backend, doc.message_id()) {
        (Backend::Local(store), Some(ts)) => {
            let channel = store
                .find_channel(&config.channel)
                .map_err(|e| e.to_string())?
                .unwrap_or_default();
            store.replies(&channel, ts).map_err(|e| e.to_string())?
        }
        _ => Vec::new(),
    };

    println!("{}", show_json(&doc, &replies).map_err(|e| e.to_string())?);
    Ok(())
}

/// Reads one event or an array of events.
fn parse_events(input: &str) -> Result<Vec<Event>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(input)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|event| vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event() {
        let events = parse_events(
            r#"{ "source": "aws.codepipeline", "detail-type": "x", "time": "t", "detail": {} }"#,
        )
        .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "aws.codepipeline");
    }

    #[test]
    fn parses_event_array_in_order() {
        let events = parse_events(
            r#"[
                { "source": "aws.codepipeline", "detail": {} },
                { "source": "aws.codebuild", "detail": {} }
            ]"#,
        )
        .unwrap();

        let sources: Vec<&str> = events.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(sources, ["aws.codepipeline", "aws.codebuild"]);
    }

    #[test]
    fn rejects_non_events() {
        assert!(parse_events("42").is_err());
        assert!(parse_events("not json").is_err());
    }

    #[test]
    fn global_flags_parse_anywhere() {
        let cli = Cli::try_parse_from([
            "buildbot",
            "process",
            "events.json",
            "--local",
            "/tmp/c.sqlite",
            "--offline",
        ])
        .unwrap();

        assert!(cli.offline);
        assert_eq!(cli.local, Some(Some(PathBuf::from("/tmp/c.sqlite"))));
        assert!(matches!(cli.command, Command::Process { file: Some(_) }));
    }

    #[test]
    fn local_without_path_uses_default() {
        let cli = Cli::try_parse_from(["buildbot", "show", "exec-1", "--local"]).unwrap();

        assert_eq!(cli.local, Some(None));
        assert!(matches!(cli.command, Command::Show { ref execution_id } if execution_id == "exec-1"));
    }

    #[test]
    fn local_process_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::default();
        let path = Some(dir.path().join("channel.sqlite"));
        let backend = open_backend(Some(&path), &config).unwrap();
        let index = CorrelationIndex::new();
        let notifier = Notifier::new(backend.transport(), &Offline, &index, &config);

        let file = dir.path().join("events.json");
        fs::write(
            &file,
            r#"[
                { "source": "aws.codepipeline",
                  "detail-type": "CodePipeline Pipeline Execution State Change",
                  "time": "2024-01-01T10:00:00Z",
                  "detail": { "pipeline": "app", "execution-id": "exec-1", "state": "STARTED" } },
                { "source": "aws.codepipeline",
                  "detail-type": "CodePipeline Pipeline Execution State Change",
                  "time": "2024-01-01T10:03:00Z",
                  "detail": { "pipeline": "app", "execution-id": "exec-1", "state": "SUCCEEDED" } }
            ]"#,
        )
        .unwrap();

        cmd_process(&notifier, Some(&file)).unwrap();
        let doc = notifier
            .document(&ExecutionInfo::new("app", "exec-1"))
            .unwrap()
            .unwrap();
        assert_eq!(
            doc.section_text(crate::model::BlockName::Status),
            Some(">:done: Succeeded")
        );
    }
}
