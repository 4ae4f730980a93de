//! Inbound CI/CD events.
//!
//! Events arrive in the cloud event-bus envelope: `source`, `detail-type`,
//! `time`, and a `detail` object whose shape depends on the source. Only the
//! fields the update rules read are modeled; everything else is ignored, and
//! optional fields may be absent.

use std::str::FromStr;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Source of pipeline execution, stage, and action events.
pub const PIPELINE_SOURCE: &str = "aws.codepipeline";

/// Source of build state and phase events.
pub const BUILD_SOURCE: &str = "aws.codebuild";

/// Detail type of the events that carry the execution's overall state.
pub const EXECUTION_STATE_CHANGE: &str = "CodePipeline Pipeline Execution State Change";

/// Errors raised while reading an event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("unknown pipeline state: {0}")]
    UnknownState(String),

    #[error("unknown build phase status: {0}")]
    UnknownPhaseStatus(String),

    #[error("invalid event time {value:?}: {source}")]
    InvalidTime {
        value: String,
        #[source]
        source: jiff::Error,
    },

    #[error("malformed event detail: {0}")]
    Detail(#[from] serde_json::Error),
}

/// Which system an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Pipeline,
    Build,
    Other,
}

/// The event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Event {
    pub source: String,

    #[serde(default)]
    pub detail_type: String,

    /// ISO-8601 UTC, e.g. `2024-01-01T10:00:00Z`.
    #[serde(default)]
    pub time: String,

    #[serde(default)]
    pub detail: serde_json::Value,
}

impl Event {
    pub fn origin(&self) -> Origin {
        match self.source.as_str() {
            PIPELINE_SOURCE => Origin::Pipeline,
            BUILD_SOURCE => Origin::Build,
            _ => Origin::Other,
        }
    }

    pub fn is_execution_state_change(&self) -> bool {
        self.detail_type == EXECUTION_STATE_CHANGE
    }

    pub fn pipeline_detail(&self) -> Result<PipelineDetail, EventError> {
        Ok(PipelineDetail::deserialize(&self.detail)?)
    }

    pub fn build_detail(&self) -> Result<BuildDetail, EventError> {
        Ok(BuildDetail::deserialize(&self.detail)?)
    }
}

/// Detail of a pipeline event (execution, stage, or action).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineDetail {
    pub pipeline: String,
    pub execution_id: String,

    /// Raw state. Its vocabulary depends on the detail type, so it is only
    /// parsed into [`PipelineState`] for execution state changes.
    #[serde(default)]
    pub state: Option<String>,
}

/// Detail of a build event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildDetail {
    /// Build ARN; ends with the id the pipeline reports as the action's
    /// external execution id.
    pub build_id: String,

    #[serde(default)]
    pub project_name: Option<String>,

    #[serde(default)]
    pub build_status: Option<String>,

    #[serde(default)]
    pub additional_information: AdditionalInformation,
}

impl BuildDetail {
    /// Name of the pipeline that started this build, if a pipeline did.
    pub fn pipeline(&self) -> Option<&str> {
        self.additional_information
            .initiator
            .as_deref()?
            .strip_prefix("codepipeline/")
            .filter(|name| !name.is_empty())
    }

    /// Log links, when the build already has a log stream.
    pub fn logs(&self) -> Option<&Logs> {
        self.additional_information
            .logs
            .as_ref()
            .filter(|logs| logs.stream_name.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdditionalInformation {
    #[serde(default)]
    pub initiator: Option<String>,

    #[serde(default)]
    pub phases: Option<Vec<BuildPhase>>,

    #[serde(default)]
    pub logs: Option<Logs>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Logs {
    #[serde(default)]
    pub stream_name: Option<String>,

    #[serde(default)]
    pub deep_link: Option<String>,
}

/// One phase of a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildPhase {
    pub phase_type: String,

    /// Absent while the phase is running.
    #[serde(default)]
    pub phase_status: Option<String>,

    #[serde(default)]
    pub duration_in_seconds: Option<u64>,

    #[serde(default)]
    pub phase_context: Vec<String>,
}

impl BuildPhase {
    pub fn status(&self) -> Result<PhaseStatus, EventError> {
        self.phase_status
            .as_deref()
            .map_or(Ok(PhaseStatus::InProgress), str::parse)
    }

    /// Whether this is the closing marker phase, which is never rendered.
    pub fn is_completed_marker(&self) -> bool {
        self.phase_type == "COMPLETED"
    }

    /// The phase's context message, skipping the empty `": "` placeholder.
    pub fn context(&self) -> Option<&str> {
        self.phase_context
            .first()
            .map(String::as_str)
            .filter(|ctx| !ctx.is_empty() && *ctx != ": ")
    }
}

/// Overall state of a pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Started,
    Succeeded,
    Resumed,
    Failed,
    Canceled,
    Superseded,
}

impl PipelineState {
    pub fn icon(self) -> &'static str {
        match self {
            Self::Started => ":loading:",
            Self::Succeeded => ":done:",
            Self::Failed => ":x:",
            Self::Canceled => ":no_entry:",
            Self::Resumed | Self::Superseded => "",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::Succeeded => "Succeeded",
            Self::Resumed => "Resumed",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::Superseded => "Superseded",
        }
    }

    /// States that close the execution's timestamp range.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl FromStr for PipelineState {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Self::Started),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "RESUMED" => Ok(Self::Resumed),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            "SUPERSEDED" => Ok(Self::Superseded),
            other => Err(EventError::UnknownState(other.to_string())),
        }
    }
}

/// Status of a single build phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Succeeded,
    Failed,
    Fault,
    TimedOut,
    InProgress,
    Stopped,
}

impl PhaseStatus {
    pub fn icon(self) -> &'static str {
        match self {
            Self::Succeeded => ":done:",
            Self::Failed => ":x:",
            Self::TimedOut => ":stop_watch:",
            Self::InProgress => ":loading:",
            Self::Fault | Self::Stopped => "",
        }
    }
}

impl FromStr for PhaseStatus {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "FAULT" => Ok(Self::Fault),
            "TIMED_OUT" => Ok(Self::TimedOut),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(EventError::UnknownPhaseStatus(other.to_string())),
        }
    }
}

/// Parse an event time.
pub fn parse_time(value: &str) -> Result<Timestamp, EventError> {
    value.parse().map_err(|source| EventError::InvalidTime {
        value: value.to_string(),
        source,
    })
}
