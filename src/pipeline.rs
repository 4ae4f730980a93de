//! Pipeline lookups: revision metadata and stage state for an execution.
//!
//! Events don't carry everything a status document shows. Revision info
//! comes from the pipeline execution, and a build event only names its
//! build, so the stage that ran it is found in the pipeline's current state.
//! [`AwsCli`] answers these through the `aws` CLI, authenticated however the
//! environment is configured.

use std::io;
use std::process::Command;

use serde::Deserialize;

use crate::model::BuildRef;

/// Errors raised by pipeline lookups.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to run aws: {0}")]
    Spawn(#[from] io::Error),

    #[error("aws {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unexpected aws output: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, PipelineError>;

/// The source revision that triggered an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRevision {
    #[serde(default)]
    pub revision_summary: Option<String>,

    #[serde(default)]
    pub revision_url: Option<String>,
}

/// One stage of a pipeline's current state.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    pub stage_name: String,

    #[serde(default)]
    pub latest_execution: Option<StageExecution>,

    #[serde(default)]
    pub action_states: Vec<ActionState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageExecution {
    pub pipeline_execution_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionState {
    pub action_name: String,

    #[serde(default)]
    pub latest_execution: Option<ActionExecution>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecution {
    #[serde(default)]
    pub external_execution_id: Option<String>,

    #[serde(default)]
    pub external_execution_url: Option<String>,
}

/// Where a build sits in its pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLocation {
    pub execution_id: String,
    pub build: BuildRef,
}

/// Read access to pipeline executions.
pub trait PipelineSource {
    /// The first artifact revision of an execution, if it has any.
    fn execution_revision(
        &self,
        pipeline: &str,
        execution_id: &str,
    ) -> Result<Option<ArtifactRevision>>;

    /// The pipeline's stages as they stand now.
    fn pipeline_state(&self, pipeline: &str) -> Result<Vec<StageState>>;
}

/// Finds the stage and action whose latest external execution is `build_id`.
///
/// The build id is an ARN; the pipeline reports only its trailing
/// `<project>:<uuid>` part, so the match is by suffix.
pub fn locate_build(stages: &[StageState], build_id: &str) -> Option<BuildLocation> {
    stages.iter().find_map(|stage| {
        let action = stage.action_states.iter().find(|action| {
            action
                .latest_execution
                .as_ref()
                .and_then(|e| e.external_execution_id.as_deref())
                .is_some_and(|id| !id.is_empty() && build_id.ends_with(id))
        })?;
        let execution_id = stage.latest_execution.as_ref()?.pipeline_execution_id.clone();

        Some(BuildLocation {
            execution_id,
            build: BuildRef {
                stage: stage.stage_name.clone(),
                action: action.action_name.clone(),
                external_url: action
                    .latest_execution
                    .as_ref()
                    .and_then(|e| e.external_execution_url.clone()),
            },
        })
    })
}

/// Pipeline lookups through the `aws` CLI.
#[derive(Debug, Clone, Default)]
pub struct AwsCli {
    pub region: Option<String>,
    pub profile: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPipelineExecution {
    pipeline_execution: PipelineExecution,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineExecution {
    #[serde(default)]
    artifact_revisions: Vec<ArtifactRevision>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPipelineState {
    #[serde(default)]
    stage_states: Vec<StageState>,
}

impl PipelineSource for AwsCli {
    fn execution_revision(
        &self,
        pipeline: &str,
        execution_id: &str,
    ) -> Result<Option<ArtifactRevision>> {
        let json = self.codepipeline(&[
            "get-pipeline-execution",
            "--pipeline-name",
            pipeline,
            "--pipeline-execution-id",
            execution_id,
        ])?;
        let response: GetPipelineExecution = serde_json::from_str(&json)?;
        Ok(response
            .pipeline_execution
            .artifact_revisions
            .into_iter()
            .next())
    }

    fn pipeline_state(&self, pipeline: &str) -> Result<Vec<StageState>> {
        let json = self.codepipeline(&["get-pipeline-state", "--name", pipeline])?;
        let response: GetPipelineState = serde_json::from_str(&json)?;
        Ok(response.stage_states)
    }
}

impl AwsCli {
    /// Run `aws codepipeline <args> --output json` and return stdout.
    fn codepipeline(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new("aws");
        command.arg("codepipeline").args(args).args(["--output", "json"]);
        if let Some(region) = &self.region {
            command.args(["--region", region.as_str()]);
        }
        if let Some(profile) = &self.profile {
            command.args(["--profile", profile.as_str()]);
        }

        tracing::debug!(?args, "running aws codepipeline");
        let output = command.output()?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(PipelineError::Command {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// A source that knows nothing: no revisions, no stages.
///
/// Pipeline events still update status and timestamps; build events are
/// ignored because they can't be placed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

impl PipelineSource for Offline {
    fn execution_revision(&self, _: &str, _: &str) -> Result<Option<ArtifactRevision>> {
        Ok(None)
    }

    fn pipeline_state(&self, _: &str) -> Result<Vec<StageState>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn stages() -> Vec<StageState> {
        let state: GetPipelineState = serde_json::from_value(json!({
            "pipelineName": "app-pipeline",
            "stageStates": [
                {
                    "stageName": "Source",
                    "latestExecution": { "pipelineExecutionId": "exec-1", "status": "Succeeded" },
                    "actionStates": [
                        { "actionName": "Checkout",
                          "latestExecution": { "status": "Succeeded", "externalExecutionId": "a1b2c3" } }
                    ]
                },
                {
                    "stageName": "Build",
                    "latestExecution": { "pipelineExecutionId": "exec-1", "status": "InProgress" },
                    "actionStates": [
                        { "actionName": "Deploy" },
                        { "actionName": "Compile",
                          "latestExecution": {
                              "status": "InProgress",
                              "externalExecutionId": "app-build:0f1e2d",
                              "externalExecutionUrl": "https://console.example/build/0f1e2d"
                          } }
                    ]
                }
            ]
        }))
        .unwrap();
        state.stage_states
    }

    #[test]
    fn locates_build_by_external_execution_suffix() {
        let location = locate_build(
            &stages(),
            "arn:aws:codebuild:us-east-1:123456789012:build/app-build:0f1e2d",
        )
        .unwrap();

        assert_eq!(location.execution_id, "exec-1");
        assert_eq!(location.build.stage, "Build");
        assert_eq!(location.build.action, "Compile");
        assert_eq!(
            location.build.external_url.as_deref(),
            Some("https://console.example/build/0f1e2d")
        );
    }

    #[test]
    fn unknown_build_is_not_located() {
        assert_eq!(locate_build(&stages(), "arn:aws:codebuild:build/other:999"), None);
    }

    #[test]
    fn reads_first_artifact_revision() {
        let response: GetPipelineExecution = serde_json::from_value(json!({
            "pipelineExecution": {
                "pipelineName": "app-pipeline",
                "pipelineExecutionId": "exec-1",
                "artifactRevisions": [
                    { "name": "SourceArtifact",
                      "revisionSummary": "Merge pull request #42 from alice/feature-x Add widget",
                      "revisionUrl": "https://github.com/acme/app/commit/abc" },
                    { "name": "Other", "revisionSummary": "ignored" }
                ]
            }
        }))
        .unwrap();

        let first = response.pipeline_execution.artifact_revisions[0].clone();
        assert_eq!(
            first.revision_url.as_deref(),
            Some("https://github.com/acme/app/commit/abc")
        );
    }

    #[test]
    fn offline_source_is_empty() {
        assert_eq!(Offline.execution_revision("p", "e").unwrap(), None);
        assert!(Offline.pipeline_state("p").unwrap().is_empty());
    }
}
