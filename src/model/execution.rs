//! Execution identity: which pipeline run a document belongs to.

use serde::{Deserialize, Serialize};

/// Identifies one pipeline execution.
///
/// Built fresh from each inbound event and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    pub pipeline: String,
    pub execution_id: String,

    /// For build events: the pipeline stage and action that ran the build.
    pub build: Option<BuildRef>,
}

impl ExecutionInfo {
    pub fn new(pipeline: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            execution_id: execution_id.into(),
            build: None,
        }
    }

    #[must_use]
    pub fn with_build(mut self, build: BuildRef) -> Self {
        self.build = Some(build);
        self
    }
}

/// Cross-reference from a build to the pipeline action that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRef {
    pub stage: String,
    pub action: String,

    /// Console link to the action's latest execution, when the pipeline reports one.
    pub external_url: Option<String>,
}
