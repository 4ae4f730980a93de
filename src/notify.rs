//! The notifier: one event in, one status document created or updated.
//!
//! Pipeline events carry the execution id directly. Build events only name
//! their build, so the pipeline's current state is consulted to find which
//! execution and stage the build belongs to. Either way the document is
//! resolved, mutated by the update rules, and published while the
//! execution's writer lock is held.

use jiff::Timestamp;

use crate::compose;
use crate::config::Config;
use crate::correlate::{CorrelationIndex, Scope};
use crate::model::{BlockName, Document, Event, EventError, ExecutionInfo, Origin, PipelineState};
use crate::pipeline::{self, PipelineError, PipelineSource};
use crate::transport::{Transport, TransportError};

/// Errors that fail an event.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("pipeline lookup failed: {0}")]
    Pipeline(#[from] PipelineError),
}

/// What processing an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new document was posted; carries its message id.
    Posted(String),
    /// An existing document was updated; carries its message id.
    Updated(String),
    /// Nothing to do.
    Ignored(String),
}

pub struct Notifier<'a> {
    transport: &'a dyn Transport,
    pipelines: &'a dyn PipelineSource,
    index: &'a CorrelationIndex,
    config: &'a Config,
    scope: Scope,
}

impl<'a> Notifier<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        pipelines: &'a dyn PipelineSource,
        index: &'a CorrelationIndex,
        config: &'a Config,
    ) -> Self {
        Self {
            transport,
            pipelines,
            index,
            config,
            scope: config.scope(),
        }
    }

    pub fn process(&self, event: &Event) -> Result<Outcome, NotifyError> {
        match event.origin() {
            Origin::Pipeline => self.process_pipeline(event),
            Origin::Build => self.process_build(event),
            Origin::Other => {
                tracing::info!(source = %event.source, "ignoring event from unknown source");
                Ok(Outcome::Ignored(format!("unknown source {}", event.source)))
            }
        }
    }

    /// The live document for an execution, without publishing it.
    pub fn document(&self, execution: &ExecutionInfo) -> Result<Option<Document>, NotifyError> {
        Ok(self
            .index
            .resolve(execution, self.transport, &self.scope, Timestamp::now())?)
    }

    fn process_pipeline(&self, event: &Event) -> Result<Outcome, NotifyError> {
        let detail = event.pipeline_detail()?;
        let execution = ExecutionInfo::new(&detail.pipeline, &detail.execution_id);
        let span = tracing::info_span!(
            "pipeline_event",
            pipeline = %execution.pipeline,
            execution_id = %execution.execution_id,
        );
        let _entered = span.enter();

        let state = match detail.state.as_deref() {
            Some(state) if event.is_execution_state_change() => {
                Some(state.parse::<PipelineState>()?)
            }
            _ => None,
        };

        let writer = self.index.lock(&execution.execution_id);
        let _held = writer.acquire();
        let mut doc = self.open(execution)?;

        let mut finished = None;
        if let Some(state) = state {
            let before = doc.section_text(BlockName::Status).map(str::to_owned);
            compose::apply_pipeline_state(&mut doc, state, &event.time)?;
            tracing::debug!(state = state.label(), "applied execution state");

            let changed = before.as_deref() != doc.section_text(BlockName::Status);
            if state.is_terminal() && changed {
                finished = Some(state);
            }
        }

        if compose::needs_revision(&doc) {
            self.attach_revision(&mut doc);
        }

        let outcome = self.publish(&mut doc)?;

        if let Some(state) = finished {
            self.notify_author(&doc, state)?;
        }
        Ok(outcome)
    }

    fn process_build(&self, event: &Event) -> Result<Outcome, NotifyError> {
        let detail = event.build_detail()?;
        let Some(pipeline) = detail.pipeline() else {
            tracing::info!(build_id = %detail.build_id, "build not started by a pipeline");
            return Ok(Outcome::Ignored(format!(
                "build {} has no pipeline initiator",
                detail.build_id
            )));
        };

        let stages = self.pipelines.pipeline_state(pipeline)?;
        let Some(location) = pipeline::locate_build(&stages, &detail.build_id) else {
            tracing::info!(
                pipeline,
                build_id = %detail.build_id,
                "build matches no pipeline action"
            );
            return Ok(Outcome::Ignored(format!(
                "build {} not found in pipeline {pipeline}",
                detail.build_id
            )));
        };

        let span = tracing::info_span!(
            "build_event",
            pipeline,
            execution_id = %location.execution_id,
            stage = %location.build.stage,
            action = %location.build.action,
            project = ?detail.project_name,
            status = ?detail.build_status,
        );
        let _entered = span.enter();

        let writer = self.index.lock(&location.execution_id);
        let _held = writer.acquire();
        let execution = ExecutionInfo::new(pipeline, location.execution_id).with_build(location.build);
        let mut doc = self.open(execution)?;

        if let Some(phases) = &detail.additional_information.phases {
            compose::update_build_stage(&mut doc, phases)?;
            tracing::debug!(phases = phases.len(), "applied build phases");
        }
        if let Some(logs) = detail.logs() {
            compose::attach_logs(&mut doc, logs);
        }

        self.publish(&mut doc)
    }

    /// Resolves the execution's document, or starts a fresh one.
    fn open(&self, execution: ExecutionInfo) -> Result<Document, NotifyError> {
        if let Some(doc) = self.document(&execution)? {
            return Ok(doc);
        }
        let title = self.config.title_for(&execution.pipeline);
        Ok(Document::new(execution, title))
    }

    /// Best-effort revision banner. Failures are logged, never raised.
    fn attach_revision(&self, doc: &mut Document) {
        let execution = doc.execution().clone();
        let revision = match self
            .pipelines
            .execution_revision(&execution.pipeline, &execution.execution_id)
        {
            Ok(Some(revision)) => revision,
            Ok(None) => {
                tracing::debug!("execution has no artifact revision");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "revision lookup failed");
                return;
            }
        };
        let Some(summary) = revision.revision_summary.as_deref() else {
            return;
        };

        match compose::attach_revision(doc, summary, revision.revision_url.as_deref()) {
            Ok(Some(info)) => {
                tracing::debug!(pr = %info.pr_number, author = %info.author, "attached revision");
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, summary, "unparseable revision summary"),
        }
    }

    /// Posts a fresh document or updates the live one, then caches it.
    fn publish(&self, doc: &mut Document) -> Result<Outcome, NotifyError> {
        let channel = self.index.channel_id(&self.config.channel, self.transport)?;
        doc.render();

        let outcome = if let Some(ts) = doc.message_id() {
            let ts = ts.to_string();
            self.transport.update(&channel, &ts, doc.blocks())?;
            tracing::info!(%ts, "updated document");
            Outcome::Updated(ts)
        } else {
            let posted = self.transport.post(&channel, doc.blocks())?;
            tracing::info!(ts = %posted.ts, "posted document");
            doc.set_message_id(posted.ts.clone());
            Outcome::Posted(posted.ts)
        };

        self.index.put(doc);
        Ok(outcome)
    }

    /// Pings the PR author in the document's thread.
    fn notify_author(&self, doc: &Document, state: PipelineState) -> Result<(), NotifyError> {
        let (Some(ts), Some(handle)) = (doc.message_id(), compose::revision_author(doc)) else {
            return Ok(());
        };
        let Some(name) = self.config.author_user(handle) else {
            tracing::debug!(handle, "no chat user configured for author");
            return Ok(());
        };
        let Some(user_id) = self.index.user_id(name, self.transport)? else {
            tracing::warn!(handle, name, "configured author not found on the platform");
            return Ok(());
        };

        let channel = self.index.channel_id(&self.config.channel, self.transport)?;
        let text = format!(
            "<@{user_id}> {} *{}* {}",
            state.icon(),
            doc.execution().pipeline,
            state.label().to_lowercase()
        );
        self.transport.reply(&channel, ts, &text)?;
        tracing::info!(handle, "notified author");
        Ok(())
    }
}
