//! Update rules: how each kind of event changes a status document.
//!
//! Every rule finds or creates the blocks it owns and leaves the rest of the
//! document alone, so rules can run in any order and any number of times.
//! Title and status are the exceptions: status is overwritten on every
//! execution state change.

use jiff::Timestamp;

use crate::model::{
    Block, BlockName, BuildPhase, BuildRef, Content, Document, EventError, Logs, PipelineState,
    RevisionError, RevisionInfo, Text, parse_summary, parse_time,
};
use crate::phases;

/// Button label for the PR link.
pub const LINK_PR: &str = "Link PR";

/// Button label for the pipeline action's console page.
pub const CODEPIPELINE_LOGS: &str = "CodePipeline Logs";

/// Button label for the build's log stream.
pub const CLOUDWATCH_LOGS: &str = "CloudWatch Logs";

/// Time value meaning "leave this half of the timestamp block alone".
pub const NO_UPDATE: &str = "no_update";

const STARTED_PREFIX: &str = ">:clock2: Started:";
const ENDED_PREFIX: &str = ">:clock10: Ended:";
const DISPLAY_FORMAT: &str = "%d/%m/%Y %H:%M:%S UTC";

/// One half of a timestamp update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUpdate {
    Keep,
    Set(Timestamp),
}

impl TimeUpdate {
    /// Parses an event time; [`NO_UPDATE`] and blank values mean [`TimeUpdate::Keep`].
    pub fn parse(value: &str) -> Result<Self, EventError> {
        if value == NO_UPDATE || value.trim().is_empty() {
            return Ok(Self::Keep);
        }
        parse_time(value).map(Self::Set)
    }
}

/// Overwrites the status block and records start or end time.
pub fn apply_pipeline_state(
    doc: &mut Document,
    state: PipelineState,
    time: &str,
) -> Result<(), EventError> {
    let when = TimeUpdate::parse(time)?;

    doc.set_section(
        BlockName::Status,
        format!(">{} {}", state.icon(), state.label()),
    );

    if state == PipelineState::Started {
        attach_time(doc, when, TimeUpdate::Keep);
    } else if state.is_terminal() {
        attach_time(doc, TimeUpdate::Keep, when);
    }
    Ok(())
}

/// Records start and end times in the timestamp block.
///
/// The block holds a single element: the start line, then the end line.
/// Each half is replaced independently. With nothing to record and no
/// block yet, the document is left alone: an empty context block is not
/// valid.
pub fn attach_time(doc: &mut Document, started: TimeUpdate, ended: TimeUpdate) {
    if started == TimeUpdate::Keep
        && ended == TimeUpdate::Keep
        && !doc.has_block(BlockName::Timestamp)
    {
        return;
    }

    let Block::Context { elements, .. } = doc.find_or_create(BlockName::Timestamp, Content::Empty)
    else {
        unreachable!("timestamp is registered as a context block")
    };

    let current = elements.first().map(Text::as_str).unwrap_or_default();
    let mut start_line = current
        .lines()
        .find(|line| line.starts_with(STARTED_PREFIX))
        .map(String::from);
    let mut end_line = current
        .lines()
        .find(|line| line.starts_with(ENDED_PREFIX))
        .map(String::from);

    if let TimeUpdate::Set(at) = started {
        start_line = Some(format!("{STARTED_PREFIX} {}", display_time(at)));
    }
    if let TimeUpdate::Set(at) = ended {
        end_line = Some(format!("{ENDED_PREFIX}  {}", display_time(at)));
    }

    let text = [start_line, end_line]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        return;
    }

    match elements.first_mut() {
        Some(first) => first.set(text),
        None => elements.push(Text::markdown(text)),
    }
}

/// Whether the document still lacks revision info.
pub fn needs_revision(doc: &Document) -> bool {
    !doc.has_block(BlockName::Revision)
}

/// Adds the PR banner, unless the document already has one.
///
/// Returns the parsed revision when blocks were added, `None` when the
/// document already carried revision info.
pub fn attach_revision(
    doc: &mut Document,
    summary: &str,
    url: Option<&str>,
) -> Result<Option<RevisionInfo>, RevisionError> {
    if !needs_revision(doc) {
        return Ok(None);
    }

    let info = parse_summary(summary, url)?;

    doc.find_or_create(BlockName::RevisionTitle, Content::Text("*Revision*".into()));
    doc.find_or_create(
        BlockName::Revision,
        Content::Text(format!(
            ">*Merge PR #{}:* {}\n>:github: *@{} | :branch:{}*\n",
            info.pr_number, info.pr_title, info.author, info.branch
        )),
    );
    if let Some(url) = &info.pr_url {
        doc.find_or_create_action(LINK_PR, url);
    }

    Ok(Some(info))
}

/// The PR author recorded in a document's revision banner.
pub fn revision_author(doc: &Document) -> Option<&str> {
    let text = doc.section_text(BlockName::Revision)?;
    let (_, rest) = text.split_once(":github: *@")?;
    rest.split(" | ").next()
}

/// Renders a build stage's phases into the build blocks.
///
/// The stage and its console link come from the document's build
/// reference. The body is only replaced when the new render is at least as
/// complete as the stored one, so a late event carrying fewer phases can't
/// erase progress already shown. A render with no lines never creates the
/// build blocks.
pub fn update_build_stage(doc: &mut Document, phases: &[BuildPhase]) -> Result<(), EventError> {
    let report = phases::aggregate(phases)?;
    let build = doc.execution().build.clone();

    if let Some(url) = build.as_ref().and_then(|b| b.external_url.as_deref()) {
        doc.find_or_create_action(CODEPIPELINE_LOGS, url);
    }

    if let Some(context) = report.context() {
        doc.find_or_create(
            BlockName::BuildContextTitle,
            Content::Text("*Build Context*".into()),
        );
        doc.set_section(BlockName::BuildContext, format!(">{context}"));
    }

    let lines = report.line_count();
    let previous = doc.section_text(BlockName::Build).unwrap_or_default();
    if lines == 0 || !accepts_render(lines, previous) {
        tracing::debug!(lines, "kept stored build body");
        return Ok(());
    }

    let title = match &build {
        Some(BuildRef { stage, .. }) => format!("*Build - {stage}*"),
        None => "*Build*".to_string(),
    };
    doc.find_or_create(BlockName::BuildTitle, Content::Text(title));
    doc.set_section(BlockName::Build, report.text());
    Ok(())
}

/// Anti-regression check for the build body.
///
/// The previous render's line count is its number of `\n`-separated
/// segments; a new render is accepted when it has at least that count minus
/// one lines. Stored text of three newline-terminated lines has four
/// segments, so it takes three or more new lines; an empty body takes
/// anything.
pub fn accepts_render(new_lines: usize, previous: &str) -> bool {
    let previous_lines = previous.split('\n').count();
    new_lines + 1 >= previous_lines
}

/// Adds the log stream button.
pub fn attach_logs(doc: &mut Document, logs: &Logs) {
    if let Some(link) = logs.deep_link.as_deref().filter(|l| !l.is_empty()) {
        let button = doc.find_or_create_action(CLOUDWATCH_LOGS, link);
        if button.url() != link {
            tracing::debug!(kept = button.url(), ignored = link, "log button already set");
        }
    }
}

fn display_time(at: Timestamp) -> String {
    at.strftime(DISPLAY_FORMAT).to_string()
}
