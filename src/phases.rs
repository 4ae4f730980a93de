//! Build phase aggregation: turn a build's phase list into display text.
//!
//! Phases render in delivery order, one line each:
//!
//! ```text
//! &gt;:done: Submitted
//! &gt;:done: Provisioning - Time: 12 seconds
//! &gt;:loading: Build
//! ```
//!
//! The closing `COMPLETED` marker phase is never rendered.

use crate::model::{BuildPhase, EventError};

/// Rendered phase lines plus any context messages the phases carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    lines: Vec<String>,
    context: Vec<String>,
}

impl PhaseReport {
    /// Number of rendered phase lines.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// All lines concatenated; each line is newline-terminated.
    pub fn text(&self) -> String {
        self.lines.concat()
    }

    /// Context messages concatenated, or `None` if no phase had one.
    pub fn context(&self) -> Option<String> {
        if self.context.is_empty() {
            None
        } else {
            Some(self.context.concat())
        }
    }
}

/// Render a build's phases.
///
/// Fails on a phase status outside the known vocabulary; guessing an icon
/// would misreport the build.
pub fn aggregate(phases: &[BuildPhase]) -> Result<PhaseReport, EventError> {
    let mut report = PhaseReport::default();

    for phase in phases {
        if let Some(ctx) = phase.context() {
            report.context.push(ctx.to_string());
        }
        if !phase.is_completed_marker() {
            report.lines.push(render_line(phase)?);
        }
    }

    Ok(report)
}

fn render_line(phase: &BuildPhase) -> Result<String, EventError> {
    let icon = phase.status()?.icon();
    let name = capitalize(&phase.phase_type);

    Ok(match phase.duration_in_seconds {
        Some(seconds) if seconds > 0 => {
            format!("&gt;{icon} {name} - Time: {seconds} seconds\n")
        }
        _ => format!("&gt;{icon} {name}\n"),
    })
}

/// `DOWNLOAD_SOURCE` → `Download_source`.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
