//! Core data model for buildbot.
//!
//! These types describe what flows through the notifier:
//! inbound events, the executions they name, and the block documents
//! that report on them.

mod block;
mod document;
mod event;
mod execution;
mod revision;

pub use block::{Block, BlockName, Content, Text};
pub use document::{Document, Message, footer_execution_id};
pub use event::{BuildPhase, Event, EventError, Logs, Origin, PipelineState, parse_time};
pub use execution::{BuildRef, ExecutionInfo};
pub use revision::{RevisionError, RevisionInfo, parse_summary};
