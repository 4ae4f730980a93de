//! Blocks: the named, ordered sections of a status document.
//!
//! Blocks serialize to the chat platform's block JSON so a document can be
//! posted as-is and read back from channel history.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed registry of semantic block names.
///
/// Each name has a fixed display ordinal and a fixed kind. The block id on
/// the wire is `"<ordinal>-<name>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockName {
    Title,
    Status,
    RevisionTitle,
    Revision,
    BuildTitle,
    Build,
    BuildContextTitle,
    BuildContext,
    Timestamp,
    Footer,
    Divider,
    Actions,
}

impl BlockName {
    /// Display position. Lower ordinals render first.
    pub fn ordinal(self) -> u32 {
        match self {
            Self::Title => 0,
            Self::Status => 1,
            Self::RevisionTitle => 2,
            Self::Revision => 3,
            Self::BuildTitle => 4,
            Self::Build => 5,
            Self::BuildContextTitle => 6,
            Self::BuildContext => 7,
            Self::Timestamp => 8,
            Self::Footer => 9,
            Self::Divider => 10,
            Self::Actions => 11,
        }
    }

    /// Stable semantic key, unique within a document.
    pub fn key(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Status => "status",
            Self::RevisionTitle => "revision_title",
            Self::Revision => "revision",
            Self::BuildTitle => "build_title",
            Self::Build => "build",
            Self::BuildContextTitle => "build_context_title",
            Self::BuildContext => "build_context",
            Self::Timestamp => "timestamp",
            Self::Footer => "footer",
            Self::Divider => "divider",
            Self::Actions => "actions",
        }
    }

    /// The kind of block registered under this name.
    pub fn kind(self) -> BlockKind {
        match self {
            Self::Timestamp | Self::Footer => BlockKind::Context,
            Self::Divider => BlockKind::Divider,
            Self::Actions => BlockKind::Actions,
            _ => BlockKind::Section,
        }
    }

    /// The wire id: `"<ordinal>-<name>"`.
    pub fn block_id(self) -> String {
        format!("{}-{}", self.ordinal(), self.key())
    }
}

impl fmt::Display for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Section,
    Context,
    Divider,
    Actions,
}

/// A text object: markdown for content, plain text for button labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Text {
    Mrkdwn { text: String },
    PlainText { text: String },
}

impl Text {
    pub fn markdown(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Mrkdwn { text } | Self::PlainText { text } => text,
        }
    }

    /// Replaces the text, keeping the text type.
    pub fn set(&mut self, value: impl Into<String>) {
        match self {
            Self::Mrkdwn { text } | Self::PlainText { text } => *text = value.into(),
        }
    }
}

/// An element of an actions block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionElement {
    /// A link button.
    Button { text: Text, url: String },
}

impl ActionElement {
    pub fn button(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Button {
            text: Text::plain(label),
            url: url.into(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Button { text, .. } => text.as_str(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Button { url, .. } => url,
        }
    }
}

/// One block of a document.
///
/// Tagged by kind, with a closed payload shape per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: Text },
    Context { block_id: String, elements: Vec<Text> },
    Divider { block_id: String },
    Actions { block_id: String, elements: Vec<ActionElement> },
}

/// Initial content for a block created by `find_or_create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Empty,
    Text(String),
    Element(Text),
}

impl Block {
    /// Builds a fresh block for a registered name.
    ///
    /// Content that doesn't fit the name's kind is dropped. Actions start
    /// empty; buttons are added through the document.
    pub fn new(name: BlockName, content: Content) -> Self {
        let block_id = name.block_id();
        match name.kind() {
            BlockKind::Section => {
                let text = match content {
                    Content::Text(text) => text,
                    Content::Element(text) => text.as_str().to_string(),
                    Content::Empty => String::new(),
                };
                Self::Section {
                    block_id,
                    text: Text::markdown(text),
                }
            }
            BlockKind::Context => Self::Context {
                block_id,
                elements: match content {
                    Content::Text(text) => vec![Text::markdown(text)],
                    Content::Element(text) => vec![text],
                    Content::Empty => Vec::new(),
                },
            },
            BlockKind::Divider => Self::Divider { block_id },
            BlockKind::Actions => Self::Actions {
                block_id,
                elements: Vec::new(),
            },
        }
    }

    pub fn block_id(&self) -> &str {
        match self {
            Self::Section { block_id, .. }
            | Self::Context { block_id, .. }
            | Self::Divider { block_id }
            | Self::Actions { block_id, .. } => block_id,
        }
    }

    /// The ordinal prefix of the block id, if it has one.
    pub fn ordinal(&self) -> Option<u32> {
        let (ordinal, _) = self.block_id().split_once('-')?;
        ordinal.parse().ok()
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Section { .. } => BlockKind::Section,
            Self::Context { .. } => BlockKind::Context,
            Self::Divider { .. } => BlockKind::Divider,
            Self::Actions { .. } => BlockKind::Actions,
        }
    }

    /// Whether this block carries the given semantic name.
    ///
    /// A block whose kind disagrees with the registry is not a match.
    pub fn is(&self, name: BlockName) -> bool {
        self.kind() == name.kind()
            && self
                .block_id()
                .split_once('-')
                .is_some_and(|(_, key)| key == name.key())
    }

    /// Section text, or `None` for other kinds.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Section { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }
}
