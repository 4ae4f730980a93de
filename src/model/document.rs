//! Status documents: one live message per pipeline execution.

use serde::{Deserialize, Serialize};

use super::block::{ActionElement, Block, BlockName, Content, Text};
use super::execution::ExecutionInfo;

/// A message as the chat platform stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Platform message id (Slack's `ts`).
    pub ts: String,

    /// Poster's user id.
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// The blocks of one execution's status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    execution: ExecutionInfo,
    message_id: Option<String>,
    blocks: Vec<Block>,
}

impl Document {
    /// Starts a fresh, unpublished document with its title block.
    pub fn new(execution: ExecutionInfo, title: impl Into<String>) -> Self {
        let mut document = Self {
            execution,
            message_id: None,
            blocks: Vec::new(),
        };
        document.find_or_create(BlockName::Title, Content::Text(title.into()));
        document
    }

    /// Continues a document that was already published.
    pub fn from_message(execution: ExecutionInfo, message: Message) -> Self {
        Self {
            execution,
            message_id: Some(message.ts),
            blocks: message.blocks,
        }
    }

    pub fn execution(&self) -> &ExecutionInfo {
        &self.execution
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn set_message_id(&mut self, message_id: impl Into<String>) {
        self.message_id = Some(message_id.into());
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Returns the block registered under `name`, creating it if missing.
    ///
    /// A new block gets the registered ordinal and kind and is appended at
    /// the end; ordering happens only in [`Document::render`].
    pub fn find_or_create(&mut self, name: BlockName, content: Content) -> &mut Block {
        let index = match self.position(name) {
            Some(index) => index,
            None => {
                self.blocks.push(Block::new(name, content));
                self.blocks.len() - 1
            }
        };
        &mut self.blocks[index]
    }

    pub fn has_block(&self, name: BlockName) -> bool {
        self.position(name).is_some()
    }

    pub fn block(&self, name: BlockName) -> Option<&Block> {
        self.position(name).map(|index| &self.blocks[index])
    }

    /// Text of a section block, if present.
    pub fn section_text(&self, name: BlockName) -> Option<&str> {
        self.block(name).and_then(Block::text)
    }

    /// Overwrites a section's text, creating the section if missing.
    pub fn set_section(&mut self, name: BlockName, value: impl Into<String>) {
        let value = value.into();
        if let Block::Section { text, .. } =
            self.find_or_create(name, Content::Text(value.clone()))
        {
            text.set(value);
        }
    }

    /// Returns the button labelled `label`, appending one if there is none.
    ///
    /// An existing button keeps its URL. The actions block is created on
    /// first use.
    pub fn find_or_create_action(&mut self, label: &str, url: &str) -> &ActionElement {
        let Block::Actions { elements, .. } =
            self.find_or_create(BlockName::Actions, Content::Empty)
        else {
            unreachable!("actions is registered as an actions block")
        };
        let index = match elements.iter().position(|el| el.label() == label) {
            Some(index) => index,
            None => {
                elements.push(ActionElement::button(label, url));
                elements.len() - 1
            }
        };
        &elements[index]
    }

    /// The execution id recorded in the footer, for correlating messages
    /// read back from the platform.
    pub fn footer_execution_id(&self) -> Option<&str> {
        footer_execution_id(&self.blocks)
    }

    /// Stable sort by ordinal. Blocks without an ordinal go last.
    pub fn sort(&mut self) {
        self.blocks
            .sort_by_key(|block| block.ordinal().unwrap_or(u32::MAX));
    }

    /// Finalizes the document for the transport.
    ///
    /// Ensures the footer (carrying the execution id) and the trailing
    /// divider exist, then sorts.
    pub fn render(&mut self) -> &[Block] {
        let footer = Text::markdown(self.execution.execution_id.clone());
        self.find_or_create(BlockName::Footer, Content::Element(footer));
        self.find_or_create(BlockName::Divider, Content::Empty);
        self.sort();
        &self.blocks
    }

    fn position(&self, name: BlockName) -> Option<usize> {
        self.blocks.iter().position(|block| block.is(name))
    }
}

/// The execution id in a footer block, if the blocks have one.
pub fn footer_execution_id(blocks: &[Block]) -> Option<&str> {
    blocks.iter().find_map(|block| match block {
        Block::Context { elements, .. } if block.is(BlockName::Footer) => {
            elements.first().map(Text::as_str)
        }
        _ => None,
    })
}
