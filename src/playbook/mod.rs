//! Playbook 定义与目录

mod catalog;
mod types;

pub use catalog::{parse_playbook, InMemoryPlaybookCatalog, PlaybookCatalog, PlaybookLoader};
pub use types::{Playbook, PlaybookVariant, ToolSlotSpec};
