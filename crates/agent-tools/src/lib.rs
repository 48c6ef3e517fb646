//! # agent-tools
//!
//! Tools served by the agent server out of the box.
//!
//! | Tool              | Purpose                                   |
//! |-------------------|-------------------------------------------|
//! | `document_parser` | read a text document from disk            |
//! | `document_search` | rank document paragraphs against a query  |
//! | `datetime`        | current UTC date and time                 |
//! | `calculate`       | evaluate an arithmetic expression         |

pub mod builtin;
pub mod document;

pub use builtin::{CalculatorTool, DateTimeTool};
pub use document::{DocumentParserTool, DocumentSearchTool};

use agent_core::{Result, ToolRegistry};

/// Register every built-in tool
pub fn register_builtin(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(DocumentParserTool::new())?;
    registry.register(DocumentSearchTool)?;
    registry.register(DateTimeTool)?;
    registry.register(CalculatorTool)?;
    Ok(())
}

/// A registry holding only the built-in tools
pub fn builtin_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    register_builtin(&mut registry)?;
    Ok(registry)
}
