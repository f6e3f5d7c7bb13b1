//! Built-in tool implementations for Chatbridge.
//!
//! Tools are offered to the model via function calling; the turn
//! controller executes requested calls and feeds results back for a
//! second completion pass.

pub mod mathexpr;
pub mod web_search;

pub use mathexpr::CalculatorTool;
pub use web_search::WebSearchTool;

use chatbridge_core::tool::ToolRegistry;

/// Create the default tool registry: web search and the calculator.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(WebSearchTool::new()));
    registry.register(Box::new(CalculatorTool));
    registry
}
