//! Tools served by the relay itself through `tools/list` and `tools/call`.

pub mod registry;
pub mod time;

pub use registry::ToolRegistry;
pub use time::time_tools;

/// Registry pre-loaded with every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    for tool in time_tools() {
        registry.register(tool);
    }
    registry
}
