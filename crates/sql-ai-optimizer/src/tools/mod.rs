//! Tools offered to the models.
pub mod query_tools;
pub mod submit_selection;

pub use query_tools::{DatabaseQueryTool, PerformanceSchemaQueryTool, TOOL_MAX_ROWS};
pub use submit_selection::{SelectedQuery, SelectionAccumulator, SelectionPayload, SubmitSelectionTool};
