//! Markdown rendering of result sets for LLM prompts.

use crate::analyzed_db::Row;

pub const NO_RESULTS: &str = "No results found.";

/// Render rows as a GitHub-flavoured markdown table.
///
/// Column headers come from the first row. Values are written verbatim, so a
/// value containing `|` will break the table layout.
pub fn format_markdown_table(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return NO_RESULTS.to_string();
    };

    let headers: Vec<&str> = first.columns().collect();
    let mut result = format!("| {} |\n", headers.join(" | "));
    result.push_str(&format!("| {} |\n", vec!["---"; headers.len()].join(" | ")));

    for row in rows {
        let cells: Vec<&str> = row
            .values()
            .map(|value| value.unwrap_or("NULL"))
            .collect();
        result.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    result
}
