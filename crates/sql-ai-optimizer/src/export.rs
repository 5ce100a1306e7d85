//! Offline copies of run and query pages.
//!
//! A run archive holds `run.html` plus one `query-<id>.html` per analyzed
//! query. Pages are first written into a scoped temporary directory which is
//! removed when the export finishes, whether or not it succeeded.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::state_db::{QueryRecord, StateDatabase};
use crate::views::{self, RenderMode};

pub const RUN_PAGE_FILE: &str = "run.html";

/// A rendered download.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ExportFile {
    fn html(file_name: String, page: String) -> Self {
        Self {
            file_name,
            content_type: "text/html; charset=utf-8",
            bytes: page.into_bytes(),
        }
    }

    fn zip(file_name: String, bytes: Vec<u8>) -> Self {
        Self {
            file_name,
            content_type: "application/zip",
            bytes,
        }
    }
}

fn render_query(query: &QueryRecord) -> anyhow::Result<String> {
    let conversation = query.conversation()?;
    Ok(views::query_page(query, conversation.as_ref(), RenderMode::Export))
}

/// Run page as a single HTML download. `None` when the run does not exist.
pub fn run_html(state: &StateDatabase, run_id: i64) -> anyhow::Result<Option<ExportFile>> {
    let Some(run) = state.runs.get_run(run_id)? else {
        return Ok(None);
    };
    let groups = state.runs.get_groups_by_run_id(run_id)?;
    let queries = state.queries.get_queries_by_run_id(run_id)?;
    let page = views::run_page(&run, &groups, &queries, RenderMode::Export);
    Ok(Some(ExportFile::html(format!("run-{}.html", run_id), page)))
}

/// Run page and every analyzed query page packed into a ZIP archive.
pub fn run_zip(state: &StateDatabase, run_id: i64) -> anyhow::Result<Option<ExportFile>> {
    let Some(run) = state.runs.get_run(run_id)? else {
        return Ok(None);
    };
    let groups = state.runs.get_groups_by_run_id(run_id)?;
    let queries = state.queries.get_queries_by_run_id(run_id)?;

    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join(RUN_PAGE_FILE),
        views::run_page(&run, &groups, &queries, RenderMode::Export),
    )?;
    for query in queries.iter().filter(|q| q.is_analyzed()) {
        fs::write(dir.path().join(views::export_query_file(query.id)), render_query(query)?)?;
    }

    let bytes = zip_directory(dir.path())?;
    debug!("Exported run {} as {} byte archive", run_id, bytes.len());
    Ok(Some(ExportFile::zip(format!("run-{}.zip", run_id), bytes)))
}

/// Query page as a single HTML download.
pub fn query_html(state: &StateDatabase, query_id: i64) -> anyhow::Result<Option<ExportFile>> {
    let Some(query) = state.queries.get_query(query_id)? else {
        return Ok(None);
    };
    Ok(Some(ExportFile::html(format!("query-{}.html", query_id), render_query(&query)?)))
}

/// Query page alone in a ZIP archive.
pub fn query_zip(state: &StateDatabase, query_id: i64) -> anyhow::Result<Option<ExportFile>> {
    let Some(query) = state.queries.get_query(query_id)? else {
        return Ok(None);
    };

    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join(views::export_query_file(query.id)), render_query(&query)?)?;
    let bytes = zip_directory(dir.path())?;
    Ok(Some(ExportFile::zip(format!("query-{}.zip", query_id), bytes)))
}

/// Pack the regular files of `dir` (not recursive) in name order.
fn zip_directory(dir: &Path) -> anyhow::Result<Vec<u8>> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    entries.sort();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        writer.start_file(name, options)?;
        writer.write_all(&fs::read(&path)?)?;
    }
    Ok(writer.finish()?.into_inner())
}
