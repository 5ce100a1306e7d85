//! Server-rendered HTML pages.
//!
//! Pages are rendered either for the live server (absolute links, forms and
//! action buttons) or for export, where links point at sibling files inside
//! the archive and nothing interactive is emitted.

use std::fmt::Write;

use pulldown_cmark::{html, Options, Parser};

use crate::llm::{Conversation, MessageContent, Role};
use crate::state_db::{GroupRecord, QueryRecord, RunRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Live,
    Export,
}

const STYLE: &str = "body{font-family:sans-serif;max-width:1100px;margin:2em auto;padding:0 1em}\
table{border-collapse:collapse}td,th{border:1px solid #ccc;padding:4px 8px;vertical-align:top}\
pre{background:#f5f5f5;padding:8px;overflow-x:auto}.message{border-top:1px solid #ddd;margin-top:1em}\
.muted{color:#777}";

const LIVE_SCRIPT: &str = r#"<script>
async function postJson(url, body) {
  const res = await fetch(url, {method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify(body || {})});
  const data = await res.json();
  if (!res.ok) { alert(data.error || res.statusText); return null; }
  return data;
}
async function go(url, body) {
  const data = await postJson(url, body);
  if (data && data.url) { window.location = data.url; }
}
</script>"#;

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// CommonMark with tables, strikethrough and task lists.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options);
    let mut output = String::new();
    html::push_html(&mut output, parser);
    output
}

/// Free text shown verbatim, line breaks kept.
pub fn multiline_text(text: &str) -> String {
    escape_html(text).replace("\r\n", "\n").replace('\n', "<br>\n")
}

fn layout(title: &str, body: &str, mode: RenderMode) -> String {
    let script = if mode == RenderMode::Live { LIVE_SCRIPT } else { "" };
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{}</style>\n{}\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        STYLE,
        script,
        body
    )
}

fn query_href(query_id: i64, mode: RenderMode) -> String {
    match mode {
        RenderMode::Live => format!("/query/{}", query_id),
        RenderMode::Export => export_query_file(query_id),
    }
}

/// File name of an analyzed query page inside a run archive.
pub fn export_query_file(query_id: i64) -> String {
    format!("query-{}.html", query_id)
}

fn flag(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub fn runs_page(runs: &[RunRecord]) -> String {
    let mut body = String::from("<h1>SQL AI Optimizer</h1>\n");
    body.push_str(
        "<h2>New run</h2>\n\
         <form onsubmit=\"event.preventDefault(); this.querySelector('button').disabled = true; \
         go('/new-run', {input: this.input.value, use_real_query: this.use_real_query.checked, \
         use_database_access: this.use_database_access.checked});\">\n\
         <p><textarea name=\"input\" rows=\"4\" cols=\"80\" placeholder=\"Special instructions\"></textarea></p>\n\
         <p><label><input type=\"checkbox\" name=\"use_real_query\"> Use captured SQL</label>\n\
         <label><input type=\"checkbox\" name=\"use_database_access\"> Allow database access</label></p>\n\
         <p><button type=\"submit\">Start</button></p>\n</form>\n",
    );

    body.push_str("<h2>Runs</h2>\n");
    if runs.is_empty() {
        body.push_str("<p class=\"muted\">No runs yet.</p>\n");
    } else {
        body.push_str("<table>\n<tr><th>#</th><th>Host</th><th>Created</th><th>Instructions</th></tr>\n");
        for run in runs {
            let _ = writeln!(
                body,
                "<tr><td><a href=\"/run/{id}\">{id}</a></td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&run.hostname),
                run.created_at.format("%Y-%m-%d %H:%M:%S"),
                run.input.as_deref().map(multiline_text).unwrap_or_default(),
                id = run.id,
            );
        }
        body.push_str("</table>\n");
    }

    layout("Runs", &body, RenderMode::Live)
}

pub fn run_page(run: &RunRecord, groups: &[GroupRecord], queries: &[QueryRecord], mode: RenderMode) -> String {
    let live = mode == RenderMode::Live;
    let mut body = String::new();
    if live {
        body.push_str("<p><a href=\"/\">&larr; Runs</a></p>\n");
    }
    let _ = writeln!(body, "<h1>Run #{}</h1>", run.id);
    let _ = writeln!(
        body,
        "<p>Host: {} &middot; Created: {} &middot; Captured SQL: {} &middot; Database access: {}</p>",
        escape_html(&run.hostname),
        run.created_at.format("%Y-%m-%d %H:%M:%S"),
        flag(run.use_real_query),
        flag(run.use_database_access),
    );

    if let Some(input) = run.input.as_deref().filter(|i| !i.trim().is_empty()) {
        let _ = writeln!(body, "<h2>Special instructions</h2>\n<p>{}</p>", multiline_text(input));
    }

    body.push_str("<h2>Summary</h2>\n");
    body.push_str(&render_markdown(&run.output));

    let missing_sql_count = queries
        .iter()
        .filter(|q| q.real_query.as_deref().map_or(true, str::is_empty))
        .count();
    if live {
        let _ = writeln!(
            body,
            "<p>{} of {} queries have no captured SQL. \
             <button onclick=\"postJson('/run/{id}/fetch-queries').then(d => d && location.reload())\">Fetch queries</button>\n\
             <a href=\"/run/{id}?export\">Export HTML</a> &middot; <a href=\"/run/{id}?export&amp;format=zip\">Export ZIP</a></p>",
            missing_sql_count,
            queries.len(),
            id = run.id,
        );
    }

    for group in groups {
        let _ = writeln!(
            body,
            "<h2>{}</h2>\n{}",
            escape_html(&group.name),
            render_markdown(&group.description)
        );
        body.push_str("<table>\n<tr>");
        if live {
            body.push_str("<th></th>");
        }
        body.push_str("<th>Schema</th><th>Query</th><th>Impact</th><th>Analysis</th></tr>\n");

        for query in queries.iter().filter(|q| q.group_id == group.id) {
            body.push_str("<tr>");
            if live {
                let _ = write!(
                    body,
                    "<td><input type=\"checkbox\" class=\"query-select\" value=\"{}\"></td>",
                    query.id
                );
            }
            let analysis = if query.is_analyzed() {
                format!("<a href=\"{}\">View</a>", query_href(query.id, mode))
            } else if live {
                format!(
                    "<button onclick=\"this.disabled = true; go('/run/{}/analyze', {{query_ids: [{}]}})\">Analyze</button>",
                    run.id, query.id
                )
            } else {
                "<span class=\"muted\">Not analyzed</span>".to_string()
            };
            let sql = query.real_query.as_deref().unwrap_or(&query.normalized_query);
            let _ = writeln!(
                body,
                "<td>{}</td><td><pre>{}</pre></td><td>{}</td><td>{}</td></tr>",
                escape_html(&query.schema),
                escape_html(sql),
                escape_html(&query.impact_description),
                analysis
            );
        }
        body.push_str("</table>\n");
    }

    if live {
        let _ = writeln!(
            body,
            "<p><button onclick=\"this.disabled = true; go('/run/{id}/analyze', {{query_ids: \
             Array.from(document.querySelectorAll('.query-select:checked')).map(c => Number(c.value))}})\">\
             Analyze selected</button></p>\n\
             <form method=\"post\" action=\"/run/{id}/delete\" onsubmit=\"return confirm('Delete this run?')\">\
             <button type=\"submit\">Delete run</button></form>",
            id = run.id
        );
    }

    layout(&format!("Run #{}", run.id), &body, mode)
}

/// Conversation of an analyzed query. The first user message repeats the
/// generated prompt and reasoning blocks are internal, so both are hidden.
pub fn query_page(query: &QueryRecord, conversation: Option<&Conversation>, mode: RenderMode) -> String {
    let live = mode == RenderMode::Live;
    let mut body = String::new();
    if live {
        let _ = writeln!(body, "<p><a href=\"/run/{}\">&larr; Run #{}</a></p>", query.run_id, query.run_id);
    } else {
        body.push_str("<p><a href=\"run.html\">&larr; Run</a></p>\n");
    }
    let _ = writeln!(
        body,
        "<h1>Query {}</h1>\n<p>Schema: {} &middot; Digest: <code>{}</code></p>\n<p>{}</p>\n<pre>{}</pre>",
        query.id,
        escape_html(&query.schema),
        escape_html(&query.digest),
        escape_html(&query.impact_description),
        escape_html(query.real_query.as_deref().unwrap_or(&query.normalized_query)),
    );
    if live {
        let _ = writeln!(
            body,
            "<p><a href=\"/query/{id}?export\">Export HTML</a> &middot; <a href=\"/query/{id}?export&amp;format=zip\">Export ZIP</a></p>",
            id = query.id
        );
    }

    match conversation {
        Some(conversation) => {
            for (index, message) in conversation.messages.iter().enumerate() {
                if index == 0 && message.role == Role::User {
                    continue;
                }
                let rendered = render_message_content(&message.content);
                if rendered.is_empty() {
                    continue;
                }
                let heading = match message.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                let _ = writeln!(body, "<div class=\"message\">\n<h3>{}</h3>\n{}</div>", heading, rendered);
            }
        }
        None => body.push_str("<p class=\"muted\">This query has not been analyzed yet.</p>\n"),
    }

    if live && conversation.is_some() {
        let _ = writeln!(
            body,
            "<form onsubmit=\"event.preventDefault(); this.querySelector('button').disabled = true; \
             go('/query/{}/continue', {{input: this.input.value}});\">\n\
             <p><textarea name=\"input\" rows=\"4\" cols=\"80\" required></textarea></p>\n\
             <p><button type=\"submit\">Continue</button></p>\n</form>",
            query.id
        );
    }

    layout(&format!("Query {}", query.id), &body, mode)
}

fn render_message_content(content: &[MessageContent]) -> String {
    let mut out = String::new();
    for block in content {
        match block {
            MessageContent::Text { text } => out.push_str(&render_markdown(text)),
            MessageContent::Reasoning { .. } | MessageContent::RedactedReasoning { .. } => {}
            MessageContent::ToolUse { name, input, .. } => {
                let input = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
                let _ = writeln!(
                    out,
                    "<p><strong>Tool call:</strong> <code>{}</code></p>\n<pre>{}</pre>",
                    escape_html(name),
                    escape_html(&input)
                );
            }
            MessageContent::ToolResult { content, is_error, .. } => {
                let label = if *is_error { "Tool error" } else { "Tool result" };
                let _ = writeln!(out, "<p><strong>{}:</strong></p>\n<pre>{}</pre>", label, escape_html(content));
            }
        }
    }
    out
}
