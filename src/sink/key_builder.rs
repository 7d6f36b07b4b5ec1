//! Destination key construction.
//!
//! Pure functions, no state and no I/O. Two naming schemes:
//!
//! ```text
//! Prefix:   {prefix}/{stream}/{name=value}.../{stream}_{batch_id}.jsonl
//! Template: {path_template}/{name=value}.../{filename_prefix}-{batch_id}.jsonl
//! ```
//!
//! Empty components are dropped, so an empty prefix or template never leaves
//! a leading or doubled `/` in the key.

use crate::sink::config::HivePartition;

/// Extension of every batch file, local and remote
pub const JSONL_EXTENSION: &str = "jsonl";
/// Template placeholder replaced with the stream name
pub const STREAM_NAME_PLACEHOLDER: &str = "{stream_name}";
/// Template placeholder replaced with the batch identifier
pub const BATCH_ID_PLACEHOLDER: &str = "{batch_id}";

const KEY_SEPARATOR: char = '/';

/// Resolved naming scheme for destination keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyScheme {
    /// `{prefix}/{stream}/{partitions}/{stream}_{batch_id}.jsonl`
    Prefix { prefix: String },
    /// `{path_template}/{partitions}/{filename_prefix}-{batch_id}.jsonl`
    Template {
        path_template: String,
        filename_prefix: String,
    },
}

/// Substitute `{stream_name}` and `{batch_id}` in a single pass.
///
/// Substituted text is never re-scanned, so a stream name that itself
/// contains `{batch_id}` is kept verbatim. Unknown placeholders are left
/// untouched.
pub fn render_template(template: &str, stream_name: &str, batch_id: &str) -> String {
    let mut out = String::with_capacity(template.len() + stream_name.len() + batch_id.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(STREAM_NAME_PLACEHOLDER) {
            out.push_str(stream_name);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(BATCH_ID_PLACEHOLDER) {
            out.push_str(batch_id);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// File name of a batch: the last key segment and the local scratch name
pub fn build_filename(stream_name: &str, batch_id: &str, scheme: &KeyScheme) -> String {
    debug_assert!(!batch_id.is_empty(), "Precondition: batch id must not be empty");

    match scheme {
        KeyScheme::Prefix { .. } => {
            format!("{}_{}.{}", stream_name, batch_id, JSONL_EXTENSION)
        }
        KeyScheme::Template {
            filename_prefix, ..
        } => format!(
            "{}-{}.{}",
            render_template(filename_prefix, stream_name, batch_id),
            batch_id,
            JSONL_EXTENSION
        ),
    }
}

/// Join `prefix`, `stream`, partition segments and `filename` into a key
pub fn prefixed_key(
    prefix: &str,
    stream_name: &str,
    partitions: &[HivePartition],
    filename: &str,
) -> String {
    let mut segments = Vec::with_capacity(partitions.len() + 3);
    push_component(&mut segments, prefix);
    push_component(&mut segments, stream_name);
    join_key(segments, partitions, filename)
}

/// Build the destination key for one batch
pub fn build_key(
    stream_name: &str,
    partitions: &[HivePartition],
    batch_id: &str,
    scheme: &KeyScheme,
) -> String {
    let filename = build_filename(stream_name, batch_id, scheme);

    let key = match scheme {
        KeyScheme::Prefix { prefix } => prefixed_key(prefix, stream_name, partitions, &filename),
        KeyScheme::Template { path_template, .. } => {
            let mut segments = Vec::with_capacity(partitions.len() + 2);
            let rendered = render_template(path_template, stream_name, batch_id);
            push_component(&mut segments, &rendered);
            join_key(segments, partitions, &filename)
        }
    };

    debug_assert!(
        !key.starts_with(KEY_SEPARATOR) && !key.contains("//"),
        "Postcondition: key must not have separator artifacts"
    );
    debug_assert!(
        key.ends_with(JSONL_EXTENSION),
        "Postcondition: key must name a .jsonl object"
    );
    key
}

fn push_component(segments: &mut Vec<String>, component: &str) {
    let trimmed = component.trim_matches(KEY_SEPARATOR);
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

fn join_key(mut segments: Vec<String>, partitions: &[HivePartition], filename: &str) -> String {
    segments.extend(partitions.iter().map(HivePartition::segment));
    push_component(&mut segments, filename);
    segments.join("/")
}
