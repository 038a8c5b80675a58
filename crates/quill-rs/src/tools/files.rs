//! File tools: `view`, `edit` and `write`.
//!
//! Paths may be absolute or relative to the shared [`WorkingDir`]. Output
//! that shows file content uses `cat -n` numbering (`{:6}\t{line}`), and
//! `edit` strips that numbering again if the model pastes it back.

use std::path::Path;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::fs;

use crate::ToolDef;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::spec::ToolSpec;
use crate::tools::workdir::WorkingDir;

/// Lines returned by `view` when no limit is given, and the cap on `limit`.
pub const MAX_VIEW_LINES: usize = 2000;

/// Longer lines are cut and suffixed with [`TRUNCATED_LINE_SUFFIX`].
pub const MAX_LINE_LENGTH: usize = 2000;

const TRUNCATED_LINE_SUFFIX: &str = "... (line truncated)";

/// Context lines shown on each side of an edit.
const SNIPPET_CONTEXT: usize = 4;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "ico", "tiff"];

// ── Typed argument structs ──────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
pub struct ViewArgs {
    /// Path of the file to read, absolute or relative to the working directory.
    pub file_path: String,
    /// 1-based line number to start reading from.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Number of lines to read (at most 2000).
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
pub struct EditArgs {
    /// Path of the file to modify.
    pub file_path: String,
    /// Exact text to replace, without line numbers. Empty to create or append.
    pub old_string: String,
    /// Replacement text.
    pub new_string: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct WriteArgs {
    /// Path of the file to write. Its parent directory must exist.
    pub file_path: String,
    /// Full content of the file.
    pub content: String,
}

// ── ViewFile ────────────────────────────────────────────────────────

pub struct ViewFile {
    workdir: WorkingDir,
}

impl ViewFile {
    pub fn new(workdir: WorkingDir) -> Self {
        Self { workdir }
    }
}

impl Tool for ViewFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("view")
            .purpose("Read a text file with line numbers")
            .when_to_use(
                "When you know which file you need. Read files before editing them. \
                 Omit offset and limit unless the file is very long",
            )
            .when_not_to_use(
                "When searching for content across files, use grep. \
                 When listing a directory, use ls",
            )
            .parameters_for::<ViewArgs>()
            .example(
                "view(file_path='src/main.rs', offset=100, limit=50)",
                "Lines 100-149 of src/main.rs, numbered",
            )
            .output_format("cat -n style: right-aligned line number, tab, line content")
            .build()
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: ViewArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(_) => return "Error: 'file_path' argument is required".to_string(),
            };
            let path = self.workdir.resolve(&args.file_path);
            view_file(&path, args.offset, args.limit).await
        })
    }
}

async fn view_file(path: &Path, offset: Option<usize>, limit: Option<usize>) -> String {
    let shown = path.display();
    match fs::metadata(path).await {
        Err(_) => return format!("Error: File '{shown}' does not exist"),
        Ok(meta) if meta.is_dir() => {
            return format!("Error: Path '{shown}' is a directory, not a file. Use ls to list it.");
        }
        Ok(meta) if !meta.is_file() => return format!("Error: Path '{shown}' is not a file"),
        Ok(_) => {}
    }

    if let Some(ext) = path.extension().and_then(|e| e.to_str())
        && IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    {
        return format!("This is an image file ({ext}). Images cannot be displayed in a text-only interface.");
    }

    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) => return format!("Error reading file: {e}"),
    };
    if bytes.contains(&0) {
        return "This file contains binary content that cannot be displayed as text.".to_string();
    }
    let content = String::from_utf8_lossy(&bytes);
    if content.is_empty() {
        return format!("(File '{shown}' is empty)");
    }

    let lines: Vec<&str> = content.lines().collect();
    let start = offset.unwrap_or(1).max(1) - 1;
    let limit = limit.unwrap_or(MAX_VIEW_LINES).clamp(1, MAX_VIEW_LINES);
    if start >= lines.len() {
        return format!(
            "Error: offset {} is past the end of the file ({} lines)",
            start + 1,
            lines.len()
        );
    }
    let end = (start + limit).min(lines.len());

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate().take(end).skip(start) {
        out.push_str(&format!("{:6}\t{}\n", i + 1, truncate_line(line)));
    }
    if end < lines.len() {
        out.push_str(&format!(
            "\n(Showing lines {}-{end} of {}. Use offset to read further.)\n",
            start + 1,
            lines.len()
        ));
    }
    out
}

fn truncate_line(line: &str) -> String {
    if line.chars().count() > MAX_LINE_LENGTH {
        let head: String = line.chars().take(MAX_LINE_LENGTH).collect();
        format!("{head}{TRUNCATED_LINE_SUFFIX}")
    } else {
        line.to_string()
    }
}

// ── EditFile ────────────────────────────────────────────────────────

pub struct EditFile {
    workdir: WorkingDir,
}

impl EditFile {
    pub fn new(workdir: WorkingDir) -> Self {
        Self { workdir }
    }
}

impl Tool for EditFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("edit")
            .purpose("Replace one unique occurrence of text in a file, or create a new file")
            .when_to_use(
                "For targeted changes of a few lines. View the file first and include \
                 enough surrounding context in old_string to match exactly one place. \
                 To create a file, pass an empty old_string and the full content as new_string",
            )
            .when_not_to_use(
                "When rewriting a whole file, use write. When moving or renaming files, \
                 use bash with mv",
            )
            .parameters_for::<EditArgs>()
            .example(
                "edit(file_path='src/lib.rs', old_string='fn old()', new_string='fn new()')",
                "The edited region with line numbers",
            )
            .output_format("Confirmation followed by a numbered snippet around the edit")
            .disambiguate(
                "Replacing most of a file",
                "write",
                "write replaces the full content in one call",
            )
            .build()
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: EditArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(_) => {
                    return "Error: 'file_path', 'old_string' and 'new_string' arguments are required"
                        .to_string();
                }
            };
            let path = self.workdir.resolve(&args.file_path);
            edit_file(&path, &args.old_string, &args.new_string).await
        })
    }
}

async fn edit_file(path: &Path, old_string: &str, new_string: &str) -> String {
    let shown = path.display();
    let exists = fs::try_exists(path).await.unwrap_or(false);

    if !exists {
        if !old_string.is_empty() {
            return format!("Error: File '{shown}' does not exist");
        }
        if let Some(parent) = path.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            return format!("Error creating directory '{}': {e}", parent.display());
        }
        return match fs::write(path, new_string).await {
            Ok(()) => updated_message(path, &numbered(new_string, 1)),
            Err(e) => format!("Error creating file '{shown}': {e}"),
        };
    }

    if !path.is_file() {
        return format!("Error: Path '{shown}' is not a file");
    }
    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => return format!("Error reading file '{shown}': {e}"),
    };

    let old = strip_line_numbers(old_string);
    let (new_content, edit_start) = if old.is_empty() {
        (format!("{content}{new_string}"), content.lines().count())
    } else {
        match content.matches(old.as_str()).count() {
            1 => {
                let at = content.find(old.as_str()).unwrap_or(0);
                let line = content.get(..at).map_or(0, |s| s.matches('\n').count());
                (content.replacen(old.as_str(), new_string, 1), line)
            }
            0 => match replace_whitespace_insensitive(&content, &old, new_string) {
                LineMatch::Unique(replaced, line) => (replaced, line),
                LineMatch::Multiple(n) => return multiple_matches(n),
                LineMatch::None => return not_found(&content, &old, old_string),
            },
            n => return multiple_matches(n),
        }
    };

    if let Err(e) = fs::write(path, &new_content).await {
        return format!("Error writing file '{shown}': {e}");
    }

    let lines: Vec<&str> = new_content.split('\n').collect();
    let from = edit_start.saturating_sub(SNIPPET_CONTEXT);
    let to = (edit_start + new_string.split('\n').count() + SNIPPET_CONTEXT).min(lines.len());
    let snippet = lines.get(from..to).unwrap_or_default().join("\n");
    updated_message(path, &numbered(&snippet, from + 1))
}

enum LineMatch {
    Unique(String, usize),
    Multiple(usize),
    None,
}

/// Match `old` against whole lines of `content` with whitespace collapsed,
/// replacing the matched lines when the match is unique.
fn replace_whitespace_insensitive(content: &str, old: &str, new: &str) -> LineMatch {
    let old_lines: Vec<String> = old
        .trim_end_matches('\n')
        .split('\n')
        .map(normalize_whitespace)
        .collect();
    if old_lines.iter().all(String::is_empty) {
        return LineMatch::None;
    }
    let lines: Vec<&str> = content.split('\n').collect();
    let n = old_lines.len();
    if n > lines.len() {
        return LineMatch::None;
    }

    let starts: Vec<usize> = (0..=lines.len() - n)
        .filter(|&i| {
            lines[i..i + n]
                .iter()
                .zip(&old_lines)
                .all(|(line, want)| normalize_whitespace(line) == *want)
        })
        .collect();

    match starts.as_slice() {
        [] => LineMatch::None,
        [i] => {
            let mut parts: Vec<&str> = lines[..*i].to_vec();
            let replacement = new.strip_suffix('\n').unwrap_or(new);
            parts.push(replacement);
            parts.extend_from_slice(&lines[i + n..]);
            LineMatch::Unique(parts.join("\n"), *i)
        }
        many => LineMatch::Multiple(many.len()),
    }
}

fn normalize_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove `cat -n` prefixes (spaces, digits, tab) pasted from `view` output.
pub fn strip_line_numbers(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let trimmed = line.trim_start();
            let digits = trimmed.len() - trimmed.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            match trimmed.get(digits..) {
                Some(rest) if digits > 0 && rest.starts_with('\t') => rest.get(1..).unwrap_or(""),
                _ => line,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn multiple_matches(n: usize) -> String {
    format!(
        "Error: The specified text appears {n} times in the file. \
         Please provide more context to uniquely identify which instance to replace."
    )
}

fn not_found(content: &str, cleaned: &str, original: &str) -> String {
    let mut suggestions = Vec::new();
    if cleaned != original {
        suggestions.push(
            "Line numbers from view output were removed from old_string, but the text still does not match."
                .to_string(),
        );
    }
    let first = cleaned.lines().next().unwrap_or("").trim();
    if !first.is_empty() {
        let similar: Vec<String> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains(first))
            .take(5)
            .map(|(i, line)| format!("Line {}: {line}", i + 1))
            .collect();
        if !similar.is_empty() {
            suggestions.push(format!("Found similar text at:\n{}", similar.join("\n")));
        }
    }

    let mut msg = "Error: The specified text was not found in the file.\n\n".to_string();
    if !suggestions.is_empty() {
        msg.push_str("Suggestions:\n");
        for s in &suggestions {
            msg.push_str(&format!("- {s}\n"));
        }
        msg.push('\n');
    }
    msg.push_str(
        "Consider:\n\
         - Viewing the file to check whitespace, line endings and exact text\n\
         - Using write for whole-file replacements\n\
         - Making smaller, more targeted edits",
    );
    msg
}

// ── WriteFile ───────────────────────────────────────────────────────

pub struct WriteFile {
    workdir: WorkingDir,
}

impl WriteFile {
    pub fn new(workdir: WorkingDir) -> Self {
        Self { workdir }
    }
}

impl Tool for WriteFile {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("write")
            .purpose("Write a file, replacing its content if it exists")
            .when_to_use("When creating a file or replacing its entire content")
            .when_not_to_use(
                "For small changes to an existing file, use edit. \
                 The parent directory must already exist",
            )
            .parameters_for::<WriteArgs>()
            .output_format("Creation notice, or a numbered preview of the updated file")
            .build()
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: WriteArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(_) => return "Error: 'file_path' and 'content' arguments are required".to_string(),
            };
            let path = self.workdir.resolve(&args.file_path);
            write_file(&path, &args.content).await
        })
    }
}

async fn write_file(path: &Path, content: &str) -> String {
    let shown = path.display();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return format!("Error: Parent directory '{}' does not exist", parent.display());
    }
    let existed = path.exists();
    if existed && !path.is_file() {
        return format!("Error: Path '{shown}' exists but is not a file");
    }
    if let Err(e) = fs::write(path, content).await {
        return format!("Error writing to file '{shown}': {e}");
    }
    if !existed {
        return format!("File created successfully at: {shown}");
    }
    let preview: Vec<&str> = content.lines().take(MAX_VIEW_LINES).collect();
    updated_message(path, &numbered(&preview.join("\n"), 1))
}

// ── Shared helpers ──────────────────────────────────────────────────

fn numbered(text: &str, first_line: usize) -> String {
    text.split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:6}\t{line}", first_line + i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn updated_message(path: &Path, snippet: &str) -> String {
    format!(
        "The file {} has been updated. Here's the result of running `cat -n` on a snippet of the edited file:\n{snippet}",
        path.display()
    )
}
