//! Discovery tools: `ls`, `glob` and `grep`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::fs;

use crate::ToolDef;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::shell::run_command;
use crate::tools::spec::ToolSpec;
use crate::tools::workdir::WorkingDir;

/// Maximum files returned by `glob` and `grep`.
pub const MAX_SEARCH_RESULTS: usize = 100;

const TRUNCATION_NOTICE: &str =
    "(Results are truncated. Consider using a more specific path or pattern.)";

#[derive(Deserialize, JsonSchema)]
pub struct LsArgs {
    /// Directory to list. Defaults to the working directory.
    #[serde(default)]
    pub path: Option<String>,
    /// Glob patterns of entries to leave out (e.g. '*.log', 'target').
    #[serde(default)]
    pub ignore: Option<Vec<String>>,
}

#[derive(Deserialize, JsonSchema)]
pub struct GlobArgs {
    /// Glob pattern, e.g. '**/*.rs' or 'src/*.{ts,tsx}'.
    pub pattern: String,
    /// Directory to search in. Defaults to the working directory.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct GrepArgs {
    /// Extended regular expression to search file contents for.
    pub pattern: String,
    /// Directory to search in. Defaults to the working directory.
    #[serde(default)]
    pub path: Option<String>,
    /// File name pattern to include, e.g. '*.rs' or '*.{ts,tsx}'.
    #[serde(default)]
    pub include: Option<String>,
}

// ── ls ──────────────────────────────────────────────────────────────

pub struct ListDir {
    workdir: WorkingDir,
}

impl ListDir {
    pub fn new(workdir: WorkingDir) -> Self {
        Self { workdir }
    }
}

impl Tool for ListDir {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("ls")
            .purpose("List the files and directories directly inside a directory")
            .when_to_use("To see what a directory contains, or to check a parent exists before creating files")
            .when_not_to_use(
                "When looking for files by pattern across subdirectories, use glob. \
                 When searching content, use grep",
            )
            .parameters_for::<LsArgs>()
            .output_format("'Contents of <dir>/:' then a Directories section and a Files section")
            .disambiguate(
                "Finding every *.rs file in the project",
                "glob",
                "ls does not descend into subdirectories",
            )
            .build()
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: LsArgs = if arguments.trim().is_empty() {
                LsArgs {
                    path: None,
                    ignore: None,
                }
            } else {
                match parse_tool_args(&arguments) {
                    Ok(a) => a,
                    Err(e) => return e,
                }
            };
            let dir = match &args.path {
                Some(p) => self.workdir.resolve(p),
                None => self.workdir.get(),
            };
            list_dir(&dir, &args.ignore.unwrap_or_default()).await
        })
    }
}

async fn list_dir(dir: &Path, ignore: &[String]) -> String {
    match fs::metadata(dir).await {
        Err(_) => return format!("Error: Path '{}' does not exist", dir.display()),
        Ok(meta) if !meta.is_dir() => {
            return format!("Error: Path '{}' is not a directory", dir.display());
        }
        Ok(_) => {}
    }

    let patterns: Vec<glob::Pattern> = ignore
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();

    let mut entries = match fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) => return format!("Error: Cannot access directory - {e}"),
    };
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if name.starts_with('.') || name == "__pycache__" {
            continue;
        }
        if patterns
            .iter()
            .any(|p| p.matches(&name) || p.matches_path(&path))
        {
            continue;
        }
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir())
            || fs::metadata(&path).await.is_ok_and(|m| m.is_dir());
        if is_dir {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();

    let mut out = format!(
        "Contents of {}/:\n",
        dir.display().to_string().trim_end_matches('/')
    );
    if dirs.is_empty() && files.is_empty() {
        out.push_str("  (empty directory)\n");
        return out;
    }
    if !dirs.is_empty() {
        out.push_str(&format!("\nDirectories ({}):\n", dirs.len()));
        for d in &dirs {
            out.push_str(&format!("  {d}/\n"));
        }
    }
    if !files.is_empty() {
        out.push_str(&format!("\nFiles ({}):\n", files.len()));
        for f in &files {
            out.push_str(&format!("  {f}\n"));
        }
    }
    out
}

// ── glob ────────────────────────────────────────────────────────────

pub struct GlobFiles {
    workdir: WorkingDir,
}

impl GlobFiles {
    pub fn new(workdir: WorkingDir) -> Self {
        Self { workdir }
    }
}

impl Tool for GlobFiles {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("glob")
            .purpose("Find files by name pattern")
            .when_to_use("When you know roughly what a file is called or its extension")
            .when_not_to_use(
                "When searching for text inside files, use grep. \
                 When you already have the path, use view",
            )
            .parameters_for::<GlobArgs>()
            .example("glob(pattern='**/*.toml')", "Every TOML file, newest first")
            .example(
                "glob(pattern='main.rs')",
                "A bare file name is searched recursively if it is not found at the top level",
            )
            .output_format("Absolute paths, one per line, most recently modified first")
            .disambiguate(
                "Finding which files mention a function",
                "grep",
                "glob matches names, grep matches content",
            )
            .build()
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: GlobArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(_) => return "Error: 'pattern' argument is required".to_string(),
            };
            let base = match &args.path {
                Some(p) => self.workdir.resolve(p),
                None => self.workdir.get(),
            };
            let pattern = args.pattern;
            tokio::task::spawn_blocking(move || {
                let (mut files, mut truncated) = glob_files(&base, &pattern)?;
                if files.is_empty() && is_simple_file_name(&pattern) {
                    (files, truncated) = glob_files(&base, &format!("**/{pattern}"))?;
                }
                Ok::<_, String>(format_file_list(&files, truncated, None))
            })
            .await
            .map_err(|e| format!("Error: glob task failed: {e}"))
            .and_then(|r| r)
            .unwrap_or_else(|e| e)
        })
    }
}

fn glob_files(base: &Path, pattern: &str) -> Result<(Vec<PathBuf>, bool), String> {
    let mut matches = Vec::new();
    for expanded in expand_braces(pattern) {
        let full = if Path::new(&expanded).is_absolute() {
            expanded
        } else {
            base.join(&expanded).to_string_lossy().to_string()
        };
        let paths = glob::glob(&full).map_err(|e| format!("Error: invalid glob pattern: {e}"))?;
        matches.extend(paths.flatten().filter(|p| p.is_file()));
    }
    matches.sort();
    matches.dedup();
    Ok(newest_first(matches))
}

/// A pattern with no directory part and no leading wildcard, e.g. `main.rs`.
fn is_simple_file_name(pattern: &str) -> bool {
    !pattern.contains('/')
        && !pattern.contains('\\')
        && !pattern.contains("**")
        && !pattern.starts_with('*')
        && !pattern.starts_with('?')
}

// ── grep ────────────────────────────────────────────────────────────

pub struct GrepFiles {
    workdir: WorkingDir,
}

impl GrepFiles {
    pub fn new(workdir: WorkingDir) -> Self {
        Self { workdir }
    }
}

impl Tool for GrepFiles {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("grep")
            .purpose("Find files whose content matches a regular expression")
            .when_to_use(
                "When you need to know which files mention a symbol, string or pattern. \
                 Narrow with include for large trees",
            )
            .when_not_to_use(
                "When you need the matching lines themselves, view the returned files. \
                 When finding files by name, use glob",
            )
            .parameters_for::<GrepArgs>()
            .example(
                "grep(pattern='fn\\s+parse_', include='*.rs')",
                "Rust files defining parse_ functions",
            )
            .output_format("'Found N files' then absolute paths, most recently modified first")
            .disambiguate(
                "Finding a file called config.toml",
                "glob",
                "grep matches content, glob matches names",
            )
            .build()
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: GrepArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(_) => return "Error: 'pattern' argument is required".to_string(),
            };
            let base = match &args.path {
                Some(p) => self.workdir.resolve(p),
                None => self.workdir.get(),
            };

            let mut cmd_args = vec![
                "-rlIE".to_string(),
                "--color=never".to_string(),
                "--exclude-dir=.git".to_string(),
            ];
            if let Some(include) = &args.include {
                for pattern in expand_braces(include) {
                    let name = pattern.rsplit('/').next().unwrap_or(&pattern).to_string();
                    cmd_args.push(format!("--include={name}"));
                }
            }
            cmd_args.push("-e".to_string());
            cmd_args.push(args.pattern);
            cmd_args.push(base.to_string_lossy().to_string());

            let arg_refs: Vec<&str> = cmd_args.iter().map(String::as_str).collect();
            // Exit code 1 is "no matches".
            let output = run_command("grep", &arg_refs, &[1]).await;
            if output.starts_with("Command failed") || output.starts_with("Error") {
                return format!("Error: grep failed: {}", output.trim());
            }
            let files: Vec<PathBuf> = output
                .lines()
                .filter(|l| !l.trim().is_empty() && !l.starts_with("[stderr]"))
                .map(PathBuf::from)
                .filter(|p| p.is_file())
                .collect();
            let total = files.len();
            let (files, truncated) = newest_first(files);
            format_file_list(&files, truncated, Some(total))
        })
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Expand the first `{a,b,c}` group of a pattern into one pattern per option.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    if let Some(open) = pattern.find('{')
        && let Some(close_rel) = pattern.get(open..).and_then(|s| s.find('}'))
    {
        let close = open + close_rel;
        let before = pattern.get(..open).unwrap_or_default();
        let options = pattern.get(open + 1..close).unwrap_or_default();
        let after = pattern.get(close + 1..).unwrap_or_default();
        return options
            .split(',')
            .map(|opt| format!("{before}{opt}{after}"))
            .collect();
    }
    vec![pattern.to_string()]
}

/// Sort by modification time, newest first, and cap at
/// [`MAX_SEARCH_RESULTS`]. The flag reports whether anything was cut.
fn newest_first(mut files: Vec<PathBuf>) -> (Vec<PathBuf>, bool) {
    let mtime = |p: &PathBuf| {
        std::fs::metadata(p)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    files.sort_by_cached_key(|p| std::cmp::Reverse(mtime(p)));
    let truncated = files.len() > MAX_SEARCH_RESULTS;
    files.truncate(MAX_SEARCH_RESULTS);
    (files, truncated)
}

fn format_file_list(files: &[PathBuf], truncated: bool, found: Option<usize>) -> String {
    if files.is_empty() {
        return "No files found".to_string();
    }
    let mut out = String::new();
    if let Some(n) = found {
        out.push_str(&format!("Found {n} file{}\n", if n == 1 { "" } else { "s" }));
    }
    out.push_str(
        &files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n"),
    );
    if truncated {
        out.push('\n');
        out.push_str(TRUNCATION_NOTICE);
    }
    out
}
