//! Shell tools: `bash` and `cd`, plus the process helpers other tools use.
//!
//! Commands run with `sh -c` in the shared working directory. Each call is a
//! fresh process, so a `cd` inside a command does not persist; the `cd`
//! tool moves the [`WorkingDir`] instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::ToolDef;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::spec::ToolSpec;
use crate::tools::workdir::WorkingDir;

/// Default and maximum `bash` timeout in milliseconds.
pub const DEFAULT_BASH_TIMEOUT_MS: u64 = 600_000;
pub const MAX_BASH_TIMEOUT_MS: u64 = 600_000;

/// `bash` output beyond this many characters is cut in the middle.
pub const MAX_OUTPUT_CHARS: usize = 30_000;

/// Network clients, browsers and `alias`.
pub const BANNED_COMMANDS: &[&str] = &[
    "alias",
    "curl",
    "curlie",
    "wget",
    "axel",
    "aria2c",
    "nc",
    "telnet",
    "lynx",
    "w3m",
    "links",
    "httpie",
    "xh",
    "http-prompt",
    "chrome",
    "firefox",
    "safari",
];

/// Directories `cd` refuses to enter.
pub const RESTRICTED_DIRS: &[&str] = &[
    "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/dev", "/proc", "/sys",
];

#[derive(Deserialize, JsonSchema)]
pub struct BashArgs {
    /// The command to execute.
    pub command: String,
    /// Optional timeout in milliseconds (max 600000).
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Deserialize, JsonSchema)]
pub struct CdArgs {
    /// Target directory. Supports '~', '-' (previous directory) and $VARS.
    pub path: String,
}

// ── bash ────────────────────────────────────────────────────────────

pub struct Bash {
    workdir: WorkingDir,
}

impl Bash {
    pub fn new(workdir: WorkingDir) -> Self {
        Self { workdir }
    }
}

impl Tool for Bash {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("bash")
            .purpose("Run a shell command in the working directory")
            .when_to_use(
                "For builds, tests, git, moving or deleting files, and anything no \
                 dedicated tool covers. Chain commands with ';' or '&&'",
            )
            .when_not_to_use(
                "For reading files use view, for searching use grep or glob, for listing \
                 use ls, for changing directory use cd. Network clients and browsers \
                 (curl, wget, nc, telnet, lynx, chrome, ...) are refused",
            )
            .parameters_for::<BashArgs>()
            .example("bash(command='cargo test -q')", "Test output, stderr appended")
            .output_format(
                "stdout followed by stderr; a non-zero exit status is noted on the last line; \
                 output over 30000 characters is cut in the middle",
            )
            .build()
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: BashArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(_) => return "Error: 'command' argument is required".to_string(),
            };
            if is_banned_command(&args.command) {
                return format!(
                    "Error: Command contains one or more banned commands: {}. \
                     Please use alternative tools for these operations.",
                    BANNED_COMMANDS.join(", ")
                );
            }
            let timeout_ms = args
                .timeout
                .unwrap_or(DEFAULT_BASH_TIMEOUT_MS)
                .min(MAX_BASH_TIMEOUT_MS);
            run_bash(&self.workdir.get(), &args.command, Duration::from_millis(timeout_ms)).await
        })
    }
}

async fn run_bash(workdir: &Path, command: &str, limit: Duration) -> String {
    debug!("bash in {}: {command}", workdir.display());
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(limit, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return format!("Error executing command: {e}"),
        Err(_) => {
            return format!("Command timed out after {} seconds", limit.as_secs_f64());
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut result = match (stdout.trim_end(), stderr.trim()) {
        (out, "") => out.to_string(),
        ("", err) => err.to_string(),
        (out, err) => format!("{out}\n{err}"),
    };
    if !output.status.success() {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(&format!("(exit code {code})"));
    }
    truncate_middle(&result, MAX_OUTPUT_CHARS)
}

/// Whether any word of the command names a banned program, with or
/// without a directory prefix.
pub fn is_banned_command(command: &str) -> bool {
    command
        .split(|c: char| c.is_whitespace() || ";|&()<>`".contains(c))
        .map(|token| token.trim_matches(|c| c == '"' || c == '\''))
        .filter(|token| !token.is_empty())
        .any(|token| {
            let name = token.rsplit('/').next().unwrap_or(token);
            BANNED_COMMANDS.contains(&token) || BANNED_COMMANDS.contains(&name)
        })
}

/// Keep the first and last `max / 2` characters, noting how many lines were
/// dropped in between.
pub fn truncate_middle(content: &str, max: usize) -> String {
    let total = content.chars().count();
    if total <= max {
        return content.to_string();
    }
    let half = max / 2;
    let start: String = content.chars().take(half).collect();
    let middle_lines = content
        .chars()
        .skip(half)
        .take(total - 2 * half)
        .filter(|&c| c == '\n')
        .count();
    let end: String = content.chars().skip(total - half).collect();
    format!("{start}\n\n... [{middle_lines} lines truncated] ...\n\n{end}")
}

// ── cd ──────────────────────────────────────────────────────────────

pub struct ChangeDirectory {
    workdir: WorkingDir,
}

impl ChangeDirectory {
    pub fn new(workdir: WorkingDir) -> Self {
        Self { workdir }
    }
}

impl Tool for ChangeDirectory {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("cd")
            .purpose("Change the working directory for all tools")
            .when_to_use(
                "When the user asks to work in another directory. Later relative paths \
                 and bash commands use the new directory",
            )
            .when_not_to_use(
                "To run a single command elsewhere, use an absolute path in bash instead. \
                 System directories such as /bin, /dev and /proc are refused",
            )
            .parameters_for::<CdArgs>()
            .example("cd(path='-')", "Returns to the previous directory")
            .output_format("Previous and current directory plus a short summary of its contents")
            .build()
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: CdArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(_) => return "Error: 'path' argument is required".to_string(),
            };
            change_directory(&self.workdir, args.path.trim())
        })
    }
}

fn change_directory(workdir: &WorkingDir, path: &str) -> String {
    let current = workdir.get();
    let (target, note) = match path {
        "-" => match workdir.previous() {
            Some(prev) => (prev, " (previous directory)"),
            None => return "Error: No previous directory".to_string(),
        },
        "~" => match dirs::home_dir() {
            Some(home) => (home, " (home directory)"),
            None => return "Error: Could not determine the home directory".to_string(),
        },
        other => (workdir.resolve(other), ""),
    };

    if !target.exists() {
        let suggestions = similar_directories(&target);
        let hint = if suggestions.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nDid you mean one of these?\n{}",
                suggestions
                    .iter()
                    .map(|s| format!("  - {}", s.display()))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };
        return format!("Error: Directory '{}' does not exist.{hint}", target.display());
    }
    if !target.is_dir() {
        return format!("Error: '{}' exists but is not a directory.", target.display());
    }
    if is_restricted(&target) {
        return format!(
            "Error: Cannot change to restricted system directory '{}'.",
            target.display()
        );
    }
    if let Err(e) = std::fs::read_dir(&target) {
        return format!("Error: Cannot access directory '{}': {e}", target.display());
    }

    workdir.set(&target);
    format!(
        "Directory changed successfully!\nPrevious: {}\nCurrent:  {}{note}\n\n{}",
        current.display(),
        target.display(),
        directory_summary(&target)
    )
}

pub fn is_restricted(path: &Path) -> bool {
    RESTRICTED_DIRS.iter().any(|dir| path.starts_with(dir))
}

fn directory_summary(dir: &Path) -> String {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return "Directory contents not accessible.".to_string();
    };
    let (mut dirs, mut files): (Vec<String>, Vec<String>) = (Vec::new(), Vec::new());
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.path().is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    if dirs.is_empty() && files.is_empty() {
        return "Directory is empty.".to_string();
    }
    dirs.sort();
    files.sort();
    let preview = |names: &[String]| {
        let mut s = names.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        if names.len() > 3 {
            s.push_str(&format!(" (and {} more)", names.len() - 3));
        }
        s
    };
    let mut parts = Vec::new();
    if !dirs.is_empty() {
        parts.push(format!("{} directories: {}", dirs.len(), preview(&dirs)));
    }
    if !files.is_empty() {
        parts.push(format!("{} files: {}", files.len(), preview(&files)));
    }
    parts.join("\n")
}

/// Sibling directories whose names resemble the missing target's.
fn similar_directories(target: &Path) -> Vec<PathBuf> {
    let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
        return Vec::new();
    };
    let wanted = name.to_string_lossy().to_lowercase();
    let Ok(entries) = std::fs::read_dir(parent) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            let candidate = p
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            candidate.contains(&wanted)
                || wanted.contains(&candidate)
                || levenshtein(&candidate, &wanted) <= 2
        })
        .collect();
    found.sort();
    found.truncate(5);
    found
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }
    prev[b.len()]
}

// ── Process helpers ─────────────────────────────────────────────────

fn format_output(output: std::process::Output, lenient_exit_codes: &[i32]) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let ok = output.status.success()
        || output
            .status
            .code()
            .is_some_and(|c| lenient_exit_codes.contains(&c));
    if ok {
        if stderr.is_empty() {
            stdout
        } else {
            format!("{stdout}\n[stderr]\n{stderr}")
        }
    } else {
        format!("Command failed ({}):\n{stdout}\n{stderr}", output.status)
    }
}

/// Run a program with arguments. Exit codes in `lenient_exit_codes` count
/// as success (e.g. `&[1]` for grep's "no matches").
pub async fn run_command(cmd: &str, args: &[&str], lenient_exit_codes: &[i32]) -> String {
    match Command::new(cmd).args(args).output().await {
        Ok(output) => format_output(output, lenient_exit_codes),
        Err(e) => format!("Error running {cmd}: {e}"),
    }
}
