//! System prompt for the coding assistant.
//!
//! The prompt is regenerated whenever the working directory changes: a
//! fixed description of the assistant and its tools, an `<env>` block, the
//! top-level directory listing, and (inside a git repository) a snapshot of
//! the repository state.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use chrono::{Datelike, Local};
use quill_rs::agent::SystemPromptSource;
use tracing::debug;

/// Entries hidden from the listing outside git repositories.
pub const DEFAULT_IGNORE: &[&str] = &[
    ".venv",
    "venv",
    ".env",
    "__pycache__",
    "node_modules",
    "dist",
    "build",
    "target",
    ".git",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".coverage",
    ".idea",
    ".vscode",
];

pub const DEFAULT_IGNORE_SUFFIXES: &[&str] = &[".pyc", ".egg-info"];

const ASSISTANT_TEMPLATE: &str = "\
You are quill, an interactive command line assistant for software engineering tasks. \
You help the user read, understand, change and test code in their working directory.

Tools:
- view, edit, write: read and change files. Read a file before editing it.
- ls, glob, grep: explore directories, find files by name, find files by content.
- bash: run builds, tests, git and other commands. Network clients are not available.
- cd: change the working directory for every tool.

Guidelines:
- Be concise. Answer in a few lines unless the user asks for detail.
- Make minimal, focused changes that follow the conventions of the surrounding code.
- Never invent file contents; look them up with the tools.
- After changing code, run the project's tests or build when you know how.
- Do not commit unless the user asks you to.

<env>
Working directory: {working_directory}
Is directory a git repo: {is_git_repo}
Platform: {platform}
Today's date: {date}
</env>
";

/// The production [`SystemPromptSource`].
#[derive(Debug, Clone, Default)]
pub struct WorkspacePrompt;

impl SystemPromptSource for WorkspacePrompt {
    fn build(&self, working_dir: &Path) -> String {
        coding_system_prompt(working_dir)
    }
}

/// Build the full system prompt for `cwd`.
pub fn coding_system_prompt(cwd: &Path) -> String {
    let is_repo = is_git_repo(cwd);
    let mut prompt = ASSISTANT_TEMPLATE
        .replace("{working_directory}", &cwd.display().to_string())
        .replace("{is_git_repo}", if is_repo { "Yes" } else { "No" })
        .replace("{platform}", std::env::consts::OS)
        .replace("{date}", &prompt_date());

    prompt.push_str(&format!(
        "\nWe are now in the {} working directory.\nCurrent directory contents: {}\n",
        cwd.display(),
        directory_listing(cwd)
    ));

    if is_repo {
        prompt.push_str(&format!(
            "\n<context name=\"gitStatus\">{}</context>\n",
            git_status(cwd)
        ));
    }
    prompt
}

/// Today's date as `M/D/YYYY`.
fn prompt_date() -> String {
    let today = Local::now();
    format!("{}/{}/{}", today.month(), today.day(), today.year())
}

// ── Directory listing ───────────────────────────────────────────────

/// Sorted, non-recursive listing with directories suffixed `/`, joined by
/// two spaces.
pub fn directory_listing(cwd: &Path) -> String {
    let entries = match std::fs::read_dir(cwd) {
        Ok(e) => e,
        Err(e) => return format!("Error listing directory: {e}"),
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();

    let visible: Vec<String> = if is_git_repo(cwd) {
        let mut ignored = git_ignored(cwd, &names);
        ignored.push(".git".to_string());
        names.into_iter().filter(|n| !ignored.contains(n)).collect()
    } else {
        names
            .into_iter()
            .filter(|n| !matches_default_ignore(n))
            .collect()
    };

    let items: Vec<String> = visible
        .into_iter()
        .map(|name| {
            if cwd.join(&name).is_dir() {
                format!("{name}/")
            } else {
                name
            }
        })
        .collect();
    if items.is_empty() {
        "(empty directory)".to_string()
    } else {
        items.join("  ")
    }
}

pub fn matches_default_ignore(name: &str) -> bool {
    name.starts_with('.')
        || DEFAULT_IGNORE.contains(&name)
        || DEFAULT_IGNORE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

// ── Git ─────────────────────────────────────────────────────────────

fn git(cwd: &Path, args: &[&str]) -> Option<std::process::Output> {
    Command::new("git")
        .arg("-C")
        .arg(cwd)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()
}

fn git_stdout(cwd: &Path, args: &[&str]) -> String {
    git(cwd, args)
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default()
}

pub fn is_git_repo(path: &Path) -> bool {
    git(path, &["rev-parse", "--is-inside-work-tree"])
        .is_some_and(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "true")
}

/// Names among `items` that git ignores, via one `git check-ignore --stdin`.
/// Empty on any failure.
pub fn git_ignored(cwd: &Path, items: &[String]) -> Vec<String> {
    if items.is_empty() {
        return Vec::new();
    }
    let child = Command::new("git")
        .arg("-C")
        .arg(cwd)
        .args(["check-ignore", "--stdin"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            debug!("git check-ignore failed to start: {e}");
            return Vec::new();
        }
    };
    // stdin is fed from its own thread while stdout is drained here; git
    // stops reading once its stdout pipe is full.
    let writer = child.stdin.take().map(|mut stdin| {
        let input = items.join("\n");
        std::thread::spawn(move || {
            if let Err(e) = stdin.write_all(input.as_bytes()) {
                debug!("git check-ignore stdin: {e}");
            }
        })
    });
    let output = child.wait_with_output();
    if let Some(writer) = writer
        && writer.join().is_err()
    {
        debug!("git check-ignore stdin writer panicked");
    }
    // Exit status 1 means nothing is ignored.
    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Snapshot of branch, main branch, porcelain status and recent commits.
pub fn git_status(cwd: &Path) -> String {
    let branch = git_stdout(cwd, &["rev-parse", "--abbrev-ref", "HEAD"]);
    let main_branch = git_stdout(cwd, &["remote", "show", "origin"])
        .lines()
        .filter(|l| l.contains("HEAD branch"))
        .filter_map(|l| l.rsplit(':').next())
        .map(|b| b.trim().to_string())
        .last()
        .unwrap_or_else(|| "main".to_string());
    let status = git_stdout(cwd, &["status", "--porcelain"]);
    let status = if status.is_empty() {
        "(clean)".to_string()
    } else {
        status
    };
    let log = git_stdout(cwd, &["log", "--oneline", "--max-count=5"]);

    format!(
        "This is the git status at the start of the conversation. Note that this status is a \
         snapshot in time, and will not update during the conversation.\n\
         Current branch: {branch}\n\n\
         Main branch (you will usually use this for PRs): {main_branch}\n\n\
         Status:\n{status}\n\n\
         Recent commits:\n{log}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn listing_outside_git_uses_default_ignores() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("main.rs"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();
        std::fs::write(dir.path().join("mod.pyc"), "").unwrap();

        if !is_git_repo(dir.path()) {
            assert_eq!(directory_listing(dir.path()), "main.rs  src/");
        }
    }

    #[test]
    fn empty_listing() {
        let dir = tempfile::tempdir().unwrap();
        if !is_git_repo(dir.path()) {
            assert_eq!(directory_listing(dir.path()), "(empty directory)");
        }
    }

    #[test]
    fn default_ignore_rules() {
        assert!(matches_default_ignore(".env"));
        assert!(matches_default_ignore("__pycache__"));
        assert!(matches_default_ignore("pkg.egg-info"));
        assert!(matches_default_ignore(".anything"));
        assert!(!matches_default_ignore("Cargo.toml"));
    }

    #[test]
    fn prompt_contains_env_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        let prompt = WorkspacePrompt.build(dir.path());

        assert!(prompt.contains("<env>"));
        assert!(prompt.contains(&format!("Working directory: {}", dir.path().display())));
        assert!(prompt.contains(&format!("Platform: {}", std::env::consts::OS)));
        assert!(prompt.contains(&format!(
            "We are now in the {} working directory.",
            dir.path().display()
        )));
        assert!(prompt.contains("README.md"));

        let today = Local::now();
        assert!(prompt.contains(&format!("{}/{}/{}", today.month(), today.day(), today.year())));
    }

    #[test]
    fn git_repository_gets_status_block_and_ignores() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let init = Command::new("git")
            .arg("-C")
            .arg(dir.path())
            .args(["init", "-q"])
            .status()
            .unwrap();
        assert!(init.success());
        std::fs::write(dir.path().join(".gitignore"), "secret.txt\n").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "").unwrap();
        std::fs::write(dir.path().join("lib.rs"), "").unwrap();

        assert!(is_git_repo(dir.path()));
        let listing = directory_listing(dir.path());
        assert!(listing.contains("lib.rs"));
        assert!(listing.contains(".gitignore"));
        assert!(!listing.contains("secret.txt"));
        assert!(!listing.contains(".git/"));

        let prompt = coding_system_prompt(dir.path());
        assert!(prompt.contains("Is directory a git repo: Yes"));
        assert!(prompt.contains("<context name=\"gitStatus\">"));
        assert!(prompt.contains("Main branch (you will usually use this for PRs): main"));
        assert!(prompt.contains("?? "));
    }

    #[test]
    fn large_ignored_listing_completes() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let init = Command::new("git")
            .arg("-C")
            .arg(dir.path())
            .args(["init", "-q"])
            .status()
            .unwrap();
        assert!(init.success());
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();

        let mut names: Vec<String> = (0..10_000)
            .map(|i| format!("some_fairly_long_generated_name_{i:06}.log"))
            .collect();
        names.push("kept.rs".to_string());

        let (tx, rx) = std::sync::mpsc::channel();
        let cwd = dir.path().to_path_buf();
        std::thread::spawn(move || {
            let _ = tx.send(git_ignored(&cwd, &names));
        });
        let ignored = rx
            .recv_timeout(std::time::Duration::from_secs(60))
            .expect("git_ignored should not block on a large listing");
        assert_eq!(ignored.len(), 10_000);
        assert!(!ignored.contains(&"kept.rs".to_string()));
    }
}
