//! Shared working directory.
//!
//! The process never calls `chdir`. Every tool and the REPL hold a clone of
//! one [`WorkingDir`] and resolve relative paths against it, so a `cd` from
//! either side is seen by all of them.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug)]
struct DirState {
    current: PathBuf,
    previous: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WorkingDir {
    state: Arc<RwLock<DirState>>,
}

impl WorkingDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(RwLock::new(DirState {
                current: normalize(&path.into()),
                previous: None,
            })),
        }
    }

    pub fn get(&self) -> PathBuf {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .current
            .clone()
    }

    /// The directory before the last [`set`](Self::set), if any.
    pub fn previous(&self) -> Option<PathBuf> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .previous
            .clone()
    }

    /// Move to `path`, remembering the current directory as previous.
    /// No existence check is made here.
    pub fn set(&self, path: impl Into<PathBuf>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let next = normalize(&path.into());
        state.previous = Some(std::mem::replace(&mut state.current, next));
    }

    /// Resolve a user-supplied path: `~` and `$VAR` are expanded, relative
    /// paths are joined onto the current directory, and `.`/`..` are
    /// collapsed lexically.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = expand_home(&expand_vars(path.trim()));
        if expanded.is_absolute() {
            normalize(&expanded)
        } else {
            normalize(&self.get().join(expanded))
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Expand `$VAR` and `${VAR}` from the environment. Unset variables are
/// left as written.
pub fn expand_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&n) = chars.peek() {
            if n.is_ascii_alphanumeric() || n == '_' {
                name.push(n);
                chars.next();
            } else {
                break;
            }
        }
        let closed = braced && chars.peek() == Some(&'}');
        if closed {
            chars.next();
        }
        match std::env::var(&name) {
            Ok(value) if !name.is_empty() && (!braced || closed) => out.push_str(&value),
            _ => {
                out.push('$');
                if braced {
                    out.push('{');
                }
                out.push_str(&name);
                if closed {
                    out.push('}');
                }
            }
        }
    }
    out
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_relative_and_absolute() {
        let wd = WorkingDir::new("/work/project");
        assert_eq!(wd.resolve("src/main.rs"), PathBuf::from("/work/project/src/main.rs"));
        assert_eq!(wd.resolve("../other"), PathBuf::from("/work/other"));
        assert_eq!(wd.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
        assert_eq!(wd.resolve("./a/./b"), PathBuf::from("/work/project/a/b"));
    }

    #[test]
    fn set_tracks_previous_and_is_shared() {
        let wd = WorkingDir::new("/a");
        let clone = wd.clone();
        assert_eq!(wd.previous(), None);
        clone.set("/b");
        assert_eq!(wd.get(), PathBuf::from("/b"));
        assert_eq!(wd.previous(), Some(PathBuf::from("/a")));
    }

    #[test]
    fn home_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~"), home);
            assert_eq!(expand_home("~/x"), home.join("x"));
        }
        assert_eq!(expand_home("a/~"), PathBuf::from("a/~"));
    }

    #[test]
    fn var_expansion() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_vars("$PATH/x"), format!("{path}/x"));
        assert_eq!(expand_vars("${PATH}"), path);
        assert_eq!(
            expand_vars("$QUILL_SURELY_UNSET_VAR/x"),
            "$QUILL_SURELY_UNSET_VAR/x"
        );
        assert_eq!(expand_vars("cost $"), "cost $");
    }

    #[test]
    fn normalize_keeps_leading_parent() {
        assert_eq!(normalize(Path::new("../a/b/..")), PathBuf::from("../a"));
        assert_eq!(normalize(Path::new("a/..")), PathBuf::from("."));
        assert_eq!(normalize(Path::new("/../etc")), PathBuf::from("/etc"));
    }
}
