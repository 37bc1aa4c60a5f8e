//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the switchboard production sources:
//! - No blocking I/O inside async code
//! - No thread sleeps, and async sleeps only where a delay is the point
//!
//! The helpers here do line-based scanning; they understand just enough Rust
//! layout (indentation, `fn` signatures, `#[cfg(test)]` modules) to decide
//! which function a line belongs to.

use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["switchboard/core/src", "switchboard/daemon/src"];

/// Workspace root, derived from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// One production source file, split into lines
#[derive(Debug)]
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// File contents, one entry per line
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Build from in-memory text (used by the detector self-tests)
    #[must_use]
    pub fn from_text(path: &str, text: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Lines before the first `#[cfg(test)]`, with comments stripped
    pub fn production_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
            .map(|(idx, line)| (idx, strip_comment(line)))
            .filter(|(_, code)| !code.trim().is_empty())
    }

    /// Format a violation at a zero-based line index
    #[must_use]
    pub fn violation(&self, idx: usize, what: &str) -> String {
        format!(
            "{}:{} - {what}: {}",
            self.path.display(),
            idx + 1,
            self.lines[idx].trim()
        )
    }
}

/// Load every `.rs` file under the production directories
///
/// # Panics
///
/// Panics if a production directory is missing, so a moved tree cannot make
/// the checks pass vacuously.
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let base = root.join(dir);
        assert!(base.is_dir(), "missing production directory {}", base.display());

        for entry in walkdir::WalkDir::new(&base)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(path) else {
                continue;
            };
            let relative = path.strip_prefix(&root).unwrap_or(path).to_path_buf();
            files.push(SourceFile::from_text(&relative.to_string_lossy(), &content));
        }
    }

    files
}

/// Drop a trailing `//` comment (string literals containing `//` are rare
/// enough in this tree to ignore)
#[must_use]
pub fn strip_comment(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_fn_signature(trimmed: &str) -> bool {
    let mut rest = trimmed;
    for prefix in ["pub(crate) ", "pub(super) ", "pub ", "const ", "async ", "unsafe "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
        }
    }
    rest.starts_with("fn ")
}

/// Whether the line at `idx` executes in async context
///
/// True when the nearest enclosing `fn` (the closest preceding signature with
/// smaller indentation) is `async`, or when an `async` block opens between
/// that signature and the line.
#[must_use]
pub fn is_in_async_context(lines: &[String], idx: usize) -> bool {
    let mut depth = indent(&lines[idx]);

    for line in lines[..idx].iter().rev() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let level = indent(line);
        if level >= depth {
            continue;
        }
        // Tails of a multi-line signature sit at the signature's indent.
        if trimmed == "{" || trimmed.starts_with("where") || trimmed.starts_with(')') {
            continue;
        }
        if is_fn_signature(trimmed) {
            return trimmed.contains("async fn ");
        }
        if trimmed.contains("async move {") || trimmed.contains("async {") {
            return true;
        }
        depth = level;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_async_fn_detected() {
        let code = lines(
            "async fn load() {\n    let x = std::fs::read(\"a\");\n}",
        );
        assert!(is_in_async_context(&code, 1));
    }

    #[test]
    fn test_sync_fn_in_impl_detected() {
        let code = lines(
            "impl Drop for Listener {\n    fn drop(&mut self) {\n        std::fs::remove_file(p);\n    }\n}",
        );
        assert!(!is_in_async_context(&code, 2));
    }

    #[test]
    fn test_async_block_in_sync_fn() {
        let code = lines(
            "fn spawn() {\n    tokio::spawn(async move {\n        std::fs::read(\"a\");\n    });\n}",
        );
        assert!(is_in_async_context(&code, 2));
    }

    #[test]
    fn test_sibling_async_fn_does_not_leak() {
        let code = lines(
            "    async fn a() {\n    }\n\n    fn b() {\n        std::fs::read(\"a\");\n    }",
        );
        assert!(!is_in_async_context(&code, 4));
    }

    #[test]
    fn test_where_clause_signature() {
        let code = lines(
            "pub async fn read<R>(r: &mut R) -> Result<()>\nwhere\n    R: AsyncRead,\n{\n    std::fs::read(\"a\");\n}",
        );
        assert!(is_in_async_context(&code, 4));
    }

    #[test]
    fn test_test_module_excluded() {
        let file = SourceFile::from_text(
            "x.rs",
            "fn a() {}\n// note\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}",
        );
        let seen: Vec<usize> = file.production_lines().map(|(idx, _)| idx).collect();
        assert_eq!(seen, vec![0]);
    }

    #[test]
    fn test_workspace_root_contains_sources() {
        let root = workspace_root();
        assert!(root.join("switchboard/core/src/lib.rs").is_file());
    }
}
