//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No sleep() calls in production code
//! - The core library never writes to stdout/stderr
//! - The core library never panics on `unwrap()`/`expect()`
//! - The core library stays free of surface dependencies
//!
//! The helpers below walk production sources and hand back the lines that
//! precede each file's `#[cfg(test)]` module, with comments stripped.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// A production source line
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Line with any `//` comment removed
    pub code: String,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.code.trim())
    }
}

/// Every production line of every `.rs` file under `dir` (relative to the
/// workspace root)
///
/// Scanning of a file stops at its first `#[cfg(test)]`.
#[must_use]
pub fn production_lines(dir: &str) -> Vec<SourceLine> {
    let root = workspace_root().join(dir);
    assert!(root.exists(), "missing source directory {}", root.display());

    let mut lines = Vec::new();
    for entry in walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        lines.extend(strip_tests_and_comments(path, &content));
    }
    lines
}

/// Production lines of one file's contents
#[must_use]
pub fn strip_tests_and_comments(path: &Path, content: &str) -> Vec<SourceLine> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .enumerate()
        .filter_map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            (!code.trim().is_empty()).then(|| SourceLine {
                path: path.to_path_buf(),
                number: idx + 1,
                code: code.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tests_and_comments() {
        let content = "\
//! Module docs mention println!(\"x\")
fn real() {
    let x = 1; // trailing .unwrap()
}

#[cfg(test)]
mod tests {
    fn t() { Some(1).unwrap(); }
}";
        let lines = strip_tests_and_comments(Path::new("x.rs"), content);
        let code: Vec<&str> = lines.iter().map(|l| l.code.trim()).collect();
        assert_eq!(code, vec!["fn real() {", "let x = 1;", "}"]);
        assert_eq!(lines[1].number, 3);
    }
}
