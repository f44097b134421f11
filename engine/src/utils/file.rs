//! File utility functions

use std::path::PathBuf;

/// Expand a path string to an absolute path.
///
/// Handles tilde expansion (`~`, `~/path`) and resolves relative paths
/// (`.`, `..`, bare names) against the current working directory. Absolute
/// paths pass through unchanged.
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();

    if path.is_empty() {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }

    let home_dir = || directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());

    let expanded = if path == "~" {
        home_dir().unwrap_or_else(|| PathBuf::from(path))
    } else if let Some(rest) = path.strip_prefix("~/") {
        match home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    };

    if expanded.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_absolute_unix() {
        let result = expand_path("/absolute/path");
        assert_eq!(result, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_path_relative_dot_slash() {
        let result = expand_path("./relative");
        assert!(result.is_absolute());
        assert!(result.ends_with("relative"));
    }

    #[test]
    fn test_expand_path_bare_name() {
        let result = expand_path("mydata");
        assert!(result.is_absolute());
        assert!(result.ends_with("mydata"));
    }

    #[test]
    fn test_expand_path_tilde() {
        let result = expand_path("~/.valuation-engine");
        assert!(result.is_absolute());
        assert!(!result.to_string_lossy().contains('~'));
        assert!(result.ends_with(".valuation-engine"));
    }

    #[test]
    fn test_expand_path_empty_string() {
        let result = expand_path("");
        assert!(result.is_absolute());
        assert!(!result.as_os_str().is_empty());
    }

    #[test]
    fn test_expand_path_trims_whitespace() {
        let result = expand_path("  /path/to/dir  ");
        assert_eq!(result, PathBuf::from("/path/to/dir"));
    }
}
