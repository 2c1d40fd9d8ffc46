//! Glob helpers for campaign patterns: brace expansion, exclusion matching,
//! and base-relative path normalisation.

use globset::{Glob, GlobBuilder, GlobMatcher};
use std::path::{Component, Path, PathBuf};

use crate::error::ServiceError;

/// Expands the first `{a,b,c}` group into one pattern per option.
///
/// A single pass; nested braces are not interpreted.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close_rel) = pattern[open..].find('}') else {
        return vec![pattern.to_string()];
    };
    let close = open + close_rel;
    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    pattern[open + 1..close]
        .split(',')
        .map(|option| format!("{}{}{}", prefix, option, suffix))
        .collect()
}

/// Compiles a glob where `*` stays within one path segment and `**` crosses
/// segments.
pub fn compile(pattern: &str) -> Result<GlobMatcher, ServiceError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| ServiceError::invalid(format!("invalid pattern '{}': {}", pattern, e)))
}

/// Checks that every pattern (after brace expansion) compiles.
pub fn validate_patterns(patterns: &[String]) -> Result<(), ServiceError> {
    for pattern in patterns {
        for expanded in expand_braces(pattern) {
            compile(&expanded)?;
        }
    }
    Ok(())
}

/// One exclude entry: matches a full path, or any single segment once the
/// leading `**/` and trailing `/**` are trimmed.
pub struct ExcludeRule {
    full: GlobMatcher,
    segment: Option<GlobMatcher>,
}

impl ExcludeRule {
    pub fn new(pattern: &str) -> Result<Self, ServiceError> {
        let full = compile(pattern)?;
        let trimmed = pattern.trim_start_matches("**/").trim_end_matches("/**");
        let segment = if trimmed.is_empty() || trimmed.contains('/') {
            None
        } else {
            Some(
                Glob::new(trimmed).map(|g| g.compile_matcher()).map_err(|e| {
                    ServiceError::invalid(format!("invalid pattern '{}': {}", pattern, e))
                })?,
            )
        };
        Ok(Self { full, segment })
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.full.is_match(path) {
            return true;
        }
        match &self.segment {
            Some(segment) => path.components().any(|c| match c {
                Component::Normal(name) => segment.is_match(name),
                _ => false,
            }),
            None => false,
        }
    }

    /// True when a directory with this name can be skipped entirely.
    pub fn matches_segment(&self, name: &std::ffi::OsStr) -> bool {
        self.segment
            .as_ref()
            .map(|s| s.is_match(name))
            .unwrap_or(false)
    }
}

pub struct ExcludeSet {
    rules: Vec<ExcludeRule>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self, ServiceError> {
        let mut rules = Vec::new();
        for pattern in patterns {
            for expanded in expand_braces(pattern) {
                rules.push(ExcludeRule::new(&expanded)?);
            }
        }
        Ok(Self { rules })
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.rules.iter().any(|r| r.matches(path))
    }

    pub fn prunes_dir(&self, name: &std::ffi::OsStr) -> bool {
        self.rules.iter().any(|r| r.matches_segment(name))
    }
}

/// Lexically normalises a path: drops `.`, resolves `..` against earlier
/// components. Does not touch the filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The `(relative, absolute)` identity of a path within a campaign base.
///
/// Relative input is joined to `base`. The absolute form is canonicalised
/// when the file exists, otherwise cleaned lexically. The relative form is
/// the absolute path with the (canonical) base stripped, or the absolute
/// path itself when it lies outside the base.
pub fn resolve(base: &Path, input: &str) -> (String, String) {
    let raw = Path::new(input.trim());
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        base.join(raw)
    };
    let absolute = canonical_or_clean(&joined);
    let relative = relative_to(base, &absolute);
    (relative, path_string(&absolute))
}

pub fn canonical_or_clean(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| clean_path(path))
}

pub fn relative_to(base: &Path, absolute: &Path) -> String {
    let base = canonical_or_clean(base);
    match absolute.strip_prefix(&base) {
        Ok(rel) if !rel.as_os_str().is_empty() => path_string(rel),
        _ => path_string(absolute),
    }
}

/// Path as a `/`-separated string.
pub fn path_string(path: &Path) -> String {
    let s = path.to_string_lossy().to_string();
    if std::path::MAIN_SEPARATOR == '\\' {
        s.replace('\\', "/")
    } else {
        s
    }
}

/// Leading directory of `pattern` that contains no glob metacharacters.
pub fn literal_root(pattern: &str) -> PathBuf {
    let mut root = PathBuf::new();
    let mut components = Path::new(pattern).components().peekable();
    while let Some(component) = components.next() {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) || components.peek().is_none() {
            break;
        }
        root.push(component.as_os_str());
    }
    root
}

/// Simple basename glob match used by export filtering.
pub fn basename_matches(pattern: &str, file_path: &str) -> bool {
    let name = Path::new(file_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    expand_braces(pattern.trim()).iter().any(|p| {
        Glob::new(p)
            .map(|g| g.compile_matcher().is_match(&name))
            .unwrap_or(false)
    })
}
