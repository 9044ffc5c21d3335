//! Exclusion set compilation
//!
//! Patterns use gitignore/rsync glob syntax (`*.tmp`, `/Downloads`,
//! `.cache/`). Two sources are combined:
//! 1. Built-in patterns: Homevault's own config and log directories, always
//!    enforced so the store never backs itself up
//! 2. User patterns from configuration, in order

use crate::error::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Ordered set of path-glob patterns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    builtin: Vec<String>,
    user: Vec<String>,
}

impl ExclusionSet {
    /// Resolve the effective set for a source tree
    ///
    /// `self_paths` are the store's own directories. Those living under
    /// `source` become anchored patterns; others cannot appear in the
    /// transfer and are skipped.
    pub fn resolve(source: &Path, self_paths: &[PathBuf], user_patterns: &[String]) -> Self {
        let mut builtin = Vec::new();
        for path in self_paths {
            if let Some(pattern) = anchored_pattern(source, path) {
                if !builtin.contains(&pattern) {
                    builtin.push(pattern);
                }
            }
        }

        let user = user_patterns
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty() && !p.starts_with('#'))
            .collect();

        Self { builtin, user }
    }

    /// All patterns, built-ins first
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.builtin.iter().chain(self.user.iter()).map(String::as_str)
    }

    pub fn builtin(&self) -> &[String] {
        &self.builtin
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compile into a matcher rooted at `root`
    pub fn matcher(&self, root: &Path) -> Result<ExclusionMatcher> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in self.patterns() {
            builder.add_line(None, pattern)?;
        }
        Ok(ExclusionMatcher {
            inner: builder.build()?,
        })
    }

    /// Render as an rsync `--exclude-from` file
    pub fn write_rsync_filter(&self, out: &mut impl Write) -> std::io::Result<()> {
        for pattern in self.patterns() {
            writeln!(out, "{}", pattern)?;
        }
        Ok(())
    }
}

/// Compiled exclusion filter
#[derive(Debug)]
pub struct ExclusionMatcher {
    inner: Gitignore,
}

impl ExclusionMatcher {
    /// Check a path relative to the matcher root
    ///
    /// A path is excluded if it or any of its parents match.
    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        if relative.as_os_str().is_empty() {
            return false;
        }
        self.inner
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

fn anchored_pattern(source: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(source).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    let rel = relative.to_string_lossy().replace('\\', "/");
    Some(format!("/{}/", rel.trim_end_matches('/')))
}
