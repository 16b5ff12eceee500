use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::error::{RagError, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Check that `pattern` is a usable include/exclude rule.
///
/// # Errors
///
/// Returns a configuration error for empty patterns, malformed globs, and
/// `**` anywhere except a leading `**/` or a trailing `/**`.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(RagError::Config("empty pattern".into()));
    }
    Pattern::new(pattern)
        .map_err(|e| RagError::Config(format!("invalid glob pattern '{pattern}': {e}")))?;
    let inner = pattern.strip_prefix("**/").unwrap_or(pattern);
    let inner = inner.strip_suffix("/**").unwrap_or(inner);
    if inner.contains("**") {
        return Err(RagError::Config(format!(
            "pattern '{pattern}': '**' is only supported as a leading '**/' or trailing '/**'"
        )));
    }
    Ok(())
}

#[derive(Debug)]
struct GlobRule {
    raw: String,
    full: Pattern,
    /// For `**/x` rules: `x`, matched against the file name alone.
    basename: Option<Pattern>,
}

impl GlobRule {
    fn matches(&self, rel: &str) -> bool {
        if self.raw == "*" || self.full.matches_with(rel, MATCH_OPTIONS) {
            return true;
        }
        self.basename.as_ref().is_some_and(|p| {
            let name = rel.rsplit('/').next().unwrap_or(rel);
            p.matches_with(name, MATCH_OPTIONS)
        })
    }
}

/// Patterns sorted into the cheap lookups they reduce to.
#[derive(Debug, Default)]
struct RuleSet {
    dirs: HashSet<String>,
    exts: HashSet<String>,
    globs: Vec<GlobRule>,
}

impl RuleSet {
    fn build(patterns: &[String], kind: &str) -> Result<Self> {
        let mut rules = Self::default();
        for pattern in patterns {
            validate_pattern(pattern)
                .map_err(|e| RagError::Config(format!("invalid {kind} pattern: {e}")))?;

            if pattern.starts_with("**/") && pattern.ends_with("/**") {
                rules
                    .dirs
                    .insert(pattern.trim_matches(|c| c == '*' || c == '/').to_owned());
            } else if let Some(ext) = pattern.strip_prefix('*')
                && ext.starts_with('.')
                && !ext.contains(['*', '?', '[', '/'])
            {
                rules.exts.insert(ext.to_owned());
            } else if pattern.starts_with('.') && !pattern.contains('/') && !pattern.contains('*') {
                rules.exts.insert(pattern.clone());
            } else if !pattern.contains(['*', '?', '[']) {
                rules.dirs.insert(pattern.trim_matches('/').to_owned());
            } else {
                let full = Pattern::new(pattern)
                    .map_err(|e| RagError::Config(format!("invalid {kind} pattern '{pattern}': {e}")))?;
                let basename = pattern
                    .strip_prefix("**/")
                    .and_then(|rest| Pattern::new(rest).ok());
                rules.globs.push(GlobRule {
                    raw: pattern.clone(),
                    full,
                    basename,
                });
            }
        }
        Ok(rules)
    }

    fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.exts.is_empty() && self.globs.is_empty()
    }

    fn matches(&self, rel: &str) -> bool {
        if let Some(ext) = extension(rel)
            && self.exts.contains(ext)
        {
            return true;
        }
        if !self.dirs.is_empty() {
            let padded = format!("/{rel}/");
            if self
                .dirs
                .iter()
                .any(|dir| padded.contains(&format!("/{dir}/")))
            {
                return true;
            }
        }
        self.globs.iter().any(|g| g.matches(rel))
    }
}

/// Final `.suffix` of the last path component, dot included.
fn extension(rel: &str) -> Option<&str> {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    name.rfind('.').map(|i| &name[i..]).filter(|e| e.len() > 1)
}

/// Include/exclude rules evaluated against paths relative to a root.
///
/// `**/dir/**` and bare names match whole path components, `*.ext` and
/// `.ext` match extensions, anything else is a glob over the relative path.
/// Exclusion wins over inclusion; no include rules means include everything.
#[derive(Debug)]
pub struct PatternFilter {
    base: PathBuf,
    include: RuleSet,
    exclude: RuleSet,
}

impl PatternFilter {
    /// # Errors
    ///
    /// Returns a configuration error if any pattern is invalid.
    pub fn new(base: impl Into<PathBuf>, include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            base: base.into(),
            include: RuleSet::build(include, "include")?,
            exclude: RuleSet::build(exclude, "exclude")?,
        })
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.base).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }

    #[must_use]
    pub fn should_include(&self, path: &Path) -> bool {
        self.include.is_empty() || self.include.matches(&self.relative(path))
    }

    #[must_use]
    pub fn should_exclude(&self, path: &Path) -> bool {
        self.exclude.matches(&self.relative(path))
    }

    /// Not excluded and included.
    #[must_use]
    pub fn allows(&self, path: &Path) -> bool {
        !self.should_exclude(path) && self.should_include(path)
    }
}
