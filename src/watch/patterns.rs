// src/watch/patterns.rs

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};

use super::path_utils::{relative_str, resolve_path, to_slash};

/// Folders skipped while watching unless an include pattern names them.
pub const DEFAULT_IGNORED_FOLDERS: &[&str] = &[
    "node_modules",
    "build",
    "dist",
    "out",
    "target",
    "venv",
    "env",
    "tests",
    "android",
    "ios",
    "bundle",
    "vendor",
    "tmp",
    "public",
    "site",
    "docs",
    "uploads",
    "coverage",
    "pkg",
    "bin",
    "packages",
    "Thumbs.db",
    "cdk.out",
    ".git",
    ".svn",
    ".hg",
    ".idea",
    ".vscode",
    ".vs",
    ".gradle",
    ".pytest_cache",
    "*.egg-info",
    ".venv",
    ".next",
    ".nuxt",
    ".bundle",
    ".cache",
    ".pnp",
    ".turbo",
    ".github",
    ".husky",
    ".jenkins",
    ".docker",
    ".cpcache",
    ".shadow-cljs",
    ".expo",
    ".cargo",
    ".serverless",
    ".vercel",
    ".terraform",
    ".cache-loader",
    ".astro",
    ".ipynb_checkpoints",
    ".settings",
    ".config",
    ".yarn",
    ".npm",
    ".nx",
    ".DS_Store",
    "__pycache__",
    "__tests__",
    "__snapshots__",
    "__mocks__",
    "__generated__",
];

/// Normalized (absolute, `/`-separated) include/exclude globs of a node.
///
/// A pattern ending in `/` names a directory and matches its direct
/// children; any other pattern matches paths directly and, when it names a
/// directory, its direct children too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchPatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl WatchPatterns {
    pub fn has_includes(&self) -> bool {
        !self.include.is_empty()
    }

    pub fn extend(&mut self, other: &WatchPatterns) {
        self.include.extend(other.include.iter().cloned());
        self.exclude.extend(other.exclude.iter().cloned());
    }
}

/// Editor swap/temp files never trigger a restart.
pub fn is_temp_file(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    (name.starts_with('.') && name.ends_with(".swp"))
        || (name.starts_with('~') && name.ends_with(".tmp"))
        || name.ends_with(".tmp")
}

/// Append `suffix` to `text`, reusing any prefix of `suffix` that `text`
/// already ends with: `ensure_suffix("src/", "/*") == "src/*"`.
pub fn ensure_suffix(text: &str, suffix: &str) -> String {
    if text.ends_with(suffix) {
        return text.to_string();
    }
    for (pos, _) in suffix.char_indices().skip(1) {
        if text.ends_with(&suffix[..pos]) {
            return format!("{text}{}", &suffix[pos..]);
        }
    }
    format!("{text}{suffix}")
}

/// Turn a user glob into an absolute, `/`-separated pattern relative to
/// `parent`. `.`, `..`, `*` and patterns ending in `/` or `/*` become
/// directory patterns (trailing `/`).
pub fn normalize_pattern(pattern: &str, parent: &Path) -> String {
    let trailing_slash = pattern.ends_with('/') || pattern.ends_with('\\');
    let resolved = to_slash(&resolve_path(Path::new(pattern), parent));

    if trailing_slash {
        return ensure_suffix(&resolved, "/");
    }

    let names_dir = |suffix: &str| {
        pattern == suffix
            || pattern.ends_with(&format!("/{suffix}"))
            || pattern.ends_with(&format!("\\{suffix}"))
    };

    if names_dir(".") || names_dir("..") {
        return ensure_suffix(&resolved, "/");
    }

    if names_dir("*") {
        return match resolved.strip_suffix('*') {
            Some(dir) if dir.ends_with('/') => dir.to_string(),
            _ => ensure_suffix(&resolved, "/"),
        };
    }

    resolved
}

/// Longest leading run of path segments without glob syntax.
pub fn base_dir(pattern: &str) -> PathBuf {
    let mut literal: Vec<&str> = Vec::new();
    for segment in pattern.split('/') {
        if segment.contains(['*', '?', '[', '{']) {
            break;
        }
        literal.push(segment);
    }

    let joined = literal.join("/");
    if joined.is_empty() && pattern.starts_with('/') {
        return PathBuf::from("/");
    }
    PathBuf::from(joined)
}

fn compile(pattern: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern: {pattern}"))?;
    Ok(glob.compile_matcher())
}

#[derive(Clone)]
struct PatternMatcher {
    direct: Option<GlobMatcher>,
    contents: GlobMatcher,
}

impl PatternMatcher {
    fn new(pattern: &str) -> Result<Self> {
        let direct = if pattern.ends_with('/') {
            None
        } else {
            Some(compile(pattern)?)
        };
        Ok(Self {
            direct,
            contents: compile(&ensure_suffix(pattern, "/*"))?,
        })
    }

    fn is_match(&self, path: &str) -> bool {
        self.direct.as_ref().is_some_and(|m| m.is_match(path)) || self.contents.is_match(path)
    }
}

/// Compiled form of [`WatchPatterns`] used to filter file events.
#[derive(Clone)]
pub struct WatchMatcher {
    include: Vec<PatternMatcher>,
    exclude: Vec<PatternMatcher>,
    ignored: Vec<GlobMatcher>,
    roots: Vec<PathBuf>,
}

impl fmt::Debug for WatchMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchMatcher")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

impl WatchMatcher {
    pub fn new(patterns: &WatchPatterns) -> Result<Self> {
        let include = patterns
            .include
            .iter()
            .map(|p| PatternMatcher::new(p))
            .collect::<Result<Vec<_>>>()?;
        let exclude = patterns
            .exclude
            .iter()
            .map(|p| PatternMatcher::new(p))
            .collect::<Result<Vec<_>>>()?;
        let ignored = ignored_folders(&patterns.include)
            .into_iter()
            .map(compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            include,
            exclude,
            ignored,
            roots: watch_roots(&patterns.include),
        })
    }

    /// Existing directories to watch recursively.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Whether a change at `path` should restart the command.
    pub fn should_track(&self, path: &Path) -> bool {
        if is_temp_file(path) || self.in_ignored_folder(path) {
            return false;
        }

        let path = to_slash(path);
        if self.exclude.iter().any(|m| m.is_match(&path)) {
            return false;
        }
        self.include.iter().any(|m| m.is_match(&path))
    }

    fn in_ignored_folder(&self, path: &Path) -> bool {
        let Some(rel) = self.roots.iter().find_map(|root| relative_str(root, path)) else {
            return false;
        };
        let mut dirs: Vec<&str> = rel.split('/').collect();
        dirs.pop();
        dirs.iter()
            .any(|dir| self.ignored.iter().any(|m| m.is_match(dir)))
    }
}

/// Default-ignored folders minus the ones an include pattern names.
fn ignored_folders(include: &[String]) -> Vec<&'static str> {
    DEFAULT_IGNORED_FOLDERS
        .iter()
        .copied()
        .filter(|folder| {
            !include.iter().any(|pattern| {
                pattern.contains(&format!("/{folder}/"))
                    || pattern.ends_with(&format!("/{folder}"))
                    || pattern.starts_with(&format!("{folder}/"))
                    || pattern == folder
            })
        })
        .collect()
}

fn watch_roots(include: &[String]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for pattern in include {
        let mut base = base_dir(pattern);
        if base.is_file() {
            base = base.parent().map(Path::to_path_buf).unwrap_or(base);
        }
        if base.is_dir() && !roots.contains(&base) {
            roots.push(base);
        }
    }

    // Recursive watches make nested roots redundant.
    let all = roots.clone();
    roots.retain(|root| {
        !all
            .iter()
            .any(|other| other != root && root.starts_with(other))
    });
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_suffix_reuses_partial_suffix() {
        assert_eq!(ensure_suffix("src/", "/*"), "src/*");
        assert_eq!(ensure_suffix("src", "/*"), "src/*");
        assert_eq!(ensure_suffix("src/*", "/*"), "src/*");
    }

    #[test]
    fn temp_files_are_recognized() {
        assert!(is_temp_file(Path::new("/a/.main.rs.swp")));
        assert!(is_temp_file(Path::new("/a/~lock.tmp")));
        assert!(is_temp_file(Path::new("/a/file.tmp")));
        assert!(!is_temp_file(Path::new("/a/main.rs")));
    }

    #[cfg(unix)]
    #[test]
    fn normalize_handles_directory_forms() {
        let parent = Path::new("/repo/web");
        assert_eq!(normalize_pattern("src/**/*.rs", parent), "/repo/web/src/**/*.rs");
        assert_eq!(normalize_pattern("src/", parent), "/repo/web/src/");
        assert_eq!(normalize_pattern(".", parent), "/repo/web/");
        assert_eq!(normalize_pattern("../api", parent), "/repo/api");
        assert_eq!(normalize_pattern("src/*", parent), "/repo/web/src/");
        assert_eq!(normalize_pattern("*", parent), "/repo/web/");
    }

    #[test]
    fn base_dir_stops_at_glob_syntax() {
        assert_eq!(base_dir("/repo/src/**/*.rs"), PathBuf::from("/repo/src"));
        assert_eq!(base_dir("/repo/src/"), PathBuf::from("/repo/src/"));
        assert_eq!(base_dir("/*.rs"), PathBuf::from("/"));
    }

    #[test]
    fn star_does_not_cross_directories() {
        let matcher = WatchMatcher::new(&WatchPatterns {
            include: vec!["/repo/src/*.rs".into()],
            exclude: vec![],
        })
        .unwrap();
        assert!(matcher.should_track(Path::new("/repo/src/main.rs")));
        assert!(!matcher.should_track(Path::new("/repo/src/nested/mod.rs")));
    }

    #[test]
    fn exclude_wins_and_directories_match_children() {
        let matcher = WatchMatcher::new(&WatchPatterns {
            include: vec!["/repo/src/".into()],
            exclude: vec!["/repo/src/gen".into()],
        })
        .unwrap();
        assert!(matcher.should_track(Path::new("/repo/src/lib.rs")));
        assert!(!matcher.should_track(Path::new("/repo/src/gen/out.rs")));
        assert!(!matcher.should_track(Path::new("/repo/src/gen")));
    }

    #[test]
    fn explicitly_included_folders_are_not_ignored() {
        let folders = ignored_folders(&["/repo/build/**".to_string()]);
        assert!(!folders.contains(&"build"));
        assert!(folders.contains(&"node_modules"));
    }
}
