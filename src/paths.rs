//! Path pattern resolution
//!
//! Turns user-supplied path patterns into an absolute, deduplicated
//! file list. `~/` maps to the home directory, other patterns go
//! through environment expansion, relative results are anchored at the
//! working directory, and each pattern is expanded as a filesystem
//! glob. Patterns matching nothing contribute no entries.

use crate::expand::expand_with;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolve path patterns against the process environment.
pub fn resolve(patterns: &[String]) -> Vec<PathBuf> {
    let home = dirs::home_dir();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    resolve_with(patterns, home.as_deref(), &cwd, &|name| {
        std::env::var(name).ok()
    })
}

/// Resolve path patterns with explicit home, working directory and
/// environment lookup.
pub fn resolve_with(
    patterns: &[String],
    home: Option<&Path>,
    cwd: &Path,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for pattern in patterns {
        let expanded = if let Some(rest) = pattern.strip_prefix("~/") {
            match home {
                Some(h) => h.join(rest).to_string_lossy().into_owned(),
                None => {
                    warn!(pattern = %pattern, "No home directory, skipping pattern");
                    continue;
                }
            }
        } else {
            expand_with(pattern, lookup)
        };

        let anchored = if Path::new(&expanded).is_absolute() {
            expanded
        } else {
            cwd.join(&expanded).to_string_lossy().into_owned()
        };

        let entries = match glob::glob(&anchored) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(pattern = %anchored, error = %e, "Skipping invalid glob pattern");
                continue;
            }
        };

        let mut matched = 0usize;
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => {
                    matched += 1;
                    if seen.insert(path.clone()) {
                        files.push(path);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Unreadable path during glob expansion"),
            }
        }
        debug!(pattern = %anchored, matched, "Expanded path pattern");
    }

    files
}
