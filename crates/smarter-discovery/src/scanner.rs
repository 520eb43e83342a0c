//! Device inventory scanning

use regex::Regex;
use smarter_core::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Lazy walk over the entry names below a root directory
///
/// Yields paths relative to the root, nested components joined with `/`.
/// Directories are yielded as well as their children. Symbolic links are
/// reported but never followed. Unreadable sub-directories and names that
/// are not valid UTF-8 are skipped.
#[derive(Debug)]
pub struct DeviceScan {
    root: PathBuf,
    entries: Option<walkdir::IntoIter>,
}

impl Iterator for DeviceScan {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.entries.as_mut()?;

        for entry in entries.by_ref() {
            match entry {
                Ok(entry) => {
                    let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                        continue;
                    };
                    match join_components(relative) {
                        Some(name) => return Some(name),
                        None => debug!(
                            path = %entry.path().display(),
                            "Skipping entry with a non UTF-8 name"
                        ),
                    }
                }
                Err(e) => {
                    debug!(root = %self.root.display(), error = %e, "Skipping unreadable entry");
                }
            }
        }

        None
    }
}

fn join_components(path: &Path) -> Option<String> {
    path.components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

/// Enumerate entry names below `root`, descending at most `max_depth`
/// levels into sub-directories (`0` lists only the root's own entries)
///
/// Fails with [`Error::Scan`] when the root cannot be opened. A root that
/// exists but is not a directory yields nothing.
pub fn scan_names(root: impl AsRef<Path>, max_depth: usize) -> Result<DeviceScan> {
    let root = root.as_ref().to_path_buf();

    let metadata = fs::metadata(&root).map_err(|source| Error::Scan {
        path: root.clone(),
        source,
    })?;

    if !metadata.is_dir() {
        debug!(root = %root.display(), "Scan root is not a directory");
        return Ok(DeviceScan {
            root,
            entries: None,
        });
    }

    // Surface permission problems on the root itself instead of an empty walk
    fs::read_dir(&root).map_err(|source| Error::Scan {
        path: root.clone(),
        source,
    })?;

    let entries = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(max_depth.saturating_add(1))
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    Ok(DeviceScan {
        root,
        entries: Some(entries),
    })
}

/// Select the names matching `pattern` (unanchored regular-expression search)
pub fn find_matching<I, S>(names: I, pattern: &str) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let re = Regex::new(pattern).map_err(|source| Error::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    Ok(names
        .into_iter()
        .filter(|name| re.is_match(name.as_ref()))
        .map(|name| name.as_ref().to_string())
        .collect())
}
