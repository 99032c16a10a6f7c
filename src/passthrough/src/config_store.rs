//! Persisted container configuration.
//!
//! The configuration is a flat directive file. Every capability fragment is
//! written as one contiguous block between a begin and an end marker line, so
//! it can be removed without touching directives written by anyone else:
//!
//! ```text
//! # passthrough:begin render-device
//! lxc.cgroup2.devices.allow: c 226:128 rwm
//! lxc.mount.entry: /dev/dri/renderD128 dev/dri/renderD128 none bind,optional,create=file
//! # passthrough:end render-device
//! ```
//!
//! All writes replace the whole file through temp file + fsync + rename, so a
//! crash never leaves half a fragment on disk.

use crate::error::StoreError;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MARKER_PREFIX: &str = "# passthrough:";

/// Begin/end marker pair identifying one capability's block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentMarker {
    capability: String,
}

impl FragmentMarker {
    pub fn new(capability: &str) -> Self {
        Self {
            capability: capability.to_string(),
        }
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn begin(&self) -> String {
        format!("{}begin {}", MARKER_PREFIX, self.capability)
    }

    pub fn end(&self) -> String {
        format!("{}end {}", MARKER_PREFIX, self.capability)
    }
}

/// Insert a marked block holding the lines of `lines` not already present.
///
/// Only the live configuration counts; `[section]` headers start snapshot
/// sections, which are never read or rewritten. Returns `None` when every line
/// is already live. The block goes right before the first section header, or
/// at the end of the file.
pub fn append_fragment(text: &str, marker: &FragmentMarker, lines: &[String]) -> Option<String> {
    let (live, sections) = split_live(text);
    let existing: HashSet<&str> = live.lines().map(str::trim_end).collect();
    let missing: Vec<&str> = lines
        .iter()
        .map(|l| l.trim_end())
        .filter(|l| !existing.contains(l))
        .collect();
    if missing.is_empty() {
        return None;
    }

    let mut block = String::new();
    block.push_str(&marker.begin());
    block.push('\n');
    for line in missing {
        block.push_str(line);
        block.push('\n');
    }
    block.push_str(&marker.end());
    block.push('\n');

    let mut out = String::with_capacity(text.len() + block.len() + 1);
    out.push_str(live);
    if !live.is_empty() && !live.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&block);
    out.push_str(sections);
    Some(out)
}

/// Remove every block delimited by `marker` from the live configuration.
///
/// Returns `None` when no live block is present. Snapshot sections are kept
/// byte for byte. Unbalanced markers are reported as
/// [`StoreError::MarkerAmbiguous`] rather than guessed at.
pub fn remove_fragment(text: &str, marker: &FragmentMarker) -> Result<Option<String>, StoreError> {
    let begin = marker.begin();
    let end = marker.end();
    let ambiguous = |reason: &str| StoreError::MarkerAmbiguous {
        capability: marker.capability().to_string(),
        reason: reason.to_string(),
    };

    let (live, sections) = split_live(text);
    let mut out = String::with_capacity(text.len());
    let mut inside = false;
    let mut removed = false;

    for line in live.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == begin {
            if inside {
                return Err(ambiguous("nested begin marker"));
            }
            inside = true;
            removed = true;
        } else if trimmed == end {
            if !inside {
                return Err(ambiguous("end marker without begin marker"));
            }
            inside = false;
        } else if !inside {
            out.push_str(line);
        }
    }

    if inside {
        return Err(ambiguous("begin marker without end marker"));
    }
    out.push_str(sections);
    Ok(removed.then_some(out))
}

/// Names of the capability blocks in the live configuration, in file order.
pub fn managed_fragments(text: &str) -> Vec<String> {
    let begin_prefix = format!("{}begin ", MARKER_PREFIX);
    split_live(text)
        .0
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix(begin_prefix.as_str()))
        .map(str::to_string)
        .collect()
}

/// Split into the live configuration and the trailing snapshot sections.
fn split_live(text: &str) -> (&str, &str) {
    text.split_at(section_start(text))
}

/// Byte offset of the first `[section]` header, or the end of `text`.
fn section_start(text: &str) -> usize {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with('[') {
            return offset;
        }
        offset += line.len();
    }
    text.len()
}

/// Reads and transactionally rewrites one container's configuration file.
#[derive(Debug, Clone)]
pub struct ContainerConfigStore {
    path: PathBuf,
}

impl ContainerConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full current configuration text.
    pub fn snapshot(&self) -> Result<String, StoreError> {
        fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(self.path.clone())
            } else {
                StoreError::io(&self.path, "read configuration", e)
            }
        })
    }

    /// Append a fragment; returns `false` when every line was already present.
    pub fn append(&self, marker: &FragmentMarker, lines: &[String]) -> Result<bool, StoreError> {
        let current = self.snapshot()?;
        match append_fragment(&current, marker, lines) {
            Some(updated) => {
                self.write_atomic(&updated)?;
                tracing::info!(
                    "[ConfigStore] Appended fragment '{}' to {:?}",
                    marker.capability(),
                    self.path
                );
                Ok(true)
            }
            None => {
                tracing::debug!(
                    "[ConfigStore] Fragment '{}' already present in {:?}",
                    marker.capability(),
                    self.path
                );
                Ok(false)
            }
        }
    }

    /// Remove a fragment's block; absent blocks are a no-op returning `false`.
    pub fn remove(&self, marker: &FragmentMarker) -> Result<bool, StoreError> {
        let current = self.snapshot()?;
        match remove_fragment(&current, marker)? {
            Some(updated) => {
                self.write_atomic(&updated)?;
                tracing::info!(
                    "[ConfigStore] Removed fragment '{}' from {:?}",
                    marker.capability(),
                    self.path
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Overwrite the configuration with an earlier snapshot.
    pub fn restore(&self, snapshot: &str) -> Result<(), StoreError> {
        self.write_atomic(snapshot)?;
        tracing::info!("[ConfigStore] Restored snapshot of {:?}", self.path);
        Ok(())
    }

    /// Capability blocks currently persisted.
    pub fn fragments(&self) -> Result<Vec<String>, StoreError> {
        Ok(managed_fragments(&self.snapshot()?))
    }

    fn write_atomic(&self, text: &str) -> Result<(), StoreError> {
        atomic_write(&self.path, text)
    }
}

/// Replace `path` with `text` through temp file + fsync + rename.
pub(crate) fn atomic_write(path: &Path, text: &str) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .map_err(|e| StoreError::io(&parent, "create temp file", e))?;
    tmp.write_all(text.as_bytes())
        .map_err(|e| StoreError::io(tmp.path(), "write temp file", e))?;
    tmp.flush()
        .map_err(|e| StoreError::io(tmp.path(), "flush temp file", e))?;

    // Keep the mode of the file being replaced.
    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file()
            .set_permissions(meta.permissions())
            .map_err(|e| StoreError::io(tmp.path(), "set temp file permissions", e))?;
    }

    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), "fsync temp file", e))?;
    tmp.persist(path)
        .map_err(|e| StoreError::io(path, "rename temp file", e.error))?;

    fs::File::open(&parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| StoreError::io(&parent, "fsync directory", e))?;
    Ok(())
}
