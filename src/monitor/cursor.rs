//! Tail cursor and its optional on-disk sidecar.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest log position already classified; `None` before the first
/// successful tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailCursor {
    last: Option<usize>,
}

impl TailCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(last: usize) -> Self {
        Self { last: Some(last) }
    }

    pub fn last(&self) -> Option<usize> {
        self.last
    }

    /// First position not yet classified.
    pub fn next_position(&self) -> usize {
        self.last.map_or(0, |l| l + 1)
    }

    /// Unclassified positions for a log holding `store_len` records.
    pub fn pending(&self, store_len: usize) -> Option<RangeInclusive<usize>> {
        let start = self.next_position();
        (start < store_len).then(|| start..=store_len - 1)
    }

    pub fn advance_to(&mut self, position: usize) {
        self.last = Some(position);
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorState {
    last_position: Option<usize>,
    updated_at: DateTime<Utc>,
}

/// JSON sidecar holding the cursor across restarts.
#[derive(Debug, Clone)]
pub struct CursorFile {
    path: PathBuf,
}

impl CursorFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no sidecar has been written yet.
    pub fn load(&self) -> Result<Option<TailCursor>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read cursor file: {}", self.path.display()))
            }
        };
        let state: CursorState = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse cursor file: {}", self.path.display()))?;
        Ok(Some(TailCursor {
            last: state.last_position,
        }))
    }

    /// Write via a temp file and rename so a crash never leaves a torn file.
    pub fn save(&self, cursor: &TailCursor) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let state = CursorState {
            last_position: cursor.last,
            updated_at: Utc::now(),
        };
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&state)?)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
