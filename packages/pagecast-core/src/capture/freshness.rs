//! Session output freshness probe.
//!
//! A pure function of the session directory: the age of the newest media
//! segment tells the watchdog whether the encoder is still producing
//! output. When no segments exist yet the playlist mtime is the fallback
//! signal, so a session that wrote a playlist but no segments is judged by
//! how long ago that happened.

use std::path::{Path, PathBuf};

use crate::protocol_constants::{MASTER_PLAYLIST_NAME, SEGMENT_EXTENSION};
use crate::utils::now_millis;

/// Outcome of one freshness evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessReport {
    /// Age of the newest segment in ms. `None` when no segment exists.
    pub last_segment_age_ms: Option<u64>,
    /// Whether the output is considered stale.
    pub stale: bool,
}

/// Inspects recency of a session's playlist and segments.
pub struct SessionFreshness {
    dir: PathBuf,
    stale_after_ms: u64,
}

impl SessionFreshness {
    /// Creates a probe over `dir` with the given staleness threshold.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, stale_after_ms: u64) -> Self {
        Self {
            dir: dir.into(),
            stale_after_ms,
        }
    }

    /// Evaluates the directory.
    ///
    /// - No playlist: unknown age, stale.
    /// - Playlist but no segments: unknown age, staleness from playlist mtime.
    /// - Segments: age of the newest one.
    #[must_use]
    pub fn evaluate(&self) -> FreshnessReport {
        let now_ms = now_millis();
        let master = self.dir.join(MASTER_PLAYLIST_NAME);
        let Some(master_ms) = mtime_millis(&master) else {
            return FreshnessReport {
                last_segment_age_ms: None,
                stale: true,
            };
        };

        match self.newest_segment_millis() {
            Some(segment_ms) => {
                let age = now_ms.saturating_sub(segment_ms);
                FreshnessReport {
                    last_segment_age_ms: Some(age),
                    stale: age > self.stale_after_ms,
                }
            }
            None => {
                let age = now_ms.saturating_sub(master_ms);
                FreshnessReport {
                    last_segment_age_ms: None,
                    stale: age > self.stale_after_ms,
                }
            }
        }
    }

    fn newest_segment_millis(&self) -> Option<u64> {
        let entries = std::fs::read_dir(&self.dir).ok()?;
        entries
            .flatten()
            .filter(|e| {
                e.path()
                    .extension()
                    .is_some_and(|ext| ext == SEGMENT_EXTENSION)
            })
            .filter_map(|e| mtime_millis(&e.path()))
            .max()
    }
}

/// Modification time of a path as unix millis, if it exists.
fn mtime_millis(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}
