//! Core data model: §3 of the specification.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::DownloadError;

/// Stable identifier for a show, as assigned by the catalog site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShowRef {
    pub session: String,
    pub title: String,
}

/// One episode of a show.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EpisodeRef {
    pub show: ShowRef,
    pub episode_number: u32,
    pub session: String,
}

/// Desired quality/audio selection for a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quality {
    Best,
    Target(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChoice {
    pub quality: Quality,
    pub audio: String,
}

/// One candidate `<button>` scraped from the play page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCandidate {
    pub resolution: u32,
    pub audio: String,
    pub url: String,
    pub av1: bool,
}

/// Output of the playlist parser: an ordered segment plan.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub segments: Vec<String>,
    pub media_sequence: u64,
    pub key_uri: String,
    pub duration_seconds: f64,
}

impl SegmentPlan {
    /// Big-endian 16-byte IV for the segment at `index` (0-based, original playlist order).
    pub fn iv_for(&self, index: usize) -> [u8; 16] {
        let value = self.media_sequence.wrapping_add(index as u64);
        let mut iv = [0u8; 16];
        iv[8..16].copy_from_slice(&value.to_be_bytes());
        iv
    }
}

/// Per-episode working directory.
#[derive(Debug, Clone)]
pub struct EpisodeWorkspace {
    pub root: PathBuf,
}

impl EpisodeWorkspace {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.root.join("playlist.m3u8")
    }

    pub fn file_list_path(&self) -> PathBuf {
        self.root.join("file.list")
    }

    pub fn segment_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }
}

/// Progress update emitted by the segment pipeline and muxer.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub bytes_since_start: u64,
    pub elapsed: std::time::Duration,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.done as f64 / self.total as f64 * 100.0).min(100.0)
    }

    pub fn mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.bytes_since_start as f64 / 1_000_000.0) / secs
    }
}

/// Job lifecycle state, tracked by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Resolving,
    Downloading,
    Muxing,
    Done,
    Failed,
    Cancelled,
}

/// Callback invoked whenever a job transitions to a new [`JobState`].
pub type StateSink = Arc<dyn Fn(&EpisodeRef, JobState) + Send + Sync>;

/// Terminal record of one finished job.
#[derive(Debug)]
pub struct JobOutcome {
    pub episode: EpisodeRef,
    pub state: JobState,
    pub error: Option<DownloadError>,
}
