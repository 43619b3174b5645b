// Sessions: one user's uploaded batch, its scratch storage, and per-track status.
//
// Invariant: every Track in a session's list has its file in the session's
// scratch directory. Replacing an upload removes the old files with the list.

pub mod analysis;
pub mod store;
pub mod upload;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use tempfile::TempDir;
use tracing::debug;

use crate::audio::FeatureRecord;
use upload::UploadName;

pub use store::{MemorySessionStore, SessionHandle, SessionStore};

/// Opaque random session identifier (128-bit, hex-encoded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self((0..16).map(|_| format!("{:02x}", rng.gen::<u8>())).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Analysis state of a track. Leaves `Pending` exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackStatus {
    Pending,
    Analyzed(FeatureRecord),
    Failed(String),
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackStatus::Pending => f.write_str("pending"),
            TrackStatus::Analyzed(_) => f.write_str("analyzed"),
            TrackStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Stable, path-safe file name inside the session scratch dir
    pub handle: String,
    /// Last segment of the name the client uploaded
    pub display_name: String,
    pub status: TrackStatus,
}

impl Track {
    pub fn new(name: UploadName) -> Self {
        Self {
            handle: name.handle,
            display_name: name.display_name,
            status: TrackStatus::Pending,
        }
    }

    /// Convenience for building already-analyzed tracks (tests, offline tools).
    pub fn analyzed(handle: &str, features: FeatureRecord) -> Self {
        Self {
            handle: handle.to_string(),
            display_name: handle.to_string(),
            status: TrackStatus::Analyzed(features),
        }
    }

    pub fn features(&self) -> Option<&FeatureRecord> {
        match &self.status {
            TrackStatus::Analyzed(features) => Some(features),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, TrackStatus::Pending)
    }

    /// Record the analysis outcome. Ignored (returns false) unless pending.
    pub fn complete(&mut self, outcome: Result<FeatureRecord, String>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = match outcome {
            Ok(features) => TrackStatus::Analyzed(features),
            Err(reason) => TrackStatus::Failed(reason),
        };
        true
    }
}

pub struct Session {
    id: SessionId,
    tracks: Vec<Track>,
    scratch: TempDir,
    last_used: Instant,
}

impl Session {
    /// New empty session with a private scratch dir under `scratch_root`.
    pub fn new(id: SessionId, scratch_root: &Path) -> io::Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("mixsort-")
            .tempdir_in(scratch_root)?;
        debug!(session = %id, dir = %scratch.path().display(), "Session created");
        Ok(Self {
            id,
            tracks: Vec::new(),
            scratch,
            last_used: Instant::now(),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Mark the session as in use; expiry counts idle time from here.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Tracks in upload order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    pub fn track_path(&self, track: &Track) -> PathBuf {
        self.scratch.path().join(&track.handle)
    }

    pub fn all_analyzed(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| t.features().is_some())
    }

    /// Drop the current batch: forget every track and delete its file.
    pub fn clear_tracks(&mut self) -> io::Result<()> {
        for track in self.tracks.drain(..) {
            let path = self.scratch.path().join(&track.handle);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Store uploaded bytes and append (or replace) the track.
    pub async fn add_track(&mut self, name: UploadName, bytes: &[u8]) -> io::Result<&Track> {
        tokio::fs::write(self.scratch.path().join(&name.handle), bytes).await?;
        Ok(self.insert(name))
    }

    /// Copy a file from disk into scratch storage and append (or replace) the track.
    pub fn import_file(&mut self, name: UploadName, source: &Path) -> io::Result<&Track> {
        std::fs::copy(source, self.scratch.path().join(&name.handle))?;
        Ok(self.insert(name))
    }

    // A re-upload of the same name replaces the earlier entry in place
    fn insert(&mut self, name: UploadName) -> &Track {
        let track = Track::new(name);
        let index = match self.tracks.iter().position(|t| t.handle == track.handle) {
            Some(i) => {
                self.tracks[i] = track;
                i
            }
            None => {
                self.tracks.push(track);
                self.tracks.len() - 1
            }
        };
        &self.tracks[index]
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .field("scratch", &self.scratch.path())
            .finish()
    }
}
