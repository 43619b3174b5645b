// Playlist bundle: the sequenced audio files plus a plain-text explanation,
// packed into a zip archive that waits in the export dir until downloaded.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::scoring::Scorer;
use super::sequencer::{sequence, Playlist};
use crate::error::ExportError;
use crate::session::{Session, Track};

pub const BUNDLE_PREFIX: &str = "SortedPlaylist_";
pub const EXPLANATION_FILE: &str = "playlist_explanation.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedBundle {
    pub file_name: String,
    pub path: PathBuf,
}

/// Archive entry name for a track: `NN.<name>` with spaces turned into `_`
/// and square brackets dropped.
pub fn export_name(rank: usize, display_name: &str) -> String {
    let cleaned: String = display_name
        .chars()
        .filter(|c| !matches!(c, '[' | ']'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    format!("{:02}.{}", rank, cleaned)
}

/// Human-readable account of the ordering, one line per step.
pub fn explanation_text(playlist: &Playlist<'_>) -> String {
    let mut lines = Vec::with_capacity(playlist.len());
    if let Some(seed) = playlist.seed() {
        lines.push(format!("Playlist starts with track: {}", seed.display_name));
    }
    lines.extend(playlist.explanations());
    lines.join("\n")
}

/// Sequence the session and write its bundle into `export_dir`.
///
/// Every track must be analyzed. The session is left untouched, so exporting
/// again yields the same order.
pub fn export_bundle(
    session: &Session,
    scorer: &Scorer,
    export_dir: &Path,
) -> Result<ExportedBundle, ExportError> {
    if !session.all_analyzed() {
        return Err(ExportError::NotAnalyzed);
    }
    let playlist = sequence(session.tracks(), scorer)?;

    std::fs::create_dir_all(export_dir)?;
    let file_name = bundle_file_name();
    let path = export_dir.join(&file_name);

    if let Err(e) = write_archive(session, &playlist, &path) {
        let _ = std::fs::remove_file(&path);
        return Err(e);
    }

    info!(
        session = %session.id(),
        tracks = playlist.len(),
        bundle = %file_name,
        "Playlist exported"
    );
    Ok(ExportedBundle { file_name, path })
}

fn write_archive(
    session: &Session,
    playlist: &Playlist<'_>,
    path: &Path,
) -> Result<(), ExportError> {
    let mut zip = ZipWriter::new(File::create(path)?);
    // Audio is already compressed
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in playlist.entries() {
        let source = source_path(session, entry.track)?;
        zip.start_file(export_name(entry.rank, &entry.track.display_name), stored)?;
        let mut file = File::open(&source)?;
        io::copy(&mut file, &mut zip)?;
    }

    zip.start_file(EXPLANATION_FILE, deflated)?;
    zip.write_all(explanation_text(playlist).as_bytes())?;
    zip.finish()?;
    Ok(())
}

fn source_path(session: &Session, track: &Track) -> Result<PathBuf, ExportError> {
    let path = session.track_path(track);
    if path.is_file() {
        Ok(path)
    } else {
        Err(ExportError::MissingSource(path))
    }
}

fn bundle_file_name() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8).map(|_| format!("{:02x}", rng.gen::<u8>())).collect();
    format!("{}{}.zip", BUNDLE_PREFIX, suffix)
}

/// Whether `name` could be a bundle produced by [`export_bundle`]. Rejects
/// anything that could resolve outside the export dir.
pub fn is_bundle_name(name: &str) -> bool {
    !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && name.starts_with(BUNDLE_PREFIX)
        && name.ends_with(".zip")
}

/// Read a bundle and delete it. Each bundle can be downloaded once.
pub fn take_bundle(export_dir: &Path, name: &str) -> Result<Vec<u8>, ExportError> {
    if !is_bundle_name(name) {
        return Err(ExportError::BundleNotFound(name.to_string()));
    }
    let path = export_dir.join(name);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ExportError::BundleNotFound(name.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    std::fs::remove_file(&path)?;
    Ok(bytes)
}
