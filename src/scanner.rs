// Directory scanner: the batch flow without HTTP.
// Walks a folder, feeds supported files through a session, writes the bundle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{ExportError, SessionError};
use crate::playlist::export::{export_bundle, ExportedBundle};
use crate::playlist::Scorer;
use crate::session::analysis::{analyze_session, ReportOutcome, TrackReport};
use crate::session::upload::{self, UploadName};
use crate::session::{Session, SessionId};

#[derive(Debug, Error)]
pub enum SortError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{failed} of {total} tracks could not be analyzed")]
    AnalysisFailed { failed: usize, total: usize },

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result of sorting a directory
#[derive(Debug)]
pub struct SortResult {
    pub reports: Vec<TrackReport>,
    pub bundle: ExportedBundle,
}

pub struct Scanner;

impl Scanner {
    /// Supported audio files under `path`, in file-name order, named by their
    /// path relative to `path`.
    pub fn scan_directory(path: &Path) -> Vec<(UploadName, PathBuf)> {
        WalkDir::new(path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(path).ok()?;
                let name = upload::accept(&relative.to_string_lossy())?;
                Some((name, entry.path().to_path_buf()))
            })
            .collect()
    }

    /// Analyze and sequence every supported file under `dir`.
    ///
    /// The bundle lands at `out` when given, otherwise in the configured
    /// export dir. Any track that fails analysis aborts the export.
    pub async fn sort_directory(
        dir: &Path,
        out: Option<&Path>,
        config: &Config,
    ) -> Result<SortResult, SortError> {
        let files = Self::scan_directory(dir);
        if files.is_empty() {
            return Err(SessionError::NoSupportedFiles.into());
        }
        info!("Found {} audio files in {}", files.len(), dir.display());

        let mut session = Session::new(SessionId::generate(), &config.storage.scratch_root)
            .map_err(SessionError::from)?;
        for (name, source) in files {
            session.import_file(name, &source).map_err(SessionError::from)?;
        }

        let reports = analyze_session(&mut session, Arc::new(config.analysis.clone())).await?;
        let failed = reports
            .iter()
            .filter(|r| matches!(r.outcome, ReportOutcome::Error { .. }))
            .count();
        if failed > 0 {
            return Err(SortError::AnalysisFailed {
                failed,
                total: reports.len(),
            });
        }

        let scorer = Scorer::new(config.scoring);
        let export_dir = match out.and_then(Path::parent) {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            Some(_) => PathBuf::from("."),
            None => config.storage.export_dir.clone(),
        };
        let mut bundle = export_bundle(&session, &scorer, &export_dir)?;

        if let Some(out) = out {
            move_file(&bundle.path, out).map_err(|source| SortError::Output {
                path: out.to_path_buf(),
                source,
            })?;
            bundle.path = out.to_path_buf();
            bundle.file_name = out
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or(bundle.file_name);
        }

        Ok(SortResult { reports, bundle })
    }
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    if let Err(e) = std::fs::remove_file(from) {
        warn!("Failed to remove {}: {}", from.display(), e);
    }
    Ok(())
}
