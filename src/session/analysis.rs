// Batch analysis of a session's pending tracks.
//
// Workflow:
// 1. Collect every pending track and its scratch path
// 2. Decode + analyze each file on the blocking pool, at most
//    `AnalysisConfig::parallelism()` files at a time
// 3. Apply outcomes in upload order and build the per-file report
//
// A failure is confined to its own track; the batch always completes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use super::{Session, TrackStatus};
use crate::audio::{self, FeatureRecord};
use crate::audio::key::Key;
use crate::config::AnalysisConfig;
use crate::error::SessionError;

/// One line of the analysis report, keyed by the file's display name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackReport {
    pub file: String,
    #[serde(flatten)]
    pub outcome: ReportOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReportOutcome {
    Success { bpm: f64, key: Key, energy: f64 },
    Error { message: String },
}

impl TrackReport {
    fn from_status(file: &str, status: &TrackStatus) -> Option<Self> {
        let outcome = match status {
            TrackStatus::Pending => return None,
            TrackStatus::Analyzed(FeatureRecord { bpm, key, energy }) => ReportOutcome::Success {
                bpm: *bpm,
                key: *key,
                energy: *energy,
            },
            TrackStatus::Failed(message) => ReportOutcome::Error {
                message: message.clone(),
            },
        };
        Some(Self {
            file: file.to_string(),
            outcome,
        })
    }
}

/// Analyze every pending track of `session`.
///
/// Tracks that already left `Pending` keep their outcome and are reported
/// again as-is, so the report always covers the whole session in upload order.
pub async fn analyze_session(
    session: &mut Session,
    config: Arc<AnalysisConfig>,
) -> Result<Vec<TrackReport>, SessionError> {
    if session.tracks().is_empty() {
        return Err(SessionError::NoTracks);
    }

    let pending: Vec<(usize, String, PathBuf)> = session
        .tracks()
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_pending())
        .map(|(i, t)| (i, t.display_name.clone(), session.track_path(t)))
        .collect();

    info!(
        session = %session.id(),
        pending = pending.len(),
        total = session.tracks().len(),
        "Analyzing session"
    );

    let limit = config.parallelism();
    let analyze = move |path: &Path| {
        audio::analyze_file(path, &config).map_err(|e| e.to_string())
    };
    for (index, outcome) in run_bounded(pending, limit, analyze).await {
        if let Err(message) = &outcome {
            warn!("{}", message);
        }
        session.tracks_mut()[index].complete(outcome);
    }

    Ok(session
        .tracks()
        .iter()
        .filter_map(|t| TrackReport::from_status(&t.display_name, &t.status))
        .collect())
}

type Outcome = (usize, Result<FeatureRecord, String>);

/// Run `analyze` over `(index, name, path)` jobs on the blocking pool with at
/// most `limit` in flight. Outcomes come back sorted by index.
async fn run_bounded<F>(
    jobs: Vec<(usize, String, PathBuf)>,
    limit: usize,
    analyze: F,
) -> Vec<Outcome>
where
    F: Fn(&Path) -> Result<FeatureRecord, String> + Send + Sync + 'static,
{
    let analyze = Arc::new(analyze);
    let tasks = jobs.into_iter().map(|(index, name, path)| {
        let analyze = Arc::clone(&analyze);
        async move {
            let joined = tokio::task::spawn_blocking(move || analyze(&path)).await;
            let outcome = match joined {
                Ok(Ok(features)) => Ok(features),
                Ok(Err(e)) => Err(format!("Failed to process {}: {}", name, e)),
                Err(e) => Err(format!(
                    "Failed to process {}: analysis task aborted ({})",
                    name, e
                )),
            };
            (index, outcome)
        }
    });

    let mut outcomes: Vec<Outcome> = stream::iter(tasks)
        .buffer_unordered(limit.max(1))
        .collect()
        .await;
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::upload::accept;
    use crate::session::SessionId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn write_sine(path: &std::path::Path, freq: f32, seconds: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let n = (22050.0 * seconds) as usize;
        for i in 0..n {
            let s = (2.0 * std::f32::consts::PI * freq * i as f32 / 22050.0).sin() * 0.5;
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_empty_session_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut session = Session::new(SessionId::generate(), root.path()).unwrap();
        let result = analyze_session(&mut session, Arc::new(AnalysisConfig::default())).await;
        assert!(matches!(result, Err(SessionError::NoTracks)));
    }

    #[tokio::test]
    async fn test_bad_file_fails_alone() {
        let root = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let wav = source.path().join("tone.wav");
        write_sine(&wav, 440.0, 2.0);

        let mut session = Session::new(SessionId::generate(), root.path()).unwrap();
        session
            .add_track(accept("broken.mp3").unwrap(), b"not audio at all")
            .await
            .unwrap();
        session.import_file(accept("tone.wav").unwrap(), &wav).unwrap();

        let report = analyze_session(&mut session, Arc::new(AnalysisConfig::default()))
            .await
            .unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(report[0].file, "broken.mp3");
        match &report[0].outcome {
            ReportOutcome::Error { message } => {
                assert!(message.starts_with("Failed to process broken.mp3"))
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(report[1].file, "tone.wav");
        assert!(matches!(report[1].outcome, ReportOutcome::Success { .. }));

        assert!(matches!(session.tracks()[0].status, TrackStatus::Failed(_)));
        assert!(session.tracks()[1].features().is_some());
    }

    #[tokio::test]
    async fn test_rerun_keeps_existing_outcomes() {
        let root = tempfile::tempdir().unwrap();
        let mut session = Session::new(SessionId::generate(), root.path()).unwrap();
        session.add_track(accept("broken.wav").unwrap(), b"junk").await.unwrap();

        let config = Arc::new(AnalysisConfig::default());
        let first = analyze_session(&mut session, Arc::clone(&config)).await.unwrap();
        let second = analyze_session(&mut session, config).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_concurrency_is_capped() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<_> = (0..8)
            .map(|i| (i, format!("t{}.wav", i), PathBuf::from(format!("t{}.wav", i))))
            .collect();

        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let outcomes = run_bounded(jobs, 2, move |path: &Path| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            r.fetch_sub(1, Ordering::SeqCst);
            if path.ends_with("t3.wav") {
                return Err("unreadable".to_string());
            }
            Ok(FeatureRecord {
                bpm: 120.0,
                key: Key::Unknown,
                energy: 0.5,
            })
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        let indices: Vec<usize> = outcomes.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        assert_eq!(
            outcomes[3].1,
            Err("Failed to process t3.wav: unreadable".to_string())
        );
        assert!(outcomes[4].1.is_ok());
    }

    #[test]
    fn test_report_json_shape() {
        let ok = TrackReport {
            file: "a.mp3".to_string(),
            outcome: ReportOutcome::Success {
                bpm: 128.0,
                key: "8A".parse().unwrap(),
                energy: 0.512,
            },
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "file": "a.mp3",
                "status": "success",
                "bpm": 128.0,
                "key": "8A",
                "energy": 0.512
            })
        );

        let err = TrackReport {
            file: "b.mp3".to_string(),
            outcome: ReportOutcome::Error {
                message: "boom".to_string(),
            },
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"file": "b.mp3", "status": "error", "message": "boom"})
        );
    }
}
