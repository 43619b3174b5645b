// Greedy nearest-neighbour ordering.
//
// The first uploaded track seeds the playlist; every following slot goes to
// the remaining track with the lowest transition cost from the last placed
// one. Equal costs resolve to the lowest upload index.

use std::fmt;

use tracing::debug;

use super::scoring::Scorer;
use crate::audio::FeatureRecord;
use crate::error::SequenceError;
use crate::session::Track;

/// Why a track follows its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub bpm_diff: f64,
    pub key_match: bool,
    pub energy_diff: f64,
    pub score: f64,
}

impl Transition {
    fn between(from: (&Track, &FeatureRecord), to: (&Track, &FeatureRecord), score: f64) -> Self {
        Self {
            from: from.0.display_name.clone(),
            to: to.0.display_name.clone(),
            bpm_diff: (from.1.bpm - to.1.bpm).abs(),
            key_match: from.1.key == to.1.key,
            energy_diff: (from.1.energy - to.1.energy).abs(),
            score,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} selected after {} (BPM diff: {:.2}, Key {}, Energy diff: {:.3})",
            self.to,
            self.from,
            self.bpm_diff,
            if self.key_match { "match" } else { "mismatch" },
            self.energy_diff
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry<'a> {
    pub track: &'a Track,
    /// 1-based position in the playlist
    pub rank: usize,
    /// `None` for the seed
    pub transition: Option<Transition>,
}

impl PlaylistEntry<'_> {
    pub fn explanation(&self) -> Option<String> {
        self.transition.as_ref().map(|t| t.to_string())
    }
}

/// An ordering of a session's tracks. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist<'a> {
    entries: Vec<PlaylistEntry<'a>>,
}

impl<'a> Playlist<'a> {
    pub fn entries(&self) -> &[PlaylistEntry<'a>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn seed(&self) -> Option<&'a Track> {
        self.entries.first().map(|e| e.track)
    }

    /// One explanation per non-seed entry, in playlist order.
    pub fn explanations(&self) -> Vec<String> {
        self.entries.iter().filter_map(|e| e.explanation()).collect()
    }
}

/// Order `tracks` (given in upload order).
///
/// Every track must be analyzed; the check runs before anything is placed.
pub fn sequence<'a>(tracks: &'a [Track], scorer: &Scorer) -> Result<Playlist<'a>, SequenceError> {
    let mut remaining: Vec<(&'a Track, &'a FeatureRecord)> = Vec::with_capacity(tracks.len());
    for track in tracks {
        match track.features() {
            Some(features) => remaining.push((track, features)),
            None => {
                return Err(SequenceError::PreconditionViolation {
                    handle: track.handle.clone(),
                    status: track.status.clone(),
                })
            }
        }
    }

    if remaining.is_empty() {
        return Ok(Playlist { entries: Vec::new() });
    }

    let mut entries = Vec::with_capacity(remaining.len());
    let mut last = remaining.remove(0);
    entries.push(PlaylistEntry {
        track: last.0,
        rank: 1,
        transition: None,
    });

    while !remaining.is_empty() {
        let mut best = 0;
        let mut best_score = f64::INFINITY;
        for (i, (_, candidate)) in remaining.iter().enumerate() {
            let score = scorer.score(Some(last.1), Some(candidate));
            // Strict comparison keeps the earliest upload on ties
            if score < best_score {
                best = i;
                best_score = score;
            }
        }

        let next = remaining.remove(best);
        let transition = Transition::between(last, next, best_score);
        debug!(%transition, score = best_score, "Placed track");
        entries.push(PlaylistEntry {
            track: next.0,
            rank: entries.len() + 1,
            transition: Some(transition),
        });
        last = next;
    }

    Ok(Playlist { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TrackStatus;

    fn track(name: &str, bpm: f64, key: &str, energy: f64) -> Track {
        Track::analyzed(
            name,
            FeatureRecord {
                bpm,
                key: key.parse().unwrap(),
                energy,
            },
        )
    }

    fn names(playlist: &Playlist<'_>) -> Vec<String> {
        playlist
            .entries()
            .iter()
            .map(|e| e.track.handle.clone())
            .collect()
    }

    #[test]
    fn test_reference_scenario() {
        let tracks = vec![
            track("A", 120.0, "8B", 0.5),
            track("B", 122.0, "8B", 0.52),
            track("C", 180.0, "1B", 0.9),
        ];
        let playlist = sequence(&tracks, &Scorer::default()).unwrap();
        assert_eq!(names(&playlist), vec!["A", "B", "C"]);

        let explanations = playlist.explanations();
        assert_eq!(explanations.len(), 2);
        assert_eq!(
            explanations[0],
            "B selected after A (BPM diff: 2.00, Key match, Energy diff: 0.020)"
        );
        assert_eq!(
            explanations[1],
            "C selected after B (BPM diff: 58.00, Key mismatch, Energy diff: 0.380)"
        );
        let ranks: Vec<usize> = playlist.entries().iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert!(playlist.entries()[0].transition.is_none());
    }

    #[test]
    fn test_seed_is_first_upload_even_if_outlier() {
        let tracks = vec![
            track("outlier", 60.0, "1B", 2.0),
            track("x", 128.0, "8B", 0.5),
            track("y", 128.0, "8B", 0.5),
        ];
        let playlist = sequence(&tracks, &Scorer::default()).unwrap();
        assert_eq!(playlist.seed().unwrap().handle, "outlier");
    }

    #[test]
    fn test_ties_go_to_lowest_upload_index() {
        let tracks = vec![
            track("seed", 120.0, "8B", 0.5),
            track("up", 124.0, "8B", 0.5),
            track("down", 116.0, "8B", 0.5),
        ];
        let playlist = sequence(&tracks, &Scorer::default()).unwrap();
        assert_eq!(names(&playlist), vec!["seed", "up", "down"]);
    }

    #[test]
    fn test_deterministic() {
        let tracks: Vec<Track> = (0..12)
            .map(|i| {
                let bpm = 90.0 + ((i * 37) % 60) as f64;
                let key = ["8B", "3B", "10B", "1B"][i % 4];
                track(&format!("t{:02}", i), bpm, key, (i % 5) as f64 * 0.2)
            })
            .collect();
        let scorer = Scorer::default();
        let first = sequence(&tracks, &scorer).unwrap();
        let second = sequence(&tracks, &scorer).unwrap();
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.explanations(), second.explanations());
    }

    #[test]
    fn test_output_is_permutation() {
        let tracks: Vec<Track> = (0..20)
            .map(|i| {
                let bpm = 100.0 + (i * 7 % 40) as f64;
                track(&format!("t{}", i), bpm, "8B", 0.1 * (i % 7) as f64)
            })
            .collect();
        let playlist = sequence(&tracks, &Scorer::default()).unwrap();
        assert_eq!(playlist.len(), tracks.len());
        assert_eq!(playlist.explanations().len(), tracks.len() - 1);

        let mut got = names(&playlist);
        got.sort();
        let mut want: Vec<String> = tracks.iter().map(|t| t.handle.clone()).collect();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn test_rejects_unanalyzed_track_up_front() {
        let mut pending = track("p", 0.0, "8B", 0.0);
        pending.status = TrackStatus::Pending;
        let mut failed = track("f", 0.0, "8B", 0.0);
        failed.status = TrackStatus::Failed("corrupt".into());

        let tracks = vec![track("a", 120.0, "8B", 0.5), pending];
        let err = sequence(&tracks, &Scorer::default()).unwrap_err();
        assert_eq!(
            err,
            SequenceError::PreconditionViolation {
                handle: "p".into(),
                status: TrackStatus::Pending,
            }
        );

        let tracks = vec![failed, track("a", 120.0, "8B", 0.5)];
        assert!(sequence(&tracks, &Scorer::default()).is_err());
    }

    #[test]
    fn test_empty_and_single() {
        let playlist = sequence(&[], &Scorer::default()).unwrap();
        assert!(playlist.is_empty());
        assert!(playlist.seed().is_none());

        let tracks = vec![track("solo", 120.0, "8B", 0.5)];
        let playlist = sequence(&tracks, &Scorer::default()).unwrap();
        assert_eq!(playlist.len(), 1);
        assert!(playlist.explanations().is_empty());
    }

    #[test]
    fn test_non_finite_features_are_placed_last() {
        let tracks = vec![
            track("seed", 120.0, "8B", 0.5),
            track("broken", f64::NAN, "8B", 0.5),
            track("far", 200.0, "1B", 3.0),
        ];
        let playlist = sequence(&tracks, &Scorer::default()).unwrap();
        assert_eq!(names(&playlist), vec!["seed", "far", "broken"]);
    }
}
