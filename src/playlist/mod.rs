// Playlist construction: transition scoring, greedy sequencing, bundle export.

pub mod export;
pub mod scoring;
pub mod sequencer;

pub use export::{export_bundle, take_bundle, ExportedBundle};
pub use scoring::{CamelotAdjacent, ExactMatch, KeyDistance, Scorer};
pub use sequencer::{sequence, Playlist, PlaylistEntry, Transition};
