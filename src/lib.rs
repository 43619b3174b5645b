// mixsort: audio feature extraction and playlist sequencing.
//
// audio     decode -> preprocess -> tempo / key / energy
// playlist  transition scoring, greedy ordering, zip export
// session   per-user track batches, upload filter, batch analysis
// server    axum HTTP service over the above
// scanner   the same flow for a local folder

pub mod audio;
pub mod config;
pub mod error;
pub mod playlist;
pub mod scanner;
pub mod server;
pub mod session;

pub use audio::{analyze_file, analyze_samples, FeatureRecord};
pub use config::Config;
pub use playlist::{sequence, Playlist, Scorer};
pub use session::{Session, SessionId, Track, TrackStatus};
