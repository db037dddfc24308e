//! Delivery: saving and reviewing finished recordings

pub mod filename;
pub mod review;
pub mod save;

pub use filename::{candidate_paths, recording_filename};
pub use review::{estimate_duration, format_duration, format_file_size, ReviewHandle, ReviewSession};
pub use save::{Delivery, DeliveryError, DeliveryOutcome, SavedRecording};
