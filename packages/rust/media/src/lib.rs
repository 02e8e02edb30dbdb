//! Media collaborators for reeldigest.
//!
//! Thin wrappers over the external tools and services a job talks to:
//! - [`YtDlp`] downloads the post's media and metadata
//! - [`Ffprobe`] and [`FrameExtractor`] inspect video and pull still frames
//! - [`WhisperCli`] turns the audio track into text
//! - [`OllamaVision`] describes a single image
//!
//! Each wrapper reports failures as the pipeline stage error it belongs to.

pub mod acquire;
pub mod frames;
pub mod probe;
pub mod process;
pub mod transcribe;
pub mod vision;

pub use acquire::{AcquiredMedia, MediaFile, MediaKind, YtDlp, classify_download_error};
pub use frames::{FrameExtract, FrameExtractor, frame_count_for, plan_frame_offsets};
pub use probe::Ffprobe;
pub use process::{ToolError, ToolOutput, run_tool};
pub use transcribe::{WhisperCli, clean_transcript};
pub use vision::OllamaVision;
