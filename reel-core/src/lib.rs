//! # Reel Core
//!
//! Single-stream video playback: demux a local file, decode its first
//! video stream, convert frames to I420 and present them through wgpu.

// ============================================================================
// Container Demuxers
// ============================================================================
pub mod demuxer;
pub mod mkv;
pub mod mp4_demux;

// ============================================================================
// Video Decoding
// ============================================================================
pub mod decode;
pub mod h264_utils;

// ============================================================================
// Media Processing
// ============================================================================
pub mod pixel_convert;

// ============================================================================
// Presentation / Input
// ============================================================================
pub mod input;
pub mod render;
pub mod sync;

// ============================================================================
// Player
// ============================================================================
pub mod config;
pub mod playback;

pub use config::{PlayerConfig, SurfaceConfig};
pub use demuxer::{Demuxer, MediaSource};
pub use playback::{Player, PlayerError, PlaybackStats, StopReason};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
