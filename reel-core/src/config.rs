//! Player configuration
//!
//! Built once by the binary from its command line and handed to
//! `Player::open` by value.

use serde::Serialize;

use crate::sync::Pacing;

pub const DEFAULT_TITLE: &str = "Video Player";
pub const DEFAULT_SEEK_DIVISOR: u32 = 10;

/// Window settings. Unset dimensions follow the video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfaceConfig {
    pub title: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl SurfaceConfig {
    /// Window size for a video of the given native size
    pub fn resolve(&self, native_width: u32, native_height: u32) -> (u32, u32) {
        (
            self.width.unwrap_or(native_width).max(1),
            self.height.unwrap_or(native_height).max(1),
        )
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            width: None,
            height: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerConfig {
    pub surface: SurfaceConfig,
    pub pacing: Pacing,
    /// Seek step is `duration / seek_divisor`
    pub seek_divisor: u32,
    /// Stop after this many presented frames
    pub max_frames: Option<u64>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            surface: SurfaceConfig::default(),
            pacing: Pacing::Native,
            seek_divisor: DEFAULT_SEEK_DIVISOR,
            max_frames: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.surface.title, "Video Player");
        assert_eq!(config.seek_divisor, 10);
        assert_eq!(config.pacing, Pacing::Native);
        assert!(config.max_frames.is_none());
    }

    #[test]
    fn surface_size_follows_video_unless_set() {
        let mut surface = SurfaceConfig::default();
        assert_eq!(surface.resolve(1920, 1080), (1920, 1080));

        surface.width = Some(640);
        assert_eq!(surface.resolve(1920, 1080), (640, 1080));

        surface.height = Some(0);
        assert_eq!(surface.resolve(1920, 1080), (640, 1), "clamped to a drawable size");
    }
}
