//! Demuxer facade for supported containers.
//!
//! A [`Demuxer`] owns an opened file and its stream table. Packets from
//! every stream come out interleaved; picking the video stream is the
//! caller's job.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::decode::CodecParameters;
use crate::mkv::MkvDemuxer;
use crate::mp4_demux::Mp4Demuxer;
use crate::pixel_convert::PixelFormat;

pub type StreamIndex = u32;

// ============================================================================
// Stream Table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
    Aac,
    Opus,
    Unknown,
}

impl CodecId {
    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC",
            Self::H265 => "H.265/HEVC",
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::Av1 => "AV1",
            Self::Aac => "AAC",
            Self::Opus => "Opus",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::H264 | Self::H265 | Self::Vp8 | Self::Vp9 | Self::Av1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamDescriptor {
    pub index: StreamIndex,
    pub kind: MediaKind,
    pub codec: CodecId,
    pub pixel_format: Option<PixelFormat>,
    pub width: u32,
    pub height: u32,
    pub duration_us: i64,
    pub frame_rate: Option<f64>,
    /// Codec configuration record (avcC, hvcC or CodecPrivate)
    #[serde(skip)]
    pub extradata: Vec<u8>,
}

impl StreamDescriptor {
    pub fn codec_parameters(&self) -> CodecParameters {
        CodecParameters {
            codec: self.codec,
            width: self.width,
            height: self.height,
            extradata: self.extradata.clone(),
        }
    }
}

// ============================================================================
// Packets
// ============================================================================

/// A compressed unit of one stream. The loop keeps one of these around and
/// lets every `read_packet` call refill it, so `data` keeps its capacity.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub stream_index: StreamIndex,
    pub pts_us: Option<i64>,
    pub dts_us: Option<i64>,
    pub duration_us: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the payload and metadata, keep the allocation
    pub fn clear(&mut self) {
        self.stream_index = 0;
        self.pts_us = None;
        self.dts_us = None;
        self.duration_us = 0;
        self.keyframe = false;
        self.data.clear();
    }

    pub fn timestamp_us(&self) -> Option<i64> {
        self.pts_us.or(self.dts_us)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Packet,
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    /// Land on the sync point at or after the target
    Forward,
    /// Land on the sync point at or before the target
    Backward,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("Could not open {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },
    #[error("Unsupported container: {0}")]
    UnsupportedContainer(PathBuf),
    #[error("Could not read stream table: {0}")]
    ProbeFailed(String),
    #[error("No video stream found")]
    NoVideoStream,
    #[error("Packet read failed: {0}")]
    ReadFailed(String),
    #[error("Seek to {target_us}us failed: {reason}")]
    SeekFailed { target_us: i64, reason: String },
}

// ============================================================================
// Media Source
// ============================================================================

pub trait MediaSource {
    /// Stream table parsed at open time
    fn streams(&self) -> &[StreamDescriptor];

    fn probe_streams(&self) -> Result<&[StreamDescriptor], DemuxError> {
        let streams = self.streams();
        if streams.is_empty() {
            return Err(DemuxError::ProbeFailed(
                "container holds no elementary streams".to_string(),
            ));
        }
        Ok(streams)
    }

    /// Refill `packet` with the next packet of any stream
    fn read_packet(&mut self, packet: &mut Packet) -> Result<ReadStatus, DemuxError>;

    /// Reposition so the next packet of `stream_index` is a sync point
    fn seek(
        &mut self,
        stream_index: StreamIndex,
        target_us: i64,
        direction: SeekDirection,
    ) -> Result<(), DemuxError>;

    /// Timestamp of the last packet returned, or of the seek landing point
    fn position_us(&self) -> i64;
}

pub fn select_first_video_stream(streams: &[StreamDescriptor]) -> Result<StreamIndex, DemuxError> {
    streams
        .iter()
        .find(|s| s.kind == MediaKind::Video)
        .map(|s| s.index)
        .ok_or(DemuxError::NoVideoStream)
}

// ============================================================================
// Container Detection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Mp4,
    Mkv,
}

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const MP4_TOP_LEVEL: [&[u8; 4]; 6] = [b"ftyp", b"moov", b"mdat", b"free", b"wide", b"skip"];

/// Sniff the first bytes, fall back to the extension
pub fn detect_container(head: &[u8], path: &Path) -> Option<ContainerKind> {
    if head.len() >= 4 && head[..4] == EBML_MAGIC {
        return Some(ContainerKind::Mkv);
    }
    if head.len() >= 8 && MP4_TOP_LEVEL.iter().any(|kind| head[4..8] == kind[..]) {
        return Some(ContainerKind::Mp4);
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "mkv" | "webm" => Some(ContainerKind::Mkv),
        "mp4" | "m4v" | "mov" => Some(ContainerKind::Mp4),
        _ => None,
    }
}

// ============================================================================
// Demuxer
// ============================================================================

pub enum Demuxer {
    Mp4(Mp4Demuxer<BufReader<File>>),
    Mkv(MkvDemuxer),
}

impl Demuxer {
    pub fn open(path: &Path) -> Result<Self, DemuxError> {
        let open_failed = |e: std::io::Error| DemuxError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let mut file = File::open(path).map_err(open_failed)?;
        let mut head = [0u8; 12];
        let n = read_head(&mut file, &mut head).map_err(open_failed)?;

        let kind = detect_container(&head[..n], path)
            .ok_or_else(|| DemuxError::UnsupportedContainer(path.to_path_buf()))?;
        debug!(path = %path.display(), ?kind, "Detected container");

        let demuxer = match kind {
            ContainerKind::Mp4 => {
                // reopen so the parser starts from byte zero with a fresh buffer
                let file = File::open(path).map_err(open_failed)?;
                Self::Mp4(Mp4Demuxer::new(BufReader::new(file))?)
            }
            ContainerKind::Mkv => Self::Mkv(MkvDemuxer::open(path)?),
        };

        info!(
            path = %path.display(),
            container = ?demuxer.container(),
            streams = demuxer.streams().len(),
            "Opened media file"
        );

        Ok(demuxer)
    }

    pub fn container(&self) -> ContainerKind {
        match self {
            Demuxer::Mp4(_) => ContainerKind::Mp4,
            Demuxer::Mkv(_) => ContainerKind::Mkv,
        }
    }
}

fn read_head(file: &mut File, head: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

impl MediaSource for Demuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        match self {
            Demuxer::Mp4(d) => d.streams(),
            Demuxer::Mkv(d) => d.streams(),
        }
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<ReadStatus, DemuxError> {
        match self {
            Demuxer::Mp4(d) => d.read_packet(packet),
            Demuxer::Mkv(d) => d.read_packet(packet),
        }
    }

    fn seek(
        &mut self,
        stream_index: StreamIndex,
        target_us: i64,
        direction: SeekDirection,
    ) -> Result<(), DemuxError> {
        match self {
            Demuxer::Mp4(d) => d.seek(stream_index, target_us, direction),
            Demuxer::Mkv(d) => d.seek(stream_index, target_us, direction),
        }
    }

    fn position_us(&self) -> i64 {
        match self {
            Demuxer::Mp4(d) => d.position_us(),
            Demuxer::Mkv(d) => d.position_us(),
        }
    }
}

/// Choose a sync point from pts-sorted keyframe timestamps.
///
/// Backward seeks before the first keyframe land on the first one. Forward
/// seeks never move back: with nothing at or after the target there is no
/// landing point.
pub(crate) fn pick_keyframe(keyframes: &[i64], target_us: i64, direction: SeekDirection) -> Option<usize> {
    if keyframes.is_empty() {
        return None;
    }
    match direction {
        SeekDirection::Backward => {
            let at_or_before = keyframes.partition_point(|&pts| pts <= target_us);
            Some(at_or_before.saturating_sub(1))
        }
        SeekDirection::Forward => {
            let at_or_after = keyframes.partition_point(|&pts| pts < target_us);
            (at_or_after < keyframes.len()).then_some(at_or_after)
        }
    }
}
