// MKV (Matroska/WebM) demuxer using matroska-demuxer crate
// Provides the stream table and frame packet reading
//
// matroska-demuxer reads strictly forward. Seeking is built on top:
// the first seek scans the file once for the keyframes of the requested
// track, later seeks reuse that index, and landing on a keyframe means
// reopening the file (when going backwards) and skipping frames up to it.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use matroska_demuxer::{Frame, MatroskaFile, TrackEntry, TrackType};
use tracing::{debug, warn};

use crate::demuxer::{
    pick_keyframe, CodecId, DemuxError, MediaKind, Packet, ReadStatus, SeekDirection,
    StreamDescriptor, StreamIndex,
};
use crate::pixel_convert::PixelFormat;

type MkvFile = MatroskaFile<BufReader<File>>;

// ============================================================================
// Track mapping
// ============================================================================

pub fn codec_from_matroska(codec_id: &str) -> CodecId {
    match codec_id {
        "V_MPEG4/ISO/AVC" => CodecId::H264,
        "V_MPEGH/ISO/HEVC" => CodecId::H265,
        "V_VP8" => CodecId::Vp8,
        "V_VP9" => CodecId::Vp9,
        "V_AV1" => CodecId::Av1,
        "A_OPUS" => CodecId::Opus,
        id if id.starts_with("A_AAC") => CodecId::Aac,
        _ => CodecId::Unknown,
    }
}

fn kind_from_track_type(track_type: TrackType) -> MediaKind {
    match track_type {
        TrackType::Video => MediaKind::Video,
        TrackType::Audio => MediaKind::Audio,
        TrackType::Subtitle => MediaKind::Subtitle,
        _ => MediaKind::Other,
    }
}

/// Block timestamps are in TimestampScale ticks (nanoseconds per tick)
fn ticks_to_us(ticks: u64, timestamp_scale: u64) -> i64 {
    (ticks as u128 * timestamp_scale as u128 / 1_000) as i64
}

fn convert_track(index: StreamIndex, track: &TrackEntry, duration_us: i64) -> StreamDescriptor {
    let kind = kind_from_track_type(track.track_type());
    let (width, height) = track
        .video()
        .map(|v| (v.pixel_width().get() as u32, v.pixel_height().get() as u32))
        .unwrap_or((0, 0));

    StreamDescriptor {
        index,
        kind,
        codec: codec_from_matroska(track.codec_id()),
        pixel_format: (kind == MediaKind::Video).then_some(PixelFormat::YUV420P),
        width,
        height,
        duration_us,
        frame_rate: None,
        extradata: track.codec_private().map(|p| p.to_vec()).unwrap_or_default(),
    }
}

fn open_file(path: &Path) -> Result<MkvFile, String> {
    let file = File::open(path).map_err(|e| format!("Failed to open file: {e}"))?;
    MatroskaFile::open(BufReader::new(file)).map_err(|e| format!("Failed to parse MKV: {e:?}"))
}

// ============================================================================
// MKV Demuxer
// ============================================================================

/// Keyframes of one track: (pts_us, ordinal of the frame in file order)
#[derive(Debug, Clone)]
struct KeyframeIndex {
    stream: StreamIndex,
    entries: Vec<(i64, u64)>,
}

pub struct MkvDemuxer {
    path: PathBuf,
    mkv: MkvFile,
    frame: Frame,
    streams: Vec<StreamDescriptor>,
    /// Stream index -> Matroska track number
    track_numbers: Vec<u64>,
    timestamp_scale: u64,
    keyframe_index: Option<KeyframeIndex>,
    /// Frames consumed from `mkv` since it was opened
    frames_read: u64,
    position_us: i64,
}

impl MkvDemuxer {
    pub fn open(path: &Path) -> Result<Self, DemuxError> {
        let file = File::open(path).map_err(|e| DemuxError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mkv = MatroskaFile::open(BufReader::new(file))
            .map_err(|e| DemuxError::ProbeFailed(format!("Failed to parse MKV: {e:?}")))?;

        // Segment duration is in TimestampScale ticks
        let timestamp_scale = mkv.info().timestamp_scale().get();
        let duration_us = mkv
            .info()
            .duration()
            .map(|ticks| (ticks * timestamp_scale as f64 / 1_000.0) as i64)
            .unwrap_or(0);

        let mut streams = Vec::new();
        let mut track_numbers = Vec::new();
        for (index, track) in mkv.tracks().iter().enumerate() {
            streams.push(convert_track(index as StreamIndex, track, duration_us));
            track_numbers.push(track.track_number().get());
        }

        debug!(
            path = %path.display(),
            tracks = streams.len(),
            timestamp_scale,
            duration_us,
            "Opened Matroska file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            mkv,
            frame: Frame::default(),
            streams,
            track_numbers,
            timestamp_scale,
            keyframe_index: None,
            frames_read: 0,
            position_us: 0,
        })
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn position_us(&self) -> i64 {
        self.position_us
    }

    fn stream_for_track(&self, track_number: u64) -> Option<StreamIndex> {
        self.track_numbers
            .iter()
            .position(|&n| n == track_number)
            .map(|i| i as StreamIndex)
    }

    /// Read next packet
    pub fn read_packet(&mut self, packet: &mut Packet) -> Result<ReadStatus, DemuxError> {
        loop {
            let more = self
                .mkv
                .next_frame(&mut self.frame)
                .map_err(|e| DemuxError::ReadFailed(format!("MKV read error: {e:?}")))?;
            if !more {
                return Ok(ReadStatus::EndOfStream);
            }
            self.frames_read += 1;

            let Some(stream_index) = self.stream_for_track(self.frame.track) else {
                warn!(track = self.frame.track, "Frame for a track missing from the track list");
                continue;
            };

            // Matroska only stores pts
            let pts_us = ticks_to_us(self.frame.timestamp, self.timestamp_scale);
            packet.stream_index = stream_index;
            packet.pts_us = Some(pts_us);
            packet.dts_us = None;
            packet.duration_us = 0;
            packet.keyframe = self.frame.is_keyframe.unwrap_or(false);
            // hand our old buffer to the crate for the next frame
            std::mem::swap(&mut packet.data, &mut self.frame.data);

            self.position_us = pts_us;
            return Ok(ReadStatus::Packet);
        }
    }

    fn build_keyframe_index(&self, stream: StreamIndex) -> Result<KeyframeIndex, String> {
        let track_number = *self
            .track_numbers
            .get(stream as usize)
            .ok_or_else(|| "no such stream".to_string())?;

        let mut scan = open_file(&self.path)?;
        let mut frame = Frame::default();
        let mut entries = Vec::new();
        let mut ordinal = 0u64;

        while scan
            .next_frame(&mut frame)
            .map_err(|e| format!("MKV read error: {e:?}"))?
        {
            if frame.track == track_number && frame.is_keyframe.unwrap_or(false) {
                entries.push((ticks_to_us(frame.timestamp, self.timestamp_scale), ordinal));
            }
            ordinal += 1;
        }

        entries.sort_unstable();
        debug!(stream, keyframes = entries.len(), frames = ordinal, "Built MKV keyframe index");
        Ok(KeyframeIndex { stream, entries })
    }

    fn skip_frames(&mut self, count: u64) -> Result<(), String> {
        for _ in 0..count {
            let more = self
                .mkv
                .next_frame(&mut self.frame)
                .map_err(|e| format!("MKV read error: {e:?}"))?;
            if !more {
                return Err("file ended before the seek point".to_string());
            }
            self.frames_read += 1;
        }
        Ok(())
    }

    pub fn seek(
        &mut self,
        stream_index: StreamIndex,
        target_us: i64,
        direction: SeekDirection,
    ) -> Result<(), DemuxError> {
        let seek_failed = |reason: String| DemuxError::SeekFailed { target_us, reason };

        let reuse = matches!(&self.keyframe_index, Some(index) if index.stream == stream_index);
        if !reuse {
            self.keyframe_index = Some(self.build_keyframe_index(stream_index).map_err(seek_failed)?);
        }
        let Some(index) = self.keyframe_index.as_ref() else {
            return Err(seek_failed("keyframe index unavailable".to_string()));
        };

        let pts: Vec<i64> = index.entries.iter().map(|&(pts, _)| pts).collect();
        let chosen = pick_keyframe(&pts, target_us, direction)
            .ok_or_else(|| seek_failed("no keyframe in seek direction".to_string()))?;
        let (landing_pts, ordinal) = index.entries[chosen];

        if ordinal < self.frames_read {
            self.mkv = open_file(&self.path).map_err(seek_failed)?;
            self.frames_read = 0;
        }
        self.skip_frames(ordinal - self.frames_read).map_err(seek_failed)?;
        self.position_us = landing_pts;

        debug!(
            stream = stream_index,
            target_us,
            landed_us = landing_pts,
            frame = ordinal,
            "MKV seek"
        );
        Ok(())
    }
}

// ============================================================================
// Test fixtures: synthetic Matroska files
// ============================================================================


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::io::Write;

    fn open(spec: &MkvSpec) -> (tempfile::NamedTempFile, MkvDemuxer) {
        let file = write_temp_mkv(spec);
        let demuxer = MkvDemuxer::open(file.path()).expect("demuxer");
        (file, demuxer)
    }

    /// Next packet of `stream`, skipping everything else
    fn next_of(demuxer: &mut MkvDemuxer, stream: StreamIndex) -> Option<Packet> {
        let mut packet = Packet::new();
        loop {
            match demuxer.read_packet(&mut packet).unwrap() {
                ReadStatus::EndOfStream => return None,
                ReadStatus::Packet if packet.stream_index == stream => return Some(packet),
                ReadStatus::Packet => {}
            }
        }
    }

    #[test]
    fn maps_codec_ids() {
        assert_eq!(codec_from_matroska("V_MPEG4/ISO/AVC"), CodecId::H264);
        assert_eq!(codec_from_matroska("V_MPEGH/ISO/HEVC"), CodecId::H265);
        assert_eq!(codec_from_matroska("V_VP9"), CodecId::Vp9);
        assert_eq!(codec_from_matroska("V_AV1"), CodecId::Av1);
        assert_eq!(codec_from_matroska("A_AAC/MPEG4/LC"), CodecId::Aac);
        assert_eq!(codec_from_matroska("A_OPUS"), CodecId::Opus);
        assert_eq!(codec_from_matroska("S_TEXT/UTF8"), CodecId::Unknown);
    }

    #[test]
    fn maps_track_types() {
        assert_eq!(kind_from_track_type(TrackType::Video), MediaKind::Video);
        assert_eq!(kind_from_track_type(TrackType::Audio), MediaKind::Audio);
        assert_eq!(kind_from_track_type(TrackType::Subtitle), MediaKind::Subtitle);
    }

    #[test]
    fn ticks_scale_to_microseconds() {
        assert_eq!(ticks_to_us(40, 1_000_000), 40_000);
        assert_eq!(ticks_to_us(40_000_000, 1), 40_000);
        assert_eq!(ticks_to_us(999, 1), 0);
        assert_eq!(ticks_to_us(3, 100_000), 300);
    }

    #[test]
    fn stream_table_from_tracks() {
        let (_file, demuxer) = open(&mkv_spec(50, 10));
        let streams = demuxer.streams();

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].kind, MediaKind::Video);
        assert_eq!(streams[0].codec, CodecId::H264);
        assert_eq!((streams[0].width, streams[0].height), (64, 48));
        assert_eq!(streams[0].duration_us, 2_000_000);
        assert_eq!(streams[1].kind, MediaKind::Audio);
        assert_eq!(streams[1].codec, CodecId::Opus);
        assert_eq!(streams[1].pixel_format, None);
    }

    #[test]
    fn reads_blocks_in_file_order_with_microsecond_pts() {
        let (_file, mut demuxer) = open(&mkv_spec(20, 5));

        let mut packet = Packet::new();
        let mut seen = Vec::new();
        while demuxer.read_packet(&mut packet).unwrap() == ReadStatus::Packet {
            seen.push((packet.stream_index, packet.pts_us, packet.keyframe, packet.data.clone()));
        }

        assert_eq!(seen.len(), 40);
        for (i, chunk) in seen.chunks(2).enumerate() {
            let i = i as u32;
            let pts = Some(i as i64 * 40_000);
            assert_eq!(chunk[0], (0, pts, i % 5 == 0, video_payload(i)));
            assert_eq!(chunk[1].0, 1);
            assert_eq!(chunk[1].1, pts);
        }
        assert_eq!(demuxer.position_us(), 760_000);
        assert_eq!(demuxer.read_packet(&mut packet).unwrap(), ReadStatus::EndOfStream);
    }

    #[test]
    fn blocks_of_undeclared_tracks_are_skipped() {
        let spec = MkvSpec {
            stray_block: true,
            ..mkv_spec(4, 2)
        };
        let (_file, mut demuxer) = open(&spec);

        let mut packet = Packet::new();
        assert_eq!(demuxer.read_packet(&mut packet).unwrap(), ReadStatus::Packet);
        assert_eq!(packet.stream_index, 0);
        assert_eq!(packet.data, video_payload(0));
    }

    #[test]
    fn forward_seek_lands_on_next_keyframe() {
        let (_file, mut demuxer) = open(&mkv_spec(50, 10));

        demuxer.seek(0, 1_000_000, SeekDirection::Forward).unwrap();
        assert_eq!(demuxer.position_us(), 1_200_000);

        let packet = next_of(&mut demuxer, 0).unwrap();
        assert_eq!(packet.pts_us, Some(1_200_000));
        assert!(packet.keyframe);
        assert_eq!(packet.data, video_payload(30));
    }

    #[test]
    fn backward_seek_reopens_and_reuses_the_index() {
        let (_file, mut demuxer) = open(&mkv_spec(50, 10));
        for _ in 0..35 {
            next_of(&mut demuxer, 0).unwrap();
        }

        demuxer.seek(0, 500_000, SeekDirection::Backward).unwrap();
        assert_eq!(demuxer.position_us(), 400_000);
        let index = demuxer.keyframe_index.clone().expect("index built");
        assert_eq!(index.stream, 0);
        // audio blocks are keyframes too but belong to another track
        let pts: Vec<i64> = index.entries.iter().map(|&(pts, _)| pts).collect();
        assert_eq!(pts, vec![0, 400_000, 800_000, 1_200_000, 1_600_000]);

        let packet = next_of(&mut demuxer, 0).unwrap();
        assert_eq!(packet.pts_us, Some(400_000));
        assert!(packet.keyframe);

        // second seek on the same stream keeps the scanned index
        demuxer.seek(0, 1_650_000, SeekDirection::Backward).unwrap();
        assert_eq!(demuxer.keyframe_index.as_ref().unwrap().entries, index.entries);
        assert_eq!(next_of(&mut demuxer, 0).unwrap().pts_us, Some(1_600_000));
    }

    #[test]
    fn backward_seek_before_first_keyframe_lands_on_it() {
        let (_file, mut demuxer) = open(&mkv_spec(20, 5));
        for _ in 0..12 {
            next_of(&mut demuxer, 0).unwrap();
        }

        demuxer.seek(0, -1_000_000, SeekDirection::Backward).unwrap();
        assert_eq!(next_of(&mut demuxer, 0).unwrap().pts_us, Some(0));
    }

    #[test]
    fn forward_seek_past_last_keyframe_fails_in_place() {
        let (_file, mut demuxer) = open(&mkv_spec(50, 10));
        for _ in 0..3 {
            next_of(&mut demuxer, 0).unwrap();
        }

        let err = demuxer.seek(0, 1_700_000, SeekDirection::Forward).unwrap_err();
        assert!(matches!(err, DemuxError::SeekFailed { target_us: 1_700_000, .. }));
        assert_eq!(demuxer.position_us(), 80_000);
        assert_eq!(next_of(&mut demuxer, 0).unwrap().pts_us, Some(120_000));
    }

    #[test]
    fn seeking_a_missing_stream_fails() {
        let (_file, mut demuxer) = open(&mkv_spec(10, 5));
        let err = demuxer.seek(7, 0, SeekDirection::Backward).unwrap_err();
        assert!(matches!(err, DemuxError::SeekFailed { .. }));
        assert!(demuxer.keyframe_index.is_none());
    }

    #[test]
    fn skipping_past_the_last_block_is_an_error() {
        let (_file, mut demuxer) = open(&mkv_spec(4, 2));
        // 4 video + 4 audio blocks
        assert!(demuxer.skip_frames(8).is_ok());
        let err = demuxer.skip_frames(1).unwrap_err();
        assert!(err.contains("ended"));
    }

    #[test]
    fn garbage_after_ebml_magic_fails_probe() {
        let mut file = tempfile::Builder::new().suffix(".mkv").tempfile().unwrap();
        // EBML magic with an empty header and no segment
        file.write_all(&[0x1A, 0x45, 0xDF, 0xA3, 0x80]).unwrap();
        let err = MkvDemuxer::open(file.path()).err().unwrap();
        assert!(matches!(err, DemuxError::ProbeFailed(_)));
    }

    #[test]
    fn missing_file_fails_to_open() {
        let err = MkvDemuxer::open(Path::new("/no/such/file.mkv")).err().unwrap();
        assert!(matches!(err, DemuxError::OpenFailed { .. }));
    }
}
