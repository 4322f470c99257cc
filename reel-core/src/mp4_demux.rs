// MP4 DEMUX - ISO base media (MP4/MOV/M4V)
//
// Walks the box tree once at open time and flattens every track's sample
// table into a per-sample index (offset, size, dts, pts, keyframe).
// Reading afterwards is a seek + read_exact per sample, interleaving
// tracks by decode time the way they were muxed.
//
// Layout we care about:
//
//   ftyp
//   moov
//   ├── mvhd                 movie timescale / duration
//   └── trak*
//       ├── tkhd             track id
//       └── mdia
//           ├── mdhd         track timescale / duration
//           ├── hdlr         vide / soun / text / subt
//           └── minf
//               └── stbl
//                   ├── stsd     codec fourcc, dimensions, avcC
//                   ├── stts     decode deltas
//                   ├── ctts     composition offsets
//                   ├── stsc     sample -> chunk runs
//                   ├── stsz     sample sizes
//                   ├── stco/co64 chunk offsets
//                   └── stss     sync samples
//   mdat

mod parser;
mod sample_table;

use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::demuxer::{
    pick_keyframe, CodecId, DemuxError, MediaKind, Packet, ReadStatus, SeekDirection,
    StreamDescriptor, StreamIndex,
};
use crate::pixel_convert::PixelFormat;

use parser::{read_box_header, read_full_box_header, read_i32, read_u16, read_u32, read_u64, BoxHeader};
pub use sample_table::{Sample, SampleTable};

// ============================================================================
// Tracks
// ============================================================================

#[derive(Debug, Clone)]
struct Track {
    id: u32,
    kind: MediaKind,
    codec: CodecId,
    width: u32,
    height: u32,
    extradata: Vec<u8>,
    timescale: u32,
    duration: u64,
    table: SampleTable,
    samples: Vec<Sample>,
    current_sample: usize,
}

impl Track {
    fn new(id: u32) -> Self {
        Self {
            id,
            kind: MediaKind::Other,
            codec: CodecId::Unknown,
            width: 0,
            height: 0,
            extradata: Vec::new(),
            timescale: 1000,
            duration: 0,
            table: SampleTable::default(),
            samples: Vec::new(),
            current_sample: 0,
        }
    }

    fn ticks_to_us(&self, ticks: i64) -> i64 {
        ticks_to_us(ticks, self.timescale)
    }

    fn duration_us(&self, movie_duration_us: i64) -> i64 {
        if self.duration > 0 {
            return self.ticks_to_us(self.duration as i64);
        }
        let summed: i64 = self.samples.iter().map(|s| s.duration as i64).sum();
        if summed > 0 {
            self.ticks_to_us(summed)
        } else {
            movie_duration_us
        }
    }

    fn next_dts_us(&self) -> Option<i64> {
        self.samples
            .get(self.current_sample)
            .map(|s| self.ticks_to_us(s.dts))
    }
}

fn ticks_to_us(ticks: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    (ticks as i128 * 1_000_000 / timescale as i128) as i64
}

fn codec_from_fourcc(code: &[u8; 4]) -> CodecId {
    match code {
        b"avc1" | b"avc3" => CodecId::H264,
        b"hvc1" | b"hev1" => CodecId::H265,
        b"vp08" => CodecId::Vp8,
        b"vp09" => CodecId::Vp9,
        b"av01" => CodecId::Av1,
        b"mp4a" => CodecId::Aac,
        b"Opus" => CodecId::Opus,
        _ => CodecId::Unknown,
    }
}

fn kind_from_handler(code: &[u8; 4]) -> MediaKind {
    match code {
        b"vide" => MediaKind::Video,
        b"soun" => MediaKind::Audio,
        b"text" | b"subt" | b"sbtl" => MediaKind::Subtitle,
        _ => MediaKind::Other,
    }
}

// ============================================================================
// Demuxer
// ============================================================================

#[derive(Debug)]
pub struct Mp4Demuxer<R: Read + Seek> {
    reader: R,
    timescale: u32,
    duration: u64,
    tracks: Vec<Track>,
    streams: Vec<StreamDescriptor>,
    position_us: i64,
    file_size: u64,
}

impl<R: Read + Seek> Mp4Demuxer<R> {
    pub fn new(reader: R) -> Result<Self, DemuxError> {
        let mut demuxer = Self {
            reader,
            timescale: 1000,
            duration: 0,
            tracks: Vec::new(),
            streams: Vec::new(),
            position_us: 0,
            file_size: 0,
        };
        demuxer.parse_atoms().map_err(DemuxError::ProbeFailed)?;
        demuxer.index_tracks().map_err(DemuxError::ProbeFailed)?;
        Ok(demuxer)
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn position_us(&self) -> i64 {
        self.position_us
    }

    /// Movie duration in microseconds (mvhd)
    pub fn duration_us(&self) -> i64 {
        ticks_to_us(self.duration as i64, self.timescale)
    }

    // ------------------------------------------------------------------------
    // Box walking
    // ------------------------------------------------------------------------

    fn position(&mut self) -> Result<u64, String> {
        self.reader
            .stream_position()
            .map_err(|e| format!("Position error: {e}"))
    }

    fn seek_to(&mut self, pos: u64) -> Result<(), String> {
        self.reader
            .seek(SeekFrom::Start(pos))
            .map_err(|e| format!("Seek error: {e}"))?;
        Ok(())
    }

    /// Next child box inside `[current, end)`, with the absolute end of its body
    fn next_child(&mut self, end: u64) -> Result<Option<(BoxHeader, u64)>, String> {
        let start = self.position()?;
        if start.saturating_add(8) > end {
            return Ok(None);
        }
        let header = read_box_header(&mut self.reader)?;
        let body_end = if header.size == 0 {
            end
        } else {
            start
                .checked_add(header.size)
                .ok_or_else(|| format!("Box {} at {} has size {}", header.fourcc(), start, header.size))?
        };
        if body_end > end {
            return Err(format!(
                "Box {} at {} overruns its parent ({} > {})",
                header.fourcc(),
                start,
                body_end,
                end
            ));
        }
        Ok(Some((header, body_end)))
    }

    /// Entry count of a table box whose entries are `entry_size` bytes each.
    /// The entries have to fit in what is left of the box.
    fn read_entry_count(&mut self, entry_size: u64, body_end: u64) -> Result<u32, String> {
        let count = read_u32(&mut self.reader)?;
        let available = body_end.saturating_sub(self.position()?);
        if count as u64 * entry_size > available {
            return Err(format!(
                "Table of {count} entries needs {} bytes, box has {available}",
                count as u64 * entry_size
            ));
        }
        Ok(count)
    }

    fn parse_atoms(&mut self) -> Result<(), String> {
        let file_size = self
            .reader
            .seek(SeekFrom::End(0))
            .map_err(|e| format!("Seek error: {e}"))?;
        self.file_size = file_size;
        self.seek_to(0)?;

        let mut found_moov = false;
        loop {
            let (header, body_end) = match self.next_child(file_size) {
                Ok(Some(child)) => child,
                Ok(None) => break,
                // a cut-off tail (partial download) still leaves the indexed part playable
                Err(e) if found_moov => {
                    debug!(error = %e, "Ignoring truncated data after moov");
                    break;
                }
                Err(e) => return Err(e),
            };
            if &header.box_type == b"moov" {
                self.parse_moov(body_end)?;
                found_moov = true;
            }
            self.seek_to(body_end)?;
        }

        if !found_moov {
            return Err("No moov box".to_string());
        }
        Ok(())
    }

    fn parse_moov(&mut self, end: u64) -> Result<(), String> {
        while let Some((header, body_end)) = self.next_child(end)? {
            match &header.box_type {
                b"mvhd" => self.parse_mvhd()?,
                b"trak" => {
                    let mut track = Track::new(self.tracks.len() as u32 + 1);
                    self.parse_trak(&mut track, body_end)?;
                    self.tracks.push(track);
                }
                _ => {}
            }
            self.seek_to(body_end)?;
        }
        Ok(())
    }

    fn parse_mvhd(&mut self) -> Result<(), String> {
        let (version, _) = read_full_box_header(&mut self.reader)?;
        if version == 1 {
            read_u64(&mut self.reader)?; // creation_time
            read_u64(&mut self.reader)?; // modification_time
            self.timescale = read_u32(&mut self.reader)?;
            self.duration = read_u64(&mut self.reader)?;
        } else {
            read_u32(&mut self.reader)?;
            read_u32(&mut self.reader)?;
            self.timescale = read_u32(&mut self.reader)?;
            self.duration = read_u32(&mut self.reader)? as u64;
        }
        Ok(())
    }

    fn parse_trak(&mut self, track: &mut Track, end: u64) -> Result<(), String> {
        while let Some((header, body_end)) = self.next_child(end)? {
            match &header.box_type {
                b"tkhd" => self.parse_tkhd(track)?,
                b"mdia" => self.parse_mdia(track, body_end)?,
                _ => {}
            }
            self.seek_to(body_end)?;
        }
        Ok(())
    }

    fn parse_tkhd(&mut self, track: &mut Track) -> Result<(), String> {
        let (version, _) = read_full_box_header(&mut self.reader)?;
        if version == 1 {
            read_u64(&mut self.reader)?;
            read_u64(&mut self.reader)?;
        } else {
            read_u32(&mut self.reader)?;
            read_u32(&mut self.reader)?;
        }
        track.id = read_u32(&mut self.reader)?;
        Ok(())
    }

    fn parse_mdia(&mut self, track: &mut Track, end: u64) -> Result<(), String> {
        while let Some((header, body_end)) = self.next_child(end)? {
            match &header.box_type {
                b"mdhd" => self.parse_mdhd(track)?,
                b"hdlr" => self.parse_hdlr(track)?,
                b"minf" => self.parse_minf(track, body_end)?,
                _ => {}
            }
            self.seek_to(body_end)?;
        }
        Ok(())
    }

    fn parse_mdhd(&mut self, track: &mut Track) -> Result<(), String> {
        let (version, _) = read_full_box_header(&mut self.reader)?;
        if version == 1 {
            read_u64(&mut self.reader)?;
            read_u64(&mut self.reader)?;
            track.timescale = read_u32(&mut self.reader)?;
            track.duration = read_u64(&mut self.reader)?;
        } else {
            read_u32(&mut self.reader)?;
            read_u32(&mut self.reader)?;
            track.timescale = read_u32(&mut self.reader)?;
            track.duration = read_u32(&mut self.reader)? as u64;
        }
        Ok(())
    }

    fn parse_hdlr(&mut self, track: &mut Track) -> Result<(), String> {
        read_full_box_header(&mut self.reader)?;
        read_u32(&mut self.reader)?; // pre_defined
        let handler = read_u32(&mut self.reader)?.to_be_bytes();
        track.kind = kind_from_handler(&handler);
        Ok(())
    }

    fn parse_minf(&mut self, track: &mut Track, end: u64) -> Result<(), String> {
        while let Some((header, body_end)) = self.next_child(end)? {
            if &header.box_type == b"stbl" {
                self.parse_stbl(track, body_end)?;
            }
            self.seek_to(body_end)?;
        }
        Ok(())
    }

    fn parse_stbl(&mut self, track: &mut Track, end: u64) -> Result<(), String> {
        while let Some((header, body_end)) = self.next_child(end)? {
            match &header.box_type {
                b"stsd" => self.parse_stsd(track, body_end)?,
                b"stts" => {
                    read_full_box_header(&mut self.reader)?;
                    let count = self.read_entry_count(8, body_end)?;
                    for _ in 0..count {
                        let sample_count = read_u32(&mut self.reader)?;
                        let delta = read_u32(&mut self.reader)?;
                        track.table.time_to_sample.push((sample_count, delta));
                    }
                }
                b"ctts" => {
                    read_full_box_header(&mut self.reader)?;
                    let count = self.read_entry_count(8, body_end)?;
                    for _ in 0..count {
                        let sample_count = read_u32(&mut self.reader)?;
                        // version 0 is unsigned on paper; nobody writes offsets past i32::MAX
                        let offset = read_i32(&mut self.reader)?;
                        track.table.composition_offsets.push((sample_count, offset));
                    }
                }
                b"stsc" => {
                    read_full_box_header(&mut self.reader)?;
                    let count = self.read_entry_count(12, body_end)?;
                    for _ in 0..count {
                        let first_chunk = read_u32(&mut self.reader)?;
                        let per_chunk = read_u32(&mut self.reader)?;
                        let desc = read_u32(&mut self.reader)?;
                        track.table.sample_to_chunk.push((first_chunk, per_chunk, desc));
                    }
                }
                b"stsz" => {
                    read_full_box_header(&mut self.reader)?;
                    let uniform = read_u32(&mut self.reader)?;
                    if uniform == 0 {
                        let count = self.read_entry_count(4, body_end)?;
                        for _ in 0..count {
                            track.table.sample_sizes.push(read_u32(&mut self.reader)?);
                        }
                    } else {
                        // no per-sample entries; the samples themselves must fit in the file
                        let count = read_u32(&mut self.reader)?;
                        if count as u64 * uniform as u64 > self.file_size {
                            return Err(format!(
                                "{count} samples of {uniform} bytes exceed the file size {}",
                                self.file_size
                            ));
                        }
                        track.table.sample_sizes = vec![uniform; count as usize];
                    }
                }
                b"stco" => {
                    read_full_box_header(&mut self.reader)?;
                    let count = self.read_entry_count(4, body_end)?;
                    for _ in 0..count {
                        track.table.chunk_offsets.push(read_u32(&mut self.reader)? as u64);
                    }
                }
                b"co64" => {
                    read_full_box_header(&mut self.reader)?;
                    let count = self.read_entry_count(8, body_end)?;
                    for _ in 0..count {
                        track.table.chunk_offsets.push(read_u64(&mut self.reader)?);
                    }
                }
                b"stss" => {
                    read_full_box_header(&mut self.reader)?;
                    let count = self.read_entry_count(4, body_end)?;
                    for _ in 0..count {
                        track.table.keyframes.push(read_u32(&mut self.reader)?);
                    }
                }
                _ => {}
            }
            self.seek_to(body_end)?;
        }
        Ok(())
    }

    fn parse_stsd(&mut self, track: &mut Track, end: u64) -> Result<(), String> {
        read_full_box_header(&mut self.reader)?;
        let entry_count = read_u32(&mut self.reader)?;
        if entry_count == 0 {
            return Ok(());
        }

        // Only the first sample entry matters
        let Some((entry, entry_end)) = self.next_child(end)? else {
            return Ok(());
        };
        track.codec = codec_from_fourcc(&entry.box_type);

        if track.kind != MediaKind::Video && !track.codec.is_video() {
            return Ok(());
        }

        // VisualSampleEntry: 8 bytes reserved + data_reference_index,
        // 16 bytes pre_defined/reserved, then width and height
        let body = self.position()?;
        self.seek_to(body + 8 + 16)?;
        track.width = read_u16(&mut self.reader)? as u32;
        track.height = read_u16(&mut self.reader)? as u32;
        // rest of the 78-byte visual sample entry
        self.seek_to(body + 78)?;

        while let Some((config, config_end)) = self.next_child(entry_end)? {
            if matches!(&config.box_type, b"avcC" | b"hvcC" | b"av1C" | b"vpcC") {
                let len = (config_end - self.position()?) as usize;
                let mut data = vec![0u8; len];
                self.reader
                    .read_exact(&mut data)
                    .map_err(|e| format!("Read error: {e}"))?;
                track.extradata = data;
            }
            self.seek_to(config_end)?;
        }

        Ok(())
    }

    fn index_tracks(&mut self) -> Result<(), String> {
        let movie_duration_us = self.duration_us();

        for (index, track) in self.tracks.iter_mut().enumerate() {
            track.samples = track
                .table
                .build_samples()
                .map_err(|e| format!("Track {}: {}", track.id, e))?;

            let duration_us = track.duration_us(movie_duration_us);
            let frame_rate = if track.kind == MediaKind::Video && duration_us > 0 && !track.samples.is_empty() {
                Some(track.samples.len() as f64 * 1_000_000.0 / duration_us as f64)
            } else {
                None
            };

            debug!(
                track = track.id,
                kind = ?track.kind,
                codec = track.codec.name(),
                samples = track.samples.len(),
                "Indexed MP4 track"
            );

            self.streams.push(StreamDescriptor {
                index: index as StreamIndex,
                kind: track.kind,
                codec: track.codec,
                pixel_format: (track.kind == MediaKind::Video).then_some(PixelFormat::YUV420P),
                width: track.width,
                height: track.height,
                duration_us,
                frame_rate,
                extradata: track.extradata.clone(),
            });
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    pub fn read_packet(&mut self, packet: &mut Packet) -> Result<ReadStatus, DemuxError> {
        // Track with the earliest next sample
        let next = self
            .tracks
            .iter()
            .enumerate()
            .filter_map(|(idx, track)| track.next_dts_us().map(|dts| (dts, idx)))
            .min();

        let Some((_, track_idx)) = next else {
            return Ok(ReadStatus::EndOfStream);
        };

        let track = &self.tracks[track_idx];
        let sample = track.samples[track.current_sample];

        packet.stream_index = track_idx as StreamIndex;
        packet.dts_us = Some(track.ticks_to_us(sample.dts));
        packet.pts_us = Some(track.ticks_to_us(sample.pts));
        packet.duration_us = track.ticks_to_us(sample.duration as i64);
        packet.keyframe = sample.keyframe;

        let read_failed = |e: std::io::Error| {
            DemuxError::ReadFailed(format!(
                "sample at offset {} ({} bytes): {}",
                sample.offset, sample.size, e
            ))
        };
        let in_file = sample
            .offset
            .checked_add(sample.size as u64)
            .is_some_and(|end| end <= self.file_size);
        if !in_file {
            return Err(DemuxError::ReadFailed(format!(
                "sample at offset {} ({} bytes) lies outside the {} byte file",
                sample.offset, sample.size, self.file_size
            )));
        }

        self.reader
            .seek(SeekFrom::Start(sample.offset))
            .map_err(read_failed)?;
        packet.data.resize(sample.size as usize, 0);
        self.reader.read_exact(&mut packet.data).map_err(read_failed)?;

        self.tracks[track_idx].current_sample += 1;
        self.position_us = packet.timestamp_us().unwrap_or(self.position_us);

        Ok(ReadStatus::Packet)
    }

    /// Seek so the next packet of `stream_index` is a sync sample.
    /// Other tracks resume at the first sample decoded at or after it.
    pub fn seek(
        &mut self,
        stream_index: StreamIndex,
        target_us: i64,
        direction: SeekDirection,
    ) -> Result<(), DemuxError> {
        let seek_failed = |reason: &str| DemuxError::SeekFailed {
            target_us,
            reason: reason.to_string(),
        };

        let track = self
            .tracks
            .get(stream_index as usize)
            .ok_or_else(|| seek_failed("no such stream"))?;

        let mut keyframes: Vec<(i64, usize)> = track
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.keyframe)
            .map(|(idx, s)| (track.ticks_to_us(s.pts), idx))
            .collect();
        keyframes.sort_unstable();

        let pts: Vec<i64> = keyframes.iter().map(|&(pts, _)| pts).collect();
        let chosen = pick_keyframe(&pts, target_us, direction)
            .ok_or_else(|| seek_failed("no sync sample in seek direction"))?;
        let (landing_pts, sample_idx) = keyframes[chosen];
        let resume_dts = track.ticks_to_us(track.samples[sample_idx].dts);

        for (idx, other) in self.tracks.iter_mut().enumerate() {
            other.current_sample = if idx == stream_index as usize {
                sample_idx
            } else {
                let timescale = other.timescale;
                other
                    .samples
                    .partition_point(|s| ticks_to_us(s.dts, timescale) < resume_dts)
            };
        }
        self.position_us = landing_pts;

        debug!(
            stream = stream_index,
            target_us,
            landed_us = landing_pts,
            sample = sample_idx,
            "MP4 seek"
        );
        Ok(())
    }
}

// ============================================================================
// Test fixtures: synthetic MP4 files
// ============================================================================
