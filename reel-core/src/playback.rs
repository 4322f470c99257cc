//! # Playback Loop
//!
//! One thread, one packet at a time:
//!
//! ```text
//! read packet ─► decode ─► convert to I420 ─► upload ─► pace ─► present
//!      ▲                                                            │
//!      └──────────────────── drain input (quit / seek) ◄────────────┘
//! ```
//!
//! Everything the loop touches is owned by [`Player`]; dropping it tears the
//! pipeline down in field order (source, decoder, buffers, surface, window,
//! event loop).

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{PlayerConfig, SurfaceConfig};
use crate::decode::{open_decoder, CodecParameters, DecodeError, Received, VideoDecoder};
use crate::demuxer::{
    select_first_video_stream, DemuxError, MediaSource, Packet, ReadStatus, SeekDirection,
    StreamIndex,
};
use crate::input::{EventSource, InputEvent};
use crate::pixel_convert::{ConvertError, ConvertedFrame, PixelConverter};
use crate::render::{PresentError, Presenter};
use crate::sync::FrameClock;

/// Seek step when the container does not report a duration
const FALLBACK_SEEK_STEP_US: i64 = 10_000_000;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Quit,
    EndOfStream,
    FrameLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Running,
    Stopped(StopReason),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackStats {
    pub packets_read: u64,
    pub frames_decoded: u64,
    pub frames_presented: u64,
    pub seeks: u64,
    pub seeks_failed: u64,
    pub stop_reason: Option<StopReason>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the first packet is read
    Setup,
    Playback,
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Demux(#[from] DemuxError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Present(#[from] PresentError),
}

impl PlayerError {
    pub fn phase(&self) -> Phase {
        match self {
            PlayerError::Demux(DemuxError::ReadFailed(_) | DemuxError::SeekFailed { .. }) => {
                Phase::Playback
            }
            PlayerError::Demux(_) => Phase::Setup,
            PlayerError::Decode(DecodeError::UnsupportedCodec(_) | DecodeError::OpenFailed(_)) => {
                Phase::Setup
            }
            PlayerError::Decode(_) => Phase::Playback,
            PlayerError::Convert(
                ConvertError::Unsupported(_) | ConvertError::InvalidDimensions { .. },
            ) => Phase::Setup,
            PlayerError::Convert(_) => Phase::Playback,
            PlayerError::Present(PresentError::SurfaceCreateFailed(_)) => Phase::Setup,
            PlayerError::Present(_) => Phase::Playback,
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self.phase() {
            Phase::Setup => 1,
            Phase::Playback => 2,
        }
    }
}

// ============================================================================
// Seeking
// ============================================================================

/// Distance covered by one seek key press
pub fn seek_step(duration_us: i64, divisor: u32) -> i64 {
    if duration_us <= 0 {
        return FALLBACK_SEEK_STEP_US;
    }
    (duration_us / divisor.max(1) as i64).max(1)
}

/// Target of a seek from `position_us`, clamped to `[0, duration]`
pub fn seek_target(position_us: i64, step_us: i64, direction: SeekDirection, duration_us: i64) -> i64 {
    let target = match direction {
        SeekDirection::Forward => position_us.saturating_add(step_us),
        SeekDirection::Backward => position_us.saturating_sub(step_us),
    };
    if duration_us > 0 {
        target.clamp(0, duration_us)
    } else {
        target.max(0)
    }
}

// ============================================================================
// Player
// ============================================================================

pub struct Player<S: MediaSource, P: Presenter, E: EventSource> {
    source: S,
    config: PlayerConfig,
    stream_index: StreamIndex,
    duration_us: i64,
    decoder: Box<dyn VideoDecoder>,
    converter: PixelConverter,
    converted: ConvertedFrame,
    presenter: P,
    events: E,
    packet: Packet,
    pending_events: Vec<InputEvent>,
    clock: FrameClock,
    state: PlaybackState,
    stats: PlaybackStats,
}

impl<S: MediaSource, P: Presenter, E: EventSource> Player<S, P, E> {
    /// Set up the pipeline for the first video stream of `source`.
    ///
    /// `create_surface` receives the window settings and the video size and
    /// is only called once everything else is ready.
    pub fn open<C>(source: S, config: PlayerConfig, create_surface: C) -> Result<Self, PlayerError>
    where
        C: FnOnce(&SurfaceConfig, u32, u32) -> Result<(P, E), PresentError>,
    {
        Self::open_with(source, config, open_decoder, create_surface)
    }

    /// [`Player::open`] with a custom decoder factory
    pub fn open_with<D, C>(
        source: S,
        config: PlayerConfig,
        make_decoder: D,
        create_surface: C,
    ) -> Result<Self, PlayerError>
    where
        D: FnOnce(&CodecParameters) -> Result<Box<dyn VideoDecoder>, DecodeError>,
        C: FnOnce(&SurfaceConfig, u32, u32) -> Result<(P, E), PresentError>,
    {
        let streams = source.probe_streams()?;
        for stream in streams {
            info!(
                index = stream.index,
                kind = ?stream.kind,
                codec = stream.codec.name(),
                width = stream.width,
                height = stream.height,
                duration_us = stream.duration_us,
                "Stream"
            );
        }

        let stream_index = select_first_video_stream(streams)?;
        let stream = streams
            .iter()
            .find(|s| s.index == stream_index)
            .ok_or(DemuxError::NoVideoStream)?;
        let params = stream.codec_parameters();
        let duration_us = stream.duration_us;

        let decoder = make_decoder(&params)?;
        info!(
            stream = stream_index,
            decoder = decoder.name(),
            codec = params.codec.name(),
            "Selected video stream"
        );

        let (width, height) = (params.width as usize, params.height as usize);
        let converter = PixelConverter::new(
            decoder.output_format(),
            width,
            height,
            width,
            height,
        )?;
        let converted = ConvertedFrame::new(width, height);

        let (presenter, events) = create_surface(&config.surface, params.width, params.height)?;

        Ok(Self {
            source,
            clock: FrameClock::new(config.pacing),
            config,
            stream_index,
            duration_us,
            decoder,
            converter,
            converted,
            presenter,
            events,
            packet: Packet::new(),
            pending_events: Vec::new(),
            state: PlaybackState::Running,
            stats: PlaybackStats::default(),
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    pub fn stream_index(&self) -> StreamIndex {
        self.stream_index
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Run until quit, end of stream or the frame limit
    pub fn run(&mut self) -> Result<PlaybackStats, PlayerError> {
        info!(stream = self.stream_index, pacing = ?self.config.pacing, "Starting playback");
        loop {
            match self.step() {
                Ok(PlaybackState::Running) => {}
                Ok(PlaybackState::Stopped(reason)) => {
                    info!(
                        ?reason,
                        packets = self.stats.packets_read,
                        decoded = self.stats.frames_decoded,
                        presented = self.stats.frames_presented,
                        seeks = self.stats.seeks,
                        seeks_failed = self.stats.seeks_failed,
                        "Playback stopped"
                    );
                    return Ok(self.stats.clone());
                }
                Err(e) => {
                    error!(presented = self.stats.frames_presented, "Playback aborted: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// One loop iteration: a packet through the pipeline, then pending input
    pub fn step(&mut self) -> Result<PlaybackState, PlayerError> {
        if self.state != PlaybackState::Running {
            return Ok(self.state);
        }
        if self.frame_limit_reached() {
            self.stop(StopReason::FrameLimit);
            return Ok(self.state);
        }

        match self.source.read_packet(&mut self.packet)? {
            ReadStatus::EndOfStream => {
                self.decoder.send_end_of_stream();
                self.drain_frames()?;
                self.stop(StopReason::EndOfStream);
                return Ok(self.state);
            }
            ReadStatus::Packet => {
                self.stats.packets_read += 1;
                if self.packet.stream_index == self.stream_index {
                    self.decoder.send_packet(&self.packet)?;
                    self.drain_frames()?;
                }
            }
        }
        self.packet.clear();

        self.handle_input()?;
        Ok(self.state)
    }

    fn stop(&mut self, reason: StopReason) {
        if self.state == PlaybackState::Running {
            self.state = PlaybackState::Stopped(reason);
            self.stats.stop_reason = Some(reason);
        }
    }

    fn frame_limit_reached(&self) -> bool {
        matches!(self.config.max_frames, Some(max) if self.stats.frames_presented >= max)
    }

    /// Present every frame the decoder has ready
    fn drain_frames(&mut self) -> Result<(), PlayerError> {
        while self.state == PlaybackState::Running {
            match self.decoder.receive_frame()? {
                Received::Frame(frame) => {
                    self.stats.frames_decoded += 1;
                    self.converter.convert(frame, &mut self.converted)?;
                }
                Received::NeedMoreInput | Received::EndOfStream => break,
            }
            self.show_converted()?;
        }
        Ok(())
    }

    fn show_converted(&mut self) -> Result<(), PlayerError> {
        self.presenter.upload(&self.converted)?;
        self.clock.wait(self.converted.pts_us());
        self.presenter.present()?;
        self.stats.frames_presented += 1;

        if self.frame_limit_reached() {
            self.stop(StopReason::FrameLimit);
        }
        Ok(())
    }

    fn handle_input(&mut self) -> Result<(), PlayerError> {
        let mut events = std::mem::take(&mut self.pending_events);
        self.events.poll_events(&mut events);

        for event in events.drain(..) {
            match event {
                InputEvent::Quit => self.stop(StopReason::Quit),
                // nothing moves once stopped
                _ if self.state != PlaybackState::Running => {}
                InputEvent::SeekForward => self.seek(SeekDirection::Forward)?,
                InputEvent::SeekBackward => self.seek(SeekDirection::Backward)?,
                InputEvent::Resized { width, height } => self.presenter.resize(width, height),
            }
        }

        self.pending_events = events;
        Ok(())
    }

    fn seek(&mut self, direction: SeekDirection) -> Result<(), PlayerError> {
        let position_us = self.source.position_us();
        let step_us = seek_step(self.duration_us, self.config.seek_divisor);
        let target_us = seek_target(position_us, step_us, direction, self.duration_us);
        self.stats.seeks += 1;

        match self.source.seek(self.stream_index, target_us, direction) {
            Ok(()) => {
                debug!(
                    ?direction,
                    from_us = position_us,
                    target_us,
                    landed_us = self.source.position_us(),
                    "Seek"
                );
                self.decoder.reset()?;
                self.clock.reset();
            }
            Err(e) => {
                warn!(?direction, target_us, "Seek failed: {e}");
                self.stats.seeks_failed += 1;
            }
        }
        Ok(())
    }
}
