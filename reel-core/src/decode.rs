//! # Video Decode Module
//!
//! Send/receive interface over the software video decoders.
//!
//! ## Protocol
//! 1. `send_packet` exactly one compressed packet
//! 2. `receive_frame` until it returns `NeedMoreInput` (go read more) or
//!    `EndOfStream` (after `send_end_of_stream`, nothing is left)
//!
//! Decoders own a single output slot. A frame handed out by
//! `receive_frame` stays valid until the next call on the decoder.

use thiserror::Error;
use tracing::debug;

use crate::demuxer::{CodecId, Packet};
use crate::pixel_convert::{PixelFormat, VideoFrame};

#[cfg(feature = "software-decode")]
use crate::h264_utils::{avcc_to_annexb_into, is_annexb, parse_avcc_extradata};
#[cfg(feature = "software-decode")]
use tracing::warn;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported codec: {}", .0.name())]
    UnsupportedCodec(CodecId),
    #[error("Decoder open failed: {0}")]
    OpenFailed(String),
    #[error("Sending packet to decoder failed: {0}")]
    SendFailed(String),
    #[error("Receiving frame from decoder failed: {0}")]
    ReceiveFailed(String),
}

/// Everything a decoder needs from the stream table
#[derive(Debug, Clone)]
pub struct CodecParameters {
    pub codec: CodecId,
    pub width: u32,
    pub height: u32,
    /// avcC / CodecPrivate record, may be empty
    pub extradata: Vec<u8>,
}

/// Outcome of one `receive_frame` call
#[derive(Debug)]
pub enum Received<'a> {
    Frame(&'a VideoFrame),
    /// Decoder wants another packet before it can emit a frame
    NeedMoreInput,
    /// End of stream was signalled and every frame has been handed out
    EndOfStream,
}

/// Decoder trait - implemented by all decoder backends
pub trait VideoDecoder {
    /// Get the codec this decoder handles
    fn codec(&self) -> CodecId;

    /// Layout of the frames this decoder produces
    fn output_format(&self) -> PixelFormat;

    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError>;

    /// No more packets will follow
    fn send_end_of_stream(&mut self);

    fn receive_frame(&mut self) -> Result<Received<'_>, DecodeError>;

    /// Drop all in-flight state (used after seeking)
    fn reset(&mut self) -> Result<(), DecodeError>;

    /// Get decoder name for debugging
    fn name(&self) -> &str;
}

/// Open a decoder for the stream's codec
pub fn open_decoder(params: &CodecParameters) -> Result<Box<dyn VideoDecoder>, DecodeError> {
    let decoder: Box<dyn VideoDecoder> = match params.codec {
        #[cfg(feature = "software-decode")]
        CodecId::H264 => Box::new(H264Decoder::open(params)?),
        other => return Err(DecodeError::UnsupportedCodec(other)),
    };

    debug!(
        decoder = decoder.name(),
        codec = params.codec.name(),
        width = params.width,
        height = params.height,
        "Opened decoder"
    );
    Ok(decoder)
}

// ============================================================================
// OpenH264 Software Decoder
// ============================================================================

/// Timestamps kept for frames still inside the decoder. Deeper than any
/// H.264 reorder window; packets that never produce a frame age out.
#[cfg(feature = "software-decode")]
const MAX_PENDING_PTS: usize = 16;

#[cfg(feature = "software-decode")]
pub struct H264Decoder {
    decoder: openh264::decoder::Decoder,
    /// AVCC length size, `None` when packets already carry start codes
    nal_length_size: Option<usize>,
    /// SPS/PPS in Annex B, replayed after every reset
    parameter_sets: Vec<u8>,
    annexb: Vec<u8>,
    frame: VideoFrame,
    frame_ready: bool,
    /// Timestamps of packets sent but not yet matched to an output frame,
    /// oldest first
    pending_pts: Vec<i64>,
    last_pts_us: i64,
    end_of_stream: bool,
}

#[cfg(feature = "software-decode")]
impl H264Decoder {
    pub fn open(params: &CodecParameters) -> Result<Self, DecodeError> {
        let decoder = openh264::decoder::Decoder::new()
            .map_err(|e| DecodeError::OpenFailed(format!("OpenH264: {e}")))?;

        let (nal_length_size, parameter_sets) = match parse_avcc_extradata(&params.extradata) {
            Some(config) => (Some(config.nal_length_size), config.parameter_sets),
            // raw Annex B parameter sets or nothing at all
            None => (None, params.extradata.clone()),
        };

        let mut this = Self {
            decoder,
            nal_length_size,
            parameter_sets,
            annexb: Vec::new(),
            frame: VideoFrame::new(
                params.width as usize,
                params.height as usize,
                PixelFormat::YUV420P,
            ),
            frame_ready: false,
            pending_pts: Vec::new(),
            last_pts_us: 0,
            end_of_stream: false,
        };
        this.feed_parameter_sets();
        Ok(this)
    }

    fn feed_parameter_sets(&mut self) {
        if self.parameter_sets.is_empty() {
            return;
        }
        if let Err(e) = self.decoder.decode(&self.parameter_sets) {
            warn!("OpenH264 rejected SPS/PPS: {e}");
        }
    }

    fn remember_pts(&mut self, pts: i64) {
        if self.pending_pts.len() == MAX_PENDING_PTS {
            self.pending_pts.remove(0);
        }
        self.pending_pts.push(pts);
    }

    /// Earliest outstanding pts; openh264 emits frames in display order
    fn take_earliest_pts(&mut self) -> i64 {
        let earliest = self
            .pending_pts
            .iter()
            .enumerate()
            .min_by_key(|&(_, pts)| *pts)
            .map(|(idx, _)| idx);
        match earliest {
            Some(idx) => self.pending_pts.remove(idx),
            None => self.last_pts_us,
        }
    }
}

/// Copy decoder planes into the output slot, keeping the decoder's strides
#[cfg(feature = "software-decode")]
fn copy_yuv(yuv: &impl openh264::formats::YUVSource, frame: &mut VideoFrame) {
    let (width, height) = yuv.dimensions();
    let (y_stride, u_stride, v_stride) = yuv.strides();
    let (y, u, v) = (yuv.y(), yuv.u(), yuv.v());

    frame.width = width;
    frame.height = height;
    frame.format = PixelFormat::YUV420P;
    frame.linesize = [y_stride, u_stride, v_stride];
    frame.offsets = [0, y.len(), y.len() + u.len()];

    frame.data.clear();
    frame.data.extend_from_slice(y);
    frame.data.extend_from_slice(u);
    frame.data.extend_from_slice(v);
}

#[cfg(feature = "software-decode")]
impl VideoDecoder for H264Decoder {
    fn codec(&self) -> CodecId {
        CodecId::H264
    }

    fn output_format(&self) -> PixelFormat {
        PixelFormat::YUV420P
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        if self.end_of_stream {
            return Err(DecodeError::SendFailed("packet sent after end of stream".into()));
        }
        if self.frame_ready {
            return Err(DecodeError::SendFailed("previous frame was not received".into()));
        }

        match self.nal_length_size {
            Some(size) if !is_annexb(&packet.data) => {
                avcc_to_annexb_into(&packet.data, size, &mut self.annexb);
            }
            _ => {
                self.annexb.clear();
                self.annexb.extend_from_slice(&packet.data);
            }
        }

        let pts = packet.timestamp_us().unwrap_or(self.last_pts_us);
        self.remember_pts(pts);
        self.last_pts_us = pts;

        let decoded = self
            .decoder
            .decode(&self.annexb)
            .map_err(|e| DecodeError::SendFailed(format!("OpenH264: {e}")))?;

        let got_frame = match decoded {
            Some(yuv) => {
                copy_yuv(&yuv, &mut self.frame);
                true
            }
            None => false,
        };
        if got_frame {
            self.frame.pts_us = self.take_earliest_pts();
            self.frame_ready = true;
        }
        Ok(())
    }

    fn send_end_of_stream(&mut self) {
        // frames still buffered inside openh264 are not flushed
        self.end_of_stream = true;
    }

    fn receive_frame(&mut self) -> Result<Received<'_>, DecodeError> {
        if self.frame_ready {
            self.frame_ready = false;
            return Ok(Received::Frame(&self.frame));
        }
        if self.end_of_stream {
            Ok(Received::EndOfStream)
        } else {
            Ok(Received::NeedMoreInput)
        }
    }

    fn reset(&mut self) -> Result<(), DecodeError> {
        self.decoder = openh264::decoder::Decoder::new()
            .map_err(|e| DecodeError::OpenFailed(format!("OpenH264: {e}")))?;
        self.frame_ready = false;
        self.pending_pts.clear();
        self.end_of_stream = false;
        self.feed_parameter_sets();
        Ok(())
    }

    fn name(&self) -> &str {
        "OpenH264"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(codec: CodecId) -> CodecParameters {
        CodecParameters {
            codec,
            width: 64,
            height: 48,
            extradata: Vec::new(),
        }
    }

    #[test]
    fn unsupported_codecs_are_rejected() {
        for codec in [CodecId::Vp9, CodecId::Av1, CodecId::Aac, CodecId::Unknown] {
            let err = open_decoder(&params(codec)).err().unwrap();
            assert!(matches!(err, DecodeError::UnsupportedCodec(c) if c == codec));
        }
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn fresh_decoder_needs_input() {
        let mut decoder = open_decoder(&params(CodecId::H264)).unwrap();
        assert_eq!(decoder.name(), "OpenH264");
        assert_eq!(decoder.codec(), CodecId::H264);
        assert_eq!(decoder.output_format(), PixelFormat::YUV420P);
        assert!(matches!(decoder.receive_frame().unwrap(), Received::NeedMoreInput));
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn end_of_stream_drains_to_end() {
        let mut decoder = open_decoder(&params(CodecId::H264)).unwrap();
        decoder.send_end_of_stream();
        assert!(matches!(decoder.receive_frame().unwrap(), Received::EndOfStream));
        // stays terminal
        assert!(matches!(decoder.receive_frame().unwrap(), Received::EndOfStream));
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn send_after_end_of_stream_fails() {
        let mut decoder = open_decoder(&params(CodecId::H264)).unwrap();
        decoder.send_end_of_stream();
        let err = decoder.send_packet(&Packet::new()).unwrap_err();
        assert!(matches!(err, DecodeError::SendFailed(_)));
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn reset_reopens_input() {
        let mut decoder = open_decoder(&params(CodecId::H264)).unwrap();
        decoder.send_end_of_stream();
        decoder.reset().unwrap();
        assert!(matches!(decoder.receive_frame().unwrap(), Received::NeedMoreInput));
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn earliest_pending_pts_is_assigned_first() {
        let mut decoder = H264Decoder::open(&params(CodecId::H264)).unwrap();
        decoder.pending_pts = vec![80_000, 0, 40_000];
        assert_eq!(decoder.take_earliest_pts(), 0);
        assert_eq!(decoder.take_earliest_pts(), 40_000);
        assert_eq!(decoder.take_earliest_pts(), 80_000);
        decoder.last_pts_us = 120_000;
        assert_eq!(decoder.take_earliest_pts(), 120_000);
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn pending_pts_drops_oldest_beyond_reorder_depth() {
        let mut decoder = H264Decoder::open(&params(CodecId::H264)).unwrap();
        for i in 0..100 {
            decoder.remember_pts(i * 40_000);
        }
        assert_eq!(decoder.pending_pts.len(), MAX_PENDING_PTS);
        assert_eq!(decoder.pending_pts[0], (100 - MAX_PENDING_PTS as i64) * 40_000);
        assert_eq!(decoder.take_earliest_pts(), 84 * 40_000);
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn packets_without_pictures_do_not_pile_up() {
        let mut decoder = H264Decoder::open(&params(CodecId::H264)).unwrap();
        let mut packet = Packet::new();
        // access unit delimiters only, nothing to decode
        packet.data.extend_from_slice(&[0, 0, 0, 1, 0x09, 0xF0]);
        for i in 0..500 {
            packet.pts_us = Some(i * 40_000);
            let _ = decoder.send_packet(&packet);
            while let Ok(Received::Frame(_)) = decoder.receive_frame() {}
        }
        assert!(decoder.pending_pts.len() <= MAX_PENDING_PTS);
    }
}
