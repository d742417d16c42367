// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use symphonia::default::{get_codecs, get_probe};

use super::error::DecodeError;

/// An Ogg Vorbis stream decoded through symphonia.
///
/// Decoded packets are staged in `pending` as interleaved stereo samples and
/// handed out on demand. Reaching the end of the stream wraps back to the
/// start, matching the fill contract of the other decoders.
pub struct VorbisStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: u32,
    frames: u64,
    pending: Vec<i16>,
    pending_pos: usize,
}

impl VorbisStream {
    pub fn new(data: Vec<u8>) -> Result<VorbisStream, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("ogg");

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Ogg(e.to_string()))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Ogg("no audio track".to_string()))?;
        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| DecodeError::Ogg("sample rate not specified".to_string()))?;
        let channels = params.channels.map(|c| c.count()).unwrap_or(0);
        if channels == 0 || channels > 2 {
            return Err(DecodeError::Unsupported("more than 2 channels"));
        }
        // The mixer needs a playthrough length up front.
        let frames = params
            .n_frames
            .ok_or_else(|| DecodeError::Ogg("unknown stream length".to_string()))?;

        let decoder = get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Ogg(e.to_string()))?;

        Ok(VorbisStream {
            reader,
            decoder,
            track_id,
            sample_rate,
            frames,
            pending: Vec::new(),
            pending_pos: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn rewind(&mut self) {
        let _ = self.seek_start();
        self.pending.clear();
        self.pending_pos = 0;
    }

    /// Fills `dst` with interleaved stereo samples, seeking back to the start
    /// of the stream when it runs out. The fill contract has no error path;
    /// if the stream stops producing data entirely, the remainder of `dst`
    /// is silence.
    pub fn fill(&mut self, dst: &mut [i16]) {
        let mut i = 0;
        let mut attempts = 0;
        while i < dst.len() {
            if self.pending_pos < self.pending.len() {
                let n = (dst.len() - i).min(self.pending.len() - self.pending_pos);
                dst[i..i + n]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                i += n;
                attempts = 0;
                continue;
            }

            if attempts >= 4 {
                dst[i..].fill(0);
                return;
            }
            attempts += 1;

            match self.decode_next() {
                Ok(true) => {}
                // End of stream: wrap to the beginning and keep filling.
                Ok(false) => {
                    if self.seek_start().is_err() {
                        dst[i..].fill(0);
                        return;
                    }
                }
                Err(_) => {}
            }
        }
    }

    fn seek_start(&mut self) -> Result<(), SymphoniaError> {
        self.reader.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::default(),
                track_id: Some(self.track_id),
            },
        )?;
        self.decoder.reset();
        Ok(())
    }

    /// Decodes the next audio packet into `pending`. Returns Ok(false) at end
    /// of stream.
    fn decode_next(&mut self) -> Result<bool, SymphoniaError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false)
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(e),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // A single malformed packet is skipped, not fatal.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(e),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending_pos = 0;
            let samples = buf.samples();
            if spec.channels.count() == 1 {
                self.pending.reserve(samples.len() * 2);
                for &s in samples {
                    self.pending.push(s);
                    self.pending.push(s);
                }
            } else {
                self.pending.extend_from_slice(samples);
            }
            return Ok(true);
        }
    }
}
