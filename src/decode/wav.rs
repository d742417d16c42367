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
use super::error::DecodeError;

const AUDIO_FORMAT_PCM: u16 = 1;

/// An uncompressed PCM WAV container held in memory.
///
/// Supports 8 and 16 bit depths, mono and stereo. The read cursor loops back
/// to the start of the data chunk whenever a fill request outruns it, so the
/// stream can satisfy the mixer's keep-the-ring-full contract regardless of
/// the file's length.
pub struct WavStream {
    data: Vec<u8>,
    /// Byte offset of the PCM data chunk within `data`.
    start: usize,
    bits: u16,
    channels: u16,
    sample_rate: u32,
    frames: u64,
    /// Read cursor, in frames.
    cursor: u64,
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Scans the RIFF chunk list for the subchunk tagged `id` and returns its
/// payload offset and size.
fn find_subchunk(data: &[u8], id: &[u8; 4]) -> Option<(usize, usize)> {
    let mut p = 12;
    while p + 8 <= data.len() {
        let size = read_u32(data, p + 4) as usize;
        if &data[p..p + 4] == id {
            return Some((p + 8, size));
        }
        p += 8 + size;
    }
    None
}

impl WavStream {
    pub fn new(data: Vec<u8>) -> Result<WavStream, DecodeError> {
        if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
            return Err(DecodeError::BadHeader);
        }

        let (fmt, fmt_size) =
            find_subchunk(&data, b"fmt ").ok_or(DecodeError::MissingSubchunk("fmt"))?;
        if fmt_size < 16 || fmt + 16 > data.len() {
            return Err(DecodeError::BadHeader);
        }

        let format = read_u16(&data, fmt);
        let channels = read_u16(&data, fmt + 2);
        let sample_rate = read_u32(&data, fmt + 4);
        let byte_rate = read_u32(&data, fmt + 8);
        let block_align = read_u16(&data, fmt + 12);
        let bits = read_u16(&data, fmt + 14);

        if format != AUDIO_FORMAT_PCM {
            return Err(DecodeError::Unsupported("expected uncompressed PCM"));
        }
        if channels == 0 || sample_rate == 0 || bits == 0 {
            return Err(DecodeError::BadFormat("zeroed fmt field"));
        }
        if channels > 2 {
            return Err(DecodeError::Unsupported("more than 2 channels"));
        }
        if bits != 8 && bits != 16 {
            return Err(DecodeError::Unsupported("expected 8 or 16 bits per sample"));
        }
        // Byte rate and block alignment must agree with the values derived
        // from the rest of the header, or the file is rejected outright.
        let frame_bytes = u32::from(channels) * u32::from(bits) / 8;
        if byte_rate != sample_rate * frame_bytes {
            return Err(DecodeError::BadFormat("byte rate does not match"));
        }
        if u32::from(block_align) != frame_bytes {
            return Err(DecodeError::BadFormat("block alignment does not match"));
        }

        let (start, size) =
            find_subchunk(&data, b"data").ok_or(DecodeError::MissingSubchunk("data"))?;
        if start + size > data.len() {
            return Err(DecodeError::Truncated);
        }

        let frames = (size as u64 / u64::from(bits / 8)) / u64::from(channels);

        Ok(WavStream {
            data,
            start,
            bits,
            channels,
            sample_rate,
            frames,
            cursor: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn sample16(&self, index: usize) -> i16 {
        let p = self.start + index * 2;
        i16::from_le_bytes([self.data[p], self.data[p + 1]])
    }

    fn sample8(&self, index: usize) -> i16 {
        (i16::from(self.data[self.start + index]) - 128) << 8
    }

    /// Fills `dst` with interleaved stereo samples, wrapping the cursor back
    /// to frame 0 whenever the data chunk is exhausted.
    pub fn fill(&mut self, dst: &mut [i16]) {
        if self.frames == 0 {
            dst.fill(0);
            return;
        }

        let mut i = 0;
        while i < dst.len() {
            let want = (dst.len() - i) / 2;
            let n = want.min((self.frames - self.cursor) as usize);
            let cur = self.cursor as usize;
            match (self.bits, self.channels) {
                (16, 1) => {
                    for f in 0..n {
                        let s = self.sample16(cur + f);
                        dst[i + f * 2] = s;
                        dst[i + f * 2 + 1] = s;
                    }
                }
                (16, 2) => {
                    for f in 0..n {
                        dst[i + f * 2] = self.sample16((cur + f) * 2);
                        dst[i + f * 2 + 1] = self.sample16((cur + f) * 2 + 1);
                    }
                }
                (8, 1) => {
                    for f in 0..n {
                        let s = self.sample8(cur + f);
                        dst[i + f * 2] = s;
                        dst[i + f * 2 + 1] = s;
                    }
                }
                (8, 2) => {
                    for f in 0..n {
                        dst[i + f * 2] = self.sample8((cur + f) * 2);
                        dst[i + f * 2 + 1] = self.sample8((cur + f) * 2 + 1);
                    }
                }
                // Rejected during construction.
                _ => unreachable!("unsupported wav layout"),
            }
            self.cursor += n as u64;
            i += n * 2;
            if self.cursor >= self.frames {
                self.cursor = 0;
            }
        }
    }
}
