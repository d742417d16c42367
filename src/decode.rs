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
pub mod error;
#[cfg(feature = "vorbis")]
pub mod vorbis;
pub mod wav;

#[cfg(test)]
mod tests;

pub use error::DecodeError;
#[cfg(feature = "vorbis")]
pub use vorbis::VorbisStream;
pub use wav::WavStream;

/// A decoded or decodable audio stream.
///
/// Decoders expose the pull contract the mixer relies on: `fill` must always
/// produce the requested number of interleaved stereo samples, wrapping the
/// internal read cursor back to the start of the stream whenever the
/// underlying data runs out. This internal looping is independent of the
/// mixer's own loop flag; the mixer keeps each source's staging ring full at
/// all times and decides on its own when a playthrough ends.
///
/// Teardown is `Drop`; the mixer guarantees it never drops a decoder while a
/// mix pass could still be reading from it.
pub enum Decoder {
    /// A fixed run of silent frames.
    Silence { frames: u64, sample_rate: u32 },
    /// An in-memory block of raw interleaved PCM.
    Pcm(PcmStream),
    /// An uncompressed PCM WAV container.
    Wav(WavStream),
    /// An Ogg Vorbis stream, decoded through symphonia.
    #[cfg(feature = "vorbis")]
    Vorbis(VorbisStream),
    #[cfg(test)]
    Probe(probe::ProbeStream),
}

/// Returns true if `data` carries `tag` at exactly `offset`.
fn check_tag(data: &[u8], tag: &[u8], offset: usize) -> bool {
    data.len() >= offset + tag.len() && &data[offset..offset + tag.len()] == tag
}

impl Decoder {
    /// Sniffs the container signature of `data` and constructs the matching
    /// decoder. The decoder takes ownership of the bytes. Fails without
    /// leaking a partially constructed stream if the signature is unknown or
    /// the container is malformed or unsupported.
    pub fn from_bytes(data: Vec<u8>) -> Result<Decoder, DecodeError> {
        if check_tag(&data, b"WAVE", 8) {
            return Ok(Decoder::Wav(WavStream::new(data)?));
        }

        if check_tag(&data, b"OggS", 0) {
            #[cfg(feature = "vorbis")]
            return Ok(Decoder::Vorbis(VorbisStream::new(data)?));
            #[cfg(not(feature = "vorbis"))]
            return Err(DecodeError::Unsupported("ogg support not compiled in"));
        }

        Err(DecodeError::UnknownFormat)
    }

    /// A source of `frames` silent frames at the given rate.
    pub fn silence(frames: u64, sample_rate: u32) -> Decoder {
        Decoder::Silence {
            frames,
            sample_rate,
        }
    }

    /// A source over a raw block of interleaved PCM samples. Only mono and
    /// stereo data is accepted.
    pub fn from_pcm(
        samples: Vec<i16>,
        channels: u16,
        sample_rate: u32,
    ) -> Result<Decoder, DecodeError> {
        if channels == 0 || channels > 2 {
            return Err(DecodeError::Unsupported("only 1 or 2 channels"));
        }
        Ok(Decoder::Pcm(PcmStream {
            frames: samples.len() as u64 / u64::from(channels),
            samples,
            channels,
            sample_rate,
            cursor: 0,
        }))
    }

    /// The stream's native sample rate.
    pub fn sample_rate(&self) -> u32 {
        match self {
            Decoder::Silence { sample_rate, .. } => *sample_rate,
            Decoder::Pcm(s) => s.sample_rate,
            Decoder::Wav(s) => s.sample_rate(),
            #[cfg(feature = "vorbis")]
            Decoder::Vorbis(s) => s.sample_rate(),
            #[cfg(test)]
            Decoder::Probe(s) => s.sample_rate,
        }
    }

    /// The stream's total length in frames.
    pub fn frames(&self) -> u64 {
        match self {
            Decoder::Silence { frames, .. } => *frames,
            Decoder::Pcm(s) => s.frames,
            Decoder::Wav(s) => s.frames(),
            #[cfg(feature = "vorbis")]
            Decoder::Vorbis(s) => s.frames(),
            #[cfg(test)]
            Decoder::Probe(s) => s.frames,
        }
    }

    /// Fills `dst` completely with interleaved stereo samples, wrapping the
    /// internal read cursor as needed. Mono streams are duplicated into both
    /// channels. Never fails; a decoder that cannot produce data emits
    /// silence instead.
    pub fn fill(&mut self, dst: &mut [i16]) {
        match self {
            Decoder::Silence { .. } => dst.fill(0),
            Decoder::Pcm(s) => s.fill(dst),
            Decoder::Wav(s) => s.fill(dst),
            #[cfg(feature = "vorbis")]
            Decoder::Vorbis(s) => s.fill(dst),
            #[cfg(test)]
            Decoder::Probe(s) => s.fill(dst),
        }
    }

    /// Resets the internal read cursor to the start of the stream.
    pub fn rewind(&mut self) {
        match self {
            Decoder::Silence { .. } => {}
            Decoder::Pcm(s) => s.cursor = 0,
            Decoder::Wav(s) => s.rewind(),
            #[cfg(feature = "vorbis")]
            Decoder::Vorbis(s) => s.rewind(),
            #[cfg(test)]
            Decoder::Probe(s) => s.rewind(),
        }
    }
}

/// An in-memory block of raw interleaved PCM with a looping read cursor.
pub struct PcmStream {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    frames: u64,
    cursor: u64,
}

impl PcmStream {
    fn fill(&mut self, dst: &mut [i16]) {
        if self.frames == 0 {
            dst.fill(0);
            return;
        }

        let mut i = 0;
        while i < dst.len() {
            let want = (dst.len() - i) / 2;
            let n = want.min((self.frames - self.cursor) as usize);
            if self.channels == 1 {
                for f in 0..n {
                    let s = self.samples[(self.cursor as usize) + f];
                    dst[i + f * 2] = s;
                    dst[i + f * 2 + 1] = s;
                }
            } else {
                let start = (self.cursor as usize) * 2;
                dst[i..i + n * 2].copy_from_slice(&self.samples[start..start + n * 2]);
            }
            self.cursor += n as u64;
            i += n * 2;
            if self.cursor >= self.frames {
                self.cursor = 0;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod probe {
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ProbeEvent {
        Fill,
        Rewind,
        Destroy,
    }

    /// A decoder that records every event it receives; used to verify the
    /// mixer's event ordering guarantees.
    pub struct ProbeStream {
        pub events: Arc<Mutex<Vec<ProbeEvent>>>,
        pub sample_rate: u32,
        pub frames: u64,
    }

    impl ProbeStream {
        pub fn new(sample_rate: u32, frames: u64) -> (Self, Arc<Mutex<Vec<ProbeEvent>>>) {
            let events = Arc::new(Mutex::new(Vec::new()));
            (
                ProbeStream {
                    events: events.clone(),
                    sample_rate,
                    frames,
                },
                events,
            )
        }

        pub fn fill(&mut self, dst: &mut [i16]) {
            self.events.lock().unwrap().push(ProbeEvent::Fill);
            dst.fill(0);
        }

        pub fn rewind(&mut self) {
            self.events.lock().unwrap().push(ProbeEvent::Rewind);
        }
    }

    impl Drop for ProbeStream {
        fn drop(&mut self) {
            self.events.lock().unwrap().push(ProbeEvent::Destroy);
        }
    }
}
