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
// Fixed-point multi-source mixing engine. All of the hot-path arithmetic is
// integer math with 12 fractional bits; see process_source for the resampling
// loop.
use crate::decode::{DecodeError, Decoder};
use crate::fs::FileLoader;


/// Fractional bits used for playhead positions, rates, and gains.
const FX_BITS: u32 = 12;
const FX_UNIT: i64 = 1 << FX_BITS;
const FX_MASK: i64 = FX_UNIT - 1;

/// Capacity of the per-source staging ring and the master accumulation
/// buffer, in interleaved stereo samples. Must be a power of two so ring
/// indices wrap by masking.
const BUFFER_SIZE: usize = 512;
const BUFFER_MASK: usize = BUFFER_SIZE - 1;

fn fx_from_f64(v: f64) -> i64 {
    (v * FX_UNIT as f64) as i64
}

fn fx_lerp(a: i64, b: i64, p: i64) -> i64 {
    a + (((b - a) * p) >> FX_BITS)
}

/// Playback state of a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Playing,
    Paused,
    Stopped,
}

/// A stable handle to a source owned by a [`Mixer`].
///
/// Handles are generational: destroying a source invalidates every
/// outstanding handle to it, and operations on a stale handle are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId {
    index: u32,
    generation: u32,
}

/// Pairs of lock/unlock calls bracket every mutation of the active-source
/// set and the whole per-source pass inside [`Mixer::process`]. The hook is
/// how a host masks the audio interrupt (or takes a mutex) while shared
/// mixer state is in flux; the mixer itself never blocks.
pub trait LockHook: Send {
    fn lock(&self);
    fn unlock(&self);
}

struct NoopLock;

impl LockHook for NoopLock {
    fn lock(&self) {}
    fn unlock(&self) {}
}

/// Errors from source construction. All other mixer operations operate on an
/// already-validated source and are infallible.
#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("could not load file: {0}")]
    Io(#[from] std::io::Error),
}

struct Source {
    decoder: Decoder,
    /// Staging ring of raw interleaved stereo PCM, kept full by the fill
    /// event so the resampling loop below always has valid neighbours to
    /// interpolate between.
    buffer: [i16; BUFFER_SIZE],
    /// Native sample rate of the decoder.
    samplerate: u32,
    /// Stream length in frames.
    length: i64,
    /// End frame of the current playthrough.
    end: i64,
    state: SourceState,
    /// Playhead position in frames, fixed point.
    position: i64,
    /// Left/right gain, fixed point, derived from gain and pan.
    lgain: i64,
    rgain: i64,
    /// Playback rate in source frames per output frame, fixed point.
    rate: i64,
    /// Next frame index at which the staging ring needs refilling.
    nextfill: i64,
    looping: bool,
    /// Deferred rewind: armed by stop(), performed by the next mix pass.
    rewind: bool,
    /// Whether the source is a member of the active set.
    active: bool,
    gain: f64,
    pan: f64,
}

struct Slot {
    generation: u32,
    source: Option<Source>,
}

/// The mixing engine. Owns every source, composites all playing sources into
/// interleaved stereo i16 blocks on demand, and never allocates or blocks
/// inside [`Mixer::process`].
pub struct Mixer {
    slots: Vec<Slot>,
    free: Vec<usize>,
    /// Sources currently eligible for iteration by process (Playing or
    /// Paused). Only ever mutated between lock/unlock.
    active: Vec<SourceId>,
    lock: Box<dyn LockHook>,
    /// Master accumulation buffer, 32 bits per channel sample.
    accum: [i32; BUFFER_SIZE],
    samplerate: u32,
    /// Master gain, fixed point.
    gain: i64,
    /// Single-slot last error; read-and-clear via take_error.
    last_error: Option<String>,
}

impl Mixer {
    /// Creates a mixer producing audio at `samplerate`, with unity master
    /// gain, an empty active set, and a no-op lock hook.
    pub fn new(samplerate: u32) -> Mixer {
        Mixer {
            slots: Vec::new(),
            free: Vec::new(),
            active: Vec::new(),
            lock: Box::new(NoopLock),
            accum: [0; BUFFER_SIZE],
            samplerate,
            gain: FX_UNIT,
            last_error: None,
        }
    }

    /// Replaces the lock hook. Must happen before any concurrent access to
    /// the mixer begins.
    pub fn set_lock(&mut self, lock: Box<dyn LockHook>) {
        self.lock = lock;
    }

    pub fn set_master_gain(&mut self, gain: f64) {
        self.gain = fx_from_f64(gain);
    }

    pub fn sample_rate(&self) -> u32 {
        self.samplerate
    }

    /// Returns and clears the most recent source-construction error message.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    fn fail(&mut self, err: MixerError) -> MixerError {
        self.last_error = Some(err.to_string());
        err
    }

    /// Creates a detached source from an already-constructed decoder. The
    /// source starts stopped with a rewind pending, so its first playback
    /// always begins at frame 0.
    pub fn new_source(&mut self, decoder: Decoder) -> SourceId {
        let samplerate = decoder.sample_rate();
        let length = decoder.frames() as i64;
        let source = Source {
            decoder,
            buffer: [0; BUFFER_SIZE],
            samplerate,
            length,
            end: 0,
            state: SourceState::Stopped,
            position: 0,
            lgain: 0,
            rgain: 0,
            rate: 0,
            nextfill: 0,
            looping: false,
            rewind: false,
            active: false,
            gain: 0.0,
            pan: 0.0,
        };

        let id = match self.free.pop() {
            Some(index) => {
                self.slots[index].source = Some(source);
                SourceId {
                    index: index as u32,
                    generation: self.slots[index].generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    source: Some(source),
                });
                SourceId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        self.set_gain(id, 1.0);
        self.set_pan(id, 0.0);
        self.set_pitch(id, 1.0);
        self.set_loop(id, false);
        self.stop(id);
        id
    }

    /// Sniffs `data` for a known container signature and creates a source
    /// from it. Failures are also recorded in the last-error slot.
    pub fn source_from_bytes(&mut self, data: Vec<u8>) -> Result<SourceId, MixerError> {
        match Decoder::from_bytes(data) {
            Ok(decoder) => Ok(self.new_source(decoder)),
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Loads `name` through the given loader and creates a source from the
    /// bytes. The loader owns the question of where bytes come from.
    pub fn source_from_file(
        &mut self,
        loader: &dyn FileLoader,
        name: &str,
    ) -> Result<SourceId, MixerError> {
        let data = match loader.load(name) {
            Ok(data) => data,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.source_from_bytes(data)
    }

    fn source(&self, id: SourceId) -> Option<&Source> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.source.as_ref()
    }

    fn source_mut(&mut self, id: SourceId) -> Option<&mut Source> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.source.as_mut()
    }

    /// Starts (or resumes) playback. Pushing onto the active set happens at
    /// most once per source; replaying an already-active source only flips
    /// its state.
    pub fn play(&mut self, id: SourceId) {
        self.lock.lock();
        let mut link = false;
        if let Some(src) = self.source_mut(id) {
            src.state = SourceState::Playing;
            if !src.active {
                src.active = true;
                link = true;
            }
        }
        if link {
            self.active.push(id);
        }
        self.lock.unlock();
    }

    /// Pauses playback. The source stays in the active set but emits no
    /// audio until resumed.
    pub fn pause(&mut self, id: SourceId) {
        if let Some(src) = self.source_mut(id) {
            src.state = SourceState::Paused;
        }
    }

    /// Stops playback and arms the deferred rewind. The playhead itself is
    /// untouched until the next mix pass, so stopping never has to
    /// synchronise with whatever context calls process next.
    pub fn stop(&mut self, id: SourceId) {
        if let Some(src) = self.source_mut(id) {
            src.state = SourceState::Stopped;
            src.rewind = true;
        }
    }

    /// Destroys a source. Unlinking from the active set happens under the
    /// lock hook; the decoder itself is dropped outside it, so teardown can
    /// never race a mix pass.
    pub fn destroy(&mut self, id: SourceId) {
        if self.source(id).is_none() {
            return;
        }

        self.lock.lock();
        if let Some(pos) = self.active.iter().position(|&a| a == id) {
            self.active.remove(pos);
        }
        self.lock.unlock();

        let slot = &mut self.slots[id.index as usize];
        slot.source = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index as usize);
    }

    pub fn set_gain(&mut self, id: SourceId, gain: f64) {
        if let Some(src) = self.source_mut(id) {
            src.gain = gain;
            recalc_gains(src);
        }
    }

    /// Sets the stereo position in [-1, 1]. The pan law is linear, not
    /// equal-power.
    pub fn set_pan(&mut self, id: SourceId, pan: f64) {
        if let Some(src) = self.source_mut(id) {
            src.pan = pan.clamp(-1.0, 1.0);
            recalc_gains(src);
        }
    }

    /// Sets the pitch multiplier (> 0). A resulting fixed-point rate of
    /// exactly 1.0 selects the non-interpolated mixing path.
    pub fn set_pitch(&mut self, id: SourceId, pitch: f64) {
        let samplerate = self.samplerate;
        if let Some(src) = self.source_mut(id) {
            let rate = f64::from(src.samplerate) / f64::from(samplerate) * pitch;
            src.rate = fx_from_f64(rate).max(1);
        }
    }

    pub fn set_loop(&mut self, id: SourceId, looping: bool) {
        if let Some(src) = self.source_mut(id) {
            src.looping = looping;
        }
    }

    /// Length of one playthrough, in seconds.
    pub fn get_length(&self, id: SourceId) -> Option<f64> {
        let src = self.source(id)?;
        Some(src.length as f64 / f64::from(src.samplerate))
    }

    /// Playhead position in seconds, wrapped into a single playthrough even
    /// after the raw position has advanced across many loops.
    pub fn get_position(&self, id: SourceId) -> Option<f64> {
        let src = self.source(id)?;
        if src.length == 0 {
            return Some(0.0);
        }
        Some(((src.position >> FX_BITS) % src.length) as f64 / f64::from(src.samplerate))
    }

    pub fn get_state(&self, id: SourceId) -> Option<SourceState> {
        self.source(id).map(|src| src.state)
    }

    /// Whether the source is currently a member of the active set.
    pub fn is_active(&self, id: SourceId) -> bool {
        self.active.contains(&id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// The real-time entry point: mixes every playing source into `dst` as
    /// interleaved stereo i16. Requests larger than the internal buffer are
    /// processed in capacity-sized chunks; callers never need to know the
    /// capacity.
    pub fn process(&mut self, dst: &mut [i16]) {
        let mut dst = dst;
        while dst.len() > BUFFER_SIZE {
            let (head, rest) = dst.split_at_mut(BUFFER_SIZE);
            self.process(head);
            dst = rest;
        }
        let len = dst.len();
        self.accum[..len].fill(0);

        self.lock.lock();
        for i in 0..self.active.len() {
            let id = self.active[i];
            let accum = &mut self.accum;
            if let Some(src) = self.slots[id.index as usize].source.as_mut() {
                // Paused sources stay in the set but neither advance nor mix.
                if src.state == SourceState::Playing {
                    process_source(src, accum, len);
                }
            }
        }
        let slots = &mut self.slots;
        self.active.retain(|id| {
            match slots[id.index as usize].source.as_mut() {
                Some(src) if src.state != SourceState::Stopped => true,
                Some(src) => {
                    src.active = false;
                    false
                }
                None => false,
            }
        });
        self.lock.unlock();

        // Apply master gain and hard-clip into the destination.
        for (out, &acc) in dst.iter_mut().zip(self.accum[..len].iter()) {
            let x = (i64::from(acc) * self.gain) >> FX_BITS;
            *out = x.clamp(-32768, 32767) as i16;
        }
    }

    #[cfg(test)]
    pub(crate) fn gains(&self, id: SourceId) -> (i64, i64) {
        let src = self.source(id).unwrap();
        (src.lgain, src.rgain)
    }
}

/// Linear pan law: left = gain * (pan <= 0 ? 1 : 1 - pan),
/// right = gain * (pan >= 0 ? 1 : 1 + pan).
fn recalc_gains(src: &mut Source) {
    let pan = src.pan;
    let l = src.gain * if pan <= 0.0 { 1.0 } else { 1.0 - pan };
    let r = src.gain * if pan >= 0.0 { 1.0 } else { 1.0 + pan };
    src.lgain = fx_from_f64(l);
    src.rgain = fx_from_f64(r);
}

/// Performs the deferred rewind: resets the decoder's read cursor, zeroes
/// the playhead, and re-arms the staging ring for an immediate refill.
fn rewind_source(src: &mut Source) {
    src.decoder.rewind();
    src.position = 0;
    src.rewind = false;
    src.end = src.length;
    src.nextfill = 0;
}

/// Advances one playing source by up to `len` output samples, accumulating
/// into `accum`. Fixed-point throughout; no allocation.
fn process_source(src: &mut Source, accum: &mut [i32; BUFFER_SIZE], mut len: usize) {
    let mut dst = 0;

    if src.rewind {
        rewind_source(src);
    }

    while len > 0 {
        let frame = src.position >> FX_BITS;

        // Refill the staging ring shortly before the playhead reaches the
        // last fresh frames; the extra 3-frame margin keeps interpolation
        // neighbours valid.
        if frame + 3 >= src.nextfill {
            let offset = ((src.nextfill * 2) as usize) & BUFFER_MASK;
            src.decoder
                .fill(&mut src.buffer[offset..offset + BUFFER_SIZE / 2]);
            src.nextfill += (BUFFER_SIZE / 4) as i64;
        }

        // End of the current playthrough. The ring is filled continuously,
        // so the end index just moves one whole length further out; without
        // looping the source stops here instead.
        if frame >= src.end {
            src.end = frame + src.length;
            if !src.looping {
                src.state = SourceState::Stopped;
                break;
            }
        }

        // Frames available before the next refill boundary or playthrough
        // end, converted to output frames at the current rate.
        let n = (src.nextfill - 2).min(src.end) - frame;
        let mut count = (n << FX_BITS) / src.rate;
        count = count.max(1).min(len as i64 / 2);
        len -= (count * 2) as usize;

        if src.rate == FX_UNIT {
            // Unity rate: no interpolation.
            let mut n = (frame * 2) as usize;
            for _ in 0..count {
                accum[dst] += ((i64::from(src.buffer[n & BUFFER_MASK]) * src.lgain)
                    >> FX_BITS) as i32;
                accum[dst + 1] += ((i64::from(src.buffer[(n + 1) & BUFFER_MASK]) * src.rgain)
                    >> FX_BITS) as i32;
                n += 2;
                dst += 2;
            }
            src.position += count * FX_UNIT;
        } else {
            // Fractional rate: linear interpolation between adjacent frames.
            for _ in 0..count {
                let n = ((src.position >> FX_BITS) * 2) as usize;
                let p = src.position & FX_MASK;
                let a = i64::from(src.buffer[n & BUFFER_MASK]);
                let b = i64::from(src.buffer[(n + 2) & BUFFER_MASK]);
                accum[dst] += ((fx_lerp(a, b, p) * src.lgain) >> FX_BITS) as i32;
                let a = i64::from(src.buffer[(n + 1) & BUFFER_MASK]);
                let b = i64::from(src.buffer[(n + 3) & BUFFER_MASK]);
                accum[dst + 1] += ((fx_lerp(a, b, p) * src.rgain) >> FX_BITS) as i32;
                src.position += src.rate;
                dst += 2;
            }
        }
    }
}
