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

use super::error::DecodeError;
use super::wav::WavStream;
use super::Decoder;

/// Builds a minimal canonical WAV file around the given raw sample bytes.
fn wav_bytes(channels: u16, bits: u16, rate: u32, data: &[u8]) -> Vec<u8> {
    let frame_bytes = u32::from(channels) * u32::from(bits) / 8;
    let mut v = Vec::new();
    v.extend_from_slice(b"RIFF");
    v.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    v.extend_from_slice(b"WAVE");
    v.extend_from_slice(b"fmt ");
    v.extend_from_slice(&16u32.to_le_bytes());
    v.extend_from_slice(&1u16.to_le_bytes());
    v.extend_from_slice(&channels.to_le_bytes());
    v.extend_from_slice(&rate.to_le_bytes());
    v.extend_from_slice(&(rate * frame_bytes).to_le_bytes());
    v.extend_from_slice(&(frame_bytes as u16).to_le_bytes());
    v.extend_from_slice(&bits.to_le_bytes());
    v.extend_from_slice(b"data");
    v.extend_from_slice(&(data.len() as u32).to_le_bytes());
    v.extend_from_slice(data);
    v
}

fn pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[test]
fn test_parse_mono_16bit() {
    let wav = WavStream::new(wav_bytes(1, 16, 22050, &pcm16(&[100, -100, 200]))).unwrap();
    assert_eq!(wav.sample_rate(), 22050);
    assert_eq!(wav.frames(), 3);
}

#[test]
fn test_parse_hound_output() {
    // A WAV authored by hound must parse identically to a hand-built one.
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 22050,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [100i16, -100, 200, -200] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    let mut wav = WavStream::new(cursor.into_inner()).unwrap();
    assert_eq!(wav.sample_rate(), 22050);
    assert_eq!(wav.frames(), 4);

    let mut out = [0i16; 8];
    wav.fill(&mut out);
    assert_eq!(out, [100, 100, -100, -100, 200, 200, -200, -200]);
}

#[test]
fn test_mono_fill_duplicates_and_wraps() {
    let mut wav = WavStream::new(wav_bytes(1, 16, 22050, &pcm16(&[1, 2, 3]))).unwrap();
    let mut out = [0i16; 10];
    wav.fill(&mut out);
    // Three frames then wrap back to the start.
    assert_eq!(out, [1, 1, 2, 2, 3, 3, 1, 1, 2, 2]);
}

#[test]
fn test_stereo_fill_passthrough() {
    let mut wav = WavStream::new(wav_bytes(2, 16, 44100, &pcm16(&[10, -10, 20, -20]))).unwrap();
    assert_eq!(wav.frames(), 2);
    let mut out = [0i16; 4];
    wav.fill(&mut out);
    assert_eq!(out, [10, -10, 20, -20]);
}

#[test]
fn test_8bit_scaling() {
    let mut wav = WavStream::new(wav_bytes(1, 8, 11025, &[0, 128, 255])).unwrap();
    let mut out = [0i16; 6];
    wav.fill(&mut out);
    assert_eq!(out, [-32768, -32768, 0, 0, 32512, 32512]);
}

#[test]
fn test_rewind_resets_cursor() {
    let mut wav = WavStream::new(wav_bytes(1, 16, 22050, &pcm16(&[7, 8, 9, 10]))).unwrap();
    let mut out = [0i16; 4];
    wav.fill(&mut out);
    wav.rewind();
    wav.fill(&mut out);
    assert_eq!(out, [7, 7, 8, 8]);
}

#[test]
fn test_rejects_bad_magic() {
    assert!(matches!(
        WavStream::new(b"RIFFxxxxJUNK".to_vec()),
        Err(DecodeError::BadHeader)
    ));
}

#[test]
fn test_rejects_missing_fmt() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&4u32.to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    assert!(matches!(
        WavStream::new(bytes),
        Err(DecodeError::MissingSubchunk("fmt"))
    ));
}

#[test]
fn test_rejects_non_pcm() {
    let mut bytes = wav_bytes(1, 16, 22050, &pcm16(&[0]));
    // Patch the audio format code to something other than PCM.
    bytes[20] = 2;
    assert!(matches!(
        WavStream::new(bytes),
        Err(DecodeError::Unsupported(_))
    ));
}

#[test]
fn test_rejects_too_many_channels() {
    let mut bytes = wav_bytes(2, 16, 22050, &pcm16(&[0, 0, 0]));
    bytes[22] = 3;
    assert!(matches!(
        WavStream::new(bytes),
        Err(DecodeError::Unsupported(_)) | Err(DecodeError::BadFormat(_))
    ));
}

#[test]
fn test_rejects_unsupported_bit_depth() {
    let bytes = wav_bytes(1, 24, 22050, &[0, 0, 0]);
    assert!(matches!(
        WavStream::new(bytes),
        Err(DecodeError::Unsupported(_))
    ));
}

#[test]
fn test_rejects_wrong_byte_rate() {
    let mut bytes = wav_bytes(1, 16, 22050, &pcm16(&[0]));
    bytes[28] = bytes[28].wrapping_add(1);
    assert!(matches!(
        WavStream::new(bytes),
        Err(DecodeError::BadFormat("byte rate does not match"))
    ));
}

#[test]
fn test_rejects_wrong_block_align() {
    let mut bytes = wav_bytes(1, 16, 22050, &pcm16(&[0]));
    bytes[32] = bytes[32].wrapping_add(1);
    assert!(matches!(
        WavStream::new(bytes),
        Err(DecodeError::BadFormat("block alignment does not match"))
    ));
}

#[test]
fn test_rejects_truncated_data() {
    let mut bytes = wav_bytes(1, 16, 22050, &pcm16(&[1, 2]));
    // Claim more data than the file carries.
    let len = bytes.len();
    bytes[len - 4 - 2 * 2..len - 2 * 2].copy_from_slice(&100u32.to_le_bytes());
    assert!(matches!(WavStream::new(bytes), Err(DecodeError::Truncated)));
}

#[test]
fn test_sniff_wav_signature() {
    let decoder = Decoder::from_bytes(wav_bytes(1, 16, 22050, &pcm16(&[5]))).unwrap();
    assert!(matches!(decoder, Decoder::Wav(_)));
    assert_eq!(decoder.sample_rate(), 22050);
    assert_eq!(decoder.frames(), 1);
}

#[test]
fn test_sniff_unknown_signature() {
    assert!(matches!(
        Decoder::from_bytes(vec![0u8; 64]),
        Err(DecodeError::UnknownFormat)
    ));
}

#[test]
fn test_pcm_rejects_bad_channel_count() {
    assert!(matches!(
        Decoder::from_pcm(vec![0; 6], 3, 22050),
        Err(DecodeError::Unsupported(_))
    ));
}

#[test]
fn test_pcm_fill_wraps() {
    let mut decoder = Decoder::from_pcm(vec![1, 2], 1, 22050).unwrap();
    assert_eq!(decoder.frames(), 2);
    let mut out = [0i16; 6];
    decoder.fill(&mut out);
    assert_eq!(out, [1, 1, 2, 2, 1, 1]);
}

#[test]
fn test_silence_fill() {
    let mut decoder = Decoder::silence(100, 22050);
    assert_eq!(decoder.frames(), 100);
    let mut out = [7i16; 8];
    decoder.fill(&mut out);
    assert_eq!(out, [0; 8]);
}
