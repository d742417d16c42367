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
/// Error types for constructing a decoder from raw bytes.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown format or invalid data")]
    UnknownFormat,

    #[error("bad wav header")]
    BadHeader,

    #[error("missing '{0}' subchunk")]
    MissingSubchunk(&'static str),

    #[error("unsupported format: {0}")]
    Unsupported(&'static str),

    #[error("inconsistent wav header: {0}")]
    BadFormat(&'static str),

    #[error("short read while reading samples")]
    Truncated,

    #[error("invalid ogg data: {0}")]
    Ogg(String),
}
