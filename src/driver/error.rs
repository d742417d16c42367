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
use thiserror::Error;

/// Driver failures. All of these surface synchronously from start/stop
/// paths; the interrupt service path has no error states.
#[derive(Debug, Error)]
pub enum DriverError {
    /// No device configuration was present in the environment.
    #[error("BLASTER environment variable not set")]
    NotConfigured,

    /// A device configuration was present but could not be parsed.
    #[error("invalid device configuration: {0}")]
    InvalidConfig(&'static str),

    /// The device never acknowledged the reset handshake. Distinct from
    /// resource errors so callers can tell "no compatible hardware" from
    /// "out of memory".
    #[error("device did not acknowledge reset")]
    ResetTimeout,

    /// No DMA-reachable buffer satisfying the 64K alignment constraint
    /// could be allocated.
    #[error("could not allocate a DMA-safe sample buffer")]
    BufferAllocation,

    /// A stop or control operation was issued while output was not running.
    #[error("output is not running")]
    NotRunning,

    /// The device did not raise the interrupt that completes the stop
    /// sequence within the polling bound.
    #[error("device did not acknowledge stop request")]
    StopTimeout,

    /// A host audio backend failure, from the cpal driver.
    #[error("audio host error: {0}")]
    Host(String),
}
