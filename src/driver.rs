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
// Audio output drivers. The Sound Blaster 16 driver is the canonical one; the
// cpal driver realizes the same pull contract on a host audio stack.
pub mod bus;
pub mod config;
pub mod cpal;
pub mod error;
pub mod mock;
pub mod sb16;

#[cfg(test)]
mod tests;

pub use bus::{Bus, DmaRegion};
pub use config::BlasterConfig;
pub use cpal::{list_devices, CpalOutput};
pub use error::DriverError;
pub use mock::MockBus;
pub use sb16::Sb16;

/// The fixed native output rate, in Hz.
pub const NATIVE_RATE: u32 = 22050;

/// Stereo frames per transfer block. One block refills one half of the
/// double buffer, so the hardware buffer holds two blocks.
pub const BLOCK_FRAMES: usize = 1024;

/// Interleaved samples per transfer block.
pub const BLOCK_SAMPLES: usize = BLOCK_FRAMES * 2;

/// The pull contract between a driver and its sample producer: fill the
/// given block of interleaved stereo i16 completely, synchronously, without
/// blocking or failing. Invoked from the interrupt path.
pub type PullFn = Box<dyn FnMut(&mut [i16]) + Send + 'static>;

/// An audio output device that continuously drains a pull callback.
pub trait Output: Send {
    /// Starts continuous output. The callback is invoked once per consumed
    /// block from whatever context the driver services its transfers in.
    fn start(&mut self, pull: PullFn) -> Result<(), DriverError>;

    /// Halts output and releases device resources. Symmetric with `start`;
    /// fails with [`DriverError::NotRunning`] if output was never started.
    fn stop(&mut self) -> Result<(), DriverError>;

    /// The rate at which the device consumes samples.
    fn sample_rate(&self) -> u32 {
        NATIVE_RATE
    }
}
