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

/// A block of memory reachable by the DMA controller.
///
/// `phys` is the physical start address the controller is programmed with;
/// `handle` identifies the allocation to the bus that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaRegion {
    pub phys: u32,
    pub handle: u32,
}

/// The platform seam the Sound Blaster driver runs against: port I/O,
/// bounded delays, DMA-reachable memory, and interrupt vector management.
///
/// Every method must be non-blocking and infallible apart from `alloc_dma`;
/// the interrupt service path calls `outb`/`inb`/`write_dma` directly.
pub trait Bus: Send {
    /// Writes one byte to an I/O port.
    fn outb(&self, port: u16, value: u8);

    /// Reads one byte from an I/O port.
    fn inb(&self, port: u16) -> u8;

    /// Busy-waits for at least `us` microseconds.
    fn delay_us(&self, us: u64);

    /// Allocates `len` bytes of DMA-reachable memory, zeroed. Returns None
    /// when the platform is out of such memory. No alignment guarantees;
    /// the driver checks the 64K constraint itself and retries.
    fn alloc_dma(&self, len: usize) -> Option<DmaRegion>;

    /// Releases a region obtained from `alloc_dma`.
    fn free_dma(&self, region: DmaRegion);

    /// Copies `data` into the region at the given byte offset, little
    /// endian. Called from the interrupt service path.
    fn write_dma(&self, region: &DmaRegion, offset: usize, data: &[i16]);

    /// Chains the driver's interrupt handler onto `vector`, preserving the
    /// previous handler for `restore_irq`.
    fn install_irq(&self, vector: u8);

    /// Restores the handler that was on `vector` before `install_irq`.
    fn restore_irq(&self, vector: u8);

    /// Whether the device interrupt is currently asserted. Used by the
    /// teardown path to pump outstanding interrupts while waiting for the
    /// stop sequence to complete.
    fn irq_pending(&self) -> bool;
}
