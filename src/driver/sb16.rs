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
// Sound Blaster 16 driver: DSP reset and command protocol, 8237 DMA
// controller programming for continuous auto-initialized 16-bit transfer,
// and the interrupt service routine that refills the double buffer from the
// pull callback.
use tracing::{info, warn};

use crate::driver::bus::{Bus, DmaRegion};
use crate::driver::config::BlasterConfig;
use crate::driver::error::DriverError;
use crate::driver::{Output, PullFn, BLOCK_SAMPLES, NATIVE_RATE};

// DSP port offsets from the base address.
const RESET_PORT: u16 = 0x6;
const READ_PORT: u16 = 0xA;
const WRITE_PORT: u16 = 0xC;
const READ_STATUS_PORT: u16 = 0xE;
const ACK_16BIT_PORT: u16 = 0xF;
const MIXER_ADDR_PORT: u16 = 0x4;
const MIXER_DATA_PORT: u16 = 0x5;

const MIXER_IRQ_STATUS: u8 = 0x82;
const IRQ_STATUS_16BIT: u8 = 0x02;
const READ_STATUS_AVAIL: u8 = 0x80;
const WRITE_STATUS_BUSY: u8 = 0x80;
const READY_BYTE: u8 = 0xAA;

// DSP commands.
const CMD_SET_OUTPUT_RATE: u8 = 0x41;
const CMD_PROGRAM_16BIT: u8 = 0xB0;
const FLAG_FIFO: u8 = 0x02;
const FLAG_AUTO_INIT: u8 = 0x04;
const MODE_SIGNED: u8 = 0x10;
const MODE_STEREO: u8 = 0x20;
const CMD_SPEAKER_ON: u8 = 0xD1;
const CMD_SPEAKER_OFF: u8 = 0xD3;
const CMD_EXIT_AUTO_DMA: u8 = 0xD9;

// Interrupt controllers.
const PIC1_COMMAND: u16 = 0x20;
const PIC2_COMMAND: u16 = 0xA0;
const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;
const PIC_EOI: u8 = 0x20;
const VEC_IRQ0: u8 = 0x08;
const VEC_IRQ8: u8 = 0x70;

// 8237 mode bits.
const DMA_READ_FROM_MEMORY: u8 = 0x04;
const DMA_AUTO_INIT: u8 = 0x10;
const DMA_MODE_BLOCK: u8 = 0x80;

const RESET_RETRIES: usize = 1000;
const ALLOC_RETRIES: usize = 10;
const DSP_SPIN_LIMIT: usize = 10_000;
const STOP_POLL_LIMIT: usize = 10_000;

/// The whole hardware buffer: two transfer halves of interleaved stereo i16.
const BUFFER_BYTES: usize = BLOCK_SAMPLES * 2 * 2;
const HALF_BYTES: usize = BUFFER_BYTES / 2;

struct DmaPorts {
    addr: u16,
    count: u16,
    mask: u16,
    mode: u16,
    flipflop: u16,
    page: u16,
}

/// 8237 register addresses per channel. Channels 0-3 are on the 8-bit
/// controller, 4-7 on the 16-bit one.
const DMA_PORTS: [DmaPorts; 8] = [
    DmaPorts { addr: 0x00, count: 0x01, mask: 0x0A, mode: 0x0B, flipflop: 0x0C, page: 0x87 },
    DmaPorts { addr: 0x02, count: 0x03, mask: 0x0A, mode: 0x0B, flipflop: 0x0C, page: 0x83 },
    DmaPorts { addr: 0x04, count: 0x05, mask: 0x0A, mode: 0x0B, flipflop: 0x0C, page: 0x81 },
    DmaPorts { addr: 0x06, count: 0x07, mask: 0x0A, mode: 0x0B, flipflop: 0x0C, page: 0x82 },
    DmaPorts { addr: 0xC0, count: 0xC2, mask: 0xD4, mode: 0xD6, flipflop: 0xD8, page: 0x8F },
    DmaPorts { addr: 0xC4, count: 0xC6, mask: 0xD4, mode: 0xD6, flipflop: 0xD8, page: 0x8B },
    DmaPorts { addr: 0xC8, count: 0xCA, mask: 0xD4, mode: 0xD6, flipflop: 0xD8, page: 0x89 },
    DmaPorts { addr: 0xCC, count: 0xCE, mask: 0xD4, mode: 0xD6, flipflop: 0xD8, page: 0x8A },
];

/// Stop sequence state. The interrupt handler is the only place a requested
/// stop can complete, because exiting auto-init DMA must happen between two
/// transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopState {
    Running,
    Requested,
    Complete,
}

/// A Sound Blaster 16 output driver over a [`Bus`].
///
/// The bus delivers the device interrupt by calling
/// [`Sb16::service_interrupt`]; everything that routine touches is owned by
/// the driver and follows the no-allocation, no-blocking contract.
pub struct Sb16<B: Bus> {
    bus: B,
    config: BlasterConfig,
    buffer: Option<DmaRegion>,
    pull: Option<PullFn>,
    /// Scratch block the pull callback fills, allocated before the device
    /// starts raising interrupts.
    block: Vec<i16>,
    /// Which buffer half the next interrupt refills.
    write_page: usize,
    stop: StopState,
    vector: u8,
    isr_installed: bool,
    running: bool,
}

impl<B: Bus> Sb16<B> {
    pub fn new(bus: B, config: BlasterConfig) -> Sb16<B> {
        Sb16 {
            bus,
            config,
            buffer: None,
            pull: None,
            block: Vec::new(),
            write_page: 0,
            stop: StopState::Running,
            vector: 0,
            isr_installed: false,
            running: false,
        }
    }

    /// Builds a driver configured from the `BLASTER` environment variable.
    pub fn from_env(bus: B) -> Result<Sb16<B>, DriverError> {
        Ok(Sb16::new(bus, BlasterConfig::from_env()?))
    }

    fn write_dsp(&self, value: u8) {
        for _ in 0..DSP_SPIN_LIMIT {
            if self.bus.inb(self.config.base + WRITE_PORT) & WRITE_STATUS_BUSY == 0 {
                break;
            }
            self.bus.delay_us(1);
        }
        self.bus.outb(self.config.base + WRITE_PORT, value);
    }

    fn read_dsp(&self) -> Option<u8> {
        for _ in 0..DSP_SPIN_LIMIT {
            if self.bus.inb(self.config.base + READ_STATUS_PORT) & READ_STATUS_AVAIL != 0 {
                return Some(self.bus.inb(self.config.base + READ_PORT));
            }
            self.bus.delay_us(1);
        }
        None
    }

    /// Reset handshake: pulse the reset line, then poll for the ready byte.
    /// Retried a bounded number of times before giving up.
    fn reset_dsp(&self) -> Result<(), DriverError> {
        for _ in 0..RESET_RETRIES {
            self.bus.outb(self.config.base + RESET_PORT, 1);
            self.bus.delay_us(3);
            self.bus.outb(self.config.base + RESET_PORT, 0);

            if self.read_dsp() == Some(READY_BYTE) {
                return Ok(());
            }
        }
        Err(DriverError::ResetTimeout)
    }

    /// Allocates the hardware sample buffer. The DMA controller cannot cross
    /// a 64K physical boundary mid-transfer, so misaligned allocations are
    /// retried and every rejected attempt is released before returning.
    fn alloc_sample_buffer(&self) -> Result<DmaRegion, DriverError> {
        let mut rejected = Vec::new();
        let mut found = None;

        for _ in 0..ALLOC_RETRIES {
            let Some(region) = self.bus.alloc_dma(BUFFER_BYTES) else {
                break;
            };
            if (region.phys as usize & 0xFFFF) + BUFFER_BYTES <= 0x10000 {
                found = Some(region);
                break;
            }
            rejected.push(region);
        }

        for region in rejected {
            self.bus.free_dma(region);
        }

        found.ok_or(DriverError::BufferAllocation)
    }

    fn install_isr(&mut self) {
        let irq = self.config.irq;
        self.vector = if irq < 8 {
            VEC_IRQ0 + irq
        } else {
            VEC_IRQ8 + irq - 8
        };
        self.bus.install_irq(self.vector);

        // Unmask the line at the owning controller.
        if irq < 8 {
            let mask = self.bus.inb(PIC1_DATA);
            self.bus.outb(PIC1_DATA, mask & !(1 << irq));
        } else {
            let mask = self.bus.inb(PIC2_DATA);
            self.bus.outb(PIC2_DATA, mask & !(1 << (irq - 8)));
        }
        self.isr_installed = true;
    }

    /// Programs the 8237 for continuous auto-initialized transfer of the
    /// whole buffer, then programs the DSP for signed 16-bit stereo output
    /// in half-buffer blocks.
    fn start_transfer(&self, region: &DmaRegion) {
        let channel = (self.config.dma & 7) as usize;
        let ports = &DMA_PORTS[channel];

        let mode = DMA_READ_FROM_MEMORY | DMA_MODE_BLOCK | DMA_AUTO_INIT | (channel as u8 & 0x03);
        let mask_on = (channel as u8 & 0x03) | 0x04;

        // 16-bit channels take word addresses and word counts; the
        // controller doubles them internally.
        let mut offset = region.phys;
        let mut count = BUFFER_BYTES as u32;
        if channel > 3 {
            offset >>= 1;
            count >>= 1;
        }
        let page = (region.phys >> 16) as u8;

        self.bus.outb(ports.mask, mask_on);
        self.bus.outb(ports.flipflop, 0x00);
        self.bus.outb(ports.mode, mode);
        self.bus.outb(ports.addr, offset as u8);
        self.bus.outb(ports.addr, (offset >> 8) as u8);
        self.bus.outb(ports.count, (count - 1) as u8);
        self.bus.outb(ports.count, ((count - 1) >> 8) as u8);
        self.bus.outb(ports.page, page);
        self.bus.outb(ports.mask, mask_on & 0x03);

        self.write_dsp(CMD_SET_OUTPUT_RATE);
        self.write_dsp((NATIVE_RATE >> 8) as u8);
        self.write_dsp(NATIVE_RATE as u8);

        // Block size is in 16-bit samples, minus one, per half.
        let block = (BUFFER_BYTES / 2 / 2 - 1) as u16;
        self.write_dsp(CMD_PROGRAM_16BIT | FLAG_AUTO_INIT | FLAG_FIFO);
        self.write_dsp(MODE_SIGNED | MODE_STEREO);
        self.write_dsp(block as u8);
        self.write_dsp((block >> 8) as u8);
    }

    /// The interrupt service routine body. Reads the device's interrupt
    /// status; on a 16-bit DMA interrupt either completes a requested stop
    /// or pulls one fresh block into the half the device just finished,
    /// flips the half index, and acknowledges. Never allocates or blocks.
    pub fn service_interrupt(&mut self) {
        let base = self.config.base;
        self.bus.outb(base + MIXER_ADDR_PORT, MIXER_IRQ_STATUS);
        let status = self.bus.inb(base + MIXER_DATA_PORT);

        if status & IRQ_STATUS_16BIT != 0 {
            if self.stop == StopState::Requested {
                self.write_dsp(CMD_EXIT_AUTO_DMA);
                self.stop = StopState::Complete;
            } else if let (Some(pull), Some(region)) = (self.pull.as_mut(), self.buffer.as_ref()) {
                pull(&mut self.block);
                self.bus
                    .write_dma(region, self.write_page * HALF_BYTES, &self.block);
                self.write_page = 1 - self.write_page;
                self.bus.inb(base + ACK_16BIT_PORT);
            }
        }

        if self.config.irq >= 8 {
            self.bus.outb(PIC2_COMMAND, PIC_EOI);
        }
        self.bus.outb(PIC1_COMMAND, PIC_EOI);
    }
}

impl<B: Bus> Output for Sb16<B> {
    fn start(&mut self, pull: PullFn) -> Result<(), DriverError> {
        if self.running {
            return Ok(());
        }

        self.reset_dsp()?;
        let region = self.alloc_sample_buffer()?;

        // Start from silence on both halves.
        let zeros = vec![0i16; BLOCK_SAMPLES];
        self.bus.write_dma(&region, 0, &zeros);
        self.bus.write_dma(&region, HALF_BYTES, &zeros);

        self.block = zeros;
        self.pull = Some(pull);
        self.write_page = 0;
        self.stop = StopState::Running;

        self.install_isr();
        self.write_dsp(CMD_SPEAKER_ON);
        self.start_transfer(&region);
        self.buffer = Some(region);
        self.running = true;

        info!(
            base = format!("{:#x}", self.config.base),
            irq = self.config.irq,
            dma = self.config.dma,
            rate = NATIVE_RATE,
            "Sound Blaster output started."
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }

        self.write_dsp(CMD_SPEAKER_OFF);

        // An actively running device always raises at least one more
        // interrupt; pump them until the handler has issued the exit
        // command, with a bound in case the device went away.
        self.stop = StopState::Requested;
        let mut polls = 0;
        while self.stop != StopState::Complete {
            if self.bus.irq_pending() {
                self.service_interrupt();
            } else {
                self.bus.delay_us(100);
            }
            polls += 1;
            if polls > STOP_POLL_LIMIT {
                self.running = false;
                return Err(DriverError::StopTimeout);
            }
        }

        if let Err(e) = self.reset_dsp() {
            warn!(err = %e, "Device reset failed during teardown.");
        }

        if self.isr_installed {
            self.bus.restore_irq(self.vector);
            self.isr_installed = false;
        }
        if let Some(region) = self.buffer.take() {
            self.bus.free_dma(region);
        }
        self.pull = None;
        self.running = false;

        info!("Sound Blaster output stopped.");
        Ok(())
    }
}

impl<B: Bus> Drop for Sb16<B> {
    fn drop(&mut self) {
        if self.running {
            if let Err(e) = self.stop() {
                warn!(err = %e, "Could not stop output during teardown.");
            }
        }
    }
}
