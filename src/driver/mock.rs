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
// A register-level Sound Blaster 16 simulation behind the Bus trait. Models
// the DSP reset handshake, the command/argument protocol, DMA memory, and
// interrupt status, so the real driver can run unmodified against it.
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::bus::{Bus, DmaRegion};

// Port offsets, mirroring the driver's view of the device.
const RESET_PORT: u16 = 0x6;
const READ_PORT: u16 = 0xA;
const WRITE_PORT: u16 = 0xC;
const READ_STATUS_PORT: u16 = 0xE;
const ACK_16BIT_PORT: u16 = 0xF;
const MIXER_ADDR_PORT: u16 = 0x4;
const MIXER_DATA_PORT: u16 = 0x5;
const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;

const MIXER_IRQ_STATUS: u8 = 0x82;

#[derive(Default)]
struct MockState {
    // DSP protocol.
    read_queue: VecDeque<u8>,
    reset_level: u8,
    failing_resets: usize,
    current_cmd: Option<u8>,
    args: Vec<u8>,
    commands: Vec<u8>,

    // Device state driven by DSP commands.
    speaker_on: bool,
    output_rate: Option<u16>,
    program_mode: Option<u8>,
    block_size: Option<u16>,
    auto_dma: bool,

    // Interrupt state.
    mixer_index: u8,
    manual_irq: bool,

    // Interrupt controller masks.
    pic1_mask: u8,
    pic2_mask: u8,
    eoi_pic1: usize,
    eoi_pic2: usize,

    // DMA memory.
    regions: HashMap<u32, Vec<u8>>,
    next_handle: u32,
    scripted_phys: VecDeque<u32>,
    last_handle: Option<u32>,
    frees: usize,

    // Vector bookkeeping.
    installed: Vec<u8>,
    restored: Vec<u8>,

    // Raw log of every port write, in order.
    writes: Vec<(u16, u8)>,
}

/// A simulated bus plus SB16-compatible device. Cloning shares the device
/// state, so tests can hold a handle while the driver owns the bus.
#[derive(Clone)]
pub struct MockBus {
    base: u16,
    state: Arc<Mutex<MockState>>,
}

fn dsp_arg_count(cmd: u8) -> usize {
    match cmd {
        0x41 => 2,
        0xB0..=0xBF => 3,
        _ => 0,
    }
}

impl MockBus {
    pub fn new(base: u16) -> MockBus {
        let state = MockState {
            pic1_mask: 0xFF,
            pic2_mask: 0xFF,
            ..MockState::default()
        };
        MockBus {
            base,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Makes the next `count` reset handshakes fail before the device
    /// starts answering with the ready byte.
    pub fn fail_resets(&self, count: usize) {
        self.state.lock().failing_resets = count;
    }

    /// Queues physical addresses for upcoming DMA allocations. With the
    /// queue empty, allocations land at a boundary-safe default address.
    pub fn script_alloc(&self, phys: &[u32]) {
        self.state.lock().scripted_phys.extend(phys);
    }

    /// Asserts the device interrupt line once.
    pub fn raise_irq(&self) {
        self.state.lock().manual_irq = true;
    }

    fn apply_command(state: &mut MockState, cmd: u8, args: &[u8]) {
        match cmd {
            0x41 => {
                state.output_rate = Some(u16::from(args[0]) << 8 | u16::from(args[1]));
            }
            0xB0..=0xBF => {
                state.program_mode = Some(args[0]);
                state.block_size = Some(u16::from(args[1]) | u16::from(args[2]) << 8);
                state.auto_dma = cmd & 0x04 != 0;
            }
            0xD1 => state.speaker_on = true,
            0xD3 => state.speaker_on = false,
            0xD9 => state.auto_dma = false,
            _ => {}
        }
    }

    fn dsp_write(state: &mut MockState, value: u8) {
        match state.current_cmd {
            Some(cmd) => {
                state.args.push(value);
                if state.args.len() == dsp_arg_count(cmd) {
                    let args = std::mem::take(&mut state.args);
                    MockBus::apply_command(state, cmd, &args);
                    state.current_cmd = None;
                }
            }
            None => {
                state.commands.push(value);
                if dsp_arg_count(value) == 0 {
                    MockBus::apply_command(state, value, &[]);
                } else {
                    state.current_cmd = Some(value);
                }
            }
        }
    }

    // Test accessors.

    pub fn dsp_commands(&self) -> Vec<u8> {
        self.state.lock().commands.clone()
    }

    pub fn speaker_on(&self) -> bool {
        self.state.lock().speaker_on
    }

    pub fn output_rate(&self) -> Option<u16> {
        self.state.lock().output_rate
    }

    pub fn program_mode(&self) -> Option<u8> {
        self.state.lock().program_mode
    }

    pub fn block_size(&self) -> Option<u16> {
        self.state.lock().block_size
    }

    pub fn auto_dma_active(&self) -> bool {
        self.state.lock().auto_dma
    }

    pub fn live_regions(&self) -> usize {
        self.state.lock().regions.len()
    }

    pub fn freed_regions(&self) -> usize {
        self.state.lock().frees
    }

    pub fn installed_vectors(&self) -> Vec<u8> {
        self.state.lock().installed.clone()
    }

    pub fn restored_vectors(&self) -> Vec<u8> {
        self.state.lock().restored.clone()
    }

    pub fn pic1_mask(&self) -> u8 {
        self.state.lock().pic1_mask
    }

    pub fn pic2_mask(&self) -> u8 {
        self.state.lock().pic2_mask
    }

    pub fn eoi_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.eoi_pic1, state.eoi_pic2)
    }

    /// Every byte written to `port`, in write order.
    pub fn port_writes(&self, port: u16) -> Vec<u8> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, v)| *v)
            .collect()
    }

    /// The contents of the most recently allocated live region, as samples.
    pub fn buffer_samples(&self) -> Vec<i16> {
        let state = self.state.lock();
        let Some(handle) = state.last_handle else {
            return Vec::new();
        };
        let Some(bytes) = state.regions.get(&handle) else {
            return Vec::new();
        };
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }
}

impl Bus for MockBus {
    fn outb(&self, port: u16, value: u8) {
        let mut state = self.state.lock();
        state.writes.push((port, value));

        match port {
            p if p == self.base + RESET_PORT => {
                // A 1 -> 0 pulse completes the reset and queues the ready
                // byte, unless the device is scripted to stay silent.
                if state.reset_level == 1 && value == 0 {
                    if state.failing_resets > 0 {
                        state.failing_resets -= 1;
                    } else {
                        state.read_queue.clear();
                        state.read_queue.push_back(0xAA);
                        state.current_cmd = None;
                        state.args.clear();
                        state.auto_dma = false;
                    }
                }
                state.reset_level = value;
            }
            p if p == self.base + WRITE_PORT => MockBus::dsp_write(&mut state, value),
            p if p == self.base + MIXER_ADDR_PORT => state.mixer_index = value,
            PIC1_DATA => state.pic1_mask = value,
            PIC2_DATA => state.pic2_mask = value,
            0x20 if value == 0x20 => state.eoi_pic1 += 1,
            0xA0 if value == 0x20 => state.eoi_pic2 += 1,
            _ => {}
        }
    }

    fn inb(&self, port: u16) -> u8 {
        let mut state = self.state.lock();
        match port {
            p if p == self.base + READ_STATUS_PORT => {
                if state.read_queue.is_empty() {
                    0
                } else {
                    0x80
                }
            }
            p if p == self.base + READ_PORT => state.read_queue.pop_front().unwrap_or(0),
            p if p == self.base + WRITE_PORT => 0,
            p if p == self.base + MIXER_DATA_PORT => {
                if state.mixer_index == MIXER_IRQ_STATUS
                    && (state.manual_irq || state.auto_dma)
                {
                    0x02
                } else {
                    0
                }
            }
            p if p == self.base + ACK_16BIT_PORT => {
                state.manual_irq = false;
                0
            }
            PIC1_DATA => state.pic1_mask,
            PIC2_DATA => state.pic2_mask,
            _ => 0,
        }
    }

    fn delay_us(&self, _us: u64) {}

    fn alloc_dma(&self, len: usize) -> Option<DmaRegion> {
        let mut state = self.state.lock();
        let phys = state.scripted_phys.pop_front().unwrap_or(0x2_0000);
        let handle = state.next_handle;
        state.next_handle += 1;
        state.regions.insert(handle, vec![0; len]);
        state.last_handle = Some(handle);
        Some(DmaRegion { phys, handle })
    }

    fn free_dma(&self, region: DmaRegion) {
        let mut state = self.state.lock();
        state.regions.remove(&region.handle);
        state.frees += 1;
    }

    fn write_dma(&self, region: &DmaRegion, offset: usize, data: &[i16]) {
        let mut state = self.state.lock();
        if let Some(bytes) = state.regions.get_mut(&region.handle) {
            for (i, &sample) in data.iter().enumerate() {
                let at = offset + i * 2;
                if at + 2 <= bytes.len() {
                    bytes[at..at + 2].copy_from_slice(&sample.to_le_bytes());
                }
            }
        }
    }

    fn install_irq(&self, vector: u8) {
        self.state.lock().installed.push(vector);
    }

    fn restore_irq(&self, vector: u8) {
        self.state.lock().restored.push(vector);
    }

    fn irq_pending(&self) -> bool {
        let state = self.state.lock();
        state.manual_irq || state.auto_dma
    }
}
