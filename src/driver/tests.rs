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
use std::sync::atomic::{AtomicI16, Ordering};
use std::sync::Arc;

use super::*;

const BASE: u16 = 0x220;

fn config() -> BlasterConfig {
    BlasterConfig {
        base: BASE,
        irq: 5,
        dma: 5,
    }
}

fn started(bus: &MockBus) -> Sb16<MockBus> {
    let mut drv = Sb16::new(bus.clone(), config());
    drv.start(Box::new(|dst: &mut [i16]| dst.fill(0)))
        .expect("driver should start");
    drv
}

/// A pull callback producing a strictly increasing sample ramp, so tests
/// can tell blocks apart.
fn counting_pull() -> (PullFn, Arc<AtomicI16>) {
    let counter = Arc::new(AtomicI16::new(0));
    let c = counter.clone();
    let pull: PullFn = Box::new(move |dst: &mut [i16]| {
        for sample in dst.iter_mut() {
            *sample = c.fetch_add(1, Ordering::SeqCst);
        }
    });
    (pull, counter)
}

#[test]
fn test_parses_blaster_string() {
    let cfg = BlasterConfig::parse("A220 I5 D1 T4 H5").unwrap();
    assert_eq!(cfg.base, 0x220);
    assert_eq!(cfg.irq, 5);
    assert_eq!(cfg.dma, 5);
}

#[test]
fn test_parses_fields_in_any_order() {
    let cfg = BlasterConfig::parse("H7 I10 A240").unwrap();
    assert_eq!(cfg.base, 0x240);
    assert_eq!(cfg.irq, 10);
    assert_eq!(cfg.dma, 7);
}

#[test]
fn test_rejects_missing_fields() {
    assert!(matches!(
        BlasterConfig::parse("A220"),
        Err(DriverError::InvalidConfig(_))
    ));
    assert!(matches!(
        BlasterConfig::parse(""),
        Err(DriverError::InvalidConfig(_))
    ));
    assert!(matches!(
        BlasterConfig::parse("I5 H5"),
        Err(DriverError::InvalidConfig(_))
    ));
}

#[test]
fn test_rejects_malformed_fields() {
    assert!(matches!(
        BlasterConfig::parse("AZZZ I5 H5"),
        Err(DriverError::InvalidConfig(_))
    ));
    assert!(matches!(
        BlasterConfig::parse("A220 I99 H5"),
        Err(DriverError::InvalidConfig(_))
    ));
    assert!(matches!(
        BlasterConfig::parse("A220 I5 H9"),
        Err(DriverError::InvalidConfig(_))
    ));
}

#[test]
fn test_reset_retries_until_device_answers() {
    let bus = MockBus::new(BASE);
    bus.fail_resets(3);
    let _drv = started(&bus);
}

#[test]
fn test_reset_timeout() {
    let bus = MockBus::new(BASE);
    bus.fail_resets(100_000);
    let mut drv = Sb16::new(bus.clone(), config());
    let err = drv
        .start(Box::new(|dst: &mut [i16]| dst.fill(0)))
        .unwrap_err();
    assert!(matches!(err, DriverError::ResetTimeout));
}

#[test]
fn test_alloc_rejects_boundary_straddling_buffers() {
    let bus = MockBus::new(BASE);
    // First two allocations straddle a 64K boundary, the third does not.
    bus.script_alloc(&[0xF000, 0x1_FF00, 0x3_0000]);
    let _drv = started(&bus);

    // Misaligned attempts were released; exactly the good one is live.
    assert_eq!(bus.live_regions(), 1);
    assert_eq!(bus.freed_regions(), 2);
}

#[test]
fn test_alloc_gives_up_after_bounded_retries() {
    let bus = MockBus::new(BASE);
    // Every allocation the driver will try straddles a boundary.
    bus.script_alloc(&[0xFF00; 16]);
    let mut drv = Sb16::new(bus.clone(), config());
    let err = drv
        .start(Box::new(|dst: &mut [i16]| dst.fill(0)))
        .unwrap_err();
    assert!(matches!(err, DriverError::BufferAllocation));
    assert_eq!(bus.live_regions(), 0);
}

#[test]
fn test_programs_device_for_auto_init_stereo_output() {
    let bus = MockBus::new(BASE);
    let _drv = started(&bus);

    assert!(bus.speaker_on());
    assert_eq!(bus.output_rate(), Some(22050));
    // Auto-init FIFO 16-bit output, signed stereo, 2047 samples per half.
    assert!(bus.dsp_commands().contains(&0xB6));
    assert_eq!(bus.program_mode(), Some(0x30));
    assert_eq!(bus.block_size(), Some(2047));
    assert!(bus.auto_dma_active());
}

#[test]
fn test_programs_dma_controller() {
    let bus = MockBus::new(BASE);
    bus.script_alloc(&[0x3_4000]);
    let _drv = started(&bus);

    // Channel 5: mask on with channel bits, then clear.
    assert_eq!(bus.port_writes(0xD4), vec![0x05, 0x01]);
    assert_eq!(bus.port_writes(0xD8), vec![0x00]);
    // Auto-init, read-from-memory, block mode, channel 1 on the second
    // controller.
    assert_eq!(bus.port_writes(0xD6), vec![0x95]);
    // Word address 0x3_4000 >> 1 = 0x1_A000, low 16 bits lo-then-hi.
    assert_eq!(bus.port_writes(0xC4), vec![0x00, 0xA0]);
    // Word count 4096 - 1, lo-then-hi.
    assert_eq!(bus.port_writes(0xC6), vec![0xFF, 0x0F]);
    // Page register holds bits 16..24 of the byte address.
    assert_eq!(bus.port_writes(0x8B), vec![0x03]);
}

#[test]
fn test_interrupt_refills_alternating_halves() {
    let bus = MockBus::new(BASE);
    let mut drv = Sb16::new(bus.clone(), config());
    let (pull, _counter) = counting_pull();
    drv.start(pull).unwrap();

    drv.service_interrupt();
    let samples = bus.buffer_samples();
    assert_eq!(samples.len(), BLOCK_SAMPLES * 2);
    assert_eq!(samples[0], 0);
    assert_eq!(samples[BLOCK_SAMPLES - 1], (BLOCK_SAMPLES - 1) as i16);
    // Second half untouched so far.
    assert_eq!(samples[BLOCK_SAMPLES], 0);
    assert_eq!(samples[BLOCK_SAMPLES + 1], 0);

    drv.service_interrupt();
    let samples = bus.buffer_samples();
    assert_eq!(samples[BLOCK_SAMPLES], BLOCK_SAMPLES as i16);
    assert_eq!(
        samples[2 * BLOCK_SAMPLES - 1],
        (2 * BLOCK_SAMPLES - 1) as i16
    );
    // Third interrupt wraps back to the first half.
    drv.service_interrupt();
    let samples = bus.buffer_samples();
    assert_eq!(samples[0], (2 * BLOCK_SAMPLES) as i16);
}

#[test]
fn test_interrupt_acknowledges_controllers() {
    let bus = MockBus::new(BASE);
    let mut drv = started(&bus);
    drv.service_interrupt();
    let (pic1, pic2) = bus.eoi_counts();
    assert_eq!(pic1, 1);
    assert_eq!(pic2, 0);

    let bus = MockBus::new(BASE);
    let mut drv = Sb16::new(
        bus.clone(),
        BlasterConfig {
            base: BASE,
            irq: 10,
            dma: 5,
        },
    );
    drv.start(Box::new(|dst: &mut [i16]| dst.fill(0))).unwrap();
    drv.service_interrupt();
    let (pic1, pic2) = bus.eoi_counts();
    assert_eq!(pic1, 1);
    assert_eq!(pic2, 1);
}

#[test]
fn test_irq_vector_mapping_and_unmasking() {
    let bus = MockBus::new(BASE);
    let _drv = started(&bus);
    assert_eq!(bus.installed_vectors(), vec![0x0D]);
    // IRQ 5 unmasked at the first controller.
    assert_eq!(bus.pic1_mask() & (1 << 5), 0);

    let bus = MockBus::new(BASE);
    let mut drv = Sb16::new(
        bus.clone(),
        BlasterConfig {
            base: BASE,
            irq: 10,
            dma: 5,
        },
    );
    drv.start(Box::new(|dst: &mut [i16]| dst.fill(0))).unwrap();
    assert_eq!(bus.installed_vectors(), vec![0x72]);
    assert_eq!(bus.pic2_mask() & (1 << 2), 0);
}

#[test]
fn test_stop_sequence() {
    let bus = MockBus::new(BASE);
    let mut drv = started(&bus);
    assert!(bus.auto_dma_active());

    drv.stop().unwrap();
    assert!(!bus.speaker_on());
    assert!(!bus.auto_dma_active());
    assert!(bus.dsp_commands().contains(&0xD9));
    assert_eq!(bus.restored_vectors(), bus.installed_vectors());
    assert_eq!(bus.live_regions(), 0);

    assert!(matches!(drv.stop(), Err(DriverError::NotRunning)));
}

#[test]
fn test_stop_before_start_fails() {
    let bus = MockBus::new(BASE);
    let mut drv = Sb16::new(bus, config());
    assert!(matches!(drv.stop(), Err(DriverError::NotRunning)));
}

#[test]
fn test_drop_tears_down_cleanly() {
    let bus = MockBus::new(BASE);
    {
        let _drv = started(&bus);
    }
    assert!(!bus.auto_dma_active());
    assert_eq!(bus.live_regions(), 0);
    assert_eq!(bus.restored_vectors(), bus.installed_vectors());
}

#[test]
fn test_pull_receives_whole_blocks() {
    let bus = MockBus::new(BASE);
    let mut drv = Sb16::new(bus.clone(), config());
    let (pull, counter) = counting_pull();
    drv.start(pull).unwrap();

    drv.service_interrupt();
    assert_eq!(counter.load(Ordering::SeqCst) as usize, BLOCK_SAMPLES);
}

#[test]
fn test_interrupt_without_pending_status_is_ignored() {
    let bus = MockBus::new(BASE);
    let mut drv = Sb16::new(bus.clone(), config());
    let (pull, counter) = counting_pull();
    drv.start(pull).unwrap();

    // Exit auto-DMA by hand so the status register reads idle.
    drv.stop().unwrap();
    let pulls = counter.load(Ordering::SeqCst);
    drv.service_interrupt();
    // Spurious interrupt: no refill, but the controllers are still acked.
    assert_eq!(counter.load(Ordering::SeqCst), pulls);
}
