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
// Host-audio realization of the driver pull contract: a producer thread
// drains the pull callback into a lock-free ring, and a cpal output stream
// drains the ring.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{error, info};

use crate::driver::error::DriverError;
use crate::driver::{Output, PullFn, BLOCK_SAMPLES, NATIVE_RATE};

/// Lock-free SPSC ring for interleaved i16 samples. Power-of-2 capacity so
/// positions wrap by masking.
struct SampleRing {
    buffer: Vec<i16>,
    capacity: usize,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        let cap = capacity.next_power_of_two();
        Self {
            buffer: vec![0; cap],
            capacity: cap,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.capacity - read + write
        }
    }

    #[inline]
    fn space(&self) -> usize {
        self.capacity - self.available() - 1
    }

    /// Writes as many samples as fit; returns the count written.
    fn write(&self, samples: &[i16]) -> usize {
        let space = self.space();
        if space == 0 {
            return 0;
        }
        let to_write = space.min(samples.len());
        let write = self.write_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;

        let first_chunk = (self.capacity - write).min(to_write);
        unsafe {
            let ptr = self.buffer.as_ptr().add(write) as *mut i16;
            std::ptr::copy_nonoverlapping(samples.as_ptr(), ptr, first_chunk);
        }

        if to_write > first_chunk {
            let second_chunk = to_write - first_chunk;
            unsafe {
                let ptr = self.buffer.as_ptr() as *mut i16;
                std::ptr::copy_nonoverlapping(samples.as_ptr().add(first_chunk), ptr, second_chunk);
            }
        }

        self.write_pos
            .store((write + to_write) & mask, Ordering::Release);
        to_write
    }

    /// Reads as many samples as are ready; returns the count read.
    fn read(&self, output: &mut [i16]) -> usize {
        let available = self.available();
        if available == 0 {
            return 0;
        }
        let to_read = available.min(output.len());
        let read = self.read_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;

        let first_chunk = (self.capacity - read).min(to_read);
        unsafe {
            let ptr = self.buffer.as_ptr().add(read);
            std::ptr::copy_nonoverlapping(ptr, output.as_mut_ptr(), first_chunk);
        }

        if to_read > first_chunk {
            let second_chunk = to_read - first_chunk;
            unsafe {
                let ptr = self.buffer.as_ptr();
                std::ptr::copy_nonoverlapping(
                    ptr,
                    output.as_mut_ptr().add(first_chunk),
                    second_chunk,
                );
            }
        }

        self.read_pos
            .store((read + to_read) & mask, Ordering::Release);
        to_read
    }
}

fn create_i16_callback(
    ring: Arc<SampleRing>,
) -> impl FnMut(&mut [i16], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
        let read = ring.read(data);
        data[read..].fill(0);
    }
}

fn create_f32_callback(
    ring: Arc<SampleRing>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let mut temp = vec![0i16; data.len()];
        let read = ring.read(&mut temp);
        temp[read..].fill(0);
        for (dst, &src) in data.iter_mut().zip(temp.iter()) {
            *dst = f32::from(src) / 32768.0;
        }
    }
}

/// An [`Output`] backed by a cpal device. Runs the same pull contract as
/// the hardware driver: the callback produces one interleaved stereo block
/// at the native rate whenever asked.
pub struct CpalOutput {
    device_name: Option<String>,
    /// Closed on stop; both worker threads exit when their receiver
    /// disconnects.
    stop_tx: Option<crossbeam_channel::Sender<()>>,
    producer_thread: Option<thread::JoinHandle<()>>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    /// A driver for the named device, or the host default if `None`.
    pub fn new(device_name: Option<String>) -> CpalOutput {
        CpalOutput {
            device_name,
            stop_tx: None,
            producer_thread: None,
            stream_thread: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, DriverError> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| DriverError::Host(e.to_string()))?
                .find(|d| d.name().map(|n| n.trim() == name.trim()).unwrap_or(false))
                .ok_or_else(|| DriverError::Host(format!("no device found with name {name}"))),
            None => host
                .default_output_device()
                .ok_or_else(|| DriverError::Host("no default output device".into())),
        }
    }
}

/// Builds the output stream inside its owning thread (a cpal stream cannot
/// cross threads) and parks until the stop channel closes. The build result
/// is reported back through `ready_tx`.
fn run_stream(
    device: cpal::Device,
    ring: Arc<SampleRing>,
    stop_rx: Receiver<()>,
    ready_tx: crossbeam_channel::Sender<Result<(), String>>,
) {
    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: NATIVE_RATE,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream_result = {
        let mut callback = create_i16_callback(ring.clone());
        device.build_output_stream(
            &config,
            move |data: &mut [i16], info: &cpal::OutputCallbackInfo| callback(data, info),
            |err| error!("output stream error: {}", err),
            None,
        )
    };

    // Hosts that refuse i16 get f32 with conversion.
    let stream_result = match stream_result {
        Ok(stream) => Ok(stream),
        Err(_) => {
            let mut callback = create_f32_callback(ring);
            device.build_output_stream(
                &config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| callback(data, info),
                |err| error!("output stream error: {}", err),
                None,
            )
        }
    };

    let stream = match stream_result {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("could not build output stream: {e}")));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(format!("could not start output stream: {e}")));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    loop {
        match stop_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

impl Output for CpalOutput {
    fn start(&mut self, mut pull: PullFn) -> Result<(), DriverError> {
        if self.stop_tx.is_some() {
            return Ok(());
        }

        let device = self.find_device()?;
        let name = device.name().unwrap_or_else(|_| "unknown".into());

        // About 100ms of stereo audio.
        let ring = Arc::new(SampleRing::new(NATIVE_RATE as usize * 2 / 10));
        let (stop_tx, stop_rx) = bounded::<()>(2);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let producer_ring = ring.clone();
        let producer_stop = stop_rx.clone();
        let producer_thread = thread::spawn(move || {
            let mut scratch = vec![0i16; BLOCK_SAMPLES];
            loop {
                match producer_stop.try_recv() {
                    Ok(()) | Err(crossbeam_channel::TryRecvError::Disconnected) => break,
                    Err(crossbeam_channel::TryRecvError::Empty) => {}
                }
                if producer_ring.space() >= BLOCK_SAMPLES {
                    pull(&mut scratch);
                    producer_ring.write(&scratch);
                } else {
                    thread::sleep(Duration::from_micros(500));
                }
            }
        });

        let stream_thread =
            thread::spawn(move || run_stream(device, ring, stop_rx, ready_tx));

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                drop(stop_tx);
                let _ = producer_thread.join();
                let _ = stream_thread.join();
                return Err(DriverError::Host(msg));
            }
            Err(_) => {
                drop(stop_tx);
                let _ = producer_thread.join();
                let _ = stream_thread.join();
                return Err(DriverError::Host("output thread died".into()));
            }
        }

        self.stop_tx = Some(stop_tx);
        self.producer_thread = Some(producer_thread);
        self.stream_thread = Some(stream_thread);

        info!(device = name, rate = NATIVE_RATE, "Host audio output started.");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        let Some(stop_tx) = self.stop_tx.take() else {
            return Err(DriverError::NotRunning);
        };
        drop(stop_tx);

        if let Some(thread) = self.producer_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.stream_thread.take() {
            let _ = thread.join();
        }

        info!("Host audio output stopped.");
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if self.stop_tx.is_some() {
            let _ = self.stop();
        }
    }
}

/// Names of host devices that can produce output, sorted.
pub fn list_devices() -> Result<Vec<String>, DriverError> {
    // Suppress noisy backend output here.
    let _shh_stdout = shh::stdout().map_err(|e| DriverError::Host(e.to_string()))?;
    let _shh_stderr = shh::stderr().map_err(|e| DriverError::Host(e.to_string()))?;

    let mut names = Vec::new();
    for host_id in cpal::available_hosts() {
        let host = cpal::host_from_id(host_id).map_err(|e| DriverError::Host(e.to_string()))?;
        let devices = match host.devices() {
            Ok(devices) => devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in devices {
            let Ok(configs) = device.supported_output_configs() else {
                continue;
            };
            if configs.count() == 0 {
                continue;
            }
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
    }

    names.sort();
    names.dedup();
    Ok(names)
}
