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
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::info;

use crate::driver::{DriverError, Output, NATIVE_RATE};
use crate::mixer::Mixer;

/// Ties an output driver to a shared mixer.
///
/// The driver's pull callback and the application both go through one mutex
/// around the mixer, which fills the role the mixer's lock hook plays on
/// hardware: the transfer path never observes a half-updated active set.
pub struct Engine {
    mixer: Arc<Mutex<Mixer>>,
    output: Option<Box<dyn Output>>,
}

impl Engine {
    /// Builds a mixer at the output's native rate and starts the output
    /// pulling from it.
    pub fn start(mut output: Box<dyn Output>) -> Result<Engine, DriverError> {
        let mixer = Arc::new(Mutex::new(Mixer::new(output.sample_rate())));

        let pull_mixer = mixer.clone();
        output.start(Box::new(move |dst: &mut [i16]| {
            pull_mixer.lock().process(dst);
        }))?;

        Ok(Engine {
            mixer,
            output: Some(output),
        })
    }

    /// An engine with no output driver. The mixer works normally but
    /// nothing drains it, so an application whose audio device failed to
    /// initialize keeps running silently.
    pub fn disabled() -> Engine {
        info!("Audio output disabled.");
        Engine {
            mixer: Arc::new(Mutex::new(Mixer::new(NATIVE_RATE))),
            output: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.output.is_some()
    }

    /// Locks and returns the mixer for control operations. Holding the
    /// guard stalls the output's pull callback, so keep it short.
    pub fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock()
    }

    /// Stops the output driver. The mixer survives; a disabled engine
    /// shuts down trivially.
    pub fn shutdown(&mut self) -> Result<(), DriverError> {
        match self.output.take() {
            Some(mut output) => output.stop(),
            None => Ok(()),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(mut output) = self.output.take() {
            let _ = output.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decoder;
    use crate::driver::PullFn;
    use crate::mixer::SourceState;

    /// An output that hands the pull callback to the test instead of a
    /// device, so blocks can be drained synchronously.
    struct TestOutput {
        pull: Arc<Mutex<Option<PullFn>>>,
        running: Arc<Mutex<bool>>,
    }

    impl TestOutput {
        fn new() -> (TestOutput, Arc<Mutex<Option<PullFn>>>, Arc<Mutex<bool>>) {
            let pull = Arc::new(Mutex::new(None));
            let running = Arc::new(Mutex::new(false));
            (
                TestOutput {
                    pull: pull.clone(),
                    running: running.clone(),
                },
                pull,
                running,
            )
        }
    }

    impl Output for TestOutput {
        fn start(&mut self, pull: PullFn) -> Result<(), DriverError> {
            *self.pull.lock() = Some(pull);
            *self.running.lock() = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), DriverError> {
            if !*self.running.lock() {
                return Err(DriverError::NotRunning);
            }
            *self.running.lock() = false;
            Ok(())
        }
    }

    #[test]
    fn test_pull_drains_mixer() {
        let (output, pull, _running) = TestOutput::new();
        let engine = Engine::start(Box::new(output)).unwrap();

        let id = {
            let mut mixer = engine.mixer();
            let dec = Decoder::from_pcm(vec![500; 8], 1, NATIVE_RATE).unwrap();
            let id = mixer.new_source(dec);
            mixer.play(id);
            id
        };

        let mut block = [0i16; 16];
        (pull.lock().as_mut().unwrap())(&mut block);
        assert_eq!(block, [500; 16]);

        // End of the non-looping source: silence and auto-stop.
        (pull.lock().as_mut().unwrap())(&mut block);
        assert_eq!(block, [0; 16]);
        assert_eq!(engine.mixer().get_state(id), Some(SourceState::Stopped));
    }

    #[test]
    fn test_failed_start_propagates() {
        struct FailingOutput;
        impl Output for FailingOutput {
            fn start(&mut self, _pull: PullFn) -> Result<(), DriverError> {
                Err(DriverError::ResetTimeout)
            }
            fn stop(&mut self) -> Result<(), DriverError> {
                Err(DriverError::NotRunning)
            }
        }

        assert!(matches!(
            Engine::start(Box::new(FailingOutput)),
            Err(DriverError::ResetTimeout)
        ));
    }

    #[test]
    fn test_disabled_engine_mixes_silently() {
        let mut engine = Engine::disabled();
        assert!(!engine.enabled());

        let id = {
            let mut mixer = engine.mixer();
            let dec = Decoder::from_pcm(vec![100; 4], 1, NATIVE_RATE).unwrap();
            let id = mixer.new_source(dec);
            mixer.play(id);
            id
        };
        assert_eq!(engine.mixer().get_state(id), Some(SourceState::Playing));
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_stops_output_once() {
        let (output, _pull, running) = TestOutput::new();
        let mut engine = Engine::start(Box::new(output)).unwrap();
        assert!(engine.enabled());
        assert!(*running.lock());

        engine.shutdown().unwrap();
        assert!(!*running.lock());
        assert!(!engine.enabled());
        // A second shutdown has nothing left to stop.
        engine.shutdown().unwrap();
    }
}
