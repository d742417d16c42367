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
use std::error::Error;
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use tracing::error;

use sbmix::driver::{list_devices, CpalOutput};
use sbmix::{Engine, SourceState};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A fixed-point software audio mixer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Plays an audio file.
    Play {
        /// The path of the WAV or OGG file to play.
        path: String,
        /// The output device name. Uses the default device when omitted.
        #[arg(short, long)]
        device: Option<String>,
        /// Playback gain.
        #[arg(short, long, default_value_t = 1.0)]
        gain: f64,
        /// Stereo position, -1 (left) to 1 (right).
        #[arg(short, long, default_value_t = 0.0)]
        pan: f64,
        /// Pitch multiplier.
        #[arg(long, default_value_t = 1.0)]
        pitch: f64,
        /// Loop playback until interrupted.
        #[arg(short, long)]
        looped: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play {
            path,
            device,
            gain,
            pan,
            pitch,
            looped,
        } => {
            // A failed driver start leaves the rest of the program usable.
            let engine = match Engine::start(Box::new(CpalOutput::new(device))) {
                Ok(engine) => engine,
                Err(e) => {
                    error!(err = e.to_string(), "Audio output unavailable.");
                    Engine::disabled()
                }
            };

            let data = std::fs::read(&path)?;
            let id = {
                let mut mixer = engine.mixer();
                let id = mixer.source_from_bytes(data)?;
                mixer.set_gain(id, gain);
                mixer.set_pan(id, pan);
                mixer.set_pitch(id, pitch);
                mixer.set_loop(id, looped);
                mixer.play(id);
                id
            };

            if !engine.enabled() {
                println!("No audio output; exiting.");
                return Ok(());
            }

            println!("Playing {}.", path);
            while engine.mixer().get_state(id) == Some(SourceState::Playing) {
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    Ok(())
}
